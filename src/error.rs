// src/error.rs

use thiserror::Error;

/// Core error types for Pger
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Package, record or file absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Duplicate registration
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Downloaded archive does not match the repository hash
    #[error("Integrity check failed for {package}: expected {expected}, got {actual}")]
    IntegrityError {
        package: String,
        expected: String,
        actual: String,
    },

    /// Network or HTTP failure
    #[error("Transfer error: {0}")]
    TransferError(String),

    /// Archive could not be unpacked
    #[error("Extraction error: {0}")]
    ExtractionError(String),

    /// Filesystem operation failed
    #[error("Filesystem error: {0}")]
    FilesystemError(String),

    /// Bad command argument, mode or arity
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Registry update failed after the filesystem already changed.
    /// The install tree and the registry have drifted apart.
    #[error("State error (manual reconciliation required): {0}")]
    StateError(String),

    /// Malformed IPC request
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Install requested for a package without a cached archive
    #[error("Package {0} is not in cache")]
    NotInCache(String),

    /// Delete requested for a package that is not installed
    #[error("Package {0} is not installed")]
    NotInstalled(String),

    /// Install target directory already present
    #[error("Package {0} is already installed")]
    AlreadyInstalled(String),

    /// Registry or catalog document could not be parsed
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Configuration file missing or invalid
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Component initialization error
    #[error("Failed to initialize: {0}")]
    InitError(String),
}

/// Result type alias using Pger's Error type
pub type Result<T> = std::result::Result<T, Error>;
