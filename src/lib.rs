// src/lib.rs

//! pger package manager
//!
//! A small package manager driven through a local control daemon. Archives
//! are downloaded from a single HTTP repository, verified against the
//! published SHA-256, kept in a local cache and unpacked into an install
//! directory.
//!
//! # Architecture
//!
//! - Registry: one JSON document of per-package lifecycle flags, replaced
//!   atomically on every mutation
//! - Cache: verified `{name}-{version}.pger` archives; nothing unverified
//!   reaches a cache path
//! - Installer: staged extraction committed by a single rename
//! - Daemon: one request at a time over a Unix domain socket

pub mod cache;
pub mod client;
pub mod config;
pub mod daemon;
mod error;
pub mod installer;
pub mod package;
pub mod registry;
pub mod repository;

pub use error::{Error, Result};
pub use package::PackageId;
