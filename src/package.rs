// src/package.rs

//! Package identity
//!
//! A package is addressed by its `(name, version)` pair. Both parts end up in
//! cache file names, install directory names and repository URLs, so they are
//! validated once, when the identity is constructed, and every other module
//! relies on a `PackageId` being safe to join onto a path.

use crate::error::{Error, Result};
use std::fmt;

/// Longest accepted name or version component
const MAX_COMPONENT_LEN: usize = 128;

/// File extension of cached package archives
pub const ARCHIVE_EXTENSION: &str = "pger";

/// Validated `(name, version)` key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageId {
    name: String,
    version: String,
}

impl PackageId {
    /// Create a package identity, rejecting anything that is not safe to use
    /// as a path component
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let version = version.into();

        validate_component("name", &name)?;
        validate_component("version", &version)?;

        Ok(Self { name, version })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Canonical `{name}-{version}` stem used by the repository, the cache
    /// and the install tree
    pub fn stem(&self) -> String {
        format!("{}-{}", self.name, self.version)
    }

    /// File name of the cached archive
    pub fn archive_file_name(&self) -> String {
        format!("{}.{}", self.stem(), ARCHIVE_EXTENSION)
    }

    /// Whether `name`/`version` refer to this package
    pub fn matches(&self, name: &str, version: &str) -> bool {
        self.name == name && self.version == version
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.version)
    }
}

fn validate_component(kind: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::InvalidArgument(format!("package {} is empty", kind)));
    }

    if value.len() > MAX_COMPONENT_LEN {
        return Err(Error::InvalidArgument(format!(
            "package {} exceeds {} bytes",
            kind, MAX_COMPONENT_LEN
        )));
    }

    // Leading '.' covers "." and ".."; leading '-' would read as a flag
    if value.starts_with('.') || value.starts_with('-') {
        return Err(Error::InvalidArgument(format!(
            "package {} '{}' must not start with '.' or '-'",
            kind, value
        )));
    }

    if let Some(bad) = value
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '+' | '-')))
    {
        return Err(Error::InvalidArgument(format!(
            "package {} '{}' contains forbidden character {:?}",
            kind, value, bad
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_identity() {
        let id = PackageId::new("demo", "1.0.0").unwrap();
        assert_eq!(id.name(), "demo");
        assert_eq!(id.version(), "1.0.0");
        assert_eq!(id.stem(), "demo-1.0.0");
        assert_eq!(id.archive_file_name(), "demo-1.0.0.pger");
        assert!(id.matches("demo", "1.0.0"));
        assert!(!id.matches("demo", "1.0.1"));
    }

    #[test]
    fn test_accepts_common_version_shapes() {
        assert!(PackageId::new("lib_foo-bar", "2.3.4-rc.1").is_ok());
        assert!(PackageId::new("gtk+", "3.24.0+build5").is_ok());
    }

    #[test]
    fn test_rejects_path_traversal() {
        assert!(matches!(
            PackageId::new("..", "1.0"),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            PackageId::new("demo", "../../etc"),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            PackageId::new("a/b", "1.0"),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_rejects_empty_and_oversized() {
        assert!(PackageId::new("", "1.0").is_err());
        assert!(PackageId::new("demo", "").is_err());
        assert!(PackageId::new("x".repeat(129), "1.0").is_err());
        assert!(PackageId::new("x".repeat(128), "1.0").is_ok());
    }

    #[test]
    fn test_rejects_flag_like_and_whitespace() {
        assert!(PackageId::new("-rf", "1.0").is_err());
        assert!(PackageId::new("demo", "1.0 beta").is_err());
        assert!(PackageId::new("démo", "1.0").is_err());
    }
}
