// src/config.rs

//! Daemon configuration
//!
//! Read once at startup from a TOML file:
//!
//! ```toml
//! install_dir = "/opt/pger"
//! cache_dir = "/var/cache/pger"
//! repository = "http://packages.example:8080"
//! # optional
//! socket_path = "/tmp/pger.sock"
//! registry_path = "/var/cache/pger/registry.json"
//! timeout_secs = 30
//! retries = 2
//! ```

use crate::cache::DEFAULT_RETRIES;
use crate::error::{Error, Result};
use crate::registry::REGISTRY_FILE_NAME;
use crate::repository::HTTP_TIMEOUT;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/pger/config.toml";

/// Default control socket location
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/pger.sock";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Directory holding installed packages
    pub install_dir: PathBuf,
    /// Directory holding cached archives
    pub cache_dir: PathBuf,
    /// Base URL of the package repository
    pub repository: String,
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,
    /// Registry document; defaults to `<cache_dir>/registry.json`
    #[serde(default)]
    pub registry_path: Option<PathBuf>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
}

fn default_socket_path() -> PathBuf {
    PathBuf::from(DEFAULT_SOCKET_PATH)
}

fn default_timeout_secs() -> u64 {
    HTTP_TIMEOUT.as_secs()
}

fn default_retries() -> u32 {
    DEFAULT_RETRIES
}

impl Config {
    /// Load and validate the configuration file at `path`
    pub fn load(path: &Path) -> Result<Self> {
        debug!("Loading configuration from {}", path.display());

        let content = fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::ConfigError(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a configuration document
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| Error::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let url = self.repository.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(Error::ConfigError(format!(
                "repository must be an http(s) URL, got '{}'",
                self.repository
            )));
        }

        if self.timeout_secs == 0 {
            return Err(Error::ConfigError(
                "timeout_secs must be greater than zero".to_string(),
            ));
        }

        if self.install_dir.as_os_str().is_empty() || self.cache_dir.as_os_str().is_empty() {
            return Err(Error::ConfigError(
                "install_dir and cache_dir must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Replace `socket_path` when a socket was given on the command line
    pub fn with_socket_override(mut self, socket: Option<PathBuf>) -> Self {
        if let Some(socket) = socket {
            self.socket_path = socket;
        }
        self
    }

    pub fn registry_path(&self) -> PathBuf {
        self.registry_path
            .clone()
            .unwrap_or_else(|| self.cache_dir.join(REGISTRY_FILE_NAME))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        install_dir = "/opt/pger"
        cache_dir = "/var/cache/pger"
        repository = "http://repo.example:8080"
    "#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = Config::from_toml(MINIMAL).unwrap();

        assert_eq!(config.install_dir, PathBuf::from("/opt/pger"));
        assert_eq!(config.socket_path, PathBuf::from(DEFAULT_SOCKET_PATH));
        assert_eq!(
            config.registry_path(),
            PathBuf::from("/var/cache/pger/registry.json")
        );
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.retries, DEFAULT_RETRIES);
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_toml(
            r#"
            install_dir = "/opt/pger"
            cache_dir = "/var/cache/pger"
            repository = "https://repo.example"
            socket_path = "/run/pger.sock"
            registry_path = "/var/lib/pger/state.json"
            timeout_secs = 5
            retries = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.socket_path, PathBuf::from("/run/pger.sock"));
        assert_eq!(config.registry_path(), PathBuf::from("/var/lib/pger/state.json"));
        assert_eq!(config.timeout_secs, 5);
        assert_eq!(config.retries, 0);
    }

    #[test]
    fn test_socket_override() {
        let config = Config::from_toml(MINIMAL).unwrap();

        let kept = config.clone().with_socket_override(None);
        assert_eq!(kept.socket_path, PathBuf::from(DEFAULT_SOCKET_PATH));

        let overridden = config.with_socket_override(Some(PathBuf::from("/run/alt.sock")));
        assert_eq!(overridden.socket_path, PathBuf::from("/run/alt.sock"));
    }

    #[test]
    fn test_missing_required_key() {
        let result = Config::from_toml(r#"install_dir = "/opt/pger""#);
        assert!(matches!(result, Err(Error::ConfigError(_))));
    }

    #[test]
    fn test_rejects_non_http_repository() {
        let result = Config::from_toml(
            r#"
            install_dir = "/opt/pger"
            cache_dir = "/var/cache/pger"
            repository = "ftp://repo.example"
            "#,
        );
        assert!(matches!(result, Err(Error::ConfigError(_))));
    }

    #[test]
    fn test_rejects_unknown_keys() {
        let result = Config::from_toml(&format!("{}\nrepo_url = \"x\"\n", MINIMAL));
        assert!(matches!(result, Err(Error::ConfigError(_))));
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, MINIMAL).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.repository, "http://repo.example:8080");

        let missing = Config::load(&temp_dir.path().join("absent.toml"));
        assert!(matches!(missing, Err(Error::ConfigError(_))));
    }
}
