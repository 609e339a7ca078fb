// src/repository/mod.rs

//! Remote repository access
//!
//! This module provides functionality for:
//! - Downloading package archives
//! - Fetching the published SHA-256 of a package
//! - Downloading and parsing the latest/full catalogs
//!
//! The client is stateless and performs no retries; callers decide on retry
//! policy. Every non-success HTTP status is mapped to a typed error.

pub mod catalog;

pub use catalog::{CatalogEntry, parse_catalog};

use crate::error::{Error, Result};
use crate::package::PackageId;
use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use std::fmt;
use std::io::{self, Write};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// Default timeout for HTTP requests (30 seconds)
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Which catalog document to synchronize against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogScope {
    /// One version per package (`/list`)
    Latest,
    /// Every version of every package (`/full_list`)
    Full,
}

impl CatalogScope {
    /// Mode name accepted on the command surface
    pub fn as_str(&self) -> &str {
        match self {
            CatalogScope::Latest => "latest",
            CatalogScope::Full => "all",
        }
    }

    /// Repository endpoint serving this catalog
    pub fn endpoint(&self) -> &str {
        match self {
            CatalogScope::Latest => "list",
            CatalogScope::Full => "full_list",
        }
    }
}

impl FromStr for CatalogScope {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "latest" => Ok(CatalogScope::Latest),
            "all" => Ok(CatalogScope::Full),
            _ => Err(Error::InvalidArgument(format!(
                "unknown update mode '{}': expected \"latest\" or \"all\"",
                s
            ))),
        }
    }
}

impl fmt::Display for CatalogScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source of package archives, hashes and catalogs
pub trait PackageSource {
    /// Stream the archive of `id` into `sink`, returning the byte count
    fn fetch_archive(&self, id: &PackageId, sink: &mut dyn Write) -> Result<u64>;

    /// Published lowercase hex SHA-256 of the archive of `id`
    fn fetch_hash(&self, id: &PackageId) -> Result<String>;

    /// Entries of the requested catalog
    fn fetch_catalog(&self, scope: CatalogScope) -> Result<Vec<CatalogEntry>>;
}

/// HTTP client for a pger repository
pub struct HttpRepository {
    client: Client,
    base_url: String,
}

impl HttpRepository {
    /// Create a client for the repository at `base_url`
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::InitError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn archive_url(&self, id: &PackageId) -> String {
        format!("{}/download/{}", self.base_url, id.stem())
    }

    fn hash_url(&self, id: &PackageId) -> String {
        format!("{}/download/sha256/{}", self.base_url, id.stem())
    }

    fn catalog_url(&self, scope: CatalogScope) -> String {
        format!("{}/{}", self.base_url, scope.endpoint())
    }

    /// GET `url`, mapping 404 to `NotFound` and other failures to
    /// `TransferError`
    fn get(&self, url: &str) -> Result<Response> {
        debug!("GET {}", url);

        let response = self.client.get(url).send().map_err(|e| {
            if e.is_timeout() {
                Error::TransferError(format!("Timed out requesting {}", url))
            } else {
                Error::TransferError(format!("Failed to request {}: {}", url, e))
            }
        })?;

        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::NOT_FOUND => Err(Error::NotFound(format!("{} (HTTP 404)", url))),
            status => Err(Error::TransferError(format!("HTTP {} from {}", status, url))),
        }
    }
}

impl PackageSource for HttpRepository {
    fn fetch_archive(&self, id: &PackageId, sink: &mut dyn Write) -> Result<u64> {
        let url = self.archive_url(id);
        let mut response = self.get(&url)?;

        let written = io::copy(&mut response, sink).map_err(|e| {
            Error::TransferError(format!("Failed to read archive from {}: {}", url, e))
        })?;

        info!("Downloaded {} ({} bytes)", id, written);
        Ok(written)
    }

    fn fetch_hash(&self, id: &PackageId) -> Result<String> {
        let url = self.hash_url(id);
        let body = self
            .get(&url)?
            .text()
            .map_err(|e| Error::TransferError(format!("Failed to read {}: {}", url, e)))?;

        parse_digest(&body)
    }

    fn fetch_catalog(&self, scope: CatalogScope) -> Result<Vec<CatalogEntry>> {
        let url = self.catalog_url(scope);
        info!("Fetching {} catalog from {}", scope, url);

        let body = self
            .get(&url)?
            .text()
            .map_err(|e| Error::TransferError(format!("Failed to read {}: {}", url, e)))?;

        parse_catalog(&body)
    }
}

/// Normalize a published digest: first whitespace-separated token,
/// lowercased, and required to be 64 hex characters
pub fn parse_digest(body: &str) -> Result<String> {
    let digest = body
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();

    if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::ParseError(format!(
            "Invalid SHA-256 digest '{}'",
            body.trim()
        )));
    }

    Ok(digest)
}
