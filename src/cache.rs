// src/cache.rs

//! Local archive cache
//!
//! Populates and evicts `<cache_dir>/{name}-{version}.pger` archives. An
//! archive only reaches its cache path after its SHA-256 matched the hash
//! published by the repository; until then it lives in a staging file under
//! `<cache_dir>/tmp` that is deleted on every exit path.

use crate::error::{Error, Result};
use crate::package::PackageId;
use crate::registry::Registry;
use crate::registry::models::RecordUpdate;
use crate::repository::{CatalogScope, PackageSource};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Name of the staging directory inside the cache directory
pub const STAGING_DIR_NAME: &str = "tmp";

/// Default number of retries for transfer failures
pub const DEFAULT_RETRIES: u32 = 2;

/// Base delay between retries, multiplied by the attempt number
const RETRY_DELAY_MS: u64 = 500;

/// Result of a single `get_package` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Archive downloaded, verified and moved into the cache
    Fetched,
    /// A verified archive was already cached; nothing changed
    AlreadyCached,
}

/// A package that could not be processed during a batch operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryFailure {
    pub package: String,
    pub reason: String,
}

/// Summary of an `update_cache` run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub scope: CatalogScope,
    pub fetched: Vec<String>,
    pub already_cached: Vec<String>,
    pub failed: Vec<EntryFailure>,
}

/// Summary of a `clear_cache` sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClearReport {
    pub removed: Vec<String>,
    pub failed: Vec<EntryFailure>,
}

/// Cache manager over a package source and the registry
pub struct CacheManager<S> {
    cache_dir: PathBuf,
    staging_dir: PathBuf,
    registry: Arc<Registry>,
    source: S,
    retries: u32,
}

impl<S: PackageSource> CacheManager<S> {
    /// Create a cache manager rooted at `cache_dir`, creating the cache and
    /// staging directories if needed
    pub fn new(cache_dir: impl Into<PathBuf>, registry: Arc<Registry>, source: S) -> Result<Self> {
        let cache_dir = cache_dir.into();
        let staging_dir = cache_dir.join(STAGING_DIR_NAME);

        fs::create_dir_all(&staging_dir).map_err(|e| {
            Error::InitError(format!(
                "Failed to create cache directory {}: {}",
                staging_dir.display(),
                e
            ))
        })?;

        Ok(Self {
            cache_dir,
            staging_dir,
            registry,
            source,
            retries: DEFAULT_RETRIES,
        })
    }

    /// Set how many times a transfer failure is retried
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Canonical cache path of the archive of `id`
    pub fn archive_path(&self, id: &PackageId) -> PathBuf {
        self.cache_dir.join(id.archive_file_name())
    }

    /// Download, verify and register the archive of `id`
    ///
    /// # Process
    ///
    /// 1. Skip entirely if a cached archive is already recorded and present
    /// 2. Download into a staging file
    /// 3. Fetch the published hash and compare with the staged bytes
    /// 4. Register the package (an existing record is reused)
    /// 5. Rename the staging file onto the cache path
    /// 6. Mark `in_cache`
    ///
    /// The staging file is removed on every exit path. A hash mismatch
    /// leaves both the cache and the registry untouched.
    pub fn get_package(&self, id: &PackageId) -> Result<FetchOutcome> {
        self.fetch(id, None)
    }

    /// `get_package`, additionally requiring the archive to match the hash a
    /// catalog listed for it
    fn fetch(&self, id: &PackageId, catalog_hash: Option<&str>) -> Result<FetchOutcome> {
        let archive_path = self.archive_path(id);

        if self.is_cached(id, &archive_path)? {
            debug!("{} already cached at {}", id, archive_path.display());
            return Ok(FetchOutcome::AlreadyCached);
        }

        let mut staged = tempfile::Builder::new()
            .prefix(&format!("{}.", id.stem()))
            .suffix(".part")
            .tempfile_in(&self.staging_dir)
            .map_err(|e| {
                Error::FilesystemError(format!(
                    "Failed to create staging file in {}: {}",
                    self.staging_dir.display(),
                    e
                ))
            })?;

        self.retrying(&format!("download of {}", id), || {
            let file = staged.as_file_mut();
            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
            self.source.fetch_archive(id, file)
        })?;
        staged.as_file().sync_all()?;

        let expected = self.retrying(&format!("hash lookup of {}", id), || {
            self.source.fetch_hash(id)
        })?;
        let actual = file_sha256(staged.path())?;

        if actual != expected.to_ascii_lowercase() {
            warn!("Integrity check failed for {}", id);
            return Err(Error::IntegrityError {
                package: id.stem(),
                expected,
                actual,
            });
        }
        if let Some(listed) = catalog_hash {
            if actual != listed.to_ascii_lowercase() {
                warn!("{} does not match the catalog hash", id);
                return Err(Error::IntegrityError {
                    package: id.stem(),
                    expected: listed.to_string(),
                    actual,
                });
            }
        }
        debug!("Checksum verified for {}: {}", id, actual);

        match self.registry.add(id, false) {
            Ok(()) => {}
            Err(Error::AlreadyExists(_)) => {
                if self.is_cached(id, &archive_path)? {
                    return Ok(FetchOutcome::AlreadyCached);
                }
                debug!("{} is registered but not cached, repopulating", id);
            }
            Err(e) => return Err(e),
        }

        staged.persist(&archive_path).map_err(|e| {
            Error::FilesystemError(format!(
                "Failed to move archive into {}: {}",
                archive_path.display(),
                e.error
            ))
        })?;

        self.registry.update(id, RecordUpdate::in_cache(true))?;

        info!("Cached {} at {}", id, archive_path.display());
        Ok(FetchOutcome::Fetched)
    }

    /// Synchronize against a catalog; `mode` is `"latest"` or `"all"`
    ///
    /// The mode is validated before any network activity.
    pub fn update_cache(&self, mode: &str) -> Result<SyncReport> {
        let scope: CatalogScope = mode.parse()?;
        self.sync(scope)
    }

    /// Fetch every package listed by the `scope` catalog
    ///
    /// A failing entry is logged and recorded in the report; the batch
    /// continues with the remaining entries.
    pub fn sync(&self, scope: CatalogScope) -> Result<SyncReport> {
        let entries = self.retrying(&format!("{} catalog download", scope), || {
            self.source.fetch_catalog(scope)
        })?;

        info!("Synchronizing {} catalog entries ({})", entries.len(), scope);

        let mut report = SyncReport {
            scope,
            fetched: Vec::new(),
            already_cached: Vec::new(),
            failed: Vec::new(),
        };

        for entry in entries {
            let label = format!("{}-{}", entry.name, entry.version);
            let outcome = PackageId::new(entry.name, entry.version)
                .and_then(|id| self.fetch(&id, entry.sha256.as_deref()));

            match outcome {
                Ok(FetchOutcome::Fetched) => report.fetched.push(label),
                Ok(FetchOutcome::AlreadyCached) => report.already_cached.push(label),
                Err(e) => {
                    warn!("Failed to cache {}: {}", label, e);
                    report.failed.push(EntryFailure {
                        package: label,
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            "Catalog sync finished: {} fetched, {} already cached, {} failed",
            report.fetched.len(),
            report.already_cached.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Delete the cached archive of `id` and clear its `in_cache` flag
    ///
    /// An archive that is already gone counts as removed.
    pub fn remove_from_cache(&self, id: &PackageId) -> Result<()> {
        self.registry.get(id)?;

        let archive_path = self.archive_path(id);
        match fs::remove_file(&archive_path) {
            Ok(()) => info!("Removed {} from cache", id),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Archive {} already absent", archive_path.display());
            }
            Err(e) => {
                return Err(Error::FilesystemError(format!(
                    "Failed to delete {}: {}",
                    archive_path.display(),
                    e
                )));
            }
        }

        self.registry.update(id, RecordUpdate::in_cache(false))
    }

    /// Evict every registered package; failures are collected, not fatal
    pub fn clear_cache(&self) -> Result<ClearReport> {
        let mut report = ClearReport::default();

        for record in self.registry.list_all()? {
            let label = format!("{}-{}", record.name, record.version);

            let result = record
                .id()
                .ok_or_else(|| {
                    Error::InvalidArgument(format!("registry entry {} has an unsafe name", label))
                })
                .and_then(|id| self.remove_from_cache(&id));

            match result {
                Ok(()) => report.removed.push(label),
                Err(e) => {
                    warn!("Failed to evict {}: {}", label, e);
                    report.failed.push(EntryFailure {
                        package: label,
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            "Cache cleared: {} evicted, {} failed",
            report.removed.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Delete staging files left behind by an interrupted download
    pub fn purge_staging(&self) -> Result<usize> {
        let mut purged = 0;

        for entry in fs::read_dir(&self.staging_dir)? {
            let path = entry?.path();
            let removed = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };

            match removed {
                Ok(()) => purged += 1,
                Err(e) => warn!("Failed to purge {}: {}", path.display(), e),
            }
        }

        if purged > 0 {
            info!("Purged {} stale staging file(s)", purged);
        }
        Ok(purged)
    }

    fn is_cached(&self, id: &PackageId, archive_path: &Path) -> Result<bool> {
        Ok(self
            .registry
            .find(id)?
            .is_some_and(|record| record.in_cache && archive_path.is_file()))
    }

    /// Run `op`, retrying transfer failures with a linear back-off
    fn retrying<T>(&self, what: &str, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op() {
                Err(Error::TransferError(msg)) if attempt <= self.retries => {
                    warn!("{} attempt {} failed: {}, retrying...", what, attempt, msg);
                    std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS * attempt as u64));
                }
                other => return other,
            }
        }
    }
}

/// Lowercase hex SHA-256 of a file
pub fn file_sha256(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| {
        Error::FilesystemError(format!("Failed to open {} for checksum: {}", path.display(), e))
    })?;

    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).map_err(|e| {
        Error::FilesystemError(format!("Failed to read {} for checksum: {}", path.display(), e))
    })?;

    Ok(format!("{:x}", hasher.finalize()))
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "update_cache ({}): {} fetched, {} already cached, {} failed",
            self.scope,
            self.fetched.len(),
            self.already_cached.len(),
            self.failed.len()
        )?;
        for failure in &self.failed {
            write!(f, "\n  {}: {}", failure.package, failure.reason)?;
        }
        Ok(())
    }
}

impl fmt::Display for ClearReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "clear_cache: {} evicted, {} failed",
            self.removed.len(),
            self.failed.len()
        )?;
        for failure in &self.failed {
            write!(f, "\n  {}: {}", failure.package, failure.reason)?;
        }
        Ok(())
    }
}
