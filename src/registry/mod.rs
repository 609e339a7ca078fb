// src/registry/mod.rs

//! Package-state registry
//!
//! This module owns the durable record of which packages are cached,
//! installed and built:
//! - Registry document creation on first start
//! - Lookup and listing of package records
//! - Add / partial update / remove, each as a full load-modify-save cycle
//! - Atomic persistence (temp file in the same directory, then rename)
//!
//! Nothing is kept in memory between calls; every read goes to disk so the
//! daemon always acts on the persisted state.

pub mod models;

use crate::error::{Error, Result};
use crate::package::PackageId;
use models::{PackageRecord, RecordUpdate, RegistryDocument};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Default file name of the registry document inside the cache directory
pub const REGISTRY_FILE_NAME: &str = "registry.json";

/// Suffix of the temp document written during a save
const TEMP_SUFFIX: &str = ".tmp";

/// Handle to the on-disk registry document
#[derive(Debug, Clone)]
pub struct Registry {
    path: PathBuf,
}

impl Registry {
    /// Open the registry at `path`, creating an empty document if absent
    ///
    /// Parent directories are created as needed. Opening an existing
    /// registry validates that it parses.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let registry = Self { path: path.into() };

        if registry.path.exists() {
            registry.load()?;
            debug!("Opened registry at {}", registry.path.display());
        } else {
            if let Some(parent) = registry.path.parent() {
                fs::create_dir_all(parent).map_err(|e| {
                    Error::InitError(format!(
                        "Failed to create registry directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
            registry.save(&RegistryDocument::default())?;
            info!("Created empty registry at {}", registry.path.display());
        }

        Ok(registry)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Look up one record
    pub fn get(&self, id: &PackageId) -> Result<PackageRecord> {
        self.load()?
            .find(id)
            .cloned()
            .ok_or_else(|| not_found(id))
    }

    /// Look up one record, mapping absence to `None`
    pub fn find(&self, id: &PackageId) -> Result<Option<PackageRecord>> {
        Ok(self.load()?.find(id).cloned())
    }

    /// All records in document order
    pub fn list_all(&self) -> Result<Vec<PackageRecord>> {
        Ok(self.load()?.packages)
    }

    /// Register a new package; fails without mutation if the key exists
    pub fn add(&self, id: &PackageId, needs_build: bool) -> Result<()> {
        let mut doc = self.load()?;

        if doc.find(id).is_some() {
            return Err(Error::AlreadyExists(format!(
                "package {} is already registered",
                id
            )));
        }

        doc.packages.push(PackageRecord::new(id, needs_build));
        self.save(&doc)?;

        debug!("Registered {}", id);
        Ok(())
    }

    /// Change only the fields supplied in `update`
    pub fn update(&self, id: &PackageId, update: RecordUpdate) -> Result<()> {
        let mut doc = self.load()?;
        let record = doc.find_mut(id).ok_or_else(|| not_found(id))?;

        if update.built.is_some() && record.built.is_none() {
            return Err(Error::InvalidArgument(format!(
                "package {} has no build step",
                id
            )));
        }

        update.apply_to(record);
        self.save(&doc)?;

        debug!("Updated {}: {:?}", id, update);
        Ok(())
    }

    /// Give an existing record a build step (`built = false`)
    ///
    /// A record that already has one keeps its current `built` value.
    pub fn mark_needs_build(&self, id: &PackageId) -> Result<()> {
        let mut doc = self.load()?;
        let record = doc.find_mut(id).ok_or_else(|| not_found(id))?;

        if record.built.is_some() {
            return Ok(());
        }
        record.built = Some(false);
        self.save(&doc)?;

        debug!("{} now requires a build step", id);
        Ok(())
    }

    /// Drop a record
    pub fn remove(&self, id: &PackageId) -> Result<()> {
        let mut doc = self.load()?;
        doc.take(id).ok_or_else(|| not_found(id))?;
        self.save(&doc)?;

        debug!("Removed {} from registry", id);
        Ok(())
    }

    /// Delete temp documents left behind by a save that never completed
    pub fn purge_stale_temp(&self) -> Result<usize> {
        let Some(dir) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) else {
            return Ok(0);
        };
        let prefix = self.temp_prefix();
        let mut purged = 0;

        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if !(name.starts_with(&prefix) && name.ends_with(TEMP_SUFFIX)) {
                continue;
            }

            match fs::remove_file(entry.path()) {
                Ok(()) => purged += 1,
                Err(e) => warn!("Failed to purge {}: {}", entry.path().display(), e),
            }
        }

        if purged > 0 {
            info!("Purged {} stale registry temp file(s)", purged);
        }
        Ok(purged)
    }

    /// `.registry.json.` for a registry at `.../registry.json`
    fn temp_prefix(&self) -> String {
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        format!(".{}.", file_name)
    }

    fn load(&self) -> Result<RegistryDocument> {
        let bytes = fs::read(&self.path).map_err(|e| {
            Error::FilesystemError(format!(
                "Failed to read registry {}: {}",
                self.path.display(),
                e
            ))
        })?;

        serde_json::from_slice(&bytes).map_err(|e| {
            Error::ParseError(format!(
                "Invalid registry document {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    /// Write the whole document to a sibling temp file, fsync, then rename
    /// it over the registry so readers never see a partial document
    fn save(&self, doc: &RegistryDocument) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(doc)
            .map_err(|e| Error::ParseError(format!("Failed to encode registry: {}", e)))?;

        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let write_err = |e: std::io::Error| {
            Error::FilesystemError(format!(
                "Failed to write registry {}: {}",
                self.path.display(),
                e
            ))
        };

        let mut temp = tempfile::Builder::new()
            .prefix(&self.temp_prefix())
            .suffix(TEMP_SUFFIX)
            .tempfile_in(dir)
            .map_err(write_err)?;
        temp.write_all(&bytes).map_err(write_err)?;
        temp.as_file().sync_all().map_err(write_err)?;
        temp.persist(&self.path).map_err(|e| write_err(e.error))?;

        Ok(())
    }
}

fn not_found(id: &PackageId) -> Error {
    Error::NotFound(format!("package {} is not registered", id))
}
