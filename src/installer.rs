// src/installer.rs

//! Package installation and removal
//!
//! Installation never writes directly into `<install_dir>/{name}-{version}`:
//! the cached archive is unpacked into a private `.staging-*` directory inside
//! the install directory (same filesystem, so the final step is a rename) and
//! only the fully extracted tree is moved into place. Removal works the same
//! way in reverse: the package directory is first renamed out of the tree,
//! then deleted.

use crate::cache::CacheManager;
use crate::error::{Error, Result};
use crate::package::PackageId;
use crate::registry::Registry;
use crate::registry::models::RecordUpdate;
use crate::repository::PackageSource;
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tar::Archive;
use tempfile::TempDir;
use tracing::{debug, error, info, warn};

/// Prefix of staging directories inside the install directory
pub const STAGING_PREFIX: &str = ".staging-";

/// What happened to the cache entry during `delete_package`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eviction {
    NotRequested,
    Evicted,
    /// Uninstall succeeded, eviction did not; the uninstall is kept
    Failed(String),
}

/// Extracted package waiting to be moved into the install tree
struct StagedInstall {
    _staging: TempDir,
    /// Directory that becomes `<install_dir>/{name}-{version}`
    root: PathBuf,
}

/// Installs cached archives into the install tree
pub struct Installer {
    install_dir: PathBuf,
    cache_dir: PathBuf,
    registry: Arc<Registry>,
}

impl Installer {
    /// Create an installer, creating the install directory if needed
    pub fn new(
        install_dir: impl Into<PathBuf>,
        cache_dir: impl Into<PathBuf>,
        registry: Arc<Registry>,
    ) -> Result<Self> {
        let install_dir = install_dir.into();

        fs::create_dir_all(&install_dir).map_err(|e| {
            Error::InitError(format!(
                "Failed to create install directory {}: {}",
                install_dir.display(),
                e
            ))
        })?;

        Ok(Self {
            install_dir,
            cache_dir: cache_dir.into(),
            registry,
        })
    }

    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }

    /// Final location of an installed package
    pub fn install_path(&self, id: &PackageId) -> PathBuf {
        self.install_dir.join(id.stem())
    }

    /// Install a cached package
    ///
    /// # Process
    ///
    /// 1. Require a cached archive (no implicit download)
    /// 2. Extract into a fresh staging directory
    /// 3. Rename the extracted tree onto `<install_dir>/{name}-{version}`
    /// 4. Mark the package installed
    ///
    /// # Errors
    ///
    /// - `NotInCache` if there is no cached archive; nothing is written
    /// - `AlreadyInstalled` if the target directory exists
    /// - `ExtractionError` / `FilesystemError` if staging or the final move
    ///   fail; the staging directory is removed and no target is left behind
    /// - `StateError` if the files are in place but the registry could not
    ///   be updated
    pub fn install_package(&self, id: &PackageId) -> Result<PathBuf> {
        let in_cache = self
            .registry
            .find(id)?
            .is_some_and(|record| record.in_cache);
        let archive_path = self.cache_dir.join(id.archive_file_name());

        if !in_cache || !archive_path.is_file() {
            return Err(Error::NotInCache(id.stem()));
        }

        let target = self.install_path(id);
        if target.symlink_metadata().is_ok() {
            return Err(Error::AlreadyInstalled(id.stem()));
        }

        let staged = self.stage(id, &archive_path)?;
        self.commit(id, staged, &target)
    }

    /// Extract the cached archive of `id` into a fresh staging directory
    fn stage(&self, id: &PackageId, archive_path: &Path) -> Result<StagedInstall> {
        let staging = self.staging_dir()?;
        let extracted = staging.path().join("root");
        fs::create_dir(&extracted).map_err(|e| {
            Error::FilesystemError(format!(
                "Failed to create {}: {}",
                extracted.display(),
                e
            ))
        })?;

        debug!("Extracting {} into {}", archive_path.display(), extracted.display());
        unpack_archive(archive_path, &extracted)?;

        let root = committed_root(&extracted, id)?;
        Ok(StagedInstall {
            _staging: staging,
            root,
        })
    }

    /// Move a staged tree onto `target` and mark the package installed
    ///
    /// The staging directory goes away on every path out of here.
    fn commit(&self, id: &PackageId, staged: StagedInstall, target: &Path) -> Result<PathBuf> {
        fs::rename(&staged.root, target).map_err(|e| {
            Error::FilesystemError(format!(
                "Failed to move {} into {}: {}",
                staged.root.display(),
                target.display(),
                e
            ))
        })?;
        drop(staged);

        self.registry
            .update(id, RecordUpdate::installed(true))
            .map_err(|e| {
                error!(
                    "{} is installed at {} but the registry was not updated: {}",
                    id,
                    target.display(),
                    e
                );
                Error::StateError(format!(
                    "{} installed at {} but registry update failed: {}",
                    id.stem(),
                    target.display(),
                    e
                ))
            })?;

        info!("Installed {} into {}", id, target.display());
        Ok(target.to_path_buf())
    }

    /// Uninstall a package, optionally evicting its cache entry afterwards
    ///
    /// Uninstall and eviction are separate steps: an eviction failure is
    /// reported through `Eviction::Failed` and does not undo the uninstall.
    pub fn delete_package<S: PackageSource>(
        &self,
        id: &PackageId,
        remove_from_cache: bool,
        cache: &CacheManager<S>,
    ) -> Result<Eviction> {
        let target = self.install_path(id);
        if !target.is_dir() {
            return Err(Error::NotInstalled(id.stem()));
        }

        // Take the package out of the tree in one rename, then delete it
        let trash = self.staging_dir()?;
        let doomed = trash.path().join(id.stem());
        fs::rename(&target, &doomed).map_err(|e| {
            Error::FilesystemError(format!("Failed to remove {}: {}", target.display(), e))
        })?;
        if let Err(e) = trash.close() {
            warn!("Failed to clean up removed files of {}: {}", id, e);
        }

        self.registry
            .update(id, RecordUpdate::installed(false))
            .map_err(|e| {
                error!("{} was removed from disk but the registry was not updated: {}", id, e);
                Error::StateError(format!(
                    "{} removed from {} but registry update failed: {}",
                    id.stem(),
                    self.install_dir.display(),
                    e
                ))
            })?;

        info!("Removed {} from {}", id, self.install_dir.display());

        if !remove_from_cache {
            return Ok(Eviction::NotRequested);
        }

        match cache.remove_from_cache(id) {
            Ok(()) => Ok(Eviction::Evicted),
            Err(e) => {
                warn!("{} uninstalled but cache eviction failed: {}", id, e);
                Ok(Eviction::Failed(e.to_string()))
            }
        }
    }

    /// Delete staging directories left behind by an interrupted operation
    pub fn purge_staging(&self) -> Result<usize> {
        let mut purged = 0;

        for entry in fs::read_dir(&self.install_dir)? {
            let entry = entry?;
            if !entry.file_name().to_string_lossy().starts_with(STAGING_PREFIX) {
                continue;
            }

            match fs::remove_dir_all(entry.path()) {
                Ok(()) => purged += 1,
                Err(e) => warn!("Failed to purge {}: {}", entry.path().display(), e),
            }
        }

        if purged > 0 {
            info!("Purged {} stale staging director(ies)", purged);
        }
        Ok(purged)
    }

    fn staging_dir(&self) -> Result<TempDir> {
        tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(&self.install_dir)
            .map_err(|e| {
                Error::FilesystemError(format!(
                    "Failed to create staging directory in {}: {}",
                    self.install_dir.display(),
                    e
                ))
            })
    }
}

/// Unpack a gzip-compressed tar archive into `dest`
///
/// Entries that would land outside `dest` fail the extraction.
fn unpack_archive(archive: &Path, dest: &Path) -> Result<()> {
    let extraction_err = |e: io::Error| {
        Error::ExtractionError(format!("Failed to extract {}: {}", archive.display(), e))
    };

    let file = File::open(archive).map_err(extraction_err)?;
    let mut tar = Archive::new(GzDecoder::new(file));

    let mut count = 0;
    for entry in tar.entries().map_err(extraction_err)? {
        let mut entry = entry.map_err(extraction_err)?;
        let path = entry.path().map_err(extraction_err)?.to_path_buf();

        if !entry.unpack_in(dest).map_err(extraction_err)? {
            return Err(Error::ExtractionError(format!(
                "Archive {} contains entry {} outside the package root",
                archive.display(),
                path.display()
            )));
        }
        count += 1;
    }

    debug!("Extracted {} entries from {}", count, archive.display());
    Ok(())
}

/// Directory to commit: the single `{name}-{version}` top-level directory if
/// the archive wraps its contents in one, otherwise the extraction root
fn committed_root(extracted: &Path, id: &PackageId) -> Result<PathBuf> {
    let entries = fs::read_dir(extracted)
        .and_then(|dir| dir.collect::<io::Result<Vec<_>>>())
        .map_err(|e| {
            Error::ExtractionError(format!("Failed to read {}: {}", extracted.display(), e))
        })?;

    if let [only] = entries.as_slice() {
        let is_dir = only.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if is_dir && only.file_name().to_string_lossy() == id.stem() {
            return Ok(only.path());
        }
    }

    Ok(extracted.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::REGISTRY_FILE_NAME;
    use crate::repository::{CatalogEntry, CatalogScope};
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    /// Source that is never consulted by the installer
    struct NoSource;

    impl PackageSource for NoSource {
        fn fetch_archive(&self, id: &PackageId, _sink: &mut dyn Write) -> Result<u64> {
            Err(Error::NotFound(id.stem()))
        }

        fn fetch_hash(&self, id: &PackageId) -> Result<String> {
            Err(Error::NotFound(id.stem()))
        }

        fn fetch_catalog(&self, _scope: CatalogScope) -> Result<Vec<CatalogEntry>> {
            Ok(Vec::new())
        }
    }

    struct Fixture {
        _temp: TempDir,
        cache_dir: PathBuf,
        registry: Arc<Registry>,
        cache: CacheManager<NoSource>,
        installer: Installer,
    }

    fn setup() -> Fixture {
        let temp = tempfile::tempdir().unwrap();
        let cache_dir = temp.path().join("cache");
        let install_dir = temp.path().join("install");
        let registry = Arc::new(Registry::open(cache_dir.join(REGISTRY_FILE_NAME)).unwrap());
        let cache = CacheManager::new(&cache_dir, Arc::clone(&registry), NoSource).unwrap();
        let installer = Installer::new(&install_dir, &cache_dir, Arc::clone(&registry)).unwrap();
        Fixture {
            _temp: temp,
            cache_dir,
            registry,
            cache,
            installer,
        }
    }

    fn id(name: &str, version: &str) -> PackageId {
        PackageId::new(name, version).unwrap()
    }

    /// Build a .tar.gz from (path, contents) pairs
    fn tar_gz(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for (path, contents) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, *contents).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    /// Place an archive in the cache and mark it cached
    fn seed_cache(fixture: &Fixture, id: &PackageId, archive: &[u8]) {
        fs::write(fixture.cache_dir.join(id.archive_file_name()), archive).unwrap();
        fixture.registry.add(id, false).unwrap();
        fixture
            .registry
            .update(id, RecordUpdate::in_cache(true))
            .unwrap();
    }

    fn install_tree(fixture: &Fixture) -> Vec<String> {
        let mut names: Vec<_> = fs::read_dir(fixture.installer.install_dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_install_wrapped_archive() {
        let fixture = setup();
        let demo = id("demo", "1.0.0");
        seed_cache(
            &fixture,
            &demo,
            &tar_gz(&[("demo-1.0.0/bin/demo", b"#!/bin/sh\n"), ("demo-1.0.0/README", b"hi")]),
        );

        let target = fixture.installer.install_package(&demo).unwrap();

        assert_eq!(target, fixture.installer.install_path(&demo));
        assert_eq!(fs::read(target.join("README")).unwrap(), b"hi");
        assert!(target.join("bin/demo").is_file());
        assert!(fixture.registry.get(&demo).unwrap().installed);
        assert_eq!(install_tree(&fixture), vec!["demo-1.0.0"]);
    }

    #[test]
    fn test_install_flat_archive() {
        let fixture = setup();
        let demo = id("demo", "1.0.0");
        seed_cache(&fixture, &demo, &tar_gz(&[("main.sh", b"echo"), ("lib/a.sh", b"a")]));

        let target = fixture.installer.install_package(&demo).unwrap();

        assert!(target.join("main.sh").is_file());
        assert!(target.join("lib/a.sh").is_file());
    }

    #[test]
    fn test_install_requires_cache() {
        let fixture = setup();
        let demo = id("demo", "1.0.0");
        fixture.registry.add(&demo, false).unwrap();

        let result = fixture.installer.install_package(&demo);

        assert!(matches!(result, Err(Error::NotInCache(_))));
        assert!(install_tree(&fixture).is_empty());
        assert!(!fixture.registry.get(&demo).unwrap().installed);
    }

    #[test]
    fn test_install_unregistered_package() {
        let fixture = setup();

        let result = fixture.installer.install_package(&id("ghost", "0.1"));

        assert!(matches!(result, Err(Error::NotInCache(_))));
    }

    #[test]
    fn test_install_corrupt_archive_leaves_no_trace() {
        let fixture = setup();
        let demo = id("demo", "1.0.0");
        seed_cache(&fixture, &demo, b"this is not gzip");

        let result = fixture.installer.install_package(&demo);

        assert!(matches!(result, Err(Error::ExtractionError(_))));
        assert!(install_tree(&fixture).is_empty());
        assert!(!fixture.registry.get(&demo).unwrap().installed);
    }

    #[test]
    fn test_install_move_failure_leaves_no_trace() {
        let fixture = setup();
        let demo = id("demo", "1.0.0");
        let archive_path = fixture.cache_dir.join(demo.archive_file_name());
        seed_cache(&fixture, &demo, &tar_gz(&[("demo-1.0.0/file", b"x")]));

        let staged = fixture.installer.stage(&demo, &archive_path).unwrap();
        // Another writer claims the target between the check and the rename
        let target = fixture.installer.install_path(&demo);
        fs::create_dir_all(target.join("foreign")).unwrap();

        let result = fixture.installer.commit(&demo, staged, &target);

        assert!(matches!(result, Err(Error::FilesystemError(_))));
        assert_eq!(install_tree(&fixture), vec!["demo-1.0.0"]);
        assert!(target.join("foreign").is_dir());
        assert!(!target.join("file").exists());
        assert!(!fixture.registry.get(&demo).unwrap().installed);
    }

    #[test]
    fn test_install_registry_failure_is_state_error() {
        let fixture = setup();
        let demo = id("demo", "1.0.0");
        let archive_path = fixture.cache_dir.join(demo.archive_file_name());
        seed_cache(&fixture, &demo, &tar_gz(&[("demo-1.0.0/file", b"x")]));

        let staged = fixture.installer.stage(&demo, &archive_path).unwrap();
        fixture.registry.remove(&demo).unwrap();
        let target = fixture.installer.install_path(&demo);

        let result = fixture.installer.commit(&demo, staged, &target);

        assert!(matches!(result, Err(Error::StateError(_))));
        // Files stay in place for the operator; no staging is left behind
        assert!(target.join("file").is_file());
        assert_eq!(install_tree(&fixture), vec!["demo-1.0.0"]);
    }

    #[test]
    fn test_install_existing_target() {
        let fixture = setup();
        let demo = id("demo", "1.0.0");
        seed_cache(&fixture, &demo, &tar_gz(&[("file", b"x")]));
        fs::create_dir(fixture.installer.install_path(&demo)).unwrap();

        let result = fixture.installer.install_package(&demo);

        assert!(matches!(result, Err(Error::AlreadyInstalled(_))));
        assert_eq!(install_tree(&fixture), vec!["demo-1.0.0"]);
    }

    #[test]
    fn test_delete_keeps_cache_by_default() {
        let fixture = setup();
        let demo = id("demo", "1.0.0");
        seed_cache(&fixture, &demo, &tar_gz(&[("file", b"x")]));
        fixture.installer.install_package(&demo).unwrap();

        let eviction = fixture
            .installer
            .delete_package(&demo, false, &fixture.cache)
            .unwrap();

        assert_eq!(eviction, Eviction::NotRequested);
        assert!(install_tree(&fixture).is_empty());
        let record = fixture.registry.get(&demo).unwrap();
        assert!(!record.installed);
        assert!(record.in_cache);
    }

    #[test]
    fn test_delete_with_eviction() {
        let fixture = setup();
        let demo = id("demo", "1.0.0");
        seed_cache(&fixture, &demo, &tar_gz(&[("file", b"x")]));
        fixture.installer.install_package(&demo).unwrap();

        let eviction = fixture
            .installer
            .delete_package(&demo, true, &fixture.cache)
            .unwrap();

        assert_eq!(eviction, Eviction::Evicted);
        let record = fixture.registry.get(&demo).unwrap();
        assert!(!record.installed);
        assert!(!record.in_cache);
        assert!(!fixture.cache_dir.join(demo.archive_file_name()).exists());
    }

    #[test]
    fn test_delete_not_installed() {
        let fixture = setup();

        let result = fixture
            .installer
            .delete_package(&id("demo", "1.0.0"), false, &fixture.cache);

        assert!(matches!(result, Err(Error::NotInstalled(_))));
    }

    #[test]
    fn test_purge_staging() {
        let fixture = setup();
        let stale = fixture.installer.install_dir().join(".staging-abc123");
        fs::create_dir_all(stale.join("root/demo-1.0.0")).unwrap();
        fs::create_dir(fixture.installer.install_dir().join("keep-1.0")).unwrap();

        assert_eq!(fixture.installer.purge_staging().unwrap(), 1);
        assert_eq!(install_tree(&fixture), vec!["keep-1.0"]);
    }
}
