// src/registry/models.rs

//! Data models for the package-state registry
//!
//! The registry is one JSON document holding a list of package records. These
//! types mirror that document and provide the per-record operations the
//! store applies during a load-modify-save cycle.

use crate::package::PackageId;
use serde::{Deserialize, Serialize};

/// Lifecycle flags of one `(name, version)` pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRecord {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub in_cache: bool,
    #[serde(default)]
    pub installed: bool,
    /// Present only for packages that need a local build step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub built: Option<bool>,
}

impl PackageRecord {
    /// Create a fresh record: not cached, not installed
    pub fn new(id: &PackageId, needs_build: bool) -> Self {
        Self {
            name: id.name().to_string(),
            version: id.version().to_string(),
            in_cache: false,
            installed: false,
            built: needs_build.then_some(false),
        }
    }

    pub fn is(&self, id: &PackageId) -> bool {
        id.matches(&self.name, &self.version)
    }

    /// Validated identity of this record.
    ///
    /// Records written by other tools may carry names that do not pass
    /// validation; those yield `None` and are never turned into paths.
    pub fn id(&self) -> Option<PackageId> {
        PackageId::new(self.name.clone(), self.version.clone()).ok()
    }
}

/// Partial update of a record; `None` fields are left untouched
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordUpdate {
    pub in_cache: Option<bool>,
    pub installed: Option<bool>,
    pub built: Option<bool>,
}

impl RecordUpdate {
    pub fn in_cache(value: bool) -> Self {
        Self {
            in_cache: Some(value),
            ..Self::default()
        }
    }

    pub fn installed(value: bool) -> Self {
        Self {
            installed: Some(value),
            ..Self::default()
        }
    }

    pub fn built(value: bool) -> Self {
        Self {
            built: Some(value),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.in_cache.is_none() && self.installed.is_none() && self.built.is_none()
    }

    /// Apply the supplied fields to `record`
    pub(crate) fn apply_to(&self, record: &mut PackageRecord) {
        if let Some(in_cache) = self.in_cache {
            record.in_cache = in_cache;
        }
        if let Some(installed) = self.installed {
            record.installed = installed;
        }
        if let Some(built) = self.built {
            record.built = Some(built);
        }
    }
}

/// On-disk registry document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryDocument {
    #[serde(default)]
    pub packages: Vec<PackageRecord>,
}

impl RegistryDocument {
    pub fn find(&self, id: &PackageId) -> Option<&PackageRecord> {
        self.packages.iter().find(|record| record.is(id))
    }

    pub fn find_mut(&mut self, id: &PackageId) -> Option<&mut PackageRecord> {
        self.packages.iter_mut().find(|record| record.is(id))
    }

    /// Remove the record for `id`, returning it if it existed
    pub fn take(&mut self, id: &PackageId) -> Option<PackageRecord> {
        let index = self.packages.iter().position(|record| record.is(id))?;
        Some(self.packages.remove(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demo() -> PackageId {
        PackageId::new("demo", "1.0.0").unwrap()
    }

    #[test]
    fn test_new_record_flags() {
        let plain = PackageRecord::new(&demo(), false);
        assert!(!plain.in_cache);
        assert!(!plain.installed);
        assert_eq!(plain.built, None);

        let buildable = PackageRecord::new(&demo(), true);
        assert_eq!(buildable.built, Some(false));
    }

    #[test]
    fn test_partial_update_leaves_other_fields() {
        let mut record = PackageRecord::new(&demo(), true);
        record.in_cache = true;

        RecordUpdate::installed(true).apply_to(&mut record);

        assert!(record.in_cache);
        assert!(record.installed);
        assert_eq!(record.built, Some(false));
        assert!(RecordUpdate::default().is_empty());
    }

    #[test]
    fn test_built_is_omitted_when_absent() {
        let record = PackageRecord::new(&demo(), false);
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("built"));

        let parsed: PackageRecord =
            serde_json::from_str(r#"{"name":"demo","version":"1.0.0"}"#).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_document_take() {
        let mut doc = RegistryDocument::default();
        doc.packages.push(PackageRecord::new(&demo(), false));

        assert!(doc.find(&demo()).is_some());
        assert!(doc.take(&demo()).is_some());
        assert!(doc.find(&demo()).is_none());
        assert!(doc.take(&demo()).is_none());
    }
}
