// src/repository/catalog.rs

//! Catalog document parser
//!
//! The repository publishes two XML catalogs: `/list` with the latest version
//! of every package and `/full_list` with every version plus its SHA-256:
//!
//! ```xml
//! <packages>
//!   <package id="demo-1.0.0">
//!     <name>demo</name>
//!     <version>1.0.0</version>
//!     <sha256>9f86d0…</sha256>
//!   </package>
//! </packages>
//! ```

use crate::error::{Error, Result};
use quick_xml::Reader;
use quick_xml::events::Event;
use tracing::{debug, warn};

/// One package-version pair listed by a catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub name: String,
    pub version: String,
    /// Only carried by the full catalog
    pub sha256: Option<String>,
}

impl CatalogEntry {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            sha256: None,
        }
    }
}

/// Parse a catalog document into its entries, in document order
///
/// Entries without a name or version are skipped with a warning; malformed
/// XML fails the whole document.
pub fn parse_catalog(xml_content: &str) -> Result<Vec<CatalogEntry>> {
    let mut reader = Reader::from_str(xml_content);
    reader.trim_text(true);

    let mut entries = Vec::new();
    let mut buf = Vec::new();

    let mut current: Option<EntryBuilder> = None;
    let mut current_tag = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let tag_name = String::from_utf8_lossy(e.name().as_ref()).to_string();

                if tag_name == "package" {
                    let mut builder = EntryBuilder::default();
                    for attr in e.attributes().filter_map(|a| a.ok()) {
                        if attr.key.as_ref() == b"id" {
                            builder.id = Some(String::from_utf8_lossy(&attr.value).to_string());
                        }
                    }
                    current = Some(builder);
                }

                current_tag = tag_name;
            }
            Ok(Event::Text(e)) => {
                if let Some(ref mut entry) = current {
                    let text = e
                        .unescape()
                        .map_err(|err| Error::ParseError(format!("Invalid catalog text: {}", err)))?
                        .trim()
                        .to_string();

                    match current_tag.as_str() {
                        "name" => entry.name = Some(text),
                        "version" => entry.version = Some(text),
                        "sha256" => entry.sha256 = Some(text),
                        _ => {}
                    }
                }
            }
            Ok(Event::End(e)) => {
                if e.name().as_ref() == b"package" {
                    if let Some(builder) = current.take() {
                        match builder.build() {
                            Some(entry) => entries.push(entry),
                            None => warn!("Skipping incomplete catalog entry"),
                        }
                    }
                }
                current_tag.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(Error::ParseError(format!(
                    "Failed to parse catalog at position {}: {}",
                    reader.buffer_position(),
                    e
                )));
            }
            _ => {}
        }
        buf.clear();
    }

    debug!("Parsed {} catalog entries", entries.len());
    Ok(entries)
}

#[derive(Default)]
struct EntryBuilder {
    id: Option<String>,
    name: Option<String>,
    version: Option<String>,
    sha256: Option<String>,
}

impl EntryBuilder {
    fn build(self) -> Option<CatalogEntry> {
        let name = self.name.filter(|s| !s.is_empty())?;
        let version = self.version.filter(|s| !s.is_empty())?;

        if let Some(id) = &self.id {
            if *id != format!("{}-{}", name, version) {
                debug!("Catalog id {} disagrees with {}-{}", id, name, version);
            }
        }

        Some(CatalogEntry {
            name,
            version,
            sha256: self.sha256.filter(|s| !s.is_empty()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_latest_catalog() {
        let xml = r#"<?xml version="1.0" encoding="utf-8"?>
            <packages>
                <package id="demo-1.0.0">
                    <name>demo</name>
                    <version>1.0.0</version>
                </package>
                <package id="tool-0.3">
                    <name>tool</name>
                    <version>0.3</version>
                </package>
            </packages>"#;

        let entries = parse_catalog(xml).unwrap();

        assert_eq!(
            entries,
            vec![CatalogEntry::new("demo", "1.0.0"), CatalogEntry::new("tool", "0.3")]
        );
    }

    #[test]
    fn test_parse_full_catalog_with_hashes() {
        let xml = r#"<packages>
                <package id="demo-1.0.0">
                    <name>demo</name>
                    <version>1.0.0</version>
                    <sha256>abc123</sha256>
                </package>
                <package id="demo-1.1.0">
                    <name>demo</name>
                    <version>1.1.0</version>
                    <sha256>def456</sha256>
                </package>
            </packages>"#;

        let entries = parse_catalog(xml).unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].version, "1.1.0");
        assert_eq!(entries[1].sha256.as_deref(), Some("def456"));
    }

    #[test]
    fn test_incomplete_entries_are_skipped() {
        let xml = r#"<packages>
                <package><name>orphan</name></package>
                <package><name>demo</name><version>1.0.0</version></package>
            </packages>"#;

        let entries = parse_catalog(xml).unwrap();

        assert_eq!(entries, vec![CatalogEntry::new("demo", "1.0.0")]);
    }

    #[test]
    fn test_empty_catalog() {
        assert!(parse_catalog("<packages/>").unwrap().is_empty());
    }

    #[test]
    fn test_malformed_catalog() {
        let result = parse_catalog("<packages><package><name>x</version></package>");
        assert!(matches!(result, Err(Error::ParseError(_))));
    }
}
