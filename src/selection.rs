//! Selection documents and the selection index
//!
//! A selection names the entities to instrument and the counters to record
//! for them:
//!
//! ```toml
//! counters = ["TOT_CYC", "TOT_INS"]
//! functions = ["compute", "solve"]
//! ```
//!
//! Every listed function gets the same (top-level) counter set. `regions` is
//! accepted but reserved; anything else at the top level is rejected, and so
//! is any counter the backend does not know. Decoding is all-or-nothing.

use crate::counters::{CounterBackend, CounterRef};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while decoding or querying a selection
#[derive(Error, Debug)]
pub enum SelectionError {
    #[error("failed to read selection file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid selection document: {0}")]
    Parse(String),

    #[error("selection names unknown counter `{0}`")]
    UnknownCounter(String),

    #[error("unsupported selection format `{0}` (expected .toml or .json)")]
    UnsupportedFormat(String),

    #[error("`{0}` is not selected for instrumentation")]
    Lookup(String),
}

pub type Result<T> = std::result::Result<T, SelectionError>;

/// Raw selection document as written by the user
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SelectionDocument {
    /// Counters recorded for every selected entity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counters: Option<Vec<String>>,

    /// Source-level names of the functions to instrument
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub functions: Option<Vec<String>>,

    /// Reserved; parsed and ignored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regions: Option<serde_json::Value>,
}

impl SelectionDocument {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| SelectionError::Parse(e.to_string()))
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| SelectionError::Parse(e.to_string()))
    }

    /// Load a document, picking the syntax from the file extension
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();

        let parse: fn(&str) -> Result<Self> = match extension.as_str() {
            "toml" => Self::from_toml_str,
            "json" => Self::from_json_str,
            _ => {
                let path = path.display().to_string();
                return Err(SelectionError::UnsupportedFormat(path));
            }
        };

        let content = fs::read_to_string(path).map_err(|source| SelectionError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        parse(&content)
    }
}

/// One selected entity and its counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionEntry {
    pub entity_name: String,
    pub counters: Vec<CounterRef>,
}

/// Decoded, validated selection; read-only once built
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionIndex {
    default_counters: Vec<CounterRef>,
    entries: BTreeMap<String, SelectionEntry>,
}

impl SelectionIndex {
    /// Selection that instruments nothing
    pub fn empty() -> Self {
        Self::default()
    }

    /// Validate `document` against `backend` and build the index
    pub fn decode(document: &SelectionDocument, backend: &dyn CounterBackend) -> Result<Self> {
        // Spellings with and without the prefix resolve to one counter; keep
        // the first so every report key stays unique.
        let mut default_counters = Vec::new();
        for name in document.counters.iter().flatten() {
            let counter = backend
                .resolve(name)
                .map_err(|_| SelectionError::UnknownCounter(name.clone()))?;
            if default_counters.contains(&counter) {
                tracing::debug!("counter `{}` already selected, ignoring repeat", name);
                continue;
            }
            default_counters.push(counter);
        }

        if document.regions.is_some() {
            tracing::warn!("selection `regions` are reserved and currently ignored");
        }

        let entries = document
            .functions
            .iter()
            .flatten()
            .map(|name| {
                let entry = SelectionEntry {
                    entity_name: name.clone(),
                    counters: default_counters.clone(),
                };
                (name.clone(), entry)
            })
            .collect::<BTreeMap<_, _>>();

        tracing::debug!(
            "selection decoded: {} entities, {} counters",
            entries.len(),
            default_counters.len()
        );

        Ok(Self {
            default_counters,
            entries,
        })
    }

    pub fn from_toml_str(content: &str, backend: &dyn CounterBackend) -> Result<Self> {
        Self::decode(&SelectionDocument::from_toml_str(content)?, backend)
    }

    pub fn from_json_str(content: &str, backend: &dyn CounterBackend) -> Result<Self> {
        Self::decode(&SelectionDocument::from_json_str(content)?, backend)
    }

    pub fn from_file<P: AsRef<Path>>(path: P, backend: &dyn CounterBackend) -> Result<Self> {
        Self::decode(&SelectionDocument::from_file(path)?, backend)
    }

    /// Is `name` selected?
    pub fn has(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Counters requested for `name`
    ///
    /// Fails with [`SelectionError::Lookup`] when `name` is not selected.
    pub fn counters_for(&self, name: &str) -> Result<&[CounterRef]> {
        self.entries
            .get(name)
            .map(|entry| entry.counters.as_slice())
            .ok_or_else(|| SelectionError::Lookup(name.to_string()))
    }

    /// Counter set shared by every entity
    pub fn default_counters(&self) -> &[CounterRef] {
        &self.default_counters
    }

    /// Selected entities in name order
    pub fn entries(&self) -> impl Iterator<Item = &SelectionEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counters::simulated::SimulatedBackend;

    fn backend() -> SimulatedBackend {
        SimulatedBackend::new()
    }

    #[test]
    fn test_membership_and_shared_counters() {
        let toml = r#"
            counters = ["TOT_CYC", "TOT_INS"]
            functions = ["f", "g"]
        "#;
        let index = SelectionIndex::from_toml_str(toml, &backend()).unwrap();

        assert!(index.has("f"));
        assert!(index.has("g"));
        assert!(!index.has("h"));
        assert_eq!(
            index.counters_for("f").unwrap(),
            index.counters_for("g").unwrap()
        );
        assert_eq!(index.counters_for("f").unwrap().len(), 2);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_counter_order_preserved() {
        let b = backend();
        let toml = r#"
            counters = ["TOT_INS", "PAPI_TOT_CYC"]
            functions = ["f"]
        "#;
        let index = SelectionIndex::from_toml_str(toml, &b).unwrap();
        assert_eq!(
            index.counters_for("f").unwrap(),
            &[b.resolve("TOT_INS").unwrap(), b.resolve("TOT_CYC").unwrap()]
        );
    }

    #[test]
    fn test_repeated_counter_kept_once() {
        let b = backend();
        let toml = r#"
            counters = ["TOT_CYC", "TOT_INS", "PAPI_TOT_CYC", "TOT_INS"]
            functions = ["f"]
        "#;
        let index = SelectionIndex::from_toml_str(toml, &b).unwrap();
        assert_eq!(
            index.counters_for("f").unwrap(),
            &[b.resolve("TOT_CYC").unwrap(), b.resolve("TOT_INS").unwrap()]
        );
    }

    #[test]
    fn test_lookup_error_for_unselected() {
        let index = SelectionIndex::empty();
        assert!(matches!(
            index.counters_for("missing"),
            Err(SelectionError::Lookup(name)) if name == "missing"
        ));
    }

    #[test]
    fn test_unknown_top_level_key_rejected() {
        let toml = r#"
            counters = ["TOT_CYC"]
            fuctions = ["f"]
        "#;
        let err = SelectionIndex::from_toml_str(toml, &backend()).unwrap_err();
        assert!(matches!(err, SelectionError::Parse(_)));
        assert!(err.to_string().contains("fuctions"));
    }

    #[test]
    fn test_unknown_counter_rejects_whole_document() {
        let toml = r#"
            counters = ["TOT_CYC", "NOPE"]
            functions = ["f"]
        "#;
        let err = SelectionIndex::from_toml_str(toml, &backend()).unwrap_err();
        assert!(matches!(err, SelectionError::UnknownCounter(name) if name == "NOPE"));
    }

    #[test]
    fn test_non_list_rejected() {
        let toml = r#"
            counters = "TOT_CYC"
        "#;
        assert!(matches!(
            SelectionIndex::from_toml_str(toml, &backend()),
            Err(SelectionError::Parse(_))
        ));

        let json = r#"{"functions": [1, 2]}"#;
        assert!(matches!(
            SelectionIndex::from_json_str(json, &backend()),
            Err(SelectionError::Parse(_))
        ));
    }

    #[test]
    fn test_empty_document() {
        let index = SelectionIndex::from_toml_str("", &backend()).unwrap();
        assert!(index.is_empty());
        assert!(index.default_counters().is_empty());
    }

    #[test]
    fn test_functions_without_counters() {
        let json = r#"{"functions": ["main"]}"#;
        let index = SelectionIndex::from_json_str(json, &backend()).unwrap();
        assert!(index.has("main"));
        assert!(index.counters_for("main").unwrap().is_empty());
    }

    #[test]
    fn test_regions_accepted_but_ignored() {
        let json = r#"{"counters": ["TOT_CYC"], "regions": [{"file": "a.c"}]}"#;
        let index = SelectionIndex::from_json_str(json, &backend()).unwrap();
        assert!(index.is_empty());
    }

    #[test]
    fn test_unsupported_extension() {
        assert!(matches!(
            SelectionDocument::from_file("selection.yaml"),
            Err(SelectionError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            SelectionDocument::from_file("/nonexistent/selection.toml"),
            Err(SelectionError::Read { .. })
        ));
    }

    #[test]
    fn test_entries_iterate_in_name_order() {
        let json = r#"{"counters": ["TOT_CYC"], "functions": ["zeta", "alpha"]}"#;
        let index = SelectionIndex::from_json_str(json, &backend()).unwrap();
        let names: Vec<_> = index.entries().map(|e| e.entity_name.as_str()).collect();
        assert_eq!(names, ["alpha", "zeta"]);
    }
}
