//! Build-time descriptor catalog
//!
//! The source analyzer reports what it discovers; the catalog keeps a
//! descriptor for everything the selection asks for, keyed by the identifier
//! the runtime will later see. The code injector asks the catalog which
//! functions to wrap, and the whole descriptor set is written out as a
//! metadata blob (see [`crate::metadata`]).
//!
//! Registration never de-duplicates. A function reported once per
//! translation unit yields several descriptors with the same identifier.

use crate::counters::{BackendError, CounterBackend, CounterRef};
use crate::identity::{self, EntityKind};
use crate::selection::SelectionIndex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("no descriptor registered for `{0}`")]
    Lookup(String),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("invalid discovery manifest: {0}")]
    Manifest(String),
}

pub type Result<T> = std::result::Result<T, CatalogError>;

/// An instrumented function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDescriptor {
    pub id: u64,
    pub linkage_name: String,
    pub source_name: String,
    /// Empty when identical to `source_name`
    pub qualified_name: String,
    pub counters: Vec<CounterRef>,
}

/// An instrumented source region
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionDescriptor {
    pub id: u64,
    pub file: String,
    pub start_line: u32,
    pub end_line: u32,
    pub counters: Vec<CounterRef>,
}

fn default_true() -> bool {
    true
}

/// A function as reported by the source analyzer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredFunction {
    pub linkage_name: String,
    pub source_name: String,
    #[serde(default)]
    pub qualified_name: String,
    /// Declarations without a body are never instrumented
    #[serde(default = "default_true")]
    pub has_body: bool,
}

/// A region as reported by the source analyzer, with the counter names
/// requested for it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredRegion {
    pub file: String,
    pub start_line: u32,
    pub end_line: u32,
    #[serde(default)]
    pub counters: Vec<String>,
}

/// Everything the analyzer found in one build, as JSON
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiscoveryManifest {
    #[serde(default)]
    pub functions: Vec<DiscoveredFunction>,
    #[serde(default)]
    pub regions: Vec<DiscoveredRegion>,
}

impl DiscoveryManifest {
    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| CatalogError::Manifest(e.to_string()))
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| CatalogError::Manifest(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&content)
    }
}

/// Registry of descriptors for one build
pub struct DescriptorCatalog {
    backend: Arc<dyn CounterBackend>,
    selection: SelectionIndex,
    functions: Vec<FunctionDescriptor>,
    /// Linkage name -> first descriptor registered under it
    by_linkage: HashMap<String, usize>,
    regions: Vec<RegionDescriptor>,
}

impl std::fmt::Debug for DescriptorCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorCatalog")
            .field("backend", &self.backend.backend_name())
            .field("selection", &self.selection)
            .field("functions", &self.functions)
            .field("regions", &self.regions)
            .finish()
    }
}

impl DescriptorCatalog {
    pub fn new(backend: Arc<dyn CounterBackend>, selection: SelectionIndex) -> Self {
        Self {
            backend,
            selection,
            functions: Vec::new(),
            by_linkage: HashMap::new(),
            regions: Vec::new(),
        }
    }

    pub fn selection(&self) -> &SelectionIndex {
        &self.selection
    }

    /// Register a function and return its identifier
    pub fn add_function(
        &mut self,
        linkage_name: &str,
        source_name: &str,
        qualified_name: &str,
        counters: &[CounterRef],
    ) -> u64 {
        let id = identity::function_id(linkage_name);
        let qualified_name = if qualified_name == source_name {
            String::new()
        } else {
            qualified_name.to_string()
        };

        self.by_linkage
            .entry(linkage_name.to_string())
            .or_insert(self.functions.len());
        self.functions.push(FunctionDescriptor {
            id,
            linkage_name: linkage_name.to_string(),
            source_name: source_name.to_string(),
            qualified_name,
            counters: counters.to_vec(),
        });

        tracing::debug!(
            "registered {} {} ({}) as {}",
            EntityKind::Function,
            source_name,
            linkage_name,
            id
        );
        id
    }

    /// Register a region and return its identifier
    ///
    /// Fails when a counter is unknown to the backend, since its name is part
    /// of the region's identity.
    pub fn add_region(
        &mut self,
        file: &str,
        start_line: u32,
        end_line: u32,
        counters: &[CounterRef],
    ) -> Result<u64> {
        let names = counters
            .iter()
            .map(|counter| self.backend.counter_name(*counter))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let id = identity::region_id(file, start_line, end_line, names);

        self.regions.push(RegionDescriptor {
            id,
            file: file.to_string(),
            start_line,
            end_line,
            counters: counters.to_vec(),
        });

        tracing::debug!(
            "registered {} {}:{}-{} as {}",
            EntityKind::Region,
            file,
            start_line,
            end_line,
            id
        );
        Ok(id)
    }

    /// Register a discovered function if the selection asks for it
    ///
    /// Selection is by source name; the identifier comes from the linkage
    /// name. Returns the identifier when the function was registered.
    pub fn register_discovered(&mut self, function: &DiscoveredFunction) -> Option<u64> {
        if !function.has_body {
            return None;
        }
        let counters = self.selection.counters_for(&function.source_name).ok()?.to_vec();
        let qualified = if function.qualified_name.is_empty() {
            &function.source_name
        } else {
            &function.qualified_name
        };
        Some(self.add_function(
            &function.linkage_name,
            &function.source_name,
            qualified,
            &counters,
        ))
    }

    /// Feed a whole discovery manifest through the catalog
    ///
    /// Returns the number of functions and regions registered.
    pub fn ingest(&mut self, manifest: &DiscoveryManifest) -> Result<(usize, usize)> {
        let functions = manifest
            .functions
            .iter()
            .filter_map(|function| self.register_discovered(function))
            .count();

        for region in &manifest.regions {
            let counters = region
                .counters
                .iter()
                .map(|name| self.backend.resolve(name))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            self.add_region(&region.file, region.start_line, region.end_line, &counters)?;
        }

        Ok((functions, manifest.regions.len()))
    }

    /// Should the injector wrap the function with this linkage name?
    pub fn should_instrument(&self, linkage_name: &str) -> bool {
        self.by_linkage.contains_key(linkage_name)
    }

    /// Descriptor for a function the catalog decided to instrument
    pub fn descriptor_for(&self, linkage_name: &str) -> Result<&FunctionDescriptor> {
        self.by_linkage
            .get(linkage_name)
            .map(|index| &self.functions[*index])
            .ok_or_else(|| CatalogError::Lookup(linkage_name.to_string()))
    }

    /// Every function descriptor, in registration order
    pub fn functions(&self) -> &[FunctionDescriptor] {
        &self.functions
    }

    /// Every region descriptor, in registration order
    pub fn regions(&self) -> &[RegionDescriptor] {
        &self.regions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counters::simulated::SimulatedBackend;

    fn catalog(selection_toml: &str) -> DescriptorCatalog {
        let backend = Arc::new(SimulatedBackend::new());
        let selection = SelectionIndex::from_toml_str(selection_toml, backend.as_ref()).unwrap();
        DescriptorCatalog::new(backend, selection)
    }

    fn discovered(linkage: &str, source: &str, qualified: &str) -> DiscoveredFunction {
        DiscoveredFunction {
            linkage_name: linkage.to_string(),
            source_name: source.to_string(),
            qualified_name: qualified.to_string(),
            has_body: true,
        }
    }

    #[test]
    fn test_add_function_assigns_linkage_id() {
        let mut catalog = catalog("");
        let id = catalog.add_function("_Z7computev", "compute", "compute", &[]);
        assert_eq!(id, identity::function_id("_Z7computev"));
        assert!(catalog.should_instrument("_Z7computev"));
        assert!(!catalog.should_instrument("compute"));

        let desc = catalog.descriptor_for("_Z7computev").unwrap();
        assert_eq!(desc.source_name, "compute");
        assert_eq!(desc.qualified_name, "");
    }

    #[test]
    fn test_qualified_name_kept_when_different() {
        let mut catalog = catalog("");
        catalog.add_function("_ZN2ns7computeEv", "compute", "ns::compute", &[]);
        let desc = catalog.descriptor_for("_ZN2ns7computeEv").unwrap();
        assert_eq!(desc.qualified_name, "ns::compute");
    }

    #[test]
    fn test_duplicates_are_kept() {
        let mut catalog = catalog("");
        let a = catalog.add_function("_Z1fv", "f", "f", &[]);
        let b = catalog.add_function("_Z1fv", "f", "other::f", &[]);
        assert_eq!(a, b);
        assert_eq!(catalog.functions().len(), 2);
        // the first registration answers lookups
        assert_eq!(catalog.descriptor_for("_Z1fv").unwrap().qualified_name, "");
    }

    #[test]
    fn test_descriptor_for_unknown() {
        let catalog = catalog("");
        assert!(matches!(
            catalog.descriptor_for("_Z1gv"),
            Err(CatalogError::Lookup(name)) if name == "_Z1gv"
        ));
    }

    #[test]
    fn test_add_region_id_uses_counter_names() {
        let mut catalog = catalog("");
        let backend = SimulatedBackend::new();
        let cyc = backend.resolve("TOT_CYC").unwrap();
        let id = catalog.add_region("kernel.c", 10, 42, &[cyc]).unwrap();
        assert_eq!(id, identity::identify("kernel.c:10:42:PAPI_TOT_CYC"));
        assert_eq!(catalog.regions().len(), 1);
        assert_eq!(catalog.regions()[0].counters, vec![cyc]);
    }

    #[test]
    fn test_add_region_unknown_counter() {
        let mut catalog = catalog("");
        let err = catalog.add_region("a.c", 1, 2, &[CounterRef(7)]).unwrap_err();
        assert!(matches!(
            err,
            CatalogError::Backend(BackendError::UnknownRef(_))
        ));
        assert!(catalog.regions().is_empty());
    }

    #[test]
    fn test_register_discovered_filters_by_source_name() {
        let mut catalog = catalog(
            r#"
            counters = ["TOT_CYC"]
            functions = ["compute"]
        "#,
        );

        assert!(catalog
            .register_discovered(&discovered("_Z4mainv", "main", "main"))
            .is_none());
        let id = catalog
            .register_discovered(&discovered("_Z7computev", "compute", "compute"))
            .unwrap();
        assert_eq!(id, identity::identify("_Z7computev"));
        assert_eq!(
            catalog.descriptor_for("_Z7computev").unwrap().counters.len(),
            1
        );
    }

    #[test]
    fn test_register_discovered_skips_declarations() {
        let mut catalog = catalog(r#"functions = ["compute"]"#);
        let mut decl = discovered("_Z7computev", "compute", "");
        decl.has_body = false;
        assert!(catalog.register_discovered(&decl).is_none());
        assert!(catalog.functions().is_empty());
    }

    #[test]
    fn test_ingest_manifest() {
        let mut catalog = catalog(
            r#"
            counters = ["TOT_CYC", "TOT_INS"]
            functions = ["compute", "solve"]
        "#,
        );
        let manifest = DiscoveryManifest::from_json_str(
            r#"{
                "functions": [
                    {"linkage_name": "_Z7computev", "source_name": "compute"},
                    {"linkage_name": "_Z5solvev", "source_name": "solve", "qualified_name": "la::solve"},
                    {"linkage_name": "_Z4mainv", "source_name": "main"}
                ],
                "regions": [
                    {"file": "k.c", "start_line": 3, "end_line": 9, "counters": ["BR_MSP"]}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(catalog.ingest(&manifest).unwrap(), (2, 1));
        assert!(catalog.should_instrument("_Z5solvev"));
        assert!(!catalog.should_instrument("_Z4mainv"));
        assert_eq!(
            catalog.regions()[0].id,
            identity::identify("k.c:3:9:PAPI_BR_MSP")
        );
    }

    #[test]
    fn test_manifest_rejects_unknown_keys() {
        assert!(matches!(
            DiscoveryManifest::from_json_str(r#"{"funcs": []}"#),
            Err(CatalogError::Manifest(_))
        ));
    }
}
