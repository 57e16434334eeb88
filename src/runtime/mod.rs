//! Runtime aggregator
//!
//! Built once at program start from the metadata blob. Every function and
//! region record becomes a [`MeasurementUnit`] keyed by its identifier; the
//! tables are never modified afterwards, so lookups take no lock. The report
//! is written exactly once: by [`Runtime::finish`], or when the runtime is
//! dropped.

pub mod report;

use crate::config::{ReportDestination, RuntimeConfig};
use crate::counters::{BackendError, CounterBackend, CounterRef};
use crate::identity::EntityKind;
use crate::metadata::{FunctionRecord, Metadata, MetadataError, RegionRecord};
use crate::stats::{MeasurementUnit, Scope, StatsError};
use report::{FunctionReport, Measurements, RegionReport, Report};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("unknown function id {0}: metadata blob does not match the build")]
    UnknownFunction(u64),

    #[error("unknown region id {0}: metadata blob does not match the build")]
    UnknownRegion(u64),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Stats(#[from] StatsError),

    #[error("failed to write report to {destination}: {source}")]
    Report {
        destination: ReportDestination,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

struct Entry<R> {
    record: R,
    unit: MeasurementUnit,
}

/// Measurement units for every instrumented entity of one program run
pub struct Runtime {
    backend: Arc<dyn CounterBackend>,
    functions: HashMap<u64, Entry<FunctionRecord>>,
    regions: HashMap<u64, Entry<RegionRecord>>,
    destination: Option<ReportDestination>,
    reported: AtomicBool,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("backend", &self.backend.backend_name())
            .field("functions", &self.functions.len())
            .field("regions", &self.regions.len())
            .field("destination", &self.destination)
            .finish()
    }
}

fn insert_first<R>(
    table: &mut HashMap<u64, Entry<R>>,
    kind: EntityKind,
    id: u64,
    counters: &[CounterRef],
    record: R,
    backend: &Arc<dyn CounterBackend>,
) -> Result<()> {
    if let Some(existing) = table.get(&id) {
        if existing.unit.counters() != counters {
            tracing::warn!(
                "duplicate {} id {} with a different counter list; keeping the first",
                kind,
                id
            );
        } else {
            tracing::debug!("duplicate {} id {} ignored", kind, id);
        }
        return Ok(());
    }
    let unit = MeasurementUnit::new(id, counters, Arc::clone(backend))?;
    table.insert(id, Entry { record, unit });
    Ok(())
}

impl Runtime {
    /// Initialize the backend and create one unit per record
    ///
    /// Duplicate identifiers keep the first record.
    pub fn new(
        metadata: Metadata,
        backend: Arc<dyn CounterBackend>,
        config: RuntimeConfig,
    ) -> Result<Self> {
        backend.initialize()?;

        let mut functions = HashMap::with_capacity(metadata.functions.len());
        for record in metadata.functions {
            let counters = record.counters.clone();
            insert_first(
                &mut functions,
                EntityKind::Function,
                record.id,
                &counters,
                record,
                &backend,
            )?;
        }

        let mut regions = HashMap::with_capacity(metadata.regions.len());
        for record in metadata.regions {
            let counters = record.counters.clone();
            insert_first(
                &mut regions,
                EntityKind::Region,
                record.id,
                &counters,
                record,
                &backend,
            )?;
        }

        tracing::info!(
            "runtime ready: {} functions, {} regions, backend `{}`",
            functions.len(),
            regions.len(),
            backend.backend_name()
        );

        Ok(Self {
            backend,
            functions,
            regions,
            destination: config.destination,
            reported: AtomicBool::new(false),
        })
    }

    pub fn from_blob(
        bytes: &[u8],
        backend: Arc<dyn CounterBackend>,
        config: RuntimeConfig,
    ) -> Result<Self> {
        Self::new(Metadata::decode(bytes)?, backend, config)
    }

    pub fn from_blob_file<P: AsRef<Path>>(
        path: P,
        backend: Arc<dyn CounterBackend>,
        config: RuntimeConfig,
    ) -> Result<Self> {
        Self::new(Metadata::read_file(path)?, backend, config)
    }

    pub fn backend(&self) -> &dyn CounterBackend {
        self.backend.as_ref()
    }

    pub fn function_unit(&self, id: u64) -> Result<&MeasurementUnit> {
        self.functions
            .get(&id)
            .map(|entry| &entry.unit)
            .ok_or(RuntimeError::UnknownFunction(id))
    }

    pub fn region_unit(&self, id: u64) -> Result<&MeasurementUnit> {
        self.regions
            .get(&id)
            .map(|entry| &entry.unit)
            .ok_or(RuntimeError::UnknownRegion(id))
    }

    pub fn enter_function(&self, id: u64) -> Result<()> {
        Ok(self.function_unit(id)?.start()?)
    }

    pub fn exit_function(&self, id: u64) -> Result<()> {
        Ok(self.function_unit(id)?.stop()?)
    }

    pub fn enter_region(&self, id: u64) -> Result<()> {
        Ok(self.region_unit(id)?.start()?)
    }

    pub fn exit_region(&self, id: u64) -> Result<()> {
        Ok(self.region_unit(id)?.stop()?)
    }

    pub fn try_function_scope(&self, id: u64) -> Result<Scope<'_>> {
        Ok(self.function_unit(id)?.scope()?)
    }

    pub fn try_region_scope(&self, id: u64) -> Result<Scope<'_>> {
        Ok(self.region_unit(id)?.scope()?)
    }

    /// Measure the calling code until the guard drops
    ///
    /// # Panics
    ///
    /// Panics when `id` is not in the metadata blob or the backend fails;
    /// either means the build and the runtime disagree.
    pub fn function_scope(&self, id: u64) -> Scope<'_> {
        match self.try_function_scope(id) {
            Ok(scope) => scope,
            Err(err) => panic!("{}", err),
        }
    }

    /// Region counterpart of [`Runtime::function_scope`]
    ///
    /// # Panics
    ///
    /// Same conditions as [`Runtime::function_scope`].
    pub fn region_scope(&self, id: u64) -> Scope<'_> {
        match self.try_region_scope(id) {
            Ok(scope) => scope,
            Err(err) => panic!("{}", err),
        }
    }

    /// Snapshot every unit into a report
    pub fn report(&self) -> Report {
        let backend = self.backend.as_ref();
        let describe = |counter: CounterRef| {
            backend
                .short_description(counter)
                .map(str::to_string)
                .unwrap_or_else(|_| counter.to_string())
        };

        let mut report = Report::default();
        for (id, entry) in &self.functions {
            report.functions.insert(
                *id,
                FunctionReport {
                    source: entry.record.source_name.clone(),
                    qualified: entry.record.qualified_name.clone(),
                    measurements: Measurements::from_snapshot(&entry.unit.snapshot(), &describe),
                },
            );
        }
        for (id, entry) in &self.regions {
            report.regions.insert(
                *id,
                RegionReport {
                    file: entry.record.file.clone(),
                    start_line: entry.record.start_line,
                    end_line: entry.record.end_line,
                    measurements: Measurements::from_snapshot(&entry.unit.snapshot(), &describe),
                },
            );
        }
        report
    }

    /// Has the report already been produced (or skipped)?
    pub fn is_reported(&self) -> bool {
        self.reported.load(Ordering::SeqCst)
    }

    /// Produce the report unless it already was; returns whether this call
    /// wrote it
    fn emit_report(&self) -> Result<bool> {
        if self.reported.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }
        let Some(destination) = &self.destination else {
            tracing::debug!("no report destination configured");
            return Ok(false);
        };

        let report = self.report();
        let unterminated = report.unterminated();
        if unterminated > 0 {
            tracing::warn!(
                "{} intervals were still open at teardown and are excluded from the report",
                unterminated
            );
        }

        report
            .write_to_destination(destination)
            .map_err(|source| RuntimeError::Report {
                destination: destination.clone(),
                source,
            })?;
        tracing::debug!("report written to {}", destination);
        Ok(true)
    }

    /// Write the report (once) and tear down, returning any write error
    pub fn finish(self) -> Result<()> {
        self.emit_report().map(drop)
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        if let Err(err) = self.emit_report() {
            tracing::warn!("skipping report: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counters::simulated::SimulatedBackend;
    use crate::identity;

    fn function(name: &str, counters: Vec<CounterRef>) -> FunctionRecord {
        FunctionRecord {
            id: identity::function_id(name),
            counters,
            source_name: name.to_string(),
            qualified_name: String::new(),
        }
    }

    fn runtime(metadata: Metadata, backend: &SimulatedBackend) -> Runtime {
        Runtime::new(
            metadata,
            Arc::new(backend.clone()),
            RuntimeConfig::disabled(),
        )
        .unwrap()
    }

    #[test]
    fn test_lookup_known_and_unknown() {
        let backend = SimulatedBackend::new();
        let metadata = Metadata {
            functions: vec![function("f", vec![])],
            regions: vec![],
        };
        let rt = runtime(metadata, &backend);

        assert!(rt.function_unit(identity::function_id("f")).is_ok());
        assert!(matches!(
            rt.function_unit(1),
            Err(RuntimeError::UnknownFunction(1))
        ));
        assert!(matches!(
            rt.region_unit(1),
            Err(RuntimeError::UnknownRegion(1))
        ));
    }

    #[test]
    fn test_duplicate_ids_first_wins() {
        let backend = SimulatedBackend::new();
        let cyc = backend.resolve("TOT_CYC").unwrap();
        let mut second = function("f", vec![cyc]);
        second.source_name = "shadow".to_string();
        let metadata = Metadata {
            functions: vec![function("f", vec![]), second],
            regions: vec![],
        };
        let rt = runtime(metadata, &backend);

        let id = identity::function_id("f");
        assert!(rt.function_unit(id).unwrap().counters().is_empty());
        assert_eq!(rt.report().functions[&id].source, "f");
    }

    #[test]
    fn test_enter_exit_accumulates() {
        let backend = SimulatedBackend::new();
        let cyc = backend.resolve("TOT_CYC").unwrap();
        let id = identity::function_id("_Z7computev");
        let metadata = Metadata {
            functions: vec![FunctionRecord {
                id,
                counters: vec![cyc],
                source_name: "compute".to_string(),
                qualified_name: String::new(),
            }],
            regions: vec![],
        };
        let rt = runtime(metadata, &backend);

        rt.enter_function(id).unwrap();
        backend.tick("TOT_CYC", 1000).unwrap();
        rt.exit_function(id).unwrap();

        let report = rt.report();
        let entry = &report.functions[&id];
        assert_eq!(entry.measurements.occurs, 1);
        assert_eq!(entry.measurements.counters[0].description, "Total cycles");
        assert_eq!(entry.measurements.counters[0].total, 1000);
    }

    #[test]
    fn test_region_scope() {
        let backend = SimulatedBackend::new();
        let msp = backend.resolve("BR_MSP").unwrap();
        let id = identity::region_id("k.c", 1, 5, ["PAPI_BR_MSP"]);
        let metadata = Metadata {
            functions: vec![],
            regions: vec![RegionRecord {
                id,
                counters: vec![msp],
                file: "k.c".to_string(),
                start_line: 1,
                end_line: 5,
            }],
        };
        let rt = runtime(metadata, &backend);
        {
            let _scope = rt.region_scope(id);
            backend.tick("BR_MSP", 3).unwrap();
        }
        assert_eq!(rt.region_unit(id).unwrap().accumulated(), vec![3]);
    }

    #[test]
    #[should_panic(expected = "unknown function id 99")]
    fn test_function_scope_unknown_panics() {
        let backend = SimulatedBackend::new();
        let rt = runtime(Metadata::default(), &backend);
        let _scope = rt.function_scope(99);
    }

    #[test]
    fn test_backend_init_failure_is_fatal() {
        let backend = SimulatedBackend::failing("no PMU");
        let result = Runtime::new(
            Metadata::default(),
            Arc::new(backend),
            RuntimeConfig::disabled(),
        );
        assert!(matches!(
            result,
            Err(RuntimeError::Backend(BackendError::Init { .. }))
        ));
    }

    #[test]
    fn test_report_emitted_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        let backend = SimulatedBackend::new();
        let config = RuntimeConfig::with_destination(ReportDestination::File(path.clone()));
        let rt = Runtime::new(Metadata::default(), Arc::new(backend), config).unwrap();

        assert!(rt.emit_report().unwrap());
        std::fs::write(&path, "sentinel").unwrap();
        assert!(!rt.emit_report().unwrap());
        rt.finish().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "sentinel");
    }

    #[test]
    fn test_unwritable_destination_is_reported_by_finish() {
        let backend = SimulatedBackend::new();
        let config = RuntimeConfig::with_destination(ReportDestination::File(
            "/nonexistent/dir/report.json".into(),
        ));
        let rt = Runtime::new(Metadata::default(), Arc::new(backend), config).unwrap();
        assert!(matches!(rt.finish(), Err(RuntimeError::Report { .. })));
    }

    #[test]
    fn test_unwritable_destination_skipped_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SimulatedBackend::new();
        let cyc = backend.resolve("TOT_CYC").unwrap();
        let metadata = Metadata {
            functions: vec![function("f", vec![cyc])],
            regions: vec![],
        };
        // a directory cannot be truncated into a report file
        let config = RuntimeConfig::with_destination(ReportDestination::File(dir.path().into()));
        let rt = Runtime::new(metadata, Arc::new(backend), config).unwrap();
        rt.enter_function(identity::function_id("f")).unwrap();
        rt.exit_function(identity::function_id("f")).unwrap();

        assert!(matches!(rt.emit_report(), Err(RuntimeError::Report { .. })));
        assert!(rt.is_reported());
        drop(rt);
        assert!(dir.path().is_dir());
    }

    #[test]
    fn test_drop_logs_and_skips_unwritable_destination() {
        let dir = tempfile::tempdir().unwrap();
        let config = RuntimeConfig::with_destination(ReportDestination::File(dir.path().into()));
        let rt = Runtime::new(
            Metadata::default(),
            Arc::new(SimulatedBackend::new()),
            config,
        )
        .unwrap();
        assert!(!rt.is_reported());
        drop(rt);
        assert!(dir.path().is_dir());
    }
}
