//! Teardown report
//!
//! ```json
//! {
//!   "functions": {
//!     "<id>": { "source": "compute", "Occurs": 1, "Time": 1200, "Total cycles": 1000 }
//!   },
//!   "regions": {
//!     "<id>": { "file": "kernel.c", "start": 10, "end": 42, "Occurs": 3, "Time": 900 }
//!   }
//! }
//! ```
//!
//! Ids are decimal strings, `Time` is nanoseconds, and counter totals are
//! keyed by the counter's short description, in request order. Entries are
//! sorted by id.

use crate::config::ReportDestination;
use crate::counters::CounterRef;
use crate::stats::UnitSnapshot;
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};

/// One counter's total with its human-readable label
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterTotal {
    pub description: String,
    pub total: i64,
}

/// Accumulation shared by function and region entries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Measurements {
    pub occurs: u64,
    pub time_ns: i64,
    pub counters: Vec<CounterTotal>,
    pub unterminated: usize,
}

impl Measurements {
    /// Label each counter total with `describe`
    pub fn from_snapshot<F>(snapshot: &UnitSnapshot, describe: F) -> Self
    where
        F: Fn(CounterRef) -> String,
    {
        Self {
            occurs: snapshot.occurs,
            time_ns: snapshot.elapsed_ns,
            counters: snapshot
                .counters
                .iter()
                .zip(&snapshot.accumulated)
                .map(|(counter, total)| CounterTotal {
                    description: describe(*counter),
                    total: *total,
                })
                .collect(),
            unterminated: snapshot.unterminated,
        }
    }

    fn serialize_into<M: SerializeMap>(&self, map: &mut M) -> Result<(), M::Error> {
        map.serialize_entry("Occurs", &self.occurs)?;
        map.serialize_entry("Time", &self.time_ns)?;
        for counter in &self.counters {
            map.serialize_entry(&counter.description, &counter.total)?;
        }
        if self.unterminated > 0 {
            map.serialize_entry("Unterminated", &self.unterminated)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionReport {
    pub source: String,
    /// Empty when identical to `source`
    pub qualified: String,
    pub measurements: Measurements,
}

impl Serialize for FunctionReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        if !self.source.is_empty() {
            map.serialize_entry("source", &self.source)?;
        }
        if !self.qualified.is_empty() {
            map.serialize_entry("qualified", &self.qualified)?;
        }
        self.measurements.serialize_into(&mut map)?;
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionReport {
    pub file: String,
    pub start_line: u32,
    pub end_line: u32,
    pub measurements: Measurements,
}

impl Serialize for RegionReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("file", &self.file)?;
        map.serialize_entry("start", &self.start_line)?;
        map.serialize_entry("end", &self.end_line)?;
        self.measurements.serialize_into(&mut map)?;
        map.end()
    }
}

/// Everything measured during one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    pub functions: BTreeMap<u64, FunctionReport>,
    pub regions: BTreeMap<u64, RegionReport>,
}

struct ById<'a, T>(&'a BTreeMap<u64, T>);

impl<T: Serialize> Serialize for ById<'_, T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (id, entry) in self.0 {
            map.serialize_entry(&id.to_string(), entry)?;
        }
        map.end()
    }
}

impl Serialize for Report {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("functions", &ById(&self.functions))?;
        map.serialize_entry("regions", &ById(&self.regions))?;
        map.end()
    }
}

impl Report {
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty() && self.regions.is_empty()
    }

    /// Total unterminated intervals across all entries
    pub fn unterminated(&self) -> usize {
        self.functions
            .values()
            .map(|f| f.measurements.unterminated)
            .chain(self.regions.values().map(|r| r.measurements.unterminated))
            .sum()
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Write the report as pretty JSON followed by a newline
    pub fn write_to<W: Write>(&self, mut writer: W) -> io::Result<()> {
        serde_json::to_writer_pretty(&mut writer, self)?;
        writeln!(writer)?;
        writer.flush()
    }

    /// Write to stdout, or create/truncate the destination file
    pub fn write_to_destination(&self, destination: &ReportDestination) -> io::Result<()> {
        match destination {
            ReportDestination::Stdout => self.write_to(io::stdout().lock()),
            ReportDestination::File(path) => self.write_to(BufWriter::new(File::create(path)?)),
        }
    }
}
