//! Linux `perf_event` backend
//!
//! Each session is one perf `Group`, so all of a session's counters are
//! enabled, disabled and read atomically. A group observes the thread that
//! created it on any CPU; measurement units therefore open one session per
//! calling thread.

use super::{
    presets, BackendError, CounterBackend, CounterInfo, CounterRef, CounterSession, Result,
};
use perf_event::events::Hardware;
use perf_event::{Builder, Counter, Group};
use std::sync::OnceLock;

const BACKEND_NAME: &str = "perf";

/// Presets that map onto generic perf hardware events
const MAPPING: &[(CounterInfo, Hardware)] = &[
    (presets::TOT_CYC, Hardware::CPU_CYCLES),
    (presets::TOT_INS, Hardware::INSTRUCTIONS),
    (presets::BR_INS, Hardware::BRANCH_INSTRUCTIONS),
    (presets::BR_MSP, Hardware::BRANCH_MISSES),
    (presets::L3_TCA, Hardware::CACHE_REFERENCES),
    (presets::L3_TCM, Hardware::CACHE_MISSES),
    (presets::STL_ICY, Hardware::STALLED_CYCLES_FRONTEND),
    (presets::REF_CYC, Hardware::REF_CPU_CYCLES),
];

fn session_error(err: std::io::Error) -> BackendError {
    BackendError::Session(err.to_string())
}

/// Counter backend over `perf_event_open(2)`
#[derive(Debug)]
pub struct PerfBackend {
    counters: Vec<CounterInfo>,
    init: OnceLock<Result<()>>,
}

impl Default for PerfBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl PerfBackend {
    pub fn new() -> Self {
        Self {
            counters: MAPPING.iter().map(|(info, _)| *info).collect(),
            init: OnceLock::new(),
        }
    }

    fn hardware(counter: CounterRef) -> Result<Hardware> {
        MAPPING
            .iter()
            .find(|(info, _)| info.counter == counter)
            .map(|(_, hw)| *hw)
            .ok_or(BackendError::UnknownRef(counter))
    }
}

impl CounterBackend for PerfBackend {
    fn backend_name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn initialize(&self) -> Result<()> {
        // Probing one cycles counter tells us whether the kernel lets us in
        // (perf_event_paranoid, seccomp, missing PMU in a VM).
        self.init
            .get_or_init(|| {
                Builder::new()
                    .kind(Hardware::CPU_CYCLES)
                    .build()
                    .map(drop)
                    .map_err(|err| BackendError::Init {
                        backend: BACKEND_NAME,
                        reason: err.to_string(),
                    })
            })
            .clone()
    }

    fn counters(&self) -> &[CounterInfo] {
        &self.counters
    }

    fn create_session(&self, counters: &[CounterRef]) -> Result<Box<dyn CounterSession>> {
        self.initialize()?;
        let mut group = Group::new().map_err(session_error)?;
        let mut members = Vec::with_capacity(counters.len());
        for counter in counters {
            let member = Builder::new()
                .group(&mut group)
                .kind(Self::hardware(*counter)?)
                .build()
                .map_err(session_error)?;
            members.push(member);
        }
        Ok(Box::new(PerfSession { group, members }))
    }
}

/// One perf group and its members, in request order
pub struct PerfSession {
    group: Group,
    members: Vec<Counter>,
}

impl PerfSession {
    fn totals(&mut self) -> Result<Vec<i64>> {
        let counts = self.group.read().map_err(session_error)?;
        Ok(self
            .members
            .iter()
            .map(|member| i64::try_from(counts[member]).unwrap_or(i64::MAX))
            .collect())
    }
}

impl CounterSession for PerfSession {
    fn start(&mut self) -> Result<()> {
        self.group.enable().map_err(session_error)
    }

    fn read(&mut self) -> Result<Vec<i64>> {
        self.totals()
    }

    fn stop(&mut self) -> Result<Vec<i64>> {
        self.group.disable().map_err(session_error)?;
        self.totals()
    }

    fn len(&self) -> usize {
        self.members.len()
    }
}
