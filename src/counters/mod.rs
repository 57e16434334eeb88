//! Hardware counter backend adapter
//!
//! Measurement units and the runtime only ever see the [`CounterBackend`] and
//! [`CounterSession`] traits. Two implementations ship with the crate:
//!
//! - [`simulated::SimulatedBackend`]: software event registers advanced by the
//!   host or by tests. Always available.
//! - [`perf::PerfBackend`]: Linux `perf_event_open(2)` through the `perf-event`
//!   crate (cargo feature `perf`).
//!
//! Counter names follow the preset vocabulary in [`presets`]. A name may be
//! written with or without the `PAPI_` prefix.

pub mod presets;
pub mod simulated;

#[cfg(feature = "perf")]
pub mod perf;

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub use presets::CounterInfo;

/// Prefix carried by canonical counter names
pub const NAME_PREFIX: &str = "PAPI_";

/// Errors raised by a counter backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("counter backend `{backend}` failed to initialize: {reason}")]
    Init {
        backend: &'static str,
        reason: String,
    },

    #[error("unknown counter: {0}")]
    UnknownCounter(String),

    #[error("unknown counter code {0}")]
    UnknownRef(CounterRef),

    #[error("counter session error: {0}")]
    Session(String),
}

pub type Result<T> = std::result::Result<T, BackendError>;

/// Opaque backend-specific counter code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CounterRef(pub u32);

impl CounterRef {
    pub fn code(self) -> u32 {
        self.0
    }
}

impl fmt::Display for CounterRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Canonical spelling of a counter name (`TOT_CYC` -> `PAPI_TOT_CYC`)
pub fn canonical_name(name: &str) -> Cow<'_, str> {
    if name.starts_with("PAPI") {
        Cow::Borrowed(name)
    } else {
        Cow::Owned(format!("{}{}", NAME_PREFIX, name))
    }
}

/// A live measurement session over a fixed, ordered set of counters
///
/// Values are totals of events observed while the session was running,
/// since the session was created. They are never reset, so callers take
/// differences of two reads to obtain an interval's delta.
pub trait CounterSession: Send {
    /// Start counting. Starting a running session is a no-op.
    fn start(&mut self) -> Result<()>;

    /// Read the totals without changing the running state
    fn read(&mut self) -> Result<Vec<i64>>;

    /// Stop counting and return the final totals
    fn stop(&mut self) -> Result<Vec<i64>>;

    /// Number of counters in the session
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Capability interface over a hardware (or simulated) counter subsystem
pub trait CounterBackend: Send + Sync {
    /// Short name of the backend, used in logs and errors
    fn backend_name(&self) -> &'static str;

    /// Bring the subsystem up. Idempotent; every later call observes the
    /// outcome of the first one.
    fn initialize(&self) -> Result<()>;

    /// Every counter this backend can record
    fn counters(&self) -> &[CounterInfo];

    /// Open a session for `counters`, in the given order
    fn create_session(&self, counters: &[CounterRef]) -> Result<Box<dyn CounterSession>>;

    fn info(&self, counter: CounterRef) -> Result<&CounterInfo> {
        self.counters()
            .iter()
            .find(|info| info.counter == counter)
            .ok_or(BackendError::UnknownRef(counter))
    }

    fn is_known_counter(&self, name: &str) -> bool {
        self.resolve(name).is_ok()
    }

    fn resolve(&self, name: &str) -> Result<CounterRef> {
        let key = canonical_name(name);
        self.counters()
            .iter()
            .find(|info| info.name == key)
            .map(|info| info.counter)
            .ok_or_else(|| BackendError::UnknownCounter(name.to_string()))
    }

    fn counter_name(&self, counter: CounterRef) -> Result<&str> {
        self.info(counter).map(|info| info.name)
    }

    fn short_description(&self, counter: CounterRef) -> Result<&str> {
        self.info(counter).map(|info| info.short_description)
    }

    fn long_description(&self, counter: CounterRef) -> Result<&str> {
        self.info(counter).map(|info| info.long_description)
    }
}

/// Which backend implementation to construct
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Simulated,
    #[cfg(feature = "perf")]
    Perf,
}

impl Default for BackendKind {
    #[cfg(feature = "perf")]
    fn default() -> Self {
        BackendKind::Perf
    }

    #[cfg(not(feature = "perf"))]
    fn default() -> Self {
        BackendKind::Simulated
    }
}

/// Construct and initialize a backend
pub fn open_backend(kind: BackendKind) -> Result<Arc<dyn CounterBackend>> {
    let backend: Arc<dyn CounterBackend> = match kind {
        BackendKind::Simulated => Arc::new(simulated::SimulatedBackend::new()),
        #[cfg(feature = "perf")]
        BackendKind::Perf => Arc::new(perf::PerfBackend::new()),
    };
    backend.initialize()?;
    tracing::debug!(
        "counter backend `{}` ready with {} counters",
        backend.backend_name(),
        backend.counters().len()
    );
    Ok(backend)
}
