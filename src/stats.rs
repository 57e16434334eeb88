//! Measurement units: per-identifier time and counter accumulation
//!
//! A unit keeps a mutex-guarded accumulation state and one backend session
//! per thread that has entered it. Hardware counters observe the thread that
//! opened them, so a thread's session is created on that thread the first
//! time it starts an interval (the constructing thread's eagerly) and is
//! reused for the rest of the unit's life.
//!
//! Intervals are tracked per thread as a stack, so recursive calls get
//! their own start snapshot. Nested intervals on one thread are inclusive:
//! an outer interval also counts what its inner ones counted. A thread's
//! session runs while that thread has an interval open. Session totals never
//! reset, so `stop snapshot - start snapshot` is an interval's delta, which
//! is merged into the shared totals under the lock.

use crate::counters::{BackendError, CounterBackend, CounterRef, CounterSession};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Instant;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StatsError {
    #[error("unit {id} has no open interval on this thread")]
    NotRunning { id: u64 },

    #[error(transparent)]
    Backend(#[from] BackendError),
}

pub type Result<T> = std::result::Result<T, StatsError>;

struct OpenInterval {
    started: Instant,
    snapshot: Vec<i64>,
}

/// One thread's session and open intervals
struct ThreadState {
    /// `None` when the unit has no counters
    session: Option<Box<dyn CounterSession>>,
    open: Vec<OpenInterval>,
}

impl ThreadState {
    fn open(counters: &[CounterRef], backend: &dyn CounterBackend) -> Result<Self> {
        let session = if counters.is_empty() {
            None
        } else {
            Some(backend.create_session(counters)?)
        };
        Ok(Self {
            session,
            open: Vec::new(),
        })
    }

    fn snapshot(&mut self, starting: bool, stopping: bool) -> Result<Vec<i64>> {
        let Some(session) = self.session.as_mut() else {
            return Ok(Vec::new());
        };
        if starting && self.open.is_empty() {
            session.start()?;
        }
        if stopping && self.open.len() == 1 {
            return Ok(session.stop()?);
        }
        Ok(session.read()?)
    }
}

struct UnitState {
    occurs: u64,
    elapsed_ns: i64,
    accumulated: Vec<i64>,
    threads: HashMap<ThreadId, ThreadState>,
    open_total: usize,
}

/// Point-in-time copy of a unit's accumulation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitSnapshot {
    pub id: u64,
    pub counters: Vec<CounterRef>,
    pub occurs: u64,
    /// Nanoseconds spent in closed intervals
    pub elapsed_ns: i64,
    /// Counter totals over closed intervals, parallel to `counters`
    pub accumulated: Vec<i64>,
    /// Intervals started but not yet stopped
    pub unterminated: usize,
}

/// Time and counter accumulator for one identifier
pub struct MeasurementUnit {
    id: u64,
    counters: Vec<CounterRef>,
    backend: Arc<dyn CounterBackend>,
    state: Mutex<UnitState>,
}

impl std::fmt::Debug for MeasurementUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeasurementUnit")
            .field("id", &self.id)
            .field("counters", &self.counters)
            .field("backend", &self.backend.backend_name())
            .finish_non_exhaustive()
    }
}

impl MeasurementUnit {
    /// Create a unit and acquire the calling thread's session
    ///
    /// Units without counters never open a session.
    pub fn new(id: u64, counters: &[CounterRef], backend: Arc<dyn CounterBackend>) -> Result<Self> {
        let mut threads = HashMap::new();
        if !counters.is_empty() {
            let owner = ThreadState::open(counters, backend.as_ref())?;
            threads.insert(thread::current().id(), owner);
        }

        Ok(Self {
            id,
            counters: counters.to_vec(),
            backend,
            state: Mutex::new(UnitState {
                occurs: 0,
                elapsed_ns: 0,
                accumulated: vec![0; counters.len()],
                threads,
                open_total: 0,
            }),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn counters(&self) -> &[CounterRef] {
        &self.counters
    }

    fn state(&self) -> MutexGuard<'_, UnitState> {
        // A panic inside an instrumented call must not lose the data
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open an interval on the calling thread
    pub fn start(&self) -> Result<()> {
        let mut guard = self.state();
        let state = &mut *guard;

        let thread = match state.threads.entry(thread::current().id()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                tracing::trace!("unit {}: opening session for {:?}", self.id, entry.key());
                entry.insert(ThreadState::open(&self.counters, self.backend.as_ref())?)
            }
        };
        let snapshot = thread.snapshot(true, false)?;
        thread.open.push(OpenInterval {
            started: Instant::now(),
            snapshot,
        });

        state.occurs += 1;
        state.open_total += 1;
        Ok(())
    }

    /// Close the calling thread's innermost interval and accumulate it
    pub fn stop(&self) -> Result<()> {
        let now = Instant::now();
        let thread_id = thread::current().id();
        let mut guard = self.state();
        let state = &mut *guard;

        let Some(thread) = state
            .threads
            .get_mut(&thread_id)
            .filter(|thread| !thread.open.is_empty())
        else {
            return Err(StatsError::NotRunning { id: self.id });
        };
        let snapshot = thread.snapshot(false, true)?;
        let Some(interval) = thread.open.pop() else {
            return Err(StatsError::NotRunning { id: self.id });
        };
        if thread.session.is_none() && thread.open.is_empty() {
            state.threads.remove(&thread_id);
        }
        state.open_total -= 1;

        let elapsed = i64::try_from(now.duration_since(interval.started).as_nanos())
            .unwrap_or(i64::MAX);
        state.elapsed_ns = state.elapsed_ns.saturating_add(elapsed);
        for ((total, end), begin) in state
            .accumulated
            .iter_mut()
            .zip(&snapshot)
            .zip(&interval.snapshot)
        {
            *total += end - begin;
        }
        Ok(())
    }

    /// Start an interval that stops when the returned guard drops
    pub fn scope(&self) -> Result<Scope<'_>> {
        self.start()?;
        Ok(Scope {
            unit: self,
            _not_send: PhantomData,
        })
    }

    pub fn occurs(&self) -> u64 {
        self.state().occurs
    }

    pub fn elapsed_ns(&self) -> i64 {
        self.state().elapsed_ns
    }

    pub fn accumulated(&self) -> Vec<i64> {
        self.state().accumulated.clone()
    }

    /// Intervals opened on any thread and not yet closed
    pub fn unterminated(&self) -> usize {
        self.state().open_total
    }

    /// Backend sessions held, one per thread that has entered the unit
    pub fn sessions(&self) -> usize {
        self.state()
            .threads
            .values()
            .filter(|thread| thread.session.is_some())
            .count()
    }

    pub fn snapshot(&self) -> UnitSnapshot {
        let state = self.state();
        UnitSnapshot {
            id: self.id,
            counters: self.counters.clone(),
            occurs: state.occurs,
            elapsed_ns: state.elapsed_ns,
            accumulated: state.accumulated.clone(),
            unterminated: state.open_total,
        }
    }
}

impl Drop for MeasurementUnit {
    fn drop(&mut self) {
        let state = self
            .state
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        for thread in state.threads.values_mut() {
            if thread.open.is_empty() {
                continue;
            }
            if let Some(session) = thread.session.as_mut() {
                if let Err(err) = session.stop() {
                    tracing::debug!(
                        "unit {}: stopping session on drop failed: {}",
                        self.id,
                        err
                    );
                }
            }
        }
    }
}

/// Open interval on a [`MeasurementUnit`], closed on drop
///
/// Intervals belong to the thread that opened them, so the guard is `!Send`.
#[must_use = "the interval closes as soon as the scope is dropped"]
pub struct Scope<'a> {
    unit: &'a MeasurementUnit,
    _not_send: PhantomData<*const ()>,
}

impl Scope<'_> {
    pub fn unit(&self) -> &MeasurementUnit {
        self.unit
    }
}

impl Drop for Scope<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.unit.stop() {
            tracing::warn!("unit {}: failed to close scope: {}", self.unit.id, err);
        }
    }
}
