//! Software-simulated counter backend
//!
//! The backend owns one event register per preset. Whoever plays the role of
//! the hardware advances registers with [`SimulatedBackend::tick`]; sessions
//! only count the events that arrive while they are running, which is the
//! contract a real PMU gives us. Registers are process-wide: a session
//! opened on one thread also sees events ticked from another.

use super::{
    presets, BackendError, CounterBackend, CounterInfo, CounterRef, CounterSession, Result,
};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, OnceLock};

const BACKEND_NAME: &str = "simulated";

/// Counter backend with software event registers
///
/// Cloning shares the registers, so a test can keep a handle for ticking
/// after handing the backend to the runtime.
#[derive(Debug, Clone)]
pub struct SimulatedBackend {
    counters: Arc<[CounterInfo]>,
    registers: Arc<[AtomicI64]>,
    init: Arc<OnceLock<Result<()>>>,
    init_failure: Option<String>,
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedBackend {
    /// Backend exposing every preset
    pub fn new() -> Self {
        Self::with_counters(presets::ALL)
    }

    /// Backend exposing only `counters`
    pub fn with_counters(counters: &[CounterInfo]) -> Self {
        let registers: Vec<AtomicI64> = counters.iter().map(|_| AtomicI64::new(0)).collect();
        Self {
            counters: counters.into(),
            registers: registers.into(),
            init: Arc::new(OnceLock::new()),
            init_failure: None,
        }
    }

    /// Backend whose initialization always fails with `reason`
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            init_failure: Some(reason.into()),
            ..Self::new()
        }
    }

    /// Record `amount` events for the named counter
    pub fn tick(&self, name: &str, amount: i64) -> Result<()> {
        let counter = self.resolve(name)?;
        self.tick_ref(counter, amount)
    }

    /// Record `amount` events for `counter`
    pub fn tick_ref(&self, counter: CounterRef, amount: i64) -> Result<()> {
        let slot = self.slot(counter)?;
        self.registers[slot].fetch_add(amount, Ordering::SeqCst);
        Ok(())
    }

    /// Current raw register value (events since the backend was created)
    pub fn register(&self, counter: CounterRef) -> Result<i64> {
        let slot = self.slot(counter)?;
        Ok(self.registers[slot].load(Ordering::SeqCst))
    }

    fn slot(&self, counter: CounterRef) -> Result<usize> {
        self.counters
            .iter()
            .position(|info| info.counter == counter)
            .ok_or(BackendError::UnknownRef(counter))
    }
}

impl CounterBackend for SimulatedBackend {
    fn backend_name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn initialize(&self) -> Result<()> {
        self.init
            .get_or_init(|| match &self.init_failure {
                Some(reason) => Err(BackendError::Init {
                    backend: BACKEND_NAME,
                    reason: reason.clone(),
                }),
                None => Ok(()),
            })
            .clone()
    }

    fn counters(&self) -> &[CounterInfo] {
        &self.counters
    }

    fn create_session(&self, counters: &[CounterRef]) -> Result<Box<dyn CounterSession>> {
        self.initialize()?;
        let slots = counters
            .iter()
            .map(|counter| self.slot(*counter))
            .collect::<Result<Vec<_>>>()?;
        Ok(Box::new(SimulatedSession {
            registers: Arc::clone(&self.registers),
            base: vec![0; slots.len()],
            counted: vec![0; slots.len()],
            slots,
            running: false,
        }))
    }
}

/// Session over a subset of the simulated registers
#[derive(Debug)]
pub struct SimulatedSession {
    registers: Arc<[AtomicI64]>,
    slots: Vec<usize>,
    /// Register values when the session was last started
    base: Vec<i64>,
    /// Events counted during completed running periods
    counted: Vec<i64>,
    running: bool,
}

impl SimulatedSession {
    fn raw(&self) -> Vec<i64> {
        self.slots
            .iter()
            .map(|slot| self.registers[*slot].load(Ordering::SeqCst))
            .collect()
    }

    fn totals(&self) -> Vec<i64> {
        if !self.running {
            return self.counted.clone();
        }
        self.raw()
            .into_iter()
            .zip(self.base.iter().zip(&self.counted))
            .map(|(now, (base, counted))| counted + (now - base))
            .collect()
    }
}

impl CounterSession for SimulatedSession {
    fn start(&mut self) -> Result<()> {
        if !self.running {
            self.base = self.raw();
            self.running = true;
        }
        Ok(())
    }

    fn read(&mut self) -> Result<Vec<i64>> {
        Ok(self.totals())
    }

    fn stop(&mut self) -> Result<Vec<i64>> {
        self.counted = self.totals();
        self.running = false;
        Ok(self.counted.clone())
    }

    fn len(&self) -> usize {
        self.slots.len()
    }
}
