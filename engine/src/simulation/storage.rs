//! Fault-injecting storage decorator.
//!
//! Wraps any [`IndexStorageManager`] and fails calls either at random, with
//! per-operation rates drawn from a seeded RNG, or on a script
//! ([`FaultyStorage::fail_updates_after`]). Injected faults are reported as
//! [`StorageError::InjectedFault`] and leave the inner storage untouched,
//! except for torn updates, which write a prefix of the new bytes first.

use std::sync::{Arc, Mutex, MutexGuard};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::pointer::Pointer;
use crate::storage::{IndexStorageManager, NodeData, StorageError};

/// Per-operation fault probabilities (0.0 - 1.0).
#[derive(Debug, Clone, Default)]
pub struct FaultConfig {
    pub allocate_error_rate: f64,
    pub read_error_rate: f64,
    pub write_error_rate: f64,
    pub update_error_rate: f64,
    pub remove_error_rate: f64,
    /// Probability that an update writes only part of the node, then fails.
    pub torn_update_rate: f64,
}

impl FaultConfig {
    #[must_use]
    pub fn no_faults() -> Self {
        Self::default()
    }

    /// Faults only on the calls a commit makes.
    #[must_use]
    pub const fn commit_faults(rate: f64) -> Self {
        Self {
            allocate_error_rate: 0.0,
            read_error_rate: 0.0,
            write_error_rate: 0.0,
            update_error_rate: rate,
            remove_error_rate: rate,
            torn_update_rate: rate,
        }
    }

    /// Low fault rates on every operation.
    #[must_use]
    pub const fn low_faults() -> Self {
        Self {
            allocate_error_rate: 0.001,
            read_error_rate: 0.001,
            write_error_rate: 0.001,
            update_error_rate: 0.001,
            remove_error_rate: 0.001,
            torn_update_rate: 0.001,
        }
    }
}

/// Counters for calls and injected faults.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FaultStats {
    pub reads: u64,
    pub writes: u64,
    pub updates: u64,
    pub removes: u64,
    pub injected_faults: u64,
    pub torn_updates: u64,
}

struct FaultState {
    config: FaultConfig,
    rng: StdRng,
    enabled: bool,
    updates_left: Option<u64>,
    /// Clear `updates_left` after the scripted failure fires.
    single_update_failure: bool,
    removes_left: Option<u64>,
    stats: FaultStats,
}

impl FaultState {
    fn roll(&mut self, rate: f64) -> bool {
        self.enabled && rate > 0.0 && self.rng.random::<f64>() < rate
    }
}

/// Decorator that injects storage faults.
pub struct FaultyStorage {
    inner: Arc<dyn IndexStorageManager>,
    state: Mutex<FaultState>,
}

/// What an update call should do.
enum UpdateFault {
    None,
    Fail,
    Torn(usize),
}

impl FaultyStorage {
    /// Wrap `inner`, injecting faults per `config`. The same seed produces
    /// the same faults for the same sequence of calls.
    #[must_use]
    pub fn new(inner: Arc<dyn IndexStorageManager>, seed: u64, config: FaultConfig) -> Self {
        Self {
            inner,
            state: Mutex::new(FaultState {
                config,
                rng: StdRng::seed_from_u64(seed),
                enabled: true,
                updates_left: None,
                single_update_failure: false,
                removes_left: None,
                stats: FaultStats::default(),
            }),
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, FaultState>, StorageError> {
        self.state.lock().map_err(|_| StorageError::LockPoisoned)
    }

    pub fn set_fault_config(&self, config: FaultConfig) -> Result<(), StorageError> {
        self.state()?.config = config;
        Ok(())
    }

    /// Turn every fault, random and scripted, on or off.
    pub fn set_enabled(&self, enabled: bool) -> Result<(), StorageError> {
        self.state()?.enabled = enabled;
        Ok(())
    }

    /// Let `count` more updates through, then fail every update.
    pub fn fail_updates_after(&self, count: u64) -> Result<(), StorageError> {
        let mut state = self.state()?;
        state.updates_left = Some(count);
        state.single_update_failure = false;
        drop(state);
        Ok(())
    }

    /// Let `count` more updates through, fail the next one, then stop
    /// failing.
    pub fn fail_one_update_after(&self, count: u64) -> Result<(), StorageError> {
        let mut state = self.state()?;
        state.updates_left = Some(count);
        state.single_update_failure = true;
        drop(state);
        Ok(())
    }

    /// Let `count` more removals through, then fail every removal.
    pub fn fail_removes_after(&self, count: u64) -> Result<(), StorageError> {
        self.state()?.removes_left = Some(count);
        Ok(())
    }

    /// Drop scripted failures.
    pub fn clear_script(&self) -> Result<(), StorageError> {
        let mut state = self.state()?;
        state.updates_left = None;
        state.single_update_failure = false;
        state.removes_left = None;
        drop(state);
        Ok(())
    }

    pub fn stats(&self) -> Result<FaultStats, StorageError> {
        Ok(self.state()?.stats.clone())
    }

    fn check(&self, operation: &str, rate: impl Fn(&FaultConfig) -> f64) -> Result<(), StorageError> {
        let mut state = self.state()?;
        let rate = rate(&state.config);
        if state.roll(rate) {
            state.stats.injected_faults += 1;
            return Err(StorageError::InjectedFault(format!("simulated {operation} error")));
        }
        Ok(())
    }

    fn scripted(left: &mut Option<u64>) -> bool {
        match left {
            Some(0) => true,
            Some(n) => {
                *n -= 1;
                false
            }
            None => false,
        }
    }

    fn update_fault(&self, len: usize) -> Result<UpdateFault, StorageError> {
        let mut state = self.state()?;
        state.stats.updates += 1;
        if !state.enabled {
            return Ok(UpdateFault::None);
        }
        let (error_rate, torn_rate) = (state.config.update_error_rate, state.config.torn_update_rate);
        let scripted = Self::scripted(&mut state.updates_left);
        if scripted && state.single_update_failure {
            state.updates_left = None;
        }
        let fault = if scripted || state.roll(error_rate) {
            UpdateFault::Fail
        } else if len > 1 && state.roll(torn_rate) {
            state.stats.torn_updates += 1;
            UpdateFault::Torn(state.rng.random_range(1..len))
        } else {
            UpdateFault::None
        };
        if !matches!(fault, UpdateFault::None) {
            state.stats.injected_faults += 1;
        }
        drop(state);
        Ok(fault)
    }
}

impl IndexStorageManager for FaultyStorage {
    fn allocate(&self, index_id: u32, slot_size: usize) -> Result<Pointer, StorageError> {
        self.check("allocate", |c| c.allocate_error_rate)?;
        self.inner.allocate(index_id, slot_size)
    }

    fn get_root(&self, index_id: u32, slot_size: usize) -> Result<Option<NodeData>, StorageError> {
        self.state()?.stats.reads += 1;
        self.check("read", |c| c.read_error_rate)?;
        self.inner.get_root(index_id, slot_size)
    }

    fn read_node(
        &self,
        index_id: u32,
        pointer: Pointer,
        slot_size: usize,
    ) -> Result<NodeData, StorageError> {
        self.state()?.stats.reads += 1;
        self.check("read", |c| c.read_error_rate)?;
        self.inner.read_node(index_id, pointer, slot_size)
    }

    fn write_new_node(
        &self,
        index_id: u32,
        data: &[u8],
        is_root: bool,
    ) -> Result<NodeData, StorageError> {
        self.state()?.stats.writes += 1;
        self.check("write", |c| c.write_error_rate)?;
        self.inner.write_new_node(index_id, data, is_root)
    }

    fn update_node(
        &self,
        index_id: u32,
        pointer: Pointer,
        data: &[u8],
        is_root: bool,
    ) -> Result<(), StorageError> {
        match self.update_fault(data.len())? {
            UpdateFault::None => self.inner.update_node(index_id, pointer, data, is_root),
            UpdateFault::Fail => Err(StorageError::InjectedFault(format!(
                "simulated update error at {pointer}"
            ))),
            UpdateFault::Torn(cutoff) => {
                let mut torn = data.to_vec();
                torn[cutoff..].fill(0);
                self.inner.update_node(index_id, pointer, &torn, is_root)?;
                Err(StorageError::InjectedFault(format!(
                    "simulated torn update at {pointer} after {cutoff} bytes"
                )))
            }
        }
    }

    fn remove_node(
        &self,
        index_id: u32,
        pointer: Pointer,
        slot_size: usize,
    ) -> Result<(), StorageError> {
        {
            let mut state = self.state()?;
            state.stats.removes += 1;
            if state.enabled && Self::scripted(&mut state.removes_left) {
                state.stats.injected_faults += 1;
                return Err(StorageError::InjectedFault(format!(
                    "simulated remove error at {pointer}"
                )));
            }
        }
        self.check("remove", |c| c.remove_error_rate)?;
        self.inner.remove_node(index_id, pointer, slot_size)
    }

    fn purge_index(&self, index_id: u32) -> Result<(), StorageError> {
        self.inner.purge_index(index_id)
    }

    fn close(&self) -> Result<(), StorageError> {
        self.inner.close()
    }
}
