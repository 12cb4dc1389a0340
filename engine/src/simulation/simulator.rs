//! Seeded simulation of random index operations under injected faults.
//!
//! The simulator drives a Memory-Snapshot tree over a [`FaultyStorage`] and
//! mirrors every successful operation in an in-memory model. An operation
//! that fails must leave the index exactly as the model says, so after each
//! step the whole index is compared with the model with faults switched off.

use std::collections::BTreeMap;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::btree::node::NodeError;
use crate::btree::{BPlusTreeIndexManager, KeyPolicy};
use crate::error::IndexError;
use crate::index::IndexManager;
use crate::pointer::Pointer;
use crate::session::SessionStrategy;
use crate::simulation::storage::{FaultConfig, FaultyStorage};
use crate::storage::IndexStorageManager;

/// Index id used by the simulated tree.
pub const SIMULATED_INDEX_ID: u32 = 1;

#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    pub seed: u64,
    pub degree: usize,
    /// Keys are drawn from `1..=key_space`.
    pub key_space: i64,
    pub fault_config: FaultConfig,
}

impl SimulatorConfig {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            degree: 4,
            key_space: 64,
            fault_config: FaultConfig::default(),
        }
    }

    #[must_use]
    pub const fn with_fault_config(mut self, config: FaultConfig) -> Self {
        self.fault_config = config;
        self
    }

    #[must_use]
    pub const fn with_degree(mut self, degree: usize) -> Self {
        self.degree = degree;
        self
    }

    #[must_use]
    pub const fn with_key_space(mut self, key_space: i64) -> Self {
        self.key_space = key_space;
        self
    }
}

/// One simulated step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Insert(i64),
    Update(i64),
    Remove(i64),
}

#[derive(Debug)]
pub struct SimulationResult {
    pub seed: u64,
    pub operations: u64,
    pub successful_operations: u64,
    /// Operations that failed with an injected fault and were rolled back.
    pub failed_operations: u64,
    pub violations: Vec<String>,
    /// Set when a rollback itself failed; the run stops there.
    pub aborted: Option<String>,
}

impl SimulationResult {
    #[must_use]
    pub const fn passed(&self) -> bool {
        self.violations.is_empty()
    }
}

pub struct Simulator {
    config: SimulatorConfig,
    storage: Arc<FaultyStorage>,
    tree: BPlusTreeIndexManager<i64, Pointer>,
    model: BTreeMap<i64, Pointer>,
    rng: StdRng,
    next_value: u64,
}

impl Simulator {
    /// Simulate over `storage`, which should hold no data for
    /// [`SIMULATED_INDEX_ID`].
    pub fn new(
        config: SimulatorConfig,
        storage: Arc<dyn IndexStorageManager>,
    ) -> Result<Self, NodeError> {
        let storage = Arc::new(FaultyStorage::new(
            storage,
            config.seed,
            config.fault_config.clone(),
        ));
        #[allow(clippy::disallowed_methods)] // Arc::clone is required for shared ownership
        let tree_storage = Arc::clone(&storage) as Arc<dyn IndexStorageManager>;
        let tree = BPlusTreeIndexManager::new(
            SIMULATED_INDEX_ID,
            config.degree,
            tree_storage,
            SessionStrategy::MemorySnapshot,
            KeyPolicy::Unique,
        )?;
        let rng = StdRng::seed_from_u64(config.seed);
        Ok(Self {
            config,
            storage,
            tree,
            model: BTreeMap::new(),
            rng,
            next_value: 1,
        })
    }

    #[must_use]
    pub fn faulty_storage(&self) -> &FaultyStorage {
        &self.storage
    }

    fn next_operation(&mut self) -> Operation {
        let key = self.rng.random_range(1..=self.config.key_space);
        match self.rng.random_range(0..10) {
            0..=5 => Operation::Insert(key),
            6..=7 => Operation::Update(key),
            _ => Operation::Remove(key),
        }
    }

    /// Run `count` random operations.
    pub fn run(&mut self, count: u64) -> SimulationResult {
        let mut result = SimulationResult {
            seed: self.config.seed,
            operations: 0,
            successful_operations: 0,
            failed_operations: 0,
            violations: Vec::new(),
            aborted: None,
        };

        for step in 0..count {
            let operation = self.next_operation();
            result.operations += 1;

            match self.apply(operation) {
                Ok(None) => result.successful_operations += 1,
                Ok(Some(violation)) => {
                    result.violations.push(format!("step {step}: {violation}"));
                }
                Err(IndexError::RollbackFailed { cause, rollback }) => {
                    result.aborted = Some(format!(
                        "step {step}: {operation:?} failed ({cause}) and rollback failed ({rollback})"
                    ));
                    return result;
                }
                Err(e) => {
                    tracing::debug!("Step {step}: {operation:?} failed: {e}");
                    result.failed_operations += 1;
                }
            }

            if let Err(violation) = self.check_model() {
                result.violations.push(format!("step {step} after {operation:?}: {violation}"));
                return result;
            }
        }
        result
    }

    /// Run one operation against the tree and the model.
    ///
    /// Returns a description when the tree's answer disagrees with the model.
    fn apply(&mut self, operation: Operation) -> Result<Option<String>, IndexError> {
        match operation {
            Operation::Insert(key) => {
                let value = Pointer::data(self.next_value, 0);
                self.next_value += 1;
                match self.tree.add_index(key, value) {
                    Ok(()) if self.model.contains_key(&key) => {
                        Ok(Some(format!("duplicate insert of {key} succeeded")))
                    }
                    Ok(()) => {
                        self.model.insert(key, value);
                        Ok(None)
                    }
                    Err(IndexError::IndexExists(_)) if self.model.contains_key(&key) => Ok(None),
                    Err(e) => Err(e),
                }
            }
            Operation::Update(key) => {
                let value = Pointer::data(self.next_value, 0);
                self.next_value += 1;
                let updated = self.tree.update_index(&key, value)?;
                if updated != self.model.contains_key(&key) {
                    return Ok(Some(format!("update of {key} returned {updated}")));
                }
                if updated {
                    self.model.insert(key, value);
                }
                Ok(None)
            }
            Operation::Remove(key) => {
                let removed = self.tree.remove_index(&key)?;
                if removed != self.model.contains_key(&key) {
                    return Ok(Some(format!("remove of {key} returned {removed}")));
                }
                self.model.remove(&key);
                Ok(None)
            }
        }
    }

    /// Compare the whole index with the model, with faults disabled.
    fn check_model(&self) -> Result<(), String> {
        self.storage.set_enabled(false).map_err(|e| e.to_string())?;
        let entries: Result<Vec<(i64, Pointer)>, IndexError> = self
            .tree
            .iter()
            .and_then(|iter| iter.collect());
        self.storage.set_enabled(true).map_err(|e| e.to_string())?;

        let entries = entries.map_err(|e| format!("reading the index failed: {e}"))?;
        let expected: Vec<(i64, Pointer)> = self.model.iter().map(|(k, v)| (*k, *v)).collect();
        if entries != expected {
            return Err(format!(
                "index holds {} entries, model holds {}",
                entries.len(),
                expected.len()
            ));
        }
        Ok(())
    }
}
