//! Fault injection and seeded simulation.
//!
//! - [`FaultyStorage`] wraps any storage and fails calls at random (seeded)
//!   or on a script.
//! - [`Simulator`] runs random operations on a Memory-Snapshot tree over
//!   faulty storage and checks after each one that failed operations left
//!   the index untouched.
//!
//! # Usage
//!
//! ```ignore
//! use simulation::{FaultConfig, Simulator, SimulatorConfig};
//!
//! let config = SimulatorConfig::new(12345).with_fault_config(FaultConfig::commit_faults(0.01));
//! let mut sim = Simulator::new(config, storage)?;
//! let result = sim.run(1000);
//!
//! assert!(result.passed());
//! ```

mod simulator;
mod storage;

pub use simulator::{
    Operation, SIMULATED_INDEX_ID, SimulationResult, Simulator, SimulatorConfig,
};
pub use storage::{FaultConfig, FaultStats, FaultyStorage};
