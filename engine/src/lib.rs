// Life of an operation:
// 1. A caller hits an `IndexManager` (possibly wrapped in lock/cache decorators)
// 2. The tree opens a session with its `SessionStrategy`
// 3. Nodes are read, changed and written through the session
// 4. The session commits to storage, or rolls back on failure
//
// System components:
//  - B+Tree algorithms over fixed-size node slots
//  - Node storage over chunk files and an index header
//  - I/O sessions (immediate and memory snapshot)

pub mod btree;
pub mod codec;
pub mod config;
pub mod error;
pub mod index;
pub mod pointer;
pub mod session;
pub mod simulation;
pub mod storage;

#[cfg(test)]
mod e2e_tests;
#[cfg(test)]
mod testing;

pub use btree::{BPlusTreeIndexManager, KeyPolicy};
pub use config::{ConfigError, EngineConfig};
pub use error::IndexError;
pub use index::{CachedIndexManager, IndexManager, LockedIndexManager, Order};
pub use pointer::Pointer;
pub use session::SessionStrategy;
