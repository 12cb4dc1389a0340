//! Index node storage.
//!
//! Fixed-size node slots stored in chunk files, addressed by [`Pointer`]s
//! relative to each index's region.
//!
//! # Components
//!
//! - [`IndexStorageManager`]: the trait trees and sessions talk to
//! - [`FileIndexStorage`]: chunk files in the organized or compact layout
//! - [`IndexHeaderManager`]: root locations and region offsets
//! - [`FileHandlerPool`]: bounded open files with completion-based I/O
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use index_engine::storage::{
//!     FileHandlerPool, FileIndexStorage, IndexStorageManager, JsonHeaderManager,
//!     StorageOptions,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let dir = std::path::Path::new("./data");
//! let header = Arc::new(JsonHeaderManager::open(dir)?);
//! let pool = Arc::new(FileHandlerPool::new(Some(64), 4)?);
//! let storage = FileIndexStorage::organized(dir, header, pool, StorageOptions::default())?;
//!
//! let node = storage.write_new_node(1, &[0x05; 120], true)?;
//! assert!(storage.get_root(1, 120)?.is_some());
//! # let _ = node;
//! # Ok(())
//! # }
//! ```
//!
//! [`Pointer`]: crate::pointer::Pointer

mod allocator;
mod file;
mod header;
mod io;
mod pool;

pub use allocator::SlotAllocator;
pub use file::{FileIndexStorage, INDEX_FILE_PREFIX, StorageLayout, StorageOptions};
pub use header::{
    HEADER_FILE_NAME, Header, HeaderError, InMemoryHeaderManager, IndexBeginning,
    IndexHeaderManager, JsonHeaderManager, Location,
};
pub use io::{IndexStorageManager, NodeData, StorageError};
pub use pool::{ChannelLease, FileChannel, FileHandlerPool, IoFuture, wait};
