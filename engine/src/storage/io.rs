//! Storage abstraction for index nodes.
//!
//! This module provides the `IndexStorageManager` trait that the tree and its
//! sessions talk to, allowing the engine to use real chunk files in
//! production and fault-injecting decorators in tests.
//!
//! # Design
//!
//! The trait works on raw slot bytes and [`Pointer`]s:
//! - Slot allocation and root resolution
//! - Node read/write/update/remove
//! - Purging an index and closing open files
//!
//! Pointers handed out are relative to the index's beginning offset inside
//! its chunk, so regions can move inside a shared file without rewriting any
//! stored node.

use std::path::PathBuf;
use std::time::Duration;

use crate::pointer::Pointer;
use crate::storage::header::HeaderError;

/// Errors that can occur during storage operations.
#[derive(Debug)]
pub enum StorageError {
    /// I/O error.
    Io(std::io::Error),
    /// Fewer bytes than requested could be read.
    ShortRead { expected: usize, actual: usize },
    /// Fewer bytes than requested could be written.
    ShortWrite { expected: usize, actual: usize },
    /// No file handle became available in time.
    PoolTimeout { path: PathBuf, waited: Duration },
    /// Header manager error.
    Header(HeaderError),
    /// A lock was poisoned by a panicking thread.
    LockPoisoned,
    /// An I/O worker task failed.
    Worker(String),
    /// The pointer does not address a node slot of this index.
    InvalidPointer(Pointer),
    /// Injected fault for simulation.
    InjectedFault(String),
    /// The storage (or its file pool) has been closed.
    Closed,
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::ShortRead { expected, actual } => {
                write!(f, "short read: expected {expected} bytes, got {actual}")
            }
            Self::ShortWrite { expected, actual } => {
                write!(f, "short write: expected {expected} bytes, wrote {actual}")
            }
            Self::PoolTimeout { path, waited } => write!(
                f,
                "timed out after {}ms waiting for a file handle to {}",
                waited.as_millis(),
                path.display()
            ),
            Self::Header(e) => write!(f, "header error: {e}"),
            Self::LockPoisoned => write!(f, "storage lock poisoned"),
            Self::Worker(msg) => write!(f, "I/O worker failed: {msg}"),
            Self::InvalidPointer(pointer) => write!(f, "invalid node pointer {pointer}"),
            Self::InjectedFault(msg) => write!(f, "injected fault: {msg}"),
            Self::Closed => write!(f, "storage is closed"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Header(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<HeaderError> for StorageError {
    fn from(e: HeaderError) -> Self {
        Self::Header(e)
    }
}

/// A stored node: where it lives and its slot bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeData {
    pub pointer: Pointer,
    pub bytes: Vec<u8>,
}

/// Abstraction over node slot storage.
///
/// # Implementation Notes
///
/// Implementations must ensure:
/// - `read_node` returns the last bytes written to a slot
/// - `write_new_node` never hands out a slot that holds a live node
/// - `remove_node` leaves the slot zero-filled and reusable
/// - `get_root` returns `None` when the root slot is unoccupied
pub trait IndexStorageManager: Send + Sync {
    /// Reserve a zero-filled slot for a new node.
    fn allocate(&self, index_id: u32, slot_size: usize) -> Result<Pointer, StorageError>;

    /// Read the root node, if the index has one.
    fn get_root(&self, index_id: u32, slot_size: usize) -> Result<Option<NodeData>, StorageError>;

    /// Read the slot at `pointer`.
    fn read_node(
        &self,
        index_id: u32,
        pointer: Pointer,
        slot_size: usize,
    ) -> Result<NodeData, StorageError>;

    /// Allocate a slot and write `data` into it.
    ///
    /// When `is_root` is set the new node becomes the index's root.
    fn write_new_node(
        &self,
        index_id: u32,
        data: &[u8],
        is_root: bool,
    ) -> Result<NodeData, StorageError>;

    /// Overwrite the slot at `pointer`.
    fn update_node(
        &self,
        index_id: u32,
        pointer: Pointer,
        data: &[u8],
        is_root: bool,
    ) -> Result<(), StorageError>;

    /// Zero-fill the slot at `pointer` and make it reusable.
    fn remove_node(
        &self,
        index_id: u32,
        pointer: Pointer,
        slot_size: usize,
    ) -> Result<(), StorageError>;

    /// Drop every node and the root of an index.
    fn purge_index(&self, index_id: u32) -> Result<(), StorageError>;

    /// Release open files.
    fn close(&self) -> Result<(), StorageError>;
}
