//! Units of work over node storage.
//!
//! A tree operation reads, creates, updates and removes nodes through an
//! [`IndexIoSession`] and finishes with `commit`. The strategy decides when
//! changes reach storage:
//!
//! - [`ImmediateSession`]: every change is written as it happens.
//! - [`MemorySnapshotSession`]: updates and removals are staged in memory
//!   and applied on commit; a failed commit restores the nodes it touched.

mod immediate;
mod snapshot;

use std::sync::Arc;

use crate::btree::node::{Node, NodeLayout, TYPE_INTERNAL_BIT, TYPE_LEAF_BIT};
use crate::error::IndexError;
use crate::pointer::Pointer;
use crate::storage::{IndexStorageManager, NodeData};

pub use immediate::ImmediateSession;
pub use snapshot::MemorySnapshotSession;

/// Node I/O for one unit of work on one index.
pub trait IndexIoSession {
    /// Layout of the nodes this session reads and writes.
    fn layout(&self) -> &NodeLayout;

    /// The index's root node, if it has one.
    fn get_root(&mut self) -> Result<Option<Node>, IndexError>;

    /// Store a new node and assign its pointer.
    fn write(&mut self, node: &mut Node) -> Result<NodeData, IndexError>;

    /// Read a node; `None` if the slot is empty or removed in this session.
    fn read(&mut self, pointer: Pointer) -> Result<Option<Node>, IndexError>;

    /// Replace a stored node's contents.
    fn update(&mut self, node: &Node) -> Result<(), IndexError>;

    /// Remove a stored node.
    fn remove(&mut self, node: &Node) -> Result<(), IndexError>;

    /// Make every change of this unit of work durable.
    fn commit(&mut self) -> Result<(), IndexError>;

    /// Undo whatever this unit of work already wrote.
    fn rollback(&mut self) -> Result<(), IndexError>;
}

/// How a tree's sessions reach storage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionStrategy {
    #[default]
    Immediate,
    MemorySnapshot,
}

impl SessionStrategy {
    /// Start a session for `index_id`.
    #[must_use]
    pub fn open(
        self,
        index_id: u32,
        layout: NodeLayout,
        storage: Arc<dyn IndexStorageManager>,
    ) -> Box<dyn IndexIoSession> {
        match self {
            Self::Immediate => Box::new(ImmediateSession::new(index_id, layout, storage)),
            Self::MemorySnapshot => Box::new(MemorySnapshotSession::new(index_id, layout, storage)),
        }
    }
}

impl std::str::FromStr for SessionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "immediate" => Ok(Self::Immediate),
            "memory-snapshot" => Ok(Self::MemorySnapshot),
            other => Err(format!("unknown session strategy '{other}'")),
        }
    }
}

impl std::fmt::Display for SessionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Immediate => write!(f, "immediate"),
            Self::MemorySnapshot => write!(f, "memory-snapshot"),
        }
    }
}

/// Whether slot bytes hold a node at all.
fn is_occupied(bytes: &[u8]) -> bool {
    bytes
        .first()
        .is_some_and(|h| h & (TYPE_LEAF_BIT | TYPE_INTERNAL_BIT) != 0)
}

/// Decode stored bytes, treating an empty slot as no node.
fn decode_stored(layout: &NodeLayout, data: NodeData) -> Result<Option<Node>, IndexError> {
    if !is_occupied(&data.bytes) {
        return Ok(None);
    }
    Ok(Some(Node::decode(layout, Some(data.pointer), data.bytes)?))
}

fn stored_pointer(node: &Node) -> Result<Pointer, IndexError> {
    node.pointer().ok_or_else(|| {
        IndexError::Corruption(crate::btree::node::NodeError::CorruptNode(
            "node has not been stored".to_string(),
        ))
    })
}
