//! Session that stages changes in memory until commit.
//!
//! New nodes are allocated and written immediately (their pointers must be
//! known to link them into the tree); updates and removals wait for
//! `commit`. The first time a stored node is touched its bytes are captured,
//! so a failed commit can put every touched slot back the way it was.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::btree::node::{Node, NodeLayout, ROOT_BIT};
use crate::error::IndexError;
use crate::pointer::Pointer;
use crate::session::{IndexIoSession, decode_stored, stored_pointer};
use crate::storage::{IndexStorageManager, NodeData};

/// Buffered session with rollback.
pub struct MemorySnapshotSession {
    index_id: u32,
    layout: NodeLayout,
    storage: Arc<dyn IndexStorageManager>,
    created: BTreeSet<Pointer>,
    updated: BTreeSet<Pointer>,
    deleted: BTreeSet<Pointer>,
    pool: HashMap<Pointer, Node>,
    original: HashMap<Pointer, Vec<u8>>,
    root: Option<Pointer>,
}

impl MemorySnapshotSession {
    #[must_use]
    pub fn new(index_id: u32, layout: NodeLayout, storage: Arc<dyn IndexStorageManager>) -> Self {
        Self {
            index_id,
            layout,
            storage,
            created: BTreeSet::new(),
            updated: BTreeSet::new(),
            deleted: BTreeSet::new(),
            pool: HashMap::new(),
            original: HashMap::new(),
            root: None,
        }
    }

    /// Capture a stored node's bytes before this session first changes it.
    fn snapshot(&mut self, pointer: Pointer) -> Result<(), IndexError> {
        if self.created.contains(&pointer) || self.original.contains_key(&pointer) {
            return Ok(());
        }
        let data = self
            .storage
            .read_node(self.index_id, pointer, self.layout.node_size())?;
        self.original.insert(pointer, data.bytes);
        Ok(())
    }

    fn apply(&mut self) -> Result<(), IndexError> {
        for pointer in &self.deleted {
            self.storage
                .remove_node(self.index_id, *pointer, self.layout.node_size())?;
        }
        for pointer in &self.updated {
            let Some(node) = self.pool.get(pointer) else {
                continue;
            };
            self.storage
                .update_node(self.index_id, *pointer, node.data(), node.is_root())?;
        }
        Ok(())
    }

    fn clear(&mut self) {
        self.created.clear();
        self.updated.clear();
        self.deleted.clear();
        self.pool.clear();
        self.original.clear();
        self.root = None;
    }

    /// Number of nodes with staged changes.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.updated.len() + self.deleted.len()
    }
}

impl IndexIoSession for MemorySnapshotSession {
    fn layout(&self) -> &NodeLayout {
        &self.layout
    }

    fn get_root(&mut self) -> Result<Option<Node>, IndexError> {
        if let Some(root) = self.root {
            return self.read(root);
        }
        let Some(data) = self
            .storage
            .get_root(self.index_id, self.layout.node_size())?
        else {
            return Ok(None);
        };
        let pointer = data.pointer;
        self.original.entry(pointer).or_insert_with(|| data.bytes.clone());
        let node = decode_stored(&self.layout, data)?;
        if let Some(node) = &node {
            self.pool.insert(pointer, node.clone());
            self.root = Some(pointer);
        }
        Ok(node)
    }

    fn write(&mut self, node: &mut Node) -> Result<NodeData, IndexError> {
        let data = self
            .storage
            .write_new_node(self.index_id, node.data(), node.is_root())?;
        node.set_pointer(data.pointer);
        self.created.insert(data.pointer);
        self.pool.insert(data.pointer, node.clone());
        if node.is_root() {
            self.root = Some(data.pointer);
        }
        Ok(data)
    }

    fn read(&mut self, pointer: Pointer) -> Result<Option<Node>, IndexError> {
        if self.deleted.contains(&pointer) {
            return Ok(None);
        }
        if let Some(node) = self.pool.get(&pointer) {
            return Ok(Some(node.clone()));
        }

        let data = self
            .storage
            .read_node(self.index_id, pointer, self.layout.node_size())?;
        self.original
            .entry(pointer)
            .or_insert_with(|| data.bytes.clone());
        let node = decode_stored(&self.layout, data)?;
        if let Some(node) = &node {
            self.pool.insert(pointer, node.clone());
        }
        Ok(node)
    }

    fn update(&mut self, node: &Node) -> Result<(), IndexError> {
        let pointer = stored_pointer(node)?;
        self.snapshot(pointer)?;
        self.pool.insert(pointer, node.clone());
        self.updated.insert(pointer);
        if node.is_root() {
            self.root = Some(pointer);
        } else if self.root == Some(pointer) {
            self.root = None;
        }
        Ok(())
    }

    fn remove(&mut self, node: &Node) -> Result<(), IndexError> {
        let pointer = stored_pointer(node)?;
        self.snapshot(pointer)?;
        self.pool.remove(&pointer);
        self.updated.remove(&pointer);
        self.deleted.insert(pointer);
        if self.root == Some(pointer) {
            self.root = None;
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<(), IndexError> {
        match self.apply() {
            Ok(()) => {
                self.clear();
                Ok(())
            }
            Err(cause) => {
                tracing::warn!(
                    "Commit on index {} failed, rolling back: {cause}",
                    self.index_id
                );
                match self.rollback() {
                    Ok(()) => Err(cause),
                    Err(rollback) => {
                        tracing::error!(
                            "Rollback on index {} failed: {rollback}",
                            self.index_id
                        );
                        Err(IndexError::RollbackFailed {
                            cause: Box::new(cause),
                            rollback: Box::new(rollback),
                        })
                    }
                }
            }
        }
    }

    /// Restore every touched stored node and drop the nodes created here.
    fn rollback(&mut self) -> Result<(), IndexError> {
        let touched: BTreeSet<Pointer> = self
            .deleted
            .iter()
            .chain(self.updated.iter())
            .filter(|p| !self.created.contains(*p))
            .copied()
            .collect();

        for pointer in touched {
            let Some(bytes) = self.original.get(&pointer) else {
                continue;
            };
            let is_root = bytes.first().is_some_and(|h| h & ROOT_BIT != 0);
            self.storage
                .update_node(self.index_id, pointer, bytes, is_root)?;
        }
        for pointer in &self.created {
            self.storage
                .remove_node(self.index_id, *pointer, self.layout.node_size())?;
        }

        tracing::debug!(
            "Rolled back {} created nodes on index {}",
            self.created.len(),
            self.index_id
        );
        self.clear();
        Ok(())
    }
}
