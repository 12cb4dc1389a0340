//! Session that writes every change straight through.

use std::sync::Arc;

use crate::btree::node::{Node, NodeLayout};
use crate::error::IndexError;
use crate::pointer::Pointer;
use crate::session::{IndexIoSession, decode_stored, stored_pointer};
use crate::storage::{IndexStorageManager, NodeData};

/// Forwards each call to storage; `commit` has nothing left to do.
pub struct ImmediateSession {
    index_id: u32,
    layout: NodeLayout,
    storage: Arc<dyn IndexStorageManager>,
}

impl ImmediateSession {
    #[must_use]
    pub fn new(index_id: u32, layout: NodeLayout, storage: Arc<dyn IndexStorageManager>) -> Self {
        Self {
            index_id,
            layout,
            storage,
        }
    }
}

impl IndexIoSession for ImmediateSession {
    fn layout(&self) -> &NodeLayout {
        &self.layout
    }

    fn get_root(&mut self) -> Result<Option<Node>, IndexError> {
        match self
            .storage
            .get_root(self.index_id, self.layout.node_size())?
        {
            Some(data) => decode_stored(&self.layout, data),
            None => Ok(None),
        }
    }

    fn write(&mut self, node: &mut Node) -> Result<NodeData, IndexError> {
        let data = self
            .storage
            .write_new_node(self.index_id, node.data(), node.is_root())?;
        node.set_pointer(data.pointer);
        Ok(data)
    }

    fn read(&mut self, pointer: Pointer) -> Result<Option<Node>, IndexError> {
        let data = self
            .storage
            .read_node(self.index_id, pointer, self.layout.node_size())?;
        decode_stored(&self.layout, data)
    }

    fn update(&mut self, node: &Node) -> Result<(), IndexError> {
        let pointer = stored_pointer(node)?;
        self.storage
            .update_node(self.index_id, pointer, node.data(), node.is_root())?;
        Ok(())
    }

    fn remove(&mut self, node: &Node) -> Result<(), IndexError> {
        let pointer = stored_pointer(node)?;
        self.storage
            .remove_node(self.index_id, pointer, self.layout.node_size())?;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), IndexError> {
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), IndexError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::node::{LeafNode, NodeType};
    use crate::testing::new_test_storage;

    #[test]
    fn test_changes_are_visible_before_commit() {
        let test = new_test_storage();
        let layout = NodeLayout::for_codecs::<i64, u64>(4).expect("layout");
        let mut session = ImmediateSession::new(1, layout, test.storage());

        let mut leaf = LeafNode::<i64, u64>::new();
        leaf.is_root = true;
        leaf.insert(5, 50);
        let mut node = Node::empty(&layout, NodeType::Leaf);
        leaf.write_to_node(&layout, &mut node).expect("encode");
        let written = session.write(&mut node).expect("write");
        assert_eq!(node.pointer(), Some(written.pointer));

        let root = session.get_root().expect("root").expect("root exists");
        assert_eq!(root.data(), node.data());

        session.remove(&node).expect("remove");
        assert_eq!(session.read(written.pointer).expect("read"), None);
        assert_eq!(session.get_root().expect("root"), None);
        session.commit().expect("commit");
    }

    #[test]
    fn test_update_requires_stored_node() {
        let test = new_test_storage();
        let layout = NodeLayout::for_codecs::<i64, u64>(4).expect("layout");
        let mut session = ImmediateSession::new(1, layout, test.storage());

        let node = Node::empty(&layout, NodeType::Leaf);
        assert!(matches!(
            session.update(&node),
            Err(IndexError::Corruption(_))
        ));
    }
}
