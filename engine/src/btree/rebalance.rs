//! Underflow repair after a leaf loses an entry.
//!
//! A node below the minimum key count first tries to borrow from the adjacent
//! sibling with more keys. When neither sibling can spare one the node merges
//! with a sibling, which removes a separator from the parent; the parent is
//! repaired the same way, up to the root. A root left with no keys and a
//! single child is removed and the child becomes the root.

use tracing::debug;

use crate::btree::node::{InternalNode, LeafNode, Node, NodeError};
use crate::btree::tree::{BPlusTreeIndexManager, LeafCursor, PathEntry};
use crate::codec::BinaryCodec;
use crate::error::IndexError;
use crate::index::IndexManager;
use crate::pointer::Pointer;
use crate::session::IndexIoSession;

/// Which adjacent sibling to take entries from.
enum Donor {
    Left,
    Right,
}

fn pointer_of(node: &Node) -> Result<Pointer, IndexError> {
    node.pointer().ok_or_else(|| {
        IndexError::Corruption(NodeError::CorruptNode("node has no pointer".to_string()))
    })
}

/// Pick the richer sibling that can spare a key; ties go left.
const fn choose_donor(left: Option<usize>, right: Option<usize>, min_keys: usize) -> Option<Donor> {
    match (left, right) {
        (Some(l), Some(r)) if l > min_keys && l >= r => Some(Donor::Left),
        (_, Some(r)) if r > min_keys => Some(Donor::Right),
        (Some(l), _) if l > min_keys => Some(Donor::Left),
        _ => None,
    }
}

impl<K: BinaryCodec, V: BinaryCodec> BPlusTreeIndexManager<K, V> {
    /// Store a leaf that just lost an entry and repair any underflow.
    pub(super) fn rebalance_leaf(
        &self,
        session: &mut dyn IndexIoSession,
        cursor: LeafCursor<K, V>,
    ) -> Result<(), IndexError> {
        let LeafCursor {
            mut path,
            mut node,
            mut leaf,
        } = cursor;

        let Some(PathEntry {
            node: mut parent_node,
            internal: mut parent,
            child_index: index,
        }) = path.pop()
        else {
            // A root leaf may shrink to nothing.
            return self.store_leaf(session, &mut node, &leaf);
        };
        if leaf.entries.len() >= self.min_keys() {
            return self.store_leaf(session, &mut node, &leaf);
        }

        let mut left = match index.checked_sub(1) {
            Some(i) => Some(self.load_leaf(session, parent.children[i])?),
            None => None,
        };
        let mut right = match parent.children.get(index + 1) {
            Some(pointer) => Some(self.load_leaf(session, *pointer)?),
            None => None,
        };

        let donor = choose_donor(
            left.as_ref().map(|(_, l)| l.entries.len()),
            right.as_ref().map(|(_, r)| r.entries.len()),
            self.min_keys(),
        );
        match (donor, left.as_mut(), right.as_mut()) {
            (Some(Donor::Left), Some((left_node, left_leaf)), _) => {
                if let Some(entry) = left_leaf.entries.pop() {
                    parent.keys[index - 1] = entry.key.clone();
                    leaf.entries.insert(0, entry);
                }
                self.store_leaf(session, left_node, left_leaf)?;
                self.store_leaf(session, &mut node, &leaf)?;
                self.store_internal(session, &mut parent_node, &parent)
            }
            (Some(Donor::Right), _, Some((right_node, right_leaf))) => {
                if !right_leaf.entries.is_empty() {
                    leaf.entries.push(right_leaf.entries.remove(0));
                }
                if let Some(first) = right_leaf.first_key() {
                    parent.keys[index] = first.clone();
                }
                self.store_leaf(session, right_node, right_leaf)?;
                self.store_leaf(session, &mut node, &leaf)?;
                self.store_internal(session, &mut parent_node, &parent)
            }
            (_, Some((left_node, left_leaf)), _) => {
                self.merge_leaves(session, (left_node, left_leaf), (&node, leaf))?;
                parent.keys.remove(index - 1);
                parent.children.remove(index);
                self.rebalance_internal(session, path, parent_node, parent)
            }
            (_, None, Some((right_node, right_leaf))) => {
                let right_leaf = std::mem::take(right_leaf);
                self.merge_leaves(session, (&mut node, &mut leaf), (&*right_node, right_leaf))?;
                parent.keys.remove(index);
                parent.children.remove(index + 1);
                self.rebalance_internal(session, path, parent_node, parent)
            }
            (_, None, None) => Err(IndexError::Corruption(NodeError::CorruptNode(format!(
                "non-root leaf {} has no siblings",
                pointer_of(&node)?
            )))),
        }
    }

    /// Append `right` to `left`, unlink `right` from the chain and free it.
    fn merge_leaves(
        &self,
        session: &mut dyn IndexIoSession,
        left: (&mut Node, &mut LeafNode<K, V>),
        right: (&Node, LeafNode<K, V>),
    ) -> Result<(), IndexError> {
        let (left_node, left_leaf) = left;
        let (right_node, right_leaf) = right;
        let left_pointer = pointer_of(left_node)?;

        left_leaf.next = right_leaf.next;
        left_leaf.entries.extend(right_leaf.entries);
        self.store_leaf(session, left_node, left_leaf)?;
        if let Some(next) = left_leaf.next {
            self.relink_previous(session, next, left_pointer)?;
        }
        session.remove(right_node)?;

        debug!(
            "Merged leaf {} into {left_pointer} on index {}",
            pointer_of(right_node)?,
            self.index_id()
        );
        Ok(())
    }

    /// Store an internal node that just lost a separator and repair any
    /// underflow, walking up `path`.
    fn rebalance_internal(
        &self,
        session: &mut dyn IndexIoSession,
        mut path: Vec<PathEntry<K>>,
        mut node: Node,
        mut internal: InternalNode<K>,
    ) -> Result<(), IndexError> {
        loop {
            let Some(PathEntry {
                node: mut parent_node,
                internal: mut parent,
                child_index: index,
            }) = path.pop()
            else {
                return self.finish_root(session, node, internal);
            };
            if internal.keys.len() >= self.min_keys() {
                return self.store_internal(session, &mut node, &internal);
            }

            let mut left = match index.checked_sub(1) {
                Some(i) => Some(self.load_internal(session, parent.children[i])?),
                None => None,
            };
            let mut right = match parent.children.get(index + 1) {
                Some(pointer) => Some(self.load_internal(session, *pointer)?),
                None => None,
            };

            let donor = choose_donor(
                left.as_ref().map(|(_, l)| l.keys.len()),
                right.as_ref().map(|(_, r)| r.keys.len()),
                self.min_keys(),
            );
            match (donor, left.as_mut(), right.as_mut()) {
                (Some(Donor::Left), Some((left_node, left_internal)), _) => {
                    let (Some(key), Some(child)) =
                        (left_internal.keys.pop(), left_internal.children.pop())
                    else {
                        return Err(corrupt_sibling(left_node));
                    };
                    let separator = std::mem::replace(&mut parent.keys[index - 1], key);
                    internal.keys.insert(0, separator);
                    internal.children.insert(0, child);
                    self.store_internal(session, left_node, left_internal)?;
                    self.store_internal(session, &mut node, &internal)?;
                    return self.store_internal(session, &mut parent_node, &parent);
                }
                (Some(Donor::Right), _, Some((right_node, right_internal))) => {
                    if right_internal.keys.is_empty() {
                        return Err(corrupt_sibling(right_node));
                    }
                    let key = right_internal.keys.remove(0);
                    let child = right_internal.children.remove(0);
                    let separator = std::mem::replace(&mut parent.keys[index], key);
                    internal.keys.push(separator);
                    internal.children.push(child);
                    self.store_internal(session, right_node, right_internal)?;
                    self.store_internal(session, &mut node, &internal)?;
                    return self.store_internal(session, &mut parent_node, &parent);
                }
                (_, Some((left_node, left_internal)), _) => {
                    let separator = parent.keys.remove(index - 1);
                    parent.children.remove(index);
                    left_internal.keys.push(separator);
                    left_internal.keys.append(&mut internal.keys);
                    left_internal.children.append(&mut internal.children);
                    self.store_internal(session, left_node, left_internal)?;
                    session.remove(&node)?;
                    debug!(
                        "Merged internal node {} into {} on index {}",
                        pointer_of(&node)?,
                        pointer_of(left_node)?,
                        self.index_id()
                    );
                }
                (_, None, Some((right_node, right_internal))) => {
                    let separator = parent.keys.remove(index);
                    parent.children.remove(index + 1);
                    internal.keys.push(separator);
                    internal.keys.append(&mut right_internal.keys);
                    internal.children.append(&mut right_internal.children);
                    self.store_internal(session, &mut node, &internal)?;
                    session.remove(right_node)?;
                    debug!(
                        "Merged internal node {} into {} on index {}",
                        pointer_of(right_node)?,
                        pointer_of(&node)?,
                        self.index_id()
                    );
                }
                (_, None, None) => {
                    return Err(IndexError::Corruption(NodeError::CorruptNode(format!(
                        "non-root internal node {} has no siblings",
                        pointer_of(&node)?
                    ))));
                }
            }

            node = parent_node;
            internal = parent;
        }
    }

    /// Store the root, collapsing it into its only child when it has no keys.
    fn finish_root(
        &self,
        session: &mut dyn IndexIoSession,
        mut node: Node,
        internal: InternalNode<K>,
    ) -> Result<(), IndexError> {
        if !internal.keys.is_empty() {
            return self.store_internal(session, &mut node, &internal);
        }

        let child = internal.children.first().copied().ok_or_else(|| {
            IndexError::Corruption(NodeError::CorruptNode("root has no children".to_string()))
        })?;
        let (mut child_node, _) = self.load(session, child)?;
        child_node.set_root(true);
        session.update(&child_node)?;
        session.remove(&node)?;
        debug!(
            "Collapsed root {} into {child} on index {}",
            pointer_of(&node)?,
            self.index_id()
        );
        Ok(())
    }
}

fn corrupt_sibling(node: &Node) -> IndexError {
    let pointer = node
        .pointer()
        .map_or_else(|| "unstored".to_string(), |p| p.to_string());
    IndexError::Corruption(NodeError::CorruptNode(format!(
        "sibling {pointer} has fewer keys than reported"
    )))
}
