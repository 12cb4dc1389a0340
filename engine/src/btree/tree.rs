//! Disk-backed B+Tree index manager.
//!
//! Every operation runs in its own session opened from the tree's
//! [`SessionStrategy`]. A successful operation commits its session; a failed
//! one rolls it back before the error is returned.
//!
//! Internal nodes route equal keys to the right. A unique tree therefore
//! finds a key by a single descent. A duplicate tree descends to the leftmost
//! leaf that may hold the key and scans forward with a [`LeafCursor`], which
//! keeps the parent path so that removals found by scanning can still be
//! rebalanced.

use std::sync::Arc;

use tracing::debug;

use crate::btree::node::{
    InternalNode, LeafEntry, LeafNode, Node, NodeError, NodeLayout, NodeType, TreeNode, TypedLayout,
};
use crate::codec::BinaryCodec;
use crate::error::IndexError;
use crate::index::{IndexManager, Order, SortedIterator};
use crate::pointer::Pointer;
use crate::session::{IndexIoSession, SessionStrategy};
use crate::storage::IndexStorageManager;

/// Whether a tree accepts several entries with the same key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum KeyPolicy {
    #[default]
    Unique,
    Duplicate,
}

/// One internal node on the way from the root to a leaf.
pub(super) struct PathEntry<K> {
    pub node: Node,
    pub internal: InternalNode<K>,
    /// Index of the child the path continues into.
    pub child_index: usize,
}

/// A leaf plus the internal nodes above it.
pub(super) struct LeafCursor<K, V> {
    pub path: Vec<PathEntry<K>>,
    pub node: Node,
    pub leaf: LeafNode<K, V>,
}

/// B+Tree over fixed-size keys and values.
pub struct BPlusTreeIndexManager<K, V> {
    index_id: u32,
    layout: TypedLayout<K, V>,
    storage: Arc<dyn IndexStorageManager>,
    strategy: SessionStrategy,
    policy: KeyPolicy,
}

impl<K: BinaryCodec, V: BinaryCodec> BPlusTreeIndexManager<K, V> {
    /// Create a manager for `index_id`.
    ///
    /// Nothing is written until the first insert.
    pub fn new(
        index_id: u32,
        degree: usize,
        storage: Arc<dyn IndexStorageManager>,
        strategy: SessionStrategy,
        policy: KeyPolicy,
    ) -> Result<Self, NodeError> {
        Ok(Self {
            index_id,
            layout: TypedLayout::new(degree)?,
            storage,
            strategy,
            policy,
        })
    }

    #[must_use]
    pub const fn policy(&self) -> KeyPolicy {
        self.policy
    }

    #[must_use]
    pub const fn strategy(&self) -> SessionStrategy {
        self.strategy
    }

    #[must_use]
    pub const fn node_layout(&self) -> &NodeLayout {
        &self.layout.layout
    }

    fn open_session(&self) -> Box<dyn IndexIoSession> {
        #[allow(clippy::disallowed_methods)] // Arc::clone is required for shared ownership
        let storage = Arc::clone(&self.storage);
        self.strategy.open(self.index_id, self.layout.layout, storage)
    }

    /// Run `op` in a fresh session, committing on success and rolling back
    /// on failure.
    fn in_session<T>(
        &self,
        op: impl FnOnce(&mut dyn IndexIoSession) -> Result<T, IndexError>,
    ) -> Result<T, IndexError> {
        let mut session = self.open_session();
        match op(session.as_mut()) {
            Ok(value) => {
                session.commit()?;
                Ok(value)
            }
            Err(cause) => match session.rollback() {
                Ok(()) => Err(cause),
                Err(rollback) => {
                    tracing::error!(
                        "Rollback on index {} failed after {cause}: {rollback}",
                        self.index_id
                    );
                    Err(IndexError::RollbackFailed {
                        cause: Box::new(cause),
                        rollback: Box::new(rollback),
                    })
                }
            },
        }
    }

    /// Check that a key and value can be stored before touching any node.
    fn validate(key: &K, value: &V) -> Result<(), IndexError> {
        let mut key_buffer = vec![0; K::SIZE];
        key.encode(&mut key_buffer)?;
        let mut value_buffer = vec![0; V::SIZE];
        value.encode(&mut value_buffer)?;
        Ok(())
    }

    // --- node access -------------------------------------------------------

    pub(super) fn load(
        &self,
        session: &mut dyn IndexIoSession,
        pointer: Pointer,
    ) -> Result<(Node, TreeNode<K, V>), IndexError> {
        let node = session.read(pointer)?.ok_or_else(|| {
            IndexError::Corruption(NodeError::CorruptNode(format!(
                "node {pointer} of index {} is missing",
                self.index_id
            )))
        })?;
        let tree_node = self.layout.read(&node)?;
        Ok((node, tree_node))
    }

    pub(super) fn load_leaf(
        &self,
        session: &mut dyn IndexIoSession,
        pointer: Pointer,
    ) -> Result<(Node, LeafNode<K, V>), IndexError> {
        match self.load(session, pointer)? {
            (node, TreeNode::Leaf(leaf)) => Ok((node, leaf)),
            (_, TreeNode::Internal(_)) => Err(IndexError::Corruption(NodeError::WrongNodeType {
                expected: NodeType::Leaf,
                found: NodeType::Internal,
            })),
        }
    }

    pub(super) fn load_internal(
        &self,
        session: &mut dyn IndexIoSession,
        pointer: Pointer,
    ) -> Result<(Node, InternalNode<K>), IndexError> {
        match self.load(session, pointer)? {
            (node, TreeNode::Internal(internal)) => Ok((node, internal)),
            (_, TreeNode::Leaf(_)) => Err(IndexError::Corruption(NodeError::WrongNodeType {
                expected: NodeType::Internal,
                found: NodeType::Leaf,
            })),
        }
    }

    pub(super) fn store_leaf(
        &self,
        session: &mut dyn IndexIoSession,
        node: &mut Node,
        leaf: &LeafNode<K, V>,
    ) -> Result<(), IndexError> {
        leaf.write_to_node(&self.layout.layout, node)?;
        session.update(node)
    }

    pub(super) fn store_internal(
        &self,
        session: &mut dyn IndexIoSession,
        node: &mut Node,
        internal: &InternalNode<K>,
    ) -> Result<(), IndexError> {
        internal.write_to_node(&self.layout.layout, node)?;
        session.update(node)
    }

    fn write_new(
        &self,
        session: &mut dyn IndexIoSession,
        tree_node: &TreeNode<K, V>,
    ) -> Result<Pointer, IndexError> {
        let mut node = self.layout.build(tree_node)?;
        Ok(session.write(&mut node)?.pointer)
    }

    /// Point the leaf at `pointer`'s `previous` link to `previous`.
    pub(super) fn relink_previous(
        &self,
        session: &mut dyn IndexIoSession,
        pointer: Pointer,
        previous: Pointer,
    ) -> Result<(), IndexError> {
        let (mut node, mut leaf) = self.load_leaf(session, pointer)?;
        leaf.previous = Some(previous);
        self.store_leaf(session, &mut node, &leaf)
    }

    pub(super) fn min_keys(&self) -> usize {
        self.layout.layout.min_keys()
    }

    fn max_keys(&self) -> usize {
        self.layout.layout.max_keys()
    }

    // --- descent -----------------------------------------------------------

    /// Descend from the root, choosing each child with `route`.
    fn descend(
        &self,
        session: &mut dyn IndexIoSession,
        root: Node,
        route: impl Fn(&InternalNode<K>) -> usize,
    ) -> Result<LeafCursor<K, V>, IndexError> {
        let mut path = Vec::new();
        let mut node = root;
        loop {
            match self.layout.read(&node)? {
                TreeNode::Leaf(leaf) => return Ok(LeafCursor { path, node, leaf }),
                TreeNode::Internal(internal) => {
                    let child_index = route(&internal);
                    let child = *internal.children.get(child_index).ok_or_else(|| {
                        IndexError::Corruption(NodeError::IndexOutOfRange(child_index))
                    })?;
                    path.push(PathEntry {
                        node,
                        internal,
                        child_index,
                    });
                    let (child_node, _) = self.load(session, child)?;
                    node = child_node;
                }
            }
        }
    }

    /// Move the cursor to the next leaf in key order, keeping the path.
    /// Returns `false` at the last leaf.
    fn advance(
        &self,
        session: &mut dyn IndexIoSession,
        cursor: &mut LeafCursor<K, V>,
    ) -> Result<bool, IndexError> {
        while let Some(mut entry) = cursor.path.pop() {
            if entry.child_index + 1 < entry.internal.children.len() {
                entry.child_index += 1;
                let child = entry.internal.children[entry.child_index];
                cursor.path.push(entry);

                let (mut node, _) = self.load(session, child)?;
                loop {
                    match self.layout.read(&node)? {
                        TreeNode::Leaf(leaf) => {
                            cursor.node = node;
                            cursor.leaf = leaf;
                            return Ok(true);
                        }
                        TreeNode::Internal(internal) => {
                            let first = internal.children[0];
                            cursor.path.push(PathEntry {
                                node,
                                internal,
                                child_index: 0,
                            });
                            node = self.load(session, first)?.0;
                        }
                    }
                }
            }
        }
        Ok(false)
    }

    /// Find the first entry under `key` accepted by `matches`.
    ///
    /// Returns the cursor positioned on the entry's leaf and its index there.
    fn find_entry(
        &self,
        session: &mut dyn IndexIoSession,
        key: &K,
        matches: impl Fn(&V) -> bool,
    ) -> Result<Option<(LeafCursor<K, V>, usize)>, IndexError> {
        let Some(root) = session.get_root()? else {
            return Ok(None);
        };

        if self.policy == KeyPolicy::Unique {
            let cursor = self.descend(session, root, |n| n.find_child_index(key))?;
            return Ok(match cursor.leaf.find_index(key) {
                Ok(index) if matches(&cursor.leaf.entries[index].value) => Some((cursor, index)),
                _ => None,
            });
        }

        let mut cursor = self.descend(session, root, |n| n.find_leftmost_child_index(key))?;
        let mut index = cursor.leaf.lower_bound(key);
        loop {
            while let Some(entry) = cursor.leaf.entries.get(index) {
                if entry.key != *key {
                    return Ok(None);
                }
                if matches(&entry.value) {
                    return Ok(Some((cursor, index)));
                }
                index += 1;
            }
            if !self.advance(session, &mut cursor)? {
                return Ok(None);
            }
            index = 0;
        }
    }

    /// Descend to the leftmost leaf.
    fn first_leaf(
        &self,
        session: &mut dyn IndexIoSession,
    ) -> Result<Option<LeafNode<K, V>>, IndexError> {
        let Some(root) = session.get_root()? else {
            return Ok(None);
        };
        Ok(Some(self.descend(session, root, |_| 0)?.leaf))
    }

    /// Descend to the rightmost leaf.
    fn last_leaf(
        &self,
        session: &mut dyn IndexIoSession,
    ) -> Result<Option<LeafNode<K, V>>, IndexError> {
        let Some(root) = session.get_root()? else {
            return Ok(None);
        };
        let cursor = self.descend(session, root, |n| n.children.len().saturating_sub(1))?;
        Ok(Some(cursor.leaf))
    }

    // --- insertion ---------------------------------------------------------

    fn insert(
        &self,
        session: &mut dyn IndexIoSession,
        key: K,
        value: V,
    ) -> Result<(), IndexError> {
        let Some(root) = session.get_root()? else {
            let mut leaf = LeafNode::new();
            leaf.is_root = true;
            leaf.insert(key, value);
            let pointer = self.write_new(session, &TreeNode::Leaf(leaf))?;
            debug!("Created root leaf {pointer} for index {}", self.index_id);
            return Ok(());
        };

        let LeafCursor {
            path,
            mut node,
            mut leaf,
        } = self.descend(session, root, |n| n.find_child_index(&key))?;

        if self.policy == KeyPolicy::Unique && leaf.contains(&key) {
            return Err(IndexError::IndexExists(format!("{key:?}")));
        }

        leaf.insert(key, value);
        if leaf.entries.len() <= self.max_keys() {
            return self.store_leaf(session, &mut node, &leaf);
        }

        let left_pointer = node.pointer().ok_or_else(|| {
            IndexError::Corruption(NodeError::CorruptNode("leaf has no pointer".into()))
        })?;
        leaf.is_root = false;
        let mut right = leaf.split(&self.layout.layout);
        right.previous = Some(left_pointer);
        right.next = leaf.next;
        let separator = right
            .first_key()
            .cloned()
            .ok_or_else(|| IndexError::Corruption(NodeError::CorruptNode("empty split".into())))?;
        let old_next = right.next;

        let right_pointer = self.write_new(session, &TreeNode::Leaf(right))?;
        leaf.next = Some(right_pointer);
        self.store_leaf(session, &mut node, &leaf)?;
        if let Some(old_next) = old_next {
            self.relink_previous(session, old_next, right_pointer)?;
        }
        debug!(
            "Split leaf {left_pointer} of index {} into {right_pointer}",
            self.index_id
        );

        self.insert_into_parents(session, path, left_pointer, separator, right_pointer)
    }

    /// Push a split up the path, splitting parents as needed and growing a
    /// new root when the old one splits.
    fn insert_into_parents(
        &self,
        session: &mut dyn IndexIoSession,
        mut path: Vec<PathEntry<K>>,
        mut left: Pointer,
        mut separator: K,
        mut right: Pointer,
    ) -> Result<(), IndexError> {
        loop {
            let Some(PathEntry {
                mut node,
                mut internal,
                child_index,
            }) = path.pop()
            else {
                let mut root = InternalNode::with_children(left, separator, right);
                root.is_root = true;
                let pointer = self.write_new(session, &TreeNode::Internal(root))?;
                debug!("New root {pointer} for index {}", self.index_id);
                return Ok(());
            };

            internal.insert_at(child_index, separator, right);
            if internal.keys.len() <= self.max_keys() {
                return self.store_internal(session, &mut node, &internal);
            }

            internal.is_root = false;
            let (promoted, sibling) = internal.split(&self.layout.layout);
            self.store_internal(session, &mut node, &internal)?;
            let sibling_pointer = self.write_new(session, &TreeNode::Internal(sibling))?;

            left = node.pointer().ok_or_else(|| {
                IndexError::Corruption(NodeError::CorruptNode("internal node has no pointer".into()))
            })?;
            debug!(
                "Split internal node {left} of index {} into {sibling_pointer}",
                self.index_id
            );
            separator = promoted;
            right = sibling_pointer;
        }
    }

    // --- removal -----------------------------------------------------------

    fn remove_matching(
        &self,
        session: &mut dyn IndexIoSession,
        key: &K,
        matches: impl Fn(&V) -> bool,
    ) -> Result<bool, IndexError> {
        let Some((mut cursor, index)) = self.find_entry(session, key, matches)? else {
            return Ok(false);
        };
        cursor.leaf.entries.remove(index);
        self.rebalance_leaf(session, cursor)?;
        Ok(true)
    }
}

impl<K: BinaryCodec, V: BinaryCodec> IndexManager<K, V> for BPlusTreeIndexManager<K, V> {
    fn index_id(&self) -> u32 {
        self.index_id
    }

    fn key_policy(&self) -> KeyPolicy {
        self.policy
    }

    fn add_index(&self, key: K, value: V) -> Result<(), IndexError> {
        Self::validate(&key, &value)?;
        self.in_session(|session| self.insert(session, key, value))
    }

    fn get_index(&self, key: &K) -> Result<Option<V>, IndexError> {
        self.in_session(|session| {
            Ok(self
                .find_entry(session, key, |_| true)?
                .map(|(cursor, index)| cursor.leaf.entries[index].value.clone()))
        })
    }

    fn get_all(&self, key: &K) -> Result<Vec<V>, IndexError> {
        self.in_session(|session| {
            let Some((mut cursor, mut index)) = self.find_entry(session, key, |_| true)? else {
                return Ok(Vec::new());
            };
            let mut values = Vec::new();
            loop {
                while let Some(entry) = cursor.leaf.entries.get(index) {
                    if entry.key != *key {
                        return Ok(values);
                    }
                    values.push(entry.value.clone());
                    index += 1;
                }
                if self.policy == KeyPolicy::Unique || !self.advance(session, &mut cursor)? {
                    return Ok(values);
                }
                index = 0;
            }
        })
    }

    fn update_index(&self, key: &K, value: V) -> Result<bool, IndexError> {
        Self::validate(key, &value)?;
        self.in_session(|session| {
            let Some((mut cursor, index)) = self.find_entry(session, key, |_| true)? else {
                return Ok(false);
            };
            cursor.leaf.entries[index].value = value;
            self.store_leaf(session, &mut cursor.node, &cursor.leaf)?;
            Ok(true)
        })
    }

    fn remove_index(&self, key: &K) -> Result<bool, IndexError> {
        self.in_session(|session| self.remove_matching(session, key, |_| true))
    }

    fn remove_value(&self, key: &K, value: &V) -> Result<bool, IndexError> {
        self.in_session(|session| self.remove_matching(session, key, |v| v == value))
    }

    fn size(&self) -> Result<usize, IndexError> {
        let mut count = 0;
        for entry in self.iter()? {
            entry?;
            count += 1;
        }
        Ok(count)
    }

    fn sorted_iter(&self, order: Order) -> Result<SortedIterator<'_, K, V>, IndexError> {
        let mut session = self.open_session();
        let start = match order {
            Order::Ascending => self.first_leaf(session.as_mut())?,
            Order::Descending => self.last_leaf(session.as_mut())?,
        };
        let (entries, link) = start.map_or_else(
            || (Vec::new().into_iter(), None),
            |leaf| (leaf.entries.into_iter(), neighbor(leaf.previous, leaf.next, order)),
        );
        Ok(Box::new(LeafChainIter {
            tree: self,
            session,
            order,
            entries,
            link,
        }))
    }

    fn purge(&self) -> Result<(), IndexError> {
        self.storage.purge_index(self.index_id)?;
        debug!("Purged index {}", self.index_id);
        Ok(())
    }
}

/// The sibling link a walk in `order` follows.
const fn neighbor(
    previous: Option<Pointer>,
    next: Option<Pointer>,
    order: Order,
) -> Option<Pointer> {
    match order {
        Order::Ascending => next,
        Order::Descending => previous,
    }
}

/// Walks the leaf chain through `next` links, or `previous` links when
/// descending.
struct LeafChainIter<'a, K, V> {
    tree: &'a BPlusTreeIndexManager<K, V>,
    session: Box<dyn IndexIoSession>,
    order: Order,
    entries: std::vec::IntoIter<LeafEntry<K, V>>,
    /// Leaf to load once `entries` runs out.
    link: Option<Pointer>,
}

impl<K: BinaryCodec, V: BinaryCodec> Iterator for LeafChainIter<'_, K, V> {
    type Item = Result<(K, V), IndexError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.order {
                Order::Ascending => self.entries.next(),
                Order::Descending => self.entries.next_back(),
            };
            if let Some(entry) = entry {
                return Some(Ok((entry.key, entry.value)));
            }
            let pointer = self.link.take()?;
            match self.tree.load_leaf(self.session.as_mut(), pointer) {
                Ok((_, leaf)) => {
                    self.link = neighbor(leaf.previous, leaf.next, self.order);
                    self.entries = leaf.entries.into_iter();
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
