//! B+Tree node types and serialization.
//!
//! Every node occupies one fixed-size slot. The slot size depends only on the
//! tree's degree and the key/value widths, so internal and leaf nodes of one
//! tree are interchangeable in storage.
//!
//! # Layout
//!
//! ```text
//! byte 0: header (0x01 = leaf, 0x02 = internal, 0x04 = root)
//!
//! internal: [Pointer c0][Key k0][Pointer c1][Key k1][Pointer c2] ...
//! leaf:     [Key k0][Value v0][Key k1][Value v1] ... [Pointer prev][Pointer next]
//! ```
//!
//! Leaf sibling pointers always sit after `degree - 1` key/value slots. A
//! key slot holding the codec's empty sentinel ends the node's contents, so
//! slots are written left to right without gaps.

use std::marker::PhantomData;

use crate::codec::{BinaryCodec, CodecError};
use crate::pointer::{POINTER_SIZE, Pointer};

/// Header bit marking a leaf node.
pub const TYPE_LEAF_BIT: u8 = 0x01;
/// Header bit marking an internal node.
pub const TYPE_INTERNAL_BIT: u8 = 0x02;
/// Header bit marking the root of an index.
pub const ROOT_BIT: u8 = 0x04;

/// Smallest degree that keeps the split and merge arithmetic meaningful.
pub const MIN_DEGREE: usize = 3;

/// Node type discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Internal,
    Leaf,
}

impl NodeType {
    const fn bit(self) -> u8 {
        match self {
            Self::Internal => TYPE_INTERNAL_BIT,
            Self::Leaf => TYPE_LEAF_BIT,
        }
    }
}

/// Errors that can occur when working with B+Tree nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// The bytes cannot be a node of this tree.
    CorruptNode(String),
    /// Degree below [`MIN_DEGREE`].
    InvalidDegree(usize),
    /// A node of one type was found where the other was expected.
    WrongNodeType { expected: NodeType, found: NodeType },
    /// More entries than the node can hold.
    Overflow { capacity: usize, count: usize },
    /// A slot index beyond the node's capacity.
    IndexOutOfRange(usize),
    /// A key or value could not be encoded.
    Codec(CodecError),
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CorruptNode(msg) => write!(f, "corrupt node: {msg}"),
            Self::InvalidDegree(degree) => {
                write!(f, "invalid degree {degree} (minimum {MIN_DEGREE})")
            }
            Self::WrongNodeType { expected, found } => {
                write!(f, "expected {expected:?} node, found {found:?}")
            }
            Self::Overflow { capacity, count } => {
                write!(f, "{count} entries do not fit in a node of {capacity}")
            }
            Self::IndexOutOfRange(index) => write!(f, "slot index {index} out of range"),
            Self::Codec(e) => write!(f, "codec error: {e}"),
        }
    }
}

impl std::error::Error for NodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Codec(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CodecError> for NodeError {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

/// Sizes and offsets of one tree's nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeLayout {
    degree: usize,
    key_size: usize,
    value_size: usize,
}

impl NodeLayout {
    pub const fn new(degree: usize, key_size: usize, value_size: usize) -> Result<Self, NodeError> {
        if degree < MIN_DEGREE {
            return Err(NodeError::InvalidDegree(degree));
        }
        Ok(Self {
            degree,
            key_size,
            value_size,
        })
    }

    /// Layout for a tree keyed by `K` holding `V`.
    pub const fn for_codecs<K: BinaryCodec, V: BinaryCodec>(
        degree: usize,
    ) -> Result<Self, NodeError> {
        Self::new(degree, K::SIZE, V::SIZE)
    }

    #[must_use]
    pub const fn degree(&self) -> usize {
        self.degree
    }

    /// Maximum keys in any node.
    #[must_use]
    pub const fn max_keys(&self) -> usize {
        self.degree - 1
    }

    /// Minimum keys in a non-root node: `ceil(degree / 2) - 1`.
    #[must_use]
    pub const fn min_keys(&self) -> usize {
        self.degree.div_ceil(2) - 1
    }

    /// Size of one node slot, rounded up to a multiple of 8.
    #[must_use]
    pub const fn node_size(&self) -> usize {
        let value_size = if self.value_size > POINTER_SIZE {
            self.value_size
        } else {
            POINTER_SIZE
        };
        let raw = 1 + self.degree * (self.key_size + value_size) + 2 * POINTER_SIZE;
        raw.next_multiple_of(8)
    }

    const fn child_offset(&self, index: usize) -> usize {
        1 + index * (POINTER_SIZE + self.key_size)
    }

    const fn internal_key_offset(&self, index: usize) -> usize {
        1 + POINTER_SIZE + index * (POINTER_SIZE + self.key_size)
    }

    const fn leaf_key_offset(&self, index: usize) -> usize {
        1 + index * (self.key_size + self.value_size)
    }

    const fn leaf_value_offset(&self, index: usize) -> usize {
        self.leaf_key_offset(index) + self.key_size
    }

    const fn previous_sibling_offset(&self) -> usize {
        self.leaf_key_offset(self.max_keys())
    }

    const fn next_sibling_offset(&self) -> usize {
        self.previous_sibling_offset() + POINTER_SIZE
    }

    const fn check_key_index(&self, index: usize) -> Result<(), NodeError> {
        if index < self.max_keys() {
            Ok(())
        } else {
            Err(NodeError::IndexOutOfRange(index))
        }
    }
}

/// A node's raw slot bytes plus the pointer it was read from or written to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pointer: Option<Pointer>,
    data: Vec<u8>,
}

impl Node {
    /// An empty node of the given type, not yet stored.
    #[must_use]
    pub fn empty(layout: &NodeLayout, node_type: NodeType) -> Self {
        let mut data = vec![0u8; layout.node_size()];
        data[0] = node_type.bit();
        Self {
            pointer: None,
            data,
        }
    }

    /// Interpret stored bytes as a node.
    pub fn decode(
        layout: &NodeLayout,
        pointer: Option<Pointer>,
        data: Vec<u8>,
    ) -> Result<Self, NodeError> {
        if data.len() != layout.node_size() {
            return Err(NodeError::CorruptNode(format!(
                "buffer is {} bytes, expected {}",
                data.len(),
                layout.node_size()
            )));
        }
        let node = Self { pointer, data };
        node.node_type()?;
        Ok(node)
    }

    pub fn node_type(&self) -> Result<NodeType, NodeError> {
        let header = self.data.first().copied().unwrap_or(0);
        let leaf = header & TYPE_LEAF_BIT != 0;
        let internal = header & TYPE_INTERNAL_BIT != 0;
        match (leaf, internal) {
            (true, false) => Ok(NodeType::Leaf),
            (false, true) => Ok(NodeType::Internal),
            _ => Err(NodeError::CorruptNode(format!(
                "header byte {header:#04x} has no single type bit"
            ))),
        }
    }

    #[must_use]
    pub fn is_leaf(&self) -> bool {
        matches!(self.node_type(), Ok(NodeType::Leaf))
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.data.first().is_some_and(|h| h & ROOT_BIT != 0)
    }

    pub fn set_root(&mut self, is_root: bool) {
        if let Some(header) = self.data.first_mut() {
            if is_root {
                *header |= ROOT_BIT;
            } else {
                *header &= !ROOT_BIT;
            }
        }
    }

    #[must_use]
    pub const fn pointer(&self) -> Option<Pointer> {
        self.pointer
    }

    pub const fn set_pointer(&mut self, pointer: Pointer) {
        self.pointer = Some(pointer);
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    fn expect_type(&self, expected: NodeType) -> Result<(), NodeError> {
        let found = self.node_type()?;
        if found == expected {
            Ok(())
        } else {
            Err(NodeError::WrongNodeType { expected, found })
        }
    }

    fn key_offset(&self, layout: &NodeLayout, index: usize) -> Result<usize, NodeError> {
        layout.check_key_index(index)?;
        Ok(match self.node_type()? {
            NodeType::Internal => layout.internal_key_offset(index),
            NodeType::Leaf => layout.leaf_key_offset(index),
        })
    }

    /// Key in slot `index`, or `None` if the slot is unoccupied.
    pub fn key_at<K: BinaryCodec>(
        &self,
        layout: &NodeLayout,
        index: usize,
    ) -> Result<Option<K>, NodeError> {
        let offset = self.key_offset(layout, index)?;
        let bytes = &self.data[offset..offset + K::SIZE];
        if !K::is_present(bytes) {
            return Ok(None);
        }
        Ok(Some(K::decode(bytes)?))
    }

    pub fn set_key_at<K: BinaryCodec>(
        &mut self,
        layout: &NodeLayout,
        index: usize,
        key: &K,
    ) -> Result<(), NodeError> {
        let offset = self.key_offset(layout, index)?;
        key.encode(&mut self.data[offset..offset + K::SIZE])?;
        Ok(())
    }

    /// Child pointer `index` of an internal node.
    pub fn child_at(&self, layout: &NodeLayout, index: usize) -> Result<Option<Pointer>, NodeError> {
        self.expect_type(NodeType::Internal)?;
        if index > layout.max_keys() {
            return Err(NodeError::IndexOutOfRange(index));
        }
        let offset = layout.child_offset(index);
        Ok(Pointer::from_bytes(&self.data[offset..offset + POINTER_SIZE]))
    }

    pub fn set_child_at(
        &mut self,
        layout: &NodeLayout,
        index: usize,
        child: Option<Pointer>,
    ) -> Result<(), NodeError> {
        self.expect_type(NodeType::Internal)?;
        if index > layout.max_keys() {
            return Err(NodeError::IndexOutOfRange(index));
        }
        let offset = layout.child_offset(index);
        let slot = &mut self.data[offset..offset + POINTER_SIZE];
        match child {
            Some(pointer) => pointer.write_to(slot),
            None => Pointer::write_absent(slot),
        }
        Ok(())
    }

    /// Value in leaf slot `index`, or `None` if unoccupied.
    pub fn value_at<V: BinaryCodec>(
        &self,
        layout: &NodeLayout,
        index: usize,
    ) -> Result<Option<V>, NodeError> {
        self.expect_type(NodeType::Leaf)?;
        layout.check_key_index(index)?;
        let offset = layout.leaf_value_offset(index);
        let bytes = &self.data[offset..offset + V::SIZE];
        if !V::is_present(bytes) {
            return Ok(None);
        }
        Ok(Some(V::decode(bytes)?))
    }

    pub fn set_value_at<V: BinaryCodec>(
        &mut self,
        layout: &NodeLayout,
        index: usize,
        value: &V,
    ) -> Result<(), NodeError> {
        self.expect_type(NodeType::Leaf)?;
        layout.check_key_index(index)?;
        let offset = layout.leaf_value_offset(index);
        value.encode(&mut self.data[offset..offset + V::SIZE])?;
        Ok(())
    }

    pub fn previous_sibling(&self, layout: &NodeLayout) -> Result<Option<Pointer>, NodeError> {
        self.expect_type(NodeType::Leaf)?;
        let offset = layout.previous_sibling_offset();
        Ok(Pointer::from_bytes(&self.data[offset..offset + POINTER_SIZE]))
    }

    pub fn next_sibling(&self, layout: &NodeLayout) -> Result<Option<Pointer>, NodeError> {
        self.expect_type(NodeType::Leaf)?;
        let offset = layout.next_sibling_offset();
        Ok(Pointer::from_bytes(&self.data[offset..offset + POINTER_SIZE]))
    }

    pub fn set_previous_sibling(
        &mut self,
        layout: &NodeLayout,
        sibling: Option<Pointer>,
    ) -> Result<(), NodeError> {
        self.expect_type(NodeType::Leaf)?;
        let offset = layout.previous_sibling_offset();
        self.write_pointer_slot(offset, sibling);
        Ok(())
    }

    pub fn set_next_sibling(
        &mut self,
        layout: &NodeLayout,
        sibling: Option<Pointer>,
    ) -> Result<(), NodeError> {
        self.expect_type(NodeType::Leaf)?;
        let offset = layout.next_sibling_offset();
        self.write_pointer_slot(offset, sibling);
        Ok(())
    }

    fn write_pointer_slot(&mut self, offset: usize, pointer: Option<Pointer>) {
        let slot = &mut self.data[offset..offset + POINTER_SIZE];
        match pointer {
            Some(pointer) => pointer.write_to(slot),
            None => Pointer::write_absent(slot),
        }
    }

    /// Zero the body and stamp a fresh header, keeping the pointer.
    fn reset(&mut self, node_type: NodeType, is_root: bool) {
        self.data.fill(0);
        self.data[0] = node_type.bit();
        self.set_root(is_root);
    }
}

/// An internal (non-leaf) node.
///
/// Stores N keys and N+1 child pointers.
/// `children[i]` holds keys < `keys[i]`,
/// `children[i+1]` holds keys >= `keys[i]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalNode<K> {
    pub is_root: bool,
    pub keys: Vec<K>,
    pub children: Vec<Pointer>,
}

impl<K: BinaryCodec> InternalNode<K> {
    /// Create an internal node with two children.
    #[must_use]
    pub fn with_children(left_child: Pointer, key: K, right_child: Pointer) -> Self {
        Self {
            is_root: false,
            keys: vec![key],
            children: vec![left_child, right_child],
        }
    }

    /// Read an internal node from its slot bytes.
    pub fn from_node(layout: &NodeLayout, node: &Node) -> Result<Self, NodeError> {
        node.expect_type(NodeType::Internal)?;

        let mut keys = Vec::with_capacity(layout.max_keys());
        let mut children = Vec::with_capacity(layout.degree());

        let first = node
            .child_at(layout, 0)?
            .ok_or_else(|| NodeError::CorruptNode("internal node without children".into()))?;
        children.push(first);

        for i in 0..layout.max_keys() {
            let Some(key) = node.key_at::<K>(layout, i)? else {
                break;
            };
            let child = node.child_at(layout, i + 1)?.ok_or_else(|| {
                NodeError::CorruptNode(format!("key {i} has no right child"))
            })?;
            keys.push(key);
            children.push(child);
        }

        Ok(Self {
            is_root: node.is_root(),
            keys,
            children,
        })
    }

    /// Write this node into `node`, replacing its previous contents.
    pub fn write_to_node(&self, layout: &NodeLayout, node: &mut Node) -> Result<(), NodeError> {
        if self.keys.len() > layout.max_keys() {
            return Err(NodeError::Overflow {
                capacity: layout.max_keys(),
                count: self.keys.len(),
            });
        }
        if self.children.len() != self.keys.len() + 1 {
            return Err(NodeError::CorruptNode(format!(
                "{} keys with {} children",
                self.keys.len(),
                self.children.len()
            )));
        }

        node.reset(NodeType::Internal, self.is_root);
        for (i, child) in self.children.iter().enumerate() {
            node.set_child_at(layout, i, Some(*child))?;
        }
        for (i, key) in self.keys.iter().enumerate() {
            node.set_key_at(layout, i, key)?;
        }
        Ok(())
    }

    /// Child index for a key; equal keys route right.
    #[must_use]
    pub fn find_child_index(&self, key: &K) -> usize {
        self.keys.partition_point(|k| k <= key)
    }

    /// Child index of the leftmost subtree that may hold `key`.
    #[must_use]
    pub fn find_leftmost_child_index(&self, key: &K) -> usize {
        self.keys.partition_point(|k| k < key)
    }

    /// Insert a key and the right child created by splitting `children[pos]`.
    pub fn insert_at(&mut self, pos: usize, key: K, right_child: Pointer) {
        self.keys.insert(pos, key);
        self.children.insert(pos + 1, right_child);
    }

    #[must_use]
    pub fn is_full(&self, layout: &NodeLayout) -> bool {
        self.keys.len() >= layout.max_keys()
    }

    /// Split an overfull node, returning the promoted key and the right half.
    ///
    /// The key at the median index `(degree - 1) / 2` moves up; the keys
    /// after it and their children form the right half.
    #[must_use]
    pub fn split(&mut self, layout: &NodeLayout) -> (K, Self) {
        let mid = (layout.max_keys() / 2).min(self.keys.len().saturating_sub(1));

        let right_keys: Vec<K> = self.keys.drain(mid + 1..).collect();
        let right_children: Vec<Pointer> = self.children.drain(mid + 1..).collect();
        let promoted = self.keys.remove(mid);

        let right = Self {
            is_root: false,
            keys: right_keys,
            children: right_children,
        };
        (promoted, right)
    }
}

/// A key-value entry in a leaf node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafEntry<K, V> {
    pub key: K,
    pub value: V,
}

/// A leaf node: sorted entries plus links to the neighbouring leaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafNode<K, V> {
    pub is_root: bool,
    pub entries: Vec<LeafEntry<K, V>>,
    pub previous: Option<Pointer>,
    pub next: Option<Pointer>,
}

impl<K: BinaryCodec, V: BinaryCodec> LeafNode<K, V> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            is_root: false,
            entries: Vec::new(),
            previous: None,
            next: None,
        }
    }

    /// Read a leaf from its slot bytes.
    pub fn from_node(layout: &NodeLayout, node: &Node) -> Result<Self, NodeError> {
        node.expect_type(NodeType::Leaf)?;

        let mut entries = Vec::with_capacity(layout.max_keys());
        for i in 0..layout.max_keys() {
            let Some(key) = node.key_at::<K>(layout, i)? else {
                break;
            };
            let value = node
                .value_at::<V>(layout, i)?
                .ok_or_else(|| NodeError::CorruptNode(format!("key {i} has no value")))?;
            entries.push(LeafEntry { key, value });
        }

        Ok(Self {
            is_root: node.is_root(),
            entries,
            previous: node.previous_sibling(layout)?,
            next: node.next_sibling(layout)?,
        })
    }

    /// Write this leaf into `node`, replacing its previous contents.
    pub fn write_to_node(&self, layout: &NodeLayout, node: &mut Node) -> Result<(), NodeError> {
        if self.entries.len() > layout.max_keys() {
            return Err(NodeError::Overflow {
                capacity: layout.max_keys(),
                count: self.entries.len(),
            });
        }

        node.reset(NodeType::Leaf, self.is_root);
        for (i, entry) in self.entries.iter().enumerate() {
            node.set_key_at(layout, i, &entry.key)?;
            node.set_value_at(layout, i, &entry.value)?;
        }
        node.set_previous_sibling(layout, self.previous)?;
        node.set_next_sibling(layout, self.next)?;
        Ok(())
    }

    /// Index of an entry with `key`, or where it would be inserted.
    pub fn find_index(&self, key: &K) -> Result<usize, usize> {
        self.entries.binary_search_by(|e| e.key.cmp(key))
    }

    /// Index of the first entry whose key is not less than `key`.
    #[must_use]
    pub fn lower_bound(&self, key: &K) -> usize {
        self.entries.partition_point(|e| e.key < *key)
    }

    #[must_use]
    pub fn get(&self, key: &K) -> Option<&V> {
        self.find_index(key).ok().map(|i| &self.entries[i].value)
    }

    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.find_index(key).is_ok()
    }

    /// Insert after any entries with an equal key.
    pub fn insert(&mut self, key: K, value: V) {
        let pos = self.entries.partition_point(|e| e.key <= key);
        self.entries.insert(pos, LeafEntry { key, value });
    }

    #[must_use]
    pub fn is_full(&self, layout: &NodeLayout) -> bool {
        self.entries.len() >= layout.max_keys()
    }

    /// Split an overfull leaf, returning the right half.
    ///
    /// The left half keeps entries up to the median index `(degree - 1) / 2`.
    /// Sibling pointers are left for the caller to relink.
    #[must_use]
    pub fn split(&mut self, layout: &NodeLayout) -> Self {
        let mid = (layout.max_keys() / 2).min(self.entries.len().saturating_sub(1));
        let right_entries: Vec<LeafEntry<K, V>> = self.entries.drain(mid + 1..).collect();

        Self {
            is_root: false,
            entries: right_entries,
            previous: None,
            next: None,
        }
    }

    /// First key, used as the separator for the parent.
    #[must_use]
    pub fn first_key(&self) -> Option<&K> {
        self.entries.first().map(|e| &e.key)
    }
}

impl<K: BinaryCodec, V: BinaryCodec> Default for LeafNode<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Either kind of typed node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeNode<K, V> {
    Internal(InternalNode<K>),
    Leaf(LeafNode<K, V>),
}

impl<K: BinaryCodec, V: BinaryCodec> TreeNode<K, V> {
    pub fn from_node(layout: &NodeLayout, node: &Node) -> Result<Self, NodeError> {
        match node.node_type()? {
            NodeType::Internal => Ok(Self::Internal(InternalNode::from_node(layout, node)?)),
            NodeType::Leaf => Ok(Self::Leaf(LeafNode::from_node(layout, node)?)),
        }
    }

    pub fn write_to_node(&self, layout: &NodeLayout, node: &mut Node) -> Result<(), NodeError> {
        match self {
            Self::Internal(internal) => internal.write_to_node(layout, node),
            Self::Leaf(leaf) => leaf.write_to_node(layout, node),
        }
    }

    #[must_use]
    pub fn key_count(&self) -> usize {
        match self {
            Self::Internal(internal) => internal.keys.len(),
            Self::Leaf(leaf) => leaf.entries.len(),
        }
    }
}

/// Marker tying a layout to concrete codecs.
#[derive(Debug, Clone, Copy)]
pub struct TypedLayout<K, V> {
    pub layout: NodeLayout,
    _codecs: PhantomData<fn() -> (K, V)>,
}

impl<K: BinaryCodec, V: BinaryCodec> TypedLayout<K, V> {
    pub fn new(degree: usize) -> Result<Self, NodeError> {
        Ok(Self {
            layout: NodeLayout::for_codecs::<K, V>(degree)?,
            _codecs: PhantomData,
        })
    }

    /// Decode a stored node and read it as a typed tree node.
    pub fn read(&self, node: &Node) -> Result<TreeNode<K, V>, NodeError> {
        TreeNode::from_node(&self.layout, node)
    }

    /// Build a fresh, unstored node holding `tree_node`.
    pub fn build(&self, tree_node: &TreeNode<K, V>) -> Result<Node, NodeError> {
        let node_type = match tree_node {
            TreeNode::Internal(_) => NodeType::Internal,
            TreeNode::Leaf(_) => NodeType::Leaf,
        };
        let mut node = Node::empty(&self.layout, node_type);
        tree_node.write_to_node(&self.layout, &mut node)?;
        Ok(node)
    }
}
