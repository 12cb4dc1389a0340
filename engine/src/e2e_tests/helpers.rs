//! Common helpers for end-to-end tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::btree::node::{Node, NodeLayout, TreeNode};
use crate::btree::{BPlusTreeIndexManager, KeyPolicy};
use crate::pointer::Pointer;
use crate::session::SessionStrategy;
use crate::storage::IndexStorageManager;

pub type Tree = BPlusTreeIndexManager<i64, Pointer>;

/// A tree over `storage` with `i64` keys and pointer values.
#[must_use]
#[allow(clippy::expect_used)]
pub fn open_tree(
    index_id: u32,
    degree: usize,
    storage: Arc<dyn IndexStorageManager>,
    strategy: SessionStrategy,
    policy: KeyPolicy,
) -> Tree {
    BPlusTreeIndexManager::new(index_id, degree, storage, strategy, policy)
        .expect("Failed to create tree")
}

/// Data pointer derived from a key, so values are easy to check.
#[must_use]
pub fn value_for(key: i64) -> Pointer {
    Pointer::data(key.unsigned_abs(), 7)
}

#[allow(clippy::expect_used)]
fn read(
    storage: &dyn IndexStorageManager,
    index_id: u32,
    layout: &NodeLayout,
    pointer: Pointer,
) -> Node {
    let data = storage
        .read_node(index_id, pointer, layout.node_size())
        .expect("Failed to read node");
    Node::decode(layout, Some(pointer), data.bytes).expect("Failed to decode node")
}

/// Bytes of every node reachable from the root.
#[must_use]
#[allow(clippy::expect_used)]
pub fn reachable_nodes(
    storage: &dyn IndexStorageManager,
    index_id: u32,
    layout: &NodeLayout,
) -> BTreeMap<Pointer, Vec<u8>> {
    let mut nodes = BTreeMap::new();
    let Some(root) = storage
        .get_root(index_id, layout.node_size())
        .expect("Failed to read root")
    else {
        return nodes;
    };

    let mut stack = vec![root.pointer];
    while let Some(pointer) = stack.pop() {
        let node = read(storage, index_id, layout, pointer);
        if let TreeNode::Internal(internal) =
            TreeNode::<i64, Pointer>::from_node(layout, &node).expect("Failed to read node")
        {
            stack.extend(internal.children);
        }
        nodes.insert(pointer, node.into_data());
    }
    nodes
}

/// Shape of a tree as found on disk.
#[derive(Debug, Default)]
pub struct TreeShape {
    pub height: usize,
    pub leaves: usize,
    pub entries: usize,
}

/// Walk the tree from the root and assert its structural invariants:
/// one root flag, minimum occupancy below the root, sorted keys, separators
/// bounding their subtrees, and equal depth for every leaf.
#[must_use]
#[allow(clippy::expect_used)]
pub fn check_tree(
    storage: &dyn IndexStorageManager,
    index_id: u32,
    layout: &NodeLayout,
) -> TreeShape {
    let mut shape = TreeShape::default();
    let Some(root) = storage
        .get_root(index_id, layout.node_size())
        .expect("Failed to read root")
    else {
        return shape;
    };

    let mut leaf_depth = None;
    let mut stack = vec![(root.pointer, true, 1_usize, None::<i64>, None::<i64>)];
    while let Some((pointer, is_root, depth, low, high)) = stack.pop() {
        let node = read(storage, index_id, layout, pointer);
        assert_eq!(node.is_root(), is_root, "root flag of {pointer}");
        let typed =
            TreeNode::<i64, Pointer>::from_node(layout, &node).expect("Failed to read node");
        if !is_root {
            assert!(
                typed.key_count() >= layout.min_keys(),
                "node {pointer} holds {} keys, minimum is {}",
                typed.key_count(),
                layout.min_keys()
            );
        }

        let keys: Vec<i64> = match &typed {
            TreeNode::Internal(internal) => internal.keys.clone(),
            TreeNode::Leaf(leaf) => leaf.entries.iter().map(|e| e.key).collect(),
        };
        assert!(keys.is_sorted(), "keys of {pointer} out of order");
        for key in &keys {
            assert!(low.is_none_or(|low| *key >= low), "{key} below bound in {pointer}");
            assert!(high.is_none_or(|high| *key <= high), "{key} above bound in {pointer}");
        }

        match typed {
            TreeNode::Internal(internal) => {
                assert_eq!(internal.children.len(), internal.keys.len() + 1);
                for (i, child) in internal.children.iter().enumerate() {
                    let child_low = if i == 0 { low } else { Some(internal.keys[i - 1]) };
                    let child_high = internal.keys.get(i).copied().or(high);
                    stack.push((*child, false, depth + 1, child_low, child_high));
                }
            }
            TreeNode::Leaf(leaf) => {
                let expected = *leaf_depth.get_or_insert(depth);
                assert_eq!(depth, expected, "leaf {pointer} at depth {depth}");
                shape.leaves += 1;
                shape.entries += leaf.entries.len();
            }
        }
    }
    shape.height = leaf_depth.unwrap_or(0);
    shape
}

/// Keys of every leaf, following `next` links from the leftmost leaf and
/// checking that `previous` links point back.
#[must_use]
#[allow(clippy::expect_used)]
pub fn leaf_chain(
    storage: &dyn IndexStorageManager,
    index_id: u32,
    layout: &NodeLayout,
) -> Vec<Vec<i64>> {
    let mut chain = Vec::new();
    let Some(root) = storage
        .get_root(index_id, layout.node_size())
        .expect("Failed to read root")
    else {
        return chain;
    };

    let mut pointer = root.pointer;
    let mut node = read(storage, index_id, layout, pointer);
    while !node.is_leaf() {
        let child = node
            .child_at(layout, 0)
            .expect("Failed to read child")
            .expect("Internal node without children");
        pointer = child;
        node = read(storage, index_id, layout, pointer);
    }

    let mut previous = None;
    loop {
        let typed =
            TreeNode::<i64, Pointer>::from_node(layout, &node).expect("Failed to read node");
        let TreeNode::Leaf(leaf) = typed else {
            panic!("{pointer} in the leaf chain is not a leaf");
        };
        assert_eq!(leaf.previous, previous, "previous link of {pointer}");
        chain.push(leaf.entries.iter().map(|e| e.key).collect());

        let Some(next) = leaf.next else {
            break;
        };
        previous = Some(pointer);
        pointer = next;
        node = read(storage, index_id, layout, pointer);
    }
    chain
}
