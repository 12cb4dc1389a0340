//! B+Tree index: node format and the tree algorithms.

pub mod node;
mod rebalance;
mod tree;

pub use tree::{BPlusTreeIndexManager, KeyPolicy};
