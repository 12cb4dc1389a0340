//! The index manager contract and its decorators.
//!
//! [`IndexManager`] is what callers program against. The B+Tree implements
//! it directly; locking and caching wrap any implementation and implement it
//! again, so they compose:
//!
//! ```text
//! CachedIndexManager -> LockedIndexManager -> BPlusTreeIndexManager
//! ```

mod cached;
mod locked;

use crate::btree::KeyPolicy;
use crate::error::IndexError;

pub use cached::CachedIndexManager;
pub use locked::{EngineLock, IndexLockRegistry, LockedIndexManager};

/// Direction of a sorted walk over an index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Order {
    #[default]
    Ascending,
    Descending,
}

/// Entries of an index in key order.
///
/// Ascending walks return entries with equal keys in insertion order;
/// descending walks return them reversed.
pub type SortedIterator<'a, K, V> = Box<dyn Iterator<Item = Result<(K, V), IndexError>> + 'a>;

/// Operations on one index.
pub trait IndexManager<K, V>: Send + Sync {
    /// Id of the index this manager works on.
    fn index_id(&self) -> u32;

    /// Whether the index accepts several entries per key.
    fn key_policy(&self) -> KeyPolicy;

    /// Store `value` under `key`.
    ///
    /// A unique index fails with [`IndexError::IndexExists`] when `key` is
    /// already present.
    fn add_index(&self, key: K, value: V) -> Result<(), IndexError>;

    /// First value stored under `key`.
    fn get_index(&self, key: &K) -> Result<Option<V>, IndexError>;

    /// Every value stored under `key`, in insertion order.
    fn get_all(&self, key: &K) -> Result<Vec<V>, IndexError>;

    /// Replace the first value stored under `key`. Returns `false` when the
    /// key is missing.
    fn update_index(&self, key: &K, value: V) -> Result<bool, IndexError>;

    /// Remove the first entry stored under `key`. Returns `false` when the
    /// key is missing.
    fn remove_index(&self, key: &K) -> Result<bool, IndexError>;

    /// Remove the entry holding exactly `key` and `value`.
    fn remove_value(&self, key: &K, value: &V) -> Result<bool, IndexError>;

    /// Number of stored entries.
    fn size(&self) -> Result<usize, IndexError>;

    /// All entries, walked in `order`.
    fn sorted_iter(&self, order: Order) -> Result<SortedIterator<'_, K, V>, IndexError>;

    /// All entries in ascending key order.
    fn iter(&self) -> Result<SortedIterator<'_, K, V>, IndexError> {
        self.sorted_iter(Order::Ascending)
    }

    /// Remove every entry and release the index's storage.
    fn purge(&self) -> Result<(), IndexError>;
}
