//! Read/write locking around an index manager.
//!
//! Reads take the lock shared and writes take it exclusively. With
//! table-level locking each index id has its own lock, so writers on
//! different indexes run in parallel; engine-level locking shares one lock
//! across every index.
//!
//! Lock acquisition is not bounded by a timeout.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard};

use crate::btree::KeyPolicy;
use crate::error::IndexError;
use crate::index::{IndexManager, Order, SortedIterator};

/// Per-index locks, created on first use.
#[derive(Debug, Default)]
pub struct IndexLockRegistry {
    locks: RwLock<HashMap<u32, Arc<RwLock<()>>>>,
}

impl IndexLockRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock for `index_id`.
    #[allow(clippy::disallowed_methods)] // Arc::clone is required for shared ownership
    #[allow(clippy::significant_drop_tightening)] // the write lock must be held during insert
    pub fn lock_for(&self, index_id: u32) -> Result<Arc<RwLock<()>>, IndexError> {
        {
            let locks = self.locks.read().map_err(|_| IndexError::LockPoisoned)?;
            if let Some(lock) = locks.get(&index_id) {
                return Ok(Arc::clone(lock));
            }
        }

        let mut locks = self.locks.write().map_err(|_| IndexError::LockPoisoned)?;
        let lock = locks.entry(index_id).or_default();
        Ok(Arc::clone(lock))
    }

    /// Number of indexes that have a lock.
    pub fn lock_count(&self) -> Result<usize, IndexError> {
        Ok(self.locks.read().map_err(|_| IndexError::LockPoisoned)?.len())
    }
}

/// One lock shared by every index of an engine.
#[derive(Debug, Clone, Default)]
pub struct EngineLock(Arc<RwLock<()>>);

impl EngineLock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// An index manager whose operations run under a read/write lock.
pub struct LockedIndexManager<M> {
    inner: M,
    lock: Arc<RwLock<()>>,
}

impl<M> LockedIndexManager<M> {
    /// Lock `inner` with its index's lock from `registry`.
    pub fn table_level<K, V>(inner: M, registry: &IndexLockRegistry) -> Result<Self, IndexError>
    where
        M: IndexManager<K, V>,
    {
        let lock = registry.lock_for(inner.index_id())?;
        Ok(Self { inner, lock })
    }

    /// Lock `inner` with the engine-wide lock.
    #[must_use]
    #[allow(clippy::disallowed_methods)] // Arc::clone is required for shared ownership
    pub fn engine_level(inner: M, lock: &EngineLock) -> Self {
        Self {
            inner,
            lock: Arc::clone(&lock.0),
        }
    }

    #[must_use]
    pub const fn inner(&self) -> &M {
        &self.inner
    }

    fn read<T>(&self, op: impl FnOnce(&M) -> Result<T, IndexError>) -> Result<T, IndexError> {
        let _guard = self.lock.read().map_err(|_| IndexError::LockPoisoned)?;
        op(&self.inner)
    }

    fn write<T>(&self, op: impl FnOnce(&M) -> Result<T, IndexError>) -> Result<T, IndexError> {
        let _guard = self.lock.write().map_err(|_| IndexError::LockPoisoned)?;
        op(&self.inner)
    }
}

impl<K, V, M> IndexManager<K, V> for LockedIndexManager<M>
where
    K: 'static,
    V: 'static,
    M: IndexManager<K, V>,
{
    fn index_id(&self) -> u32 {
        self.inner.index_id()
    }

    fn key_policy(&self) -> KeyPolicy {
        self.inner.key_policy()
    }

    fn add_index(&self, key: K, value: V) -> Result<(), IndexError> {
        self.write(|inner| inner.add_index(key, value))
    }

    fn get_index(&self, key: &K) -> Result<Option<V>, IndexError> {
        self.read(|inner| inner.get_index(key))
    }

    fn get_all(&self, key: &K) -> Result<Vec<V>, IndexError> {
        self.read(|inner| inner.get_all(key))
    }

    fn update_index(&self, key: &K, value: V) -> Result<bool, IndexError> {
        self.write(|inner| inner.update_index(key, value))
    }

    fn remove_index(&self, key: &K) -> Result<bool, IndexError> {
        self.write(|inner| inner.remove_index(key))
    }

    fn remove_value(&self, key: &K, value: &V) -> Result<bool, IndexError> {
        self.write(|inner| inner.remove_value(key, value))
    }

    fn size(&self) -> Result<usize, IndexError> {
        self.read(|inner| inner.size())
    }

    /// The read lock is held until the iterator is dropped.
    fn sorted_iter(&self, order: Order) -> Result<SortedIterator<'_, K, V>, IndexError> {
        let guard = self.lock.read().map_err(|_| IndexError::LockPoisoned)?;
        let entries = self.inner.sorted_iter(order)?;
        Ok(Box::new(GuardedIter {
            entries,
            _guard: guard,
        }))
    }

    fn purge(&self) -> Result<(), IndexError> {
        self.write(|inner| inner.purge())
    }
}

/// Iterator that keeps a read guard alive. Fields drop in order, so the
/// entries are released before the lock.
struct GuardedIter<'a, K, V> {
    entries: SortedIterator<'a, K, V>,
    _guard: RwLockReadGuard<'a, ()>,
}

impl<K, V> Iterator for GuardedIter<'_, K, V> {
    type Item = Result<(K, V), IndexError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.entries.next()
    }
}
