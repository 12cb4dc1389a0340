//! LRU read cache in front of a unique index.
//!
//! Hits are served from memory. Writes go through to the inner manager
//! while holding the cache lock. A miss releases the lock before reading
//! from the inner manager, so hits on other keys are not blocked behind the
//! read. Every write bumps a generation counter, and a miss only caches what
//! it read when no write happened in between, so the cache never keeps a
//! value older than the index.

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};

use lru::LruCache;

use crate::btree::KeyPolicy;
use crate::error::IndexError;
use crate::index::{IndexManager, Order, SortedIterator};

struct CacheState<K: Hash + Eq, V> {
    entries: LruCache<K, V>,
    size: Option<usize>,
    /// Bumped by every write.
    generation: u64,
}

impl<K: Hash + Eq, V> CacheState<K, V> {
    const fn bump(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }
}

/// Caches `key -> value` lookups and the entry count.
pub struct CachedIndexManager<K: Hash + Eq, V, M> {
    inner: M,
    state: Mutex<CacheState<K, V>>,
}

impl<K, V, M> CachedIndexManager<K, V, M>
where
    K: Hash + Eq + Clone,
    V: Clone,
    M: IndexManager<K, V>,
{
    /// Cache up to `capacity` entries of `inner`.
    ///
    /// Fails with [`IndexError::Unsupported`] for a duplicate-key index.
    pub fn new(inner: M, capacity: NonZeroUsize) -> Result<Self, IndexError> {
        if inner.key_policy() == KeyPolicy::Duplicate {
            return Err(IndexError::Unsupported(
                "caching an index with duplicate keys",
            ));
        }
        Ok(Self {
            inner,
            state: Mutex::new(CacheState {
                entries: LruCache::new(capacity),
                size: None,
                generation: 0,
            }),
        })
    }

    #[must_use]
    pub const fn inner(&self) -> &M {
        &self.inner
    }

    /// Number of cached entries.
    pub fn cached_len(&self) -> Result<usize, IndexError> {
        Ok(self.state()?.entries.len())
    }

    fn state(&self) -> Result<MutexGuard<'_, CacheState<K, V>>, IndexError> {
        self.state.lock().map_err(|_| IndexError::LockPoisoned)
    }
}

fn adjust(size: &mut Option<usize>, grow: bool) {
    if let Some(count) = size {
        *count = if grow {
            count.saturating_add(1)
        } else {
            count.saturating_sub(1)
        };
    }
}

impl<K, V, M> IndexManager<K, V> for CachedIndexManager<K, V, M>
where
    K: Hash + Eq + Clone + Send + 'static,
    V: Clone + Send + 'static,
    M: IndexManager<K, V>,
{
    fn index_id(&self) -> u32 {
        self.inner.index_id()
    }

    fn key_policy(&self) -> KeyPolicy {
        self.inner.key_policy()
    }

    fn add_index(&self, key: K, value: V) -> Result<(), IndexError> {
        let mut state = self.state()?;
        state.bump();
        self.inner.add_index(key.clone(), value.clone())?;
        state.entries.put(key, value);
        adjust(&mut state.size, true);
        drop(state);
        Ok(())
    }

    fn get_index(&self, key: &K) -> Result<Option<V>, IndexError> {
        let generation = {
            let mut state = self.state()?;
            if let Some(value) = state.entries.get(key) {
                return Ok(Some(value.clone()));
            }
            state.generation
        };

        let found = self.inner.get_index(key)?;
        if let Some(value) = &found {
            let mut state = self.state()?;
            if state.generation == generation {
                state.entries.put(key.clone(), value.clone());
            }
        }
        Ok(found)
    }

    fn get_all(&self, key: &K) -> Result<Vec<V>, IndexError> {
        Ok(self.get_index(key)?.into_iter().collect())
    }

    fn update_index(&self, key: &K, value: V) -> Result<bool, IndexError> {
        let mut state = self.state()?;
        state.bump();
        let updated = self.inner.update_index(key, value.clone())?;
        if updated {
            state.entries.put(key.clone(), value);
        }
        drop(state);
        Ok(updated)
    }

    fn remove_index(&self, key: &K) -> Result<bool, IndexError> {
        let mut state = self.state()?;
        state.bump();
        state.entries.pop(key);
        let removed = self.inner.remove_index(key)?;
        if removed {
            adjust(&mut state.size, false);
        }
        drop(state);
        Ok(removed)
    }

    fn remove_value(&self, key: &K, value: &V) -> Result<bool, IndexError> {
        let mut state = self.state()?;
        state.bump();
        state.entries.pop(key);
        let removed = self.inner.remove_value(key, value)?;
        if removed {
            adjust(&mut state.size, false);
        }
        drop(state);
        Ok(removed)
    }

    fn size(&self) -> Result<usize, IndexError> {
        let mut state = self.state()?;
        if let Some(size) = state.size {
            return Ok(size);
        }
        let size = self.inner.size()?;
        state.size = Some(size);
        drop(state);
        Ok(size)
    }

    fn sorted_iter(&self, order: Order) -> Result<SortedIterator<'_, K, V>, IndexError> {
        self.inner.sorted_iter(order)
    }

    fn purge(&self) -> Result<(), IndexError> {
        let mut state = self.state()?;
        state.bump();
        state.entries.clear();
        state.size = None;
        self.inner.purge()?;
        state.size = Some(0);
        drop(state);
        Ok(())
    }
}
