//! Slot bookkeeping for node allocation.
//!
//! Tracks, per index, the zero-filled slots that can be handed out before the
//! storage has to grow: slots freed by `remove_node`, the unused remainder of
//! each growth batch, and unoccupied slots discovered by scanning an index's
//! whole storage once per process, and again after a purge. The first scan
//! picks up slots freed by an earlier process in any growth batch.
//!
//! The allocator itself does no I/O; [`FileIndexStorage`] drives it while
//! holding its allocation mutex.
//!
//! [`FileIndexStorage`]: crate::storage::FileIndexStorage

use std::collections::{HashMap, HashSet, VecDeque};

use crate::btree::node::{TYPE_INTERNAL_BIT, TYPE_LEAF_BIT};
use crate::pointer::Pointer;

/// Per-index free slot lists.
#[derive(Debug, Default)]
pub struct SlotAllocator {
    free: HashMap<u32, VecDeque<Pointer>>,
    scanned: HashSet<u32>,
}

impl SlotAllocator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the oldest queued slot of an index.
    pub fn pop_free(&mut self, index_id: u32) -> Option<Pointer> {
        self.free.get_mut(&index_id)?.pop_front()
    }

    /// Queue a slot for reuse. Already queued slots are ignored.
    pub fn push_free(&mut self, index_id: u32, pointer: Pointer) {
        let queue = self.free.entry(index_id).or_default();
        if !queue.contains(&pointer) {
            queue.push_back(pointer);
        }
    }

    pub fn queue(&mut self, index_id: u32, pointers: impl IntoIterator<Item = Pointer>) {
        for pointer in pointers {
            self.push_free(index_id, pointer);
        }
    }

    /// Withdraw a slot that is being written to again.
    ///
    /// Returns whether the slot was queued.
    pub fn take(&mut self, index_id: u32, pointer: Pointer) -> bool {
        let Some(queue) = self.free.get_mut(&index_id) else {
            return false;
        };
        match queue.iter().position(|p| *p == pointer) {
            Some(position) => {
                queue.remove(position);
                true
            }
            None => false,
        }
    }

    /// Whether a scan is owed before the next growth. Marks the index as
    /// scanned.
    pub fn take_scan(&mut self, index_id: u32) -> bool {
        self.scanned.insert(index_id)
    }

    /// Forget everything about an index whose storage was wiped.
    pub fn reset(&mut self, index_id: u32) {
        self.free.remove(&index_id);
        self.scanned.remove(&index_id);
    }

    #[must_use]
    pub fn free_count(&self, index_id: u32) -> usize {
        self.free.get(&index_id).map_or(0, VecDeque::len)
    }
}

/// Offsets of slots in `bytes` whose header byte has neither type bit set.
pub fn unoccupied_slots(bytes: &[u8], slot_size: usize) -> impl Iterator<Item = usize> + '_ {
    bytes
        .chunks_exact(slot_size.max(1))
        .enumerate()
        .filter(|(_, slot)| slot[0] & (TYPE_LEAF_BIT | TYPE_INTERNAL_BIT) == 0)
        .map(move |(i, _)| i * slot_size)
}
