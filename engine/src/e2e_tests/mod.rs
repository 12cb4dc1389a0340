//! End-to-end tests at the index manager level.
//!
//! Each test file covers a specific scenario, driving trees over real chunk
//! files and inspecting the stored nodes afterwards.

#![cfg(test)]

mod helpers;

mod test_cached_locked;
mod test_chunk_rollover;
mod test_compact_layout;
mod test_concurrent_inserts;
mod test_delete_all;
mod test_duplicates;
mod test_leaf_chain;
mod test_persistence;
mod test_search_after_splits;
mod test_snapshot_rollback;
