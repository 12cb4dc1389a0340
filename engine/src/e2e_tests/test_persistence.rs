//! Test that an index survives closing and reopening its storage.

use std::path::Path;
use std::sync::Arc;

use crate::btree::KeyPolicy;
use crate::e2e_tests::helpers::*;
use crate::index::IndexManager;
use crate::session::SessionStrategy;
use crate::storage::{
    FileHandlerPool, FileIndexStorage, HEADER_FILE_NAME, IndexStorageManager, JsonHeaderManager,
    StorageOptions,
};

#[allow(clippy::expect_used)]
fn open_storage(dir: &Path) -> Arc<dyn IndexStorageManager> {
    let header = Arc::new(JsonHeaderManager::open(dir).expect("Failed to open header"));
    let pool = Arc::new(FileHandlerPool::new(Some(4), 2).expect("Failed to create pool"));
    let options = StorageOptions {
        growth_node_allocation_count: 4,
        ..StorageOptions::default()
    };
    let storage =
        FileIndexStorage::organized(dir, header, pool, options).expect("Failed to open storage");
    Arc::new(storage)
}

#[test]
#[allow(clippy::disallowed_methods)] // Arc::clone is required for shared ownership
fn test_reopen_with_json_header() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");

    {
        let storage = open_storage(dir.path());
        let tree = open_tree(
            1,
            4,
            Arc::clone(&storage),
            SessionStrategy::MemorySnapshot,
            KeyPolicy::Unique,
        );
        for key in 0..100 {
            tree.add_index(key, value_for(key)).expect("insert");
        }
        for key in (0..100).step_by(3) {
            assert!(tree.remove_index(&key).expect("remove"));
        }
        storage.close().expect("close");
    }
    assert!(dir.path().join(HEADER_FILE_NAME).exists());

    let storage = open_storage(dir.path());
    let tree = open_tree(1, 4, Arc::clone(&storage), SessionStrategy::Immediate, KeyPolicy::Unique);
    let expected: Vec<i64> = (0..100).filter(|k| k % 3 != 0).collect();
    let keys: Vec<i64> = tree
        .iter()
        .expect("iter")
        .map(|entry| entry.expect("entry").0)
        .collect();
    assert_eq!(keys, expected);
    let _ = check_tree(storage.as_ref(), 1, tree.node_layout());

    for key in 200..260 {
        tree.add_index(key, value_for(key)).expect("insert after reopen");
    }
    assert_eq!(tree.size().expect("size"), expected.len() + 60);
    assert_eq!(tree.get_index(&250).expect("get"), Some(value_for(250)));
}

#[test]
#[allow(clippy::disallowed_methods)] // Arc::clone is required for shared ownership
fn test_indexes_reopen_independently() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");

    {
        let storage = open_storage(dir.path());
        for id in 1..=3 {
            let tree = open_tree(
                id,
                5,
                Arc::clone(&storage),
                SessionStrategy::Immediate,
                KeyPolicy::Duplicate,
            );
            for key in 0..20 {
                tree.add_index(key % 4, value_for(key + i64::from(id) * 100)).expect("insert");
            }
        }
        storage.close().expect("close");
    }

    let storage = open_storage(dir.path());
    for id in 1..=3 {
        let tree = open_tree(
            id,
            5,
            Arc::clone(&storage),
            SessionStrategy::Immediate,
            KeyPolicy::Duplicate,
        );
        assert_eq!(tree.size().expect("size"), 20);
        let expected: Vec<_> = (0..20)
            .filter(|key| key % 4 == 1)
            .map(|key| value_for(key + i64::from(id) * 100))
            .collect();
        assert_eq!(tree.get_all(&1).expect("get all"), expected);
    }
}

#[test]
#[allow(clippy::disallowed_methods)] // Arc::clone is required for shared ownership
fn test_organized_indexes_alternating_inserts() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");

    {
        let storage = open_storage(dir.path());
        let first = open_tree(1, 4, Arc::clone(&storage), SessionStrategy::Immediate, KeyPolicy::Unique);
        let second = open_tree(2, 4, Arc::clone(&storage), SessionStrategy::Immediate, KeyPolicy::Unique);
        for key in 0..100 {
            first.add_index(key, value_for(key)).expect("insert first");
            second.add_index(key, value_for(key + 1000)).expect("insert second");
            assert_eq!(first.get_index(&key).expect("get first"), Some(value_for(key)));
        }
        assert_eq!(check_tree(storage.as_ref(), 1, first.node_layout()).entries, 100);
        assert_eq!(check_tree(storage.as_ref(), 2, second.node_layout()).entries, 100);
        storage.close().expect("close");
    }

    let storage = open_storage(dir.path());
    let first = open_tree(1, 4, Arc::clone(&storage), SessionStrategy::Immediate, KeyPolicy::Unique);
    let second = open_tree(2, 4, Arc::clone(&storage), SessionStrategy::Immediate, KeyPolicy::Unique);
    for key in 0..100 {
        assert_eq!(first.get_index(&key).expect("get first"), Some(value_for(key)));
        assert_eq!(second.get_index(&key).expect("get second"), Some(value_for(key + 1000)));
    }
    for key in 100..140 {
        second.add_index(key, value_for(key)).expect("insert after reopen");
    }
    assert_eq!(first.size().expect("size"), 100);
    assert_eq!(second.size().expect("size"), 140);
}
