//! Test that a failed memory-snapshot commit leaves the stored tree as it
//! was before the operation.

use std::sync::Arc;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::btree::KeyPolicy;
use crate::e2e_tests::helpers::*;
use crate::error::IndexError;
use crate::index::IndexManager;
use crate::session::SessionStrategy;
use crate::simulation::{FaultConfig, FaultyStorage};
use crate::storage::{IndexStorageManager, StorageError};
use crate::testing::{TestStorage, new_test_storage};

#[allow(clippy::disallowed_methods)] // Arc::clone is required for shared ownership
fn faulty_tree(degree: usize) -> (TestStorage, Arc<FaultyStorage>, Tree) {
    let test = new_test_storage();
    let faulty = Arc::new(FaultyStorage::new(test.storage(), 5, FaultConfig::no_faults()));
    let storage = Arc::clone(&faulty) as Arc<dyn IndexStorageManager>;
    let tree = open_tree(1, degree, storage, SessionStrategy::MemorySnapshot, KeyPolicy::Unique);
    (test, faulty, tree)
}

#[test]
fn test_failed_insert_commit_restores_nodes() {
    let (test, faulty, tree) = faulty_tree(4);
    let storage = test.storage();
    let layout = *tree.node_layout();

    let mut keys: Vec<i64> = (1..=80).collect();
    keys.shuffle(&mut StdRng::seed_from_u64(17));
    tree.add_index(keys[0], value_for(keys[0])).expect("first insert");

    for key in &keys[1..] {
        let before = reachable_nodes(storage.as_ref(), 1, &layout);
        let size = tree.size().expect("size");

        faulty.fail_one_update_after(0).expect("script");
        let result = tree.add_index(*key, value_for(*key));
        assert!(
            matches!(
                result,
                Err(IndexError::InternalOperation(StorageError::InjectedFault(_)))
            ),
            "insert of {key} returned {result:?}"
        );
        faulty.clear_script().expect("clear");

        assert_eq!(reachable_nodes(storage.as_ref(), 1, &layout), before, "key {key}");
        assert_eq!(tree.size().expect("size"), size);
        assert_eq!(tree.get_index(key).expect("get"), None);

        tree.add_index(*key, value_for(*key)).expect("retried insert");
    }

    let shape = check_tree(storage.as_ref(), 1, &layout);
    assert_eq!(shape.entries, keys.len());
}

#[test]
fn test_failed_remove_commit_restores_nodes() {
    let (test, faulty, tree) = faulty_tree(3);
    let storage = test.storage();
    let layout = *tree.node_layout();

    for key in 1..=60 {
        tree.add_index(key, value_for(key)).expect("insert");
    }

    let mut keys: Vec<i64> = (1..=60).collect();
    keys.shuffle(&mut StdRng::seed_from_u64(23));
    let mut failed_removes = 0;
    for key in &keys {
        let before = reachable_nodes(storage.as_ref(), 1, &layout);

        faulty.fail_removes_after(0).expect("script");
        match tree.remove_index(key) {
            Ok(removed) => assert!(removed, "key {key}"),
            Err(IndexError::InternalOperation(StorageError::InjectedFault(_))) => {
                failed_removes += 1;
                faulty.clear_script().expect("clear");
                assert_eq!(reachable_nodes(storage.as_ref(), 1, &layout), before, "key {key}");
                assert_eq!(tree.get_index(key).expect("get"), Some(value_for(*key)));
                assert!(tree.remove_index(key).expect("retried remove"));
            }
            Err(e) => panic!("remove of {key} failed: {e}"),
        }
        faulty.clear_script().expect("clear");
        let _ = check_tree(storage.as_ref(), 1, &layout);
    }

    assert!(failed_removes > 0, "no removal merged nodes");
    assert_eq!(tree.size().expect("size"), 0);
}

#[test]
fn test_update_failure_without_rollback_reports_both_errors() {
    let (test, faulty, tree) = faulty_tree(4);
    for key in 1..=10 {
        tree.add_index(key, value_for(key)).expect("insert");
    }

    faulty.fail_updates_after(0).expect("script");
    let result = tree.update_index(&3, value_for(300));
    assert!(matches!(result, Err(IndexError::RollbackFailed { .. })));

    faulty.clear_script().expect("clear");
    assert_eq!(tree.get_index(&3).expect("get"), Some(value_for(3)));
    assert_eq!(check_tree(test.storage().as_ref(), 1, tree.node_layout()).entries, 10);
}
