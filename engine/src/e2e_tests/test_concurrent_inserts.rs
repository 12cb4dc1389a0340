//! Test concurrent writers through the lock decorators.

use std::thread;

use crate::btree::KeyPolicy;
use crate::e2e_tests::helpers::*;
use crate::index::{EngineLock, IndexLockRegistry, IndexManager, LockedIndexManager};
use crate::session::SessionStrategy;
use crate::testing::new_test_storage;

#[test]
fn test_hundred_concurrent_inserts_table_level() {
    let test = new_test_storage();
    let registry = IndexLockRegistry::new();
    let tree = open_tree(1, 4, test.storage(), SessionStrategy::Immediate, KeyPolicy::Unique);
    let locked = LockedIndexManager::table_level(tree, &registry).expect("lock");

    thread::scope(|scope| {
        for worker in 0..10_i64 {
            let locked = &locked;
            scope.spawn(move || {
                for i in 0..10 {
                    let key = i * 10 + worker;
                    locked.add_index(key, value_for(key)).expect("insert");
                }
            });
        }
    });

    assert_eq!(locked.size().expect("size"), 100);
    let keys: Vec<i64> = locked
        .iter()
        .expect("iter")
        .map(|entry| entry.expect("entry").0)
        .collect();
    assert_eq!(keys, (0..100).collect::<Vec<_>>());
    let _ = check_tree(test.storage().as_ref(), 1, locked.inner().node_layout());
}

#[test]
fn test_readers_and_writers_on_separate_indexes() {
    let test = new_test_storage();
    let registry = IndexLockRegistry::new();
    let first = LockedIndexManager::table_level(
        open_tree(1, 4, test.storage(), SessionStrategy::MemorySnapshot, KeyPolicy::Unique),
        &registry,
    )
    .expect("lock");
    let second = LockedIndexManager::table_level(
        open_tree(2, 5, test.storage(), SessionStrategy::Immediate, KeyPolicy::Unique),
        &registry,
    )
    .expect("lock");

    thread::scope(|scope| {
        for (index, offset) in [(&first, 0_i64), (&first, 1000), (&second, 0), (&second, 1000)] {
            scope.spawn(move || {
                for key in offset..offset + 60 {
                    index.add_index(key, value_for(key)).expect("insert");
                    assert_eq!(index.get_index(&key).expect("get"), Some(value_for(key)));
                }
            });
        }
    });

    assert_eq!(registry.lock_count().expect("count"), 2);
    assert_eq!(first.size().expect("size"), 120);
    assert_eq!(second.size().expect("size"), 120);
}

#[test]
fn test_engine_level_lock_shared_by_indexes() {
    let test = new_test_storage();
    let lock = EngineLock::new();
    let indexes: Vec<_> = (1..=3)
        .map(|id| {
            LockedIndexManager::engine_level(
                open_tree(id, 4, test.storage(), SessionStrategy::Immediate, KeyPolicy::Unique),
                &lock,
            )
        })
        .collect();

    thread::scope(|scope| {
        for index in &indexes {
            scope.spawn(move || {
                for key in 0..40 {
                    index.add_index(key, value_for(key)).expect("insert");
                }
                for key in (0..40).filter(|k| k % 4 == 0) {
                    assert!(index.remove_index(&key).expect("remove"));
                }
            });
        }
    });

    for index in &indexes {
        assert_eq!(index.size().expect("size"), 30);
    }
}
