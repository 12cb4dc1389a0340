//! Test the cache decorator stacked on the lock decorator.

use std::num::NonZeroUsize;
use std::thread;

use crate::btree::KeyPolicy;
use crate::e2e_tests::helpers::*;
use crate::index::{CachedIndexManager, IndexLockRegistry, IndexManager, LockedIndexManager};
use crate::pointer::Pointer;
use crate::session::SessionStrategy;
use crate::testing::new_test_storage;

type Stack = CachedIndexManager<i64, Pointer, LockedIndexManager<Tree>>;

#[test]
fn test_cache_over_locked_tree() {
    let test = new_test_storage();
    let registry = IndexLockRegistry::new();
    let tree = open_tree(1, 4, test.storage(), SessionStrategy::MemorySnapshot, KeyPolicy::Unique);
    let locked = LockedIndexManager::table_level(tree, &registry).expect("lock");
    let capacity = NonZeroUsize::new(16).expect("non-zero");
    let index: Stack = CachedIndexManager::new(locked, capacity).expect("cache");

    thread::scope(|scope| {
        for worker in 0..4_i64 {
            let index = &index;
            scope.spawn(move || {
                for key in (0..50).map(|i| i * 4 + worker) {
                    index.add_index(key, value_for(key)).expect("insert");
                    assert_eq!(index.get_index(&key).expect("get"), Some(value_for(key)));
                }
            });
        }
    });

    assert_eq!(index.size().expect("size"), 200);
    assert!(index.cached_len().expect("cached") <= 16);

    for key in (0..200).step_by(7) {
        assert!(index.update_index(&key, Pointer::data(1, 1)).expect("update"));
    }
    for key in (0..200).step_by(7) {
        assert_eq!(index.get_index(&key).expect("get"), Some(Pointer::data(1, 1)));
        assert_eq!(
            index.inner().inner().get_index(&key).expect("tree get"),
            Some(Pointer::data(1, 1))
        );
    }

    for key in (0..200).filter(|k| k % 2 == 0) {
        assert!(index.remove_index(&key).expect("remove"));
    }
    assert_eq!(index.size().expect("size"), 100);
    assert_eq!(index.inner().size().expect("locked size"), 100);
    assert_eq!(index.get_index(&10).expect("get"), None);

    let tree = index.inner().inner();
    let _ = check_tree(test.storage().as_ref(), 1, tree.node_layout());
}
