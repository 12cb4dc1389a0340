//! Test an index that stores several values per key.

use crate::btree::KeyPolicy;
use crate::e2e_tests::helpers::*;
use crate::index::IndexManager;
use crate::pointer::Pointer;
use crate::session::SessionStrategy;
use crate::testing::new_test_storage;

#[test]
fn test_duplicates_keep_insertion_order() {
    let test = new_test_storage();
    let storage = test.storage();
    let tree = open_tree(1, 4, test.storage(), SessionStrategy::Immediate, KeyPolicy::Duplicate);

    for n in 0..30_u64 {
        let key = i64::try_from(n % 3).expect("small");
        tree.add_index(key, Pointer::data(n, 0)).expect("insert");
    }

    for key in 0..3_u64 {
        let expected: Vec<Pointer> = (0..30)
            .filter(|n| n % 3 == key)
            .map(|n| Pointer::data(n, 0))
            .collect();
        let key = i64::try_from(key).expect("small");
        assert_eq!(tree.get_all(&key).expect("get all"), expected);
        assert_eq!(tree.get_index(&key).expect("get"), expected.first().copied());
    }
    assert_eq!(tree.size().expect("size"), 30);
    assert_eq!(check_tree(storage.as_ref(), 1, tree.node_layout()).entries, 30);

    let keys: Vec<i64> = tree
        .iter()
        .expect("iter")
        .map(|entry| entry.expect("entry").0)
        .collect();
    assert!(keys.is_sorted());
}

#[test]
fn test_remove_exact_pairs() {
    let test = new_test_storage();
    let storage = test.storage();
    let tree = open_tree(1, 3, test.storage(), SessionStrategy::MemorySnapshot, KeyPolicy::Duplicate);

    for n in 0..20_u64 {
        tree.add_index(42, Pointer::data(n, 0)).expect("insert");
        tree.add_index(7, Pointer::data(n, 1)).expect("insert");
    }

    for n in (0..20_u64).filter(|n| n % 2 == 1) {
        assert!(tree.remove_value(&42, &Pointer::data(n, 0)).expect("remove value"));
        let _ = check_tree(storage.as_ref(), 1, tree.node_layout());
    }
    assert!(!tree.remove_value(&42, &Pointer::data(1, 0)).expect("already removed"));
    assert!(!tree.remove_value(&42, &Pointer::data(0, 1)).expect("wrong value"));

    let expected: Vec<Pointer> = (0..20).step_by(2).map(|n| Pointer::data(n, 0)).collect();
    assert_eq!(tree.get_all(&42).expect("get all"), expected);
    assert_eq!(tree.get_all(&7).expect("get all").len(), 20);

    assert!(tree.remove_index(&7).expect("remove first"));
    assert_eq!(tree.get_index(&7).expect("get"), Some(Pointer::data(1, 1)));
}

#[test]
fn test_update_replaces_first_duplicate() {
    let test = new_test_storage();
    let tree = open_tree(1, 4, test.storage(), SessionStrategy::Immediate, KeyPolicy::Duplicate);

    tree.add_index(1, Pointer::data(1, 0)).expect("insert");
    tree.add_index(1, Pointer::data(2, 0)).expect("insert");
    assert!(tree.update_index(&1, Pointer::data(9, 0)).expect("update"));
    assert_eq!(
        tree.get_all(&1).expect("get all"),
        vec![Pointer::data(9, 0), Pointer::data(2, 0)]
    );
}
