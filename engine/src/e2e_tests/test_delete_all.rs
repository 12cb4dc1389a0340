//! Test deleting every key, checking the tree after each removal.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::btree::KeyPolicy;
use crate::e2e_tests::helpers::*;
use crate::index::IndexManager;
use crate::session::SessionStrategy;
use crate::testing::new_test_storage;

#[test]
fn test_delete_all_in_random_order() {
    for (degree, seed) in [(3, 1), (4, 2), (6, 3), (9, 4)] {
        for strategy in [SessionStrategy::Immediate, SessionStrategy::MemorySnapshot] {
            let test = new_test_storage();
            let storage = test.storage();
            let tree = open_tree(1, degree, test.storage(), strategy, KeyPolicy::Unique);
            let layout = *tree.node_layout();

            let mut keys: Vec<i64> = (1..=150).collect();
            let mut rng = StdRng::seed_from_u64(seed);
            keys.shuffle(&mut rng);
            for key in &keys {
                tree.add_index(*key, value_for(*key)).expect("insert");
            }

            keys.shuffle(&mut rng);
            for (i, key) in keys.iter().enumerate() {
                assert!(tree.remove_index(key).expect("remove"), "degree {degree} key {key}");
                assert!(!tree.remove_index(key).expect("remove again"));
                let shape = check_tree(storage.as_ref(), 1, &layout);
                assert_eq!(shape.entries, keys.len() - i - 1);
            }

            assert_eq!(tree.size().expect("size"), 0);
            assert_eq!(tree.iter().expect("iter").count(), 0);
            let shape = check_tree(storage.as_ref(), 1, &layout);
            assert!(shape.leaves <= 1 && shape.height <= 1);
        }
    }
}

#[test]
fn test_missing_key_is_not_removed() {
    let test = new_test_storage();
    let tree = open_tree(1, 4, test.storage(), SessionStrategy::Immediate, KeyPolicy::Unique);
    assert!(!tree.remove_index(&1).expect("remove from empty tree"));

    for key in (0..40).step_by(2) {
        tree.add_index(key, value_for(key)).expect("insert");
    }
    for key in (1..40).step_by(2) {
        assert!(!tree.remove_index(&key).expect("remove missing"));
    }
    assert_eq!(tree.size().expect("size"), 20);
}

#[test]
fn test_tree_grows_again_after_emptying() {
    let test = new_test_storage();
    let storage = test.storage();
    let tree = open_tree(1, 3, test.storage(), SessionStrategy::Immediate, KeyPolicy::Unique);

    for round in 0..3 {
        for key in 0..50 {
            tree.add_index(key, value_for(key + round)).expect("insert");
        }
        assert_eq!(check_tree(storage.as_ref(), 1, tree.node_layout()).entries, 50);
        for key in (0..50).rev() {
            assert!(tree.remove_index(&key).expect("remove"));
        }
        assert_eq!(tree.size().expect("size"), 0);
    }
}
