//! Test point lookups after inserts that split leaves and internal nodes.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::btree::KeyPolicy;
use crate::e2e_tests::helpers::*;
use crate::index::IndexManager;
use crate::pointer::Pointer;
use crate::session::SessionStrategy;
use crate::testing::new_test_storage;

#[test]
fn test_degree_four_twelve_keys() {
    let test = new_test_storage();
    let tree = open_tree(1, 4, test.storage(), SessionStrategy::Immediate, KeyPolicy::Unique);

    for key in 1..=12 {
        tree.add_index(key, Pointer::data(0, 0)).expect("insert");
    }

    assert_eq!(tree.get_index(&11).expect("search"), Some(Pointer::data(0, 0)));
    assert_eq!(tree.get_index(&13).expect("search"), None);
    assert_eq!(tree.get_index(&0).expect("search"), None);

    let shape = check_tree(test.storage().as_ref(), 1, tree.node_layout());
    assert_eq!(shape.entries, 12);
    assert!(shape.height >= 2);
}

#[test]
fn test_random_order_inserts() {
    for (degree, strategy) in [
        (3, SessionStrategy::Immediate),
        (5, SessionStrategy::MemorySnapshot),
        (16, SessionStrategy::Immediate),
    ] {
        let test = new_test_storage();
        let tree = open_tree(1, degree, test.storage(), strategy, KeyPolicy::Unique);

        let mut keys: Vec<i64> = (-250..250).collect();
        keys.shuffle(&mut StdRng::seed_from_u64(99));
        for key in &keys {
            tree.add_index(*key, value_for(*key)).expect("insert");
        }

        for key in &keys {
            assert_eq!(
                tree.get_index(key).expect("search"),
                Some(value_for(*key)),
                "degree {degree} key {key}"
            );
        }
        let shape = check_tree(test.storage().as_ref(), 1, tree.node_layout());
        assert_eq!(shape.entries, keys.len());
        assert_eq!(tree.size().expect("size"), keys.len());
    }
}

#[test]
fn test_last_write_wins() {
    let test = new_test_storage();
    let tree = open_tree(1, 4, test.storage(), SessionStrategy::Immediate, KeyPolicy::Unique);

    for key in 1..=30 {
        tree.add_index(key, value_for(key)).expect("insert");
    }
    for key in (1..=30).step_by(2) {
        assert!(tree.update_index(&key, Pointer::data(1000, 1)).expect("update"));
    }
    assert!(!tree.update_index(&31, Pointer::data(1000, 1)).expect("update missing"));

    for key in 1..=30 {
        let expected = if key % 2 == 1 {
            Pointer::data(1000, 1)
        } else {
            value_for(key)
        };
        assert_eq!(tree.get_index(&key).expect("search"), Some(expected));
    }
}
