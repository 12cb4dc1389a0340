//! Test the sibling links between leaves.

use crate::btree::KeyPolicy;
use crate::e2e_tests::helpers::*;
use crate::index::{IndexManager, Order};
use crate::session::SessionStrategy;
use crate::testing::new_test_storage;

#[test]
fn test_leaves_chain_in_key_order() {
    let test = new_test_storage();
    let storage = test.storage();
    let tree = open_tree(1, 4, test.storage(), SessionStrategy::Immediate, KeyPolicy::Unique);

    for key in (1..=64).rev() {
        tree.add_index(key, value_for(key)).expect("insert");
    }

    let chain = leaf_chain(storage.as_ref(), 1, tree.node_layout());
    assert!(chain.len() > 1);
    let flattened: Vec<i64> = chain.iter().flatten().copied().collect();
    assert_eq!(flattened, (1..=64).collect::<Vec<_>>());

    // Ranges of consecutive leaves do not overlap.
    for pair in chain.windows(2) {
        let (Some(last), Some(first)) = (pair[0].last(), pair[1].first()) else {
            panic!("empty leaf in chain");
        };
        assert!(last < first);
    }
}

#[test]
fn test_chain_survives_mixed_operations() {
    let test = new_test_storage();
    let storage = test.storage();
    let tree = open_tree(1, 5, test.storage(), SessionStrategy::MemorySnapshot, KeyPolicy::Unique);

    for key in 0..200 {
        tree.add_index(key * 3 % 200, value_for(key)).expect("insert");
    }
    for key in (0..200).filter(|k| k % 5 != 0) {
        assert!(tree.remove_index(&key).expect("remove"));
    }
    for key in 200..230 {
        tree.add_index(key, value_for(key)).expect("insert");
    }

    let expected: Vec<i64> = (0..200).filter(|k| k % 5 == 0).chain(200..230).collect();
    let chain: Vec<i64> = leaf_chain(storage.as_ref(), 1, tree.node_layout())
        .into_iter()
        .flatten()
        .collect();
    assert_eq!(chain, expected);

    let iterated: Vec<i64> = tree
        .iter()
        .expect("iter")
        .map(|entry| entry.expect("entry").0)
        .collect();
    assert_eq!(iterated, expected);
}

#[test]
fn test_descending_walk_follows_previous_links() {
    let test = new_test_storage();
    let tree = open_tree(1, 4, test.storage(), SessionStrategy::MemorySnapshot, KeyPolicy::Unique);

    for key in 0..150 {
        tree.add_index(key * 7 % 150, value_for(key)).expect("insert");
    }
    for key in (0..150).filter(|k| k % 3 == 0) {
        assert!(tree.remove_index(&key).expect("remove"));
    }
    for key in -20..0 {
        tree.add_index(key, value_for(key)).expect("insert");
    }

    let ascending: Vec<(i64, _)> = tree
        .iter()
        .expect("iter")
        .map(|entry| entry.expect("entry"))
        .collect();
    let mut descending: Vec<(i64, _)> = tree
        .sorted_iter(Order::Descending)
        .expect("iter")
        .map(|entry| entry.expect("entry"))
        .collect();
    assert_eq!(descending.first().map(|e| e.0), Some(149));
    assert_eq!(descending.last().map(|e| e.0), Some(-20));

    descending.reverse();
    assert_eq!(descending, ascending);
}
