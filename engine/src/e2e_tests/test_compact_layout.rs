//! Test several indexes sharing the chunk files of the compact layout.

use crate::btree::KeyPolicy;
use crate::e2e_tests::helpers::*;
use crate::index::IndexManager;
use crate::session::SessionStrategy;
use crate::storage::IndexHeaderManager;
use crate::testing::new_compact_test_storage;

#[test]
fn test_interleaved_indexes_in_one_file() {
    let test = new_compact_test_storage("shared");
    let storage = test.storage();
    let trees: Vec<Tree> = (1..=3)
        .map(|id| {
            let strategy = if id == 2 {
                SessionStrategy::MemorySnapshot
            } else {
                SessionStrategy::Immediate
            };
            open_tree(id, 4, test.storage(), strategy, KeyPolicy::Unique)
        })
        .collect();

    // Interleaving forces every region to grow while others follow it.
    for key in 0..120 {
        for (offset, tree) in (0_i64..).zip(&trees) {
            tree.add_index(key, value_for(key * 10 + offset)).expect("insert");
        }
    }

    for (offset, tree) in (0_i64..).zip(&trees) {
        let shape = check_tree(storage.as_ref(), tree.index_id(), tree.node_layout());
        assert_eq!(shape.entries, 120);
        for key in 0..120 {
            assert_eq!(
                tree.get_index(&key).expect("get"),
                Some(value_for(key * 10 + offset)),
                "index {} key {key}",
                tree.index_id()
            );
        }
    }

    assert!(test.dir.path().join("index.shared.0").exists());
    assert!(!test.dir.path().join("index.1.0").exists());
    let indexes = test.header.get_indexes_in_chunk(0).expect("indexes");
    assert_eq!(indexes.len(), 3);
    assert!(indexes.windows(2).all(|pair| pair[0].offset < pair[1].offset));
}

#[test]
fn test_removing_from_one_index_leaves_others() {
    let test = new_compact_test_storage("shared");
    let storage = test.storage();
    let first = open_tree(1, 3, test.storage(), SessionStrategy::Immediate, KeyPolicy::Unique);
    let second = open_tree(2, 3, test.storage(), SessionStrategy::Immediate, KeyPolicy::Unique);

    for key in 0..80 {
        first.add_index(key, value_for(key)).expect("insert");
        second.add_index(key, value_for(key)).expect("insert");
    }
    for key in 0..80 {
        assert!(first.remove_index(&key).expect("remove"));
    }
    // Freed slots are reused before the region grows again.
    for key in 100..140 {
        first.add_index(key, value_for(key)).expect("insert");
    }

    assert_eq!(first.size().expect("size"), 40);
    assert_eq!(second.size().expect("size"), 80);
    assert_eq!(check_tree(storage.as_ref(), 2, second.node_layout()).entries, 80);

    first.purge().expect("purge");
    assert_eq!(first.size().expect("size"), 0);
    assert_eq!(second.get_index(&79).expect("get"), Some(value_for(79)));
}
