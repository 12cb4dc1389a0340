//! Test a tree whose nodes spread over several chunk files.

use std::sync::Arc;

use crate::btree::KeyPolicy;
use crate::e2e_tests::helpers::*;
use crate::index::IndexManager;
use crate::session::SessionStrategy;
use crate::storage::{
    FileHandlerPool, FileIndexStorage, IndexHeaderManager, IndexStorageManager,
    InMemoryHeaderManager, StorageOptions,
};

#[test]
fn test_tree_across_chunks() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let header: Arc<dyn IndexHeaderManager> = Arc::new(InMemoryHeaderManager::new());
    let pool = Arc::new(FileHandlerPool::new(Some(2), 2).expect("Failed to create pool"));
    let options = StorageOptions {
        growth_node_allocation_count: 4,
        max_file_size: Some(2048),
        ..StorageOptions::default()
    };
    #[allow(clippy::disallowed_methods)] // Arc::clone is required for shared ownership
    let storage: Arc<dyn IndexStorageManager> = Arc::new(
        FileIndexStorage::organized(dir.path(), Arc::clone(&header), pool, options)
            .expect("Failed to open storage"),
    );

    #[allow(clippy::disallowed_methods)] // Arc::clone is required for shared ownership
    let tree = open_tree(
        1,
        3,
        Arc::clone(&storage),
        SessionStrategy::MemorySnapshot,
        KeyPolicy::Unique,
    );
    for key in 0..300 {
        tree.add_index(key, value_for(key)).expect("insert");
    }

    let chunks = header.get_chunks_of_index(1).expect("chunks");
    assert!(chunks.len() > 2, "nodes stayed in {chunks:?}");
    assert!(dir.path().join("index.1.1").exists());

    let nodes = reachable_nodes(storage.as_ref(), 1, tree.node_layout());
    assert!(nodes.keys().any(|pointer| pointer.chunk > 0));
    assert_eq!(check_tree(storage.as_ref(), 1, tree.node_layout()).entries, 300);

    for key in (0..300).rev().step_by(2) {
        assert!(tree.remove_index(&key).expect("remove"));
    }
    let keys: Vec<i64> = tree
        .iter()
        .expect("iter")
        .map(|entry| entry.expect("entry").0)
        .collect();
    assert_eq!(keys, (0..300).step_by(2).collect::<Vec<_>>());
}
