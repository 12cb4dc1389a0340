use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;

use crate::storage::{
    FileHandlerPool, FileIndexStorage, InMemoryHeaderManager, IndexHeaderManager,
    IndexStorageManager, StorageOptions,
};

/// Growth batch used by test storages; small so tests cross batch boundaries.
pub const TEST_GROWTH_NODE_COUNT: usize = 8;

/// Node storage in a temporary directory, removed on drop.
pub struct TestStorage {
    pub dir: TempDir,
    pub header: Arc<dyn IndexHeaderManager>,
    pub file_storage: Arc<FileIndexStorage>,
}

impl TestStorage {
    #[must_use]
    #[allow(clippy::disallowed_methods)] // Arc::clone is required for shared ownership
    pub fn storage(&self) -> Arc<dyn IndexStorageManager> {
        Arc::clone(&self.file_storage) as Arc<dyn IndexStorageManager>
    }

    /// Open a second storage over the same directory and header.
    #[must_use]
    #[allow(clippy::disallowed_methods)] // Arc::clone is required for shared ownership
    pub fn reopen(&self) -> Arc<FileIndexStorage> {
        organized_storage(self.dir.path(), Arc::clone(&self.header))
    }
}

fn test_pool() -> Arc<FileHandlerPool> {
    #[allow(clippy::expect_used)]
    let pool = FileHandlerPool::new(Some(16), 2).expect("Failed to create file pool");
    Arc::new(pool)
}

fn test_options() -> StorageOptions {
    StorageOptions {
        growth_node_allocation_count: TEST_GROWTH_NODE_COUNT,
        ..StorageOptions::default()
    }
}

/// Organized storage in `dir`.
#[must_use]
pub fn organized_storage(dir: &Path, header: Arc<dyn IndexHeaderManager>) -> Arc<FileIndexStorage> {
    #[allow(clippy::expect_used)]
    let storage = FileIndexStorage::organized(dir, header, test_pool(), test_options())
        .expect("Failed to open test storage");
    Arc::new(storage)
}

/// Create organized storage with an in-memory header in a fresh temp dir.
#[must_use]
pub fn new_test_storage() -> TestStorage {
    #[allow(clippy::expect_used)]
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let header: Arc<dyn IndexHeaderManager> = Arc::new(InMemoryHeaderManager::new());
    #[allow(clippy::disallowed_methods)]
    let file_storage = organized_storage(dir.path(), Arc::clone(&header));
    TestStorage {
        dir,
        header,
        file_storage,
    }
}

/// Create compact storage shared by every index, in a fresh temp dir.
#[must_use]
pub fn new_compact_test_storage(name: &str) -> TestStorage {
    #[allow(clippy::expect_used)]
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let header: Arc<dyn IndexHeaderManager> = Arc::new(InMemoryHeaderManager::new());
    #[allow(clippy::disallowed_methods, clippy::expect_used)]
    let file_storage = FileIndexStorage::compact(
        dir.path(),
        name,
        Arc::clone(&header),
        test_pool(),
        test_options(),
    )
    .expect("Failed to open test storage");
    TestStorage {
        dir,
        header,
        file_storage: Arc::new(file_storage),
    }
}
