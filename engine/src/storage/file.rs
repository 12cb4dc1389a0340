//! Chunk-file node storage.
//!
//! Node slots live in chunk files inside one directory. Two layouts share
//! the same allocation and addressing code:
//!
//! - **Organized**: every index owns its files, `index.{index_id}.{chunk}`,
//!   and its region always begins at offset 0.
//! - **Compact**: all indexes share `index.{name}.{chunk}`. A new index
//!   starts at the end of the file; growing an index that is followed by
//!   another region inserts the new batch before that region and moves every
//!   following region forward.
//!
//! # Addressing
//!
//! A pointer's position is relative to the beginning of its index's region
//! in the pointer's chunk. Moving a region only changes the beginning offset
//! in the header, never a stored node.
//!
//! # Locking
//!
//! - `allocator` serializes allocation, growth and purge
//! - `regions` is held exclusively while a region moves or the file grows,
//!   and shared by node reads and writes
//!
//! Lock order is `allocator` then `regions`.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use crate::btree::node::{TYPE_INTERNAL_BIT, TYPE_LEAF_BIT};
use crate::pointer::Pointer;
use crate::storage::allocator::{SlotAllocator, unoccupied_slots};
use crate::storage::header::{IndexHeaderManager, Location};
use crate::storage::io::{IndexStorageManager, NodeData, StorageError};
use crate::storage::pool::{ChannelLease, FileHandlerPool};

/// Prefix of every chunk file name.
pub const INDEX_FILE_PREFIX: &str = "index";

/// Tunables for chunk growth and file access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageOptions {
    /// Slots reserved each time an index grows.
    pub growth_node_allocation_count: usize,
    /// Chunk size at which allocation rolls over to the next chunk.
    pub max_file_size: Option<u64>,
    /// How long to wait for a file handle.
    pub file_acquire_timeout: Duration,
}

impl StorageOptions {
    pub const DEFAULT_GROWTH_NODE_ALLOCATION_COUNT: usize = 50;
    pub const DEFAULT_FILE_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            growth_node_allocation_count: Self::DEFAULT_GROWTH_NODE_ALLOCATION_COUNT,
            max_file_size: None,
            file_acquire_timeout: Self::DEFAULT_FILE_ACQUIRE_TIMEOUT,
        }
    }
}

/// How indexes are laid out across chunk files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageLayout {
    Organized,
    Compact { name: String },
}

/// Node storage over chunk files.
pub struct FileIndexStorage {
    directory: PathBuf,
    layout: StorageLayout,
    header: Arc<dyn IndexHeaderManager>,
    pool: Arc<FileHandlerPool>,
    options: StorageOptions,
    allocator: Mutex<SlotAllocator>,
    regions: RwLock<()>,
}

impl std::fmt::Debug for FileIndexStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileIndexStorage")
            .field("directory", &self.directory)
            .field("layout", &self.layout)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl FileIndexStorage {
    /// One set of chunk files per index.
    pub fn organized(
        directory: &Path,
        header: Arc<dyn IndexHeaderManager>,
        pool: Arc<FileHandlerPool>,
        options: StorageOptions,
    ) -> Result<Self, StorageError> {
        Self::open(directory, StorageLayout::Organized, header, pool, options)
    }

    /// All indexes share the chunk files named after `name`.
    pub fn compact(
        directory: &Path,
        name: &str,
        header: Arc<dyn IndexHeaderManager>,
        pool: Arc<FileHandlerPool>,
        options: StorageOptions,
    ) -> Result<Self, StorageError> {
        let layout = StorageLayout::Compact {
            name: name.to_string(),
        };
        Self::open(directory, layout, header, pool, options)
    }

    fn open(
        directory: &Path,
        layout: StorageLayout,
        header: Arc<dyn IndexHeaderManager>,
        pool: Arc<FileHandlerPool>,
        mut options: StorageOptions,
    ) -> Result<Self, StorageError> {
        std::fs::create_dir_all(directory)?;
        options.growth_node_allocation_count = options.growth_node_allocation_count.max(1);
        tracing::info!(
            "Opened {layout:?} index storage in {}",
            directory.display()
        );

        Ok(Self {
            directory: directory.to_path_buf(),
            layout,
            header,
            pool,
            options,
            allocator: Mutex::new(SlotAllocator::new()),
            regions: RwLock::new(()),
        })
    }

    #[must_use]
    pub const fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// Path of the chunk file holding `index_id`'s nodes in `chunk`.
    #[must_use]
    pub fn file_path(&self, index_id: u32, chunk: u32) -> PathBuf {
        let name = match &self.layout {
            StorageLayout::Organized => format!("{INDEX_FILE_PREFIX}.{index_id}.{chunk}"),
            StorageLayout::Compact { name } => format!("{INDEX_FILE_PREFIX}.{name}.{chunk}"),
        };
        self.directory.join(name)
    }

    fn lock_allocator(&self) -> Result<MutexGuard<'_, SlotAllocator>, StorageError> {
        self.allocator.lock().map_err(|_| StorageError::LockPoisoned)
    }

    fn shared_regions(&self) -> Result<RwLockReadGuard<'_, ()>, StorageError> {
        self.regions.read().map_err(|_| StorageError::LockPoisoned)
    }

    fn exclusive_regions(&self) -> Result<RwLockWriteGuard<'_, ()>, StorageError> {
        self.regions.write().map_err(|_| StorageError::LockPoisoned)
    }

    fn acquire(&self, index_id: u32, chunk: u32) -> Result<ChannelLease<'_>, StorageError> {
        self.pool.acquire(
            &self.file_path(index_id, chunk),
            self.options.file_acquire_timeout,
        )
    }

    fn growth_bytes(&self, slot_size: usize) -> u64 {
        (self.options.growth_node_allocation_count * slot_size) as u64
    }

    /// Beginning of the index's region in the pointer's chunk.
    fn region_beginning(&self, index_id: u32, pointer: Pointer) -> Result<u64, StorageError> {
        if !pointer.is_node() {
            return Err(StorageError::InvalidPointer(pointer));
        }
        self.header
            .get_index_beginning_in_chunk(index_id, pointer.chunk)?
            .map(|location| location.offset)
            .ok_or(StorageError::InvalidPointer(pointer))
    }

    /// End of the index's region: the next region's beginning or end of file.
    fn region_end(
        &self,
        index_id: u32,
        chunk: u32,
        lease: &ChannelLease<'_>,
    ) -> Result<u64, StorageError> {
        match self.next_region(index_id, chunk)? {
            Some(next) => Ok(next.offset),
            None => lease.size(),
        }
    }

    /// Beginning of the region that follows the index's region in `chunk`.
    ///
    /// Organized files hold a single index, so no region ever follows.
    fn next_region(&self, index_id: u32, chunk: u32) -> Result<Option<Location>, StorageError> {
        match self.layout {
            StorageLayout::Organized => Ok(None),
            StorageLayout::Compact { .. } => Ok(self
                .header
                .get_next_index_beginning_in_chunk(index_id, chunk)?),
        }
    }

    fn read_slot(
        &self,
        index_id: u32,
        pointer: Pointer,
        slot_size: usize,
    ) -> Result<Vec<u8>, StorageError> {
        let _regions = self.shared_regions()?;
        let offset = self.region_beginning(index_id, pointer)? + pointer.position;
        let lease = self.acquire(index_id, pointer.chunk)?;
        lease.read(offset, slot_size)
    }

    fn write_slot(&self, index_id: u32, pointer: Pointer, data: Vec<u8>) -> Result<(), StorageError> {
        let _regions = self.shared_regions()?;
        let offset = self.region_beginning(index_id, pointer)? + pointer.position;
        let lease = self.acquire(index_id, pointer.chunk)?;
        lease.write(offset, data)
    }

    /// Find zero-filled slots left behind by an earlier process or a purge,
    /// in every chunk of the index.
    fn scan_unoccupied(&self, index_id: u32, slot_size: usize) -> Result<Vec<Pointer>, StorageError> {
        let chunks = self.header.get_chunks_of_index(index_id)?;
        let slot = slot_size as u64;

        let _regions = self.shared_regions()?;
        let mut found = Vec::new();
        for chunk in chunks {
            let Some(beginning) = self.header.get_index_beginning_in_chunk(index_id, chunk)? else {
                continue;
            };
            let lease = self.acquire(index_id, chunk)?;
            let end = self.region_end(index_id, chunk, &lease)?;
            let region_len = end.saturating_sub(beginning.offset);
            let region_len = region_len - region_len % slot;
            if region_len == 0 {
                continue;
            }

            let len = usize::try_from(region_len)
                .map_err(|_| StorageError::InvalidPointer(Pointer::node(region_len, chunk)))?;
            let bytes = lease.read(beginning.offset, len)?;
            found.extend(
                unoccupied_slots(&bytes, slot_size).map(|offset| Pointer::node(offset as u64, chunk)),
            );
        }

        if !found.is_empty() {
            tracing::debug!(
                "Found {} unoccupied slots for index {index_id}",
                found.len()
            );
        }
        Ok(found)
    }

    /// Reserve a new zero-filled growth batch, rolling over full chunks.
    fn grow(&self, index_id: u32, slot_size: usize) -> Result<Vec<Pointer>, StorageError> {
        let batch = self.growth_bytes(slot_size);
        let mut chunk = self
            .header
            .get_chunks_of_index(index_id)?
            .last()
            .copied()
            .unwrap_or(0);

        loop {
            let _regions = self.exclusive_regions()?;
            let lease = self.acquire(index_id, chunk)?;
            let file_size = lease.size()?;
            let at_limit = file_size > 0
                && self
                    .options
                    .max_file_size
                    .is_some_and(|max| file_size >= max);
            if at_limit {
                tracing::debug!(
                    "Chunk {chunk} is full ({file_size} bytes), index {index_id} rolls over"
                );
                chunk += 1;
                continue;
            }

            let zeros = vec![0u8; self.options.growth_node_allocation_count * slot_size];
            let relative_start = match self.header.get_index_beginning_in_chunk(index_id, chunk)? {
                None => {
                    lease.write(file_size, zeros)?;
                    self.header
                        .set_index_beginning_in_chunk(index_id, Location::new(chunk, file_size))?;
                    tracing::debug!(
                        "Index {index_id} begins in chunk {chunk} at offset {file_size}"
                    );
                    0
                }
                Some(beginning) => {
                    match self.next_region(index_id, chunk)? {
                        None => {
                            lease.write(file_size, zeros)?;
                            file_size - beginning.offset
                        }
                        Some(next) => {
                            let tail_len = usize::try_from(file_size - next.offset).map_err(
                                |_| StorageError::InvalidPointer(Pointer::node(next.offset, chunk)),
                            )?;
                            let tail = lease.read(next.offset, tail_len)?;
                            let mut shifted = zeros;
                            shifted.extend_from_slice(&tail);
                            lease.write(next.offset, shifted)?;
                            self.header
                                .shift_index_beginnings_after(index_id, chunk, batch)?;
                            tracing::debug!(
                                "Shifted regions after index {index_id} in chunk {chunk} by {batch} bytes"
                            );
                            next.offset - beginning.offset
                        }
                    }
                }
            };

            tracing::debug!(
                "Grew index {index_id} in chunk {chunk} by {} slots",
                self.options.growth_node_allocation_count
            );
            let slot = slot_size as u64;
            return Ok((0..self.options.growth_node_allocation_count as u64)
                .map(|i| Pointer::node(relative_start + i * slot, chunk))
                .collect());
        }
    }
}

impl IndexStorageManager for FileIndexStorage {
    fn allocate(&self, index_id: u32, slot_size: usize) -> Result<Pointer, StorageError> {
        let mut allocator = self.lock_allocator()?;
        if let Some(pointer) = allocator.pop_free(index_id) {
            return Ok(pointer);
        }

        if allocator.take_scan(index_id) {
            let found = self.scan_unoccupied(index_id, slot_size)?;
            allocator.queue(index_id, found);
            if let Some(pointer) = allocator.pop_free(index_id) {
                return Ok(pointer);
            }
        }

        let mut batch = self.grow(index_id, slot_size)?.into_iter();
        let first = batch.next().ok_or(StorageError::Closed)?;
        allocator.queue(index_id, batch);
        Ok(first)
    }

    fn get_root(&self, index_id: u32, slot_size: usize) -> Result<Option<NodeData>, StorageError> {
        let Some(root) = self.header.get_root(index_id)? else {
            return Ok(None);
        };
        let pointer = Pointer::node(root.offset, root.chunk);
        let bytes = self.read_slot(index_id, pointer, slot_size)?;
        if bytes[0] & (TYPE_LEAF_BIT | TYPE_INTERNAL_BIT) == 0 {
            return Ok(None);
        }
        Ok(Some(NodeData { pointer, bytes }))
    }

    fn read_node(
        &self,
        index_id: u32,
        pointer: Pointer,
        slot_size: usize,
    ) -> Result<NodeData, StorageError> {
        let bytes = self.read_slot(index_id, pointer, slot_size)?;
        Ok(NodeData { pointer, bytes })
    }

    fn write_new_node(
        &self,
        index_id: u32,
        data: &[u8],
        is_root: bool,
    ) -> Result<NodeData, StorageError> {
        let pointer = self.allocate(index_id, data.len())?;
        self.write_slot(index_id, pointer, data.to_vec())?;
        if is_root {
            self.header
                .set_root(index_id, Location::new(pointer.chunk, pointer.position))?;
        }
        Ok(NodeData {
            pointer,
            bytes: data.to_vec(),
        })
    }

    fn update_node(
        &self,
        index_id: u32,
        pointer: Pointer,
        data: &[u8],
        is_root: bool,
    ) -> Result<(), StorageError> {
        self.lock_allocator()?.take(index_id, pointer);
        self.write_slot(index_id, pointer, data.to_vec())?;
        if is_root {
            self.header
                .set_root(index_id, Location::new(pointer.chunk, pointer.position))?;
        }
        Ok(())
    }

    fn remove_node(
        &self,
        index_id: u32,
        pointer: Pointer,
        slot_size: usize,
    ) -> Result<(), StorageError> {
        self.write_slot(index_id, pointer, vec![0u8; slot_size])?;
        if self.header.get_root(index_id)? == Some(Location::new(pointer.chunk, pointer.position)) {
            self.header.clear_root(index_id)?;
        }
        self.lock_allocator()?.push_free(index_id, pointer);
        Ok(())
    }

    fn purge_index(&self, index_id: u32) -> Result<(), StorageError> {
        let mut allocator = self.lock_allocator()?;
        {
            let _regions = self.exclusive_regions()?;
            for chunk in self.header.get_chunks_of_index(index_id)? {
                let Some(beginning) = self.header.get_index_beginning_in_chunk(index_id, chunk)?
                else {
                    continue;
                };
                let lease = self.acquire(index_id, chunk)?;
                let end = self.region_end(index_id, chunk, &lease)?;
                let len = usize::try_from(end.saturating_sub(beginning.offset))
                    .map_err(|_| StorageError::InvalidPointer(Pointer::node(end, chunk)))?;
                lease.write(beginning.offset, vec![0u8; len])?;
            }
        }
        self.header.clear_root(index_id)?;
        allocator.reset(index_id);
        tracing::info!("Purged index {index_id}");
        Ok(())
    }

    fn close(&self) -> Result<(), StorageError> {
        self.pool.close_all()
    }
}
