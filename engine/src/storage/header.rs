//! Index header: root locations and per-chunk region offsets.
//!
//! The header records, for every index, where its root node lives and at
//! which byte offset its region begins inside each chunk it occupies. The
//! in-memory variant serves tests and throwaway engines; the JSON variant
//! persists after every mutation.
//!
//! # File Format
//!
//! `header.json`, written to `header.json.tmp` and renamed into place:
//!
//! ```json
//! {
//!   "roots": { "1": { "chunk": 0, "offset": 120 } },
//!   "chunks": { "0": [ { "index_id": 1, "offset": 0 } ] }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

/// Header file name inside the engine directory.
pub const HEADER_FILE_NAME: &str = "header.json";

/// Errors from header managers.
#[derive(Debug)]
pub enum HeaderError {
    /// I/O error reading or writing the header file.
    Io(std::io::Error),
    /// The header file is not valid JSON.
    Json(serde_json::Error),
    /// The header lock was poisoned.
    LockPoisoned,
}

impl std::fmt::Display for HeaderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "header I/O error: {e}"),
            Self::Json(e) => write!(f, "header JSON error: {e}"),
            Self::LockPoisoned => write!(f, "header lock poisoned"),
        }
    }
}

impl std::error::Error for HeaderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Json(e) => Some(e),
            Self::LockPoisoned => None,
        }
    }
}

impl From<std::io::Error> for HeaderError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for HeaderError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

/// A byte offset inside a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub chunk: u32,
    pub offset: u64,
}

impl Location {
    #[must_use]
    pub const fn new(chunk: u32, offset: u64) -> Self {
        Self { chunk, offset }
    }
}

/// Where one index's region begins in a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexBeginning {
    pub index_id: u32,
    pub offset: u64,
}

/// Header contents shared by both managers.
///
/// Invariant: each chunk's beginnings are sorted by offset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    roots: BTreeMap<u32, Location>,
    chunks: BTreeMap<u32, Vec<IndexBeginning>>,
}

impl Header {
    fn root(&self, index_id: u32) -> Option<Location> {
        self.roots.get(&index_id).copied()
    }

    fn set_root(&mut self, index_id: u32, location: Location) {
        self.roots.insert(index_id, location);
    }

    fn clear_root(&mut self, index_id: u32) {
        self.roots.remove(&index_id);
    }

    fn beginning(&self, index_id: u32, chunk: u32) -> Option<Location> {
        self.chunks
            .get(&chunk)?
            .iter()
            .find(|b| b.index_id == index_id)
            .map(|b| Location::new(chunk, b.offset))
    }

    fn set_beginning(&mut self, index_id: u32, location: Location) {
        let beginnings = self.chunks.entry(location.chunk).or_default();
        match beginnings.iter_mut().find(|b| b.index_id == index_id) {
            Some(existing) => existing.offset = location.offset,
            None => beginnings.push(IndexBeginning {
                index_id,
                offset: location.offset,
            }),
        }
        beginnings.sort_by_key(|b| b.offset);
    }

    fn next_beginning(&self, index_id: u32, chunk: u32) -> Option<Location> {
        let beginnings = self.chunks.get(&chunk)?;
        let position = beginnings.iter().position(|b| b.index_id == index_id)?;
        beginnings
            .get(position + 1)
            .map(|b| Location::new(chunk, b.offset))
    }

    fn shift_after(&mut self, index_id: u32, chunk: u32, delta: u64) {
        let Some(beginnings) = self.chunks.get_mut(&chunk) else {
            return;
        };
        let Some(position) = beginnings.iter().position(|b| b.index_id == index_id) else {
            return;
        };
        for following in &mut beginnings[position + 1..] {
            following.offset += delta;
        }
    }

    fn indexes_in_chunk(&self, chunk: u32) -> Vec<IndexBeginning> {
        self.chunks.get(&chunk).cloned().unwrap_or_default()
    }

    fn chunks_of_index(&self, index_id: u32) -> Vec<u32> {
        self.chunks
            .iter()
            .filter(|(_, beginnings)| beginnings.iter().any(|b| b.index_id == index_id))
            .map(|(chunk, _)| *chunk)
            .collect()
    }
}

/// Durable map of index roots and region beginnings.
pub trait IndexHeaderManager: Send + Sync {
    fn get_root(&self, index_id: u32) -> Result<Option<Location>, HeaderError>;

    fn set_root(&self, index_id: u32, location: Location) -> Result<(), HeaderError>;

    fn clear_root(&self, index_id: u32) -> Result<(), HeaderError>;

    fn get_index_beginning_in_chunk(
        &self,
        index_id: u32,
        chunk: u32,
    ) -> Result<Option<Location>, HeaderError>;

    fn set_index_beginning_in_chunk(
        &self,
        index_id: u32,
        location: Location,
    ) -> Result<(), HeaderError>;

    /// Beginning of the region that directly follows `index_id` in `chunk`.
    fn get_next_index_beginning_in_chunk(
        &self,
        index_id: u32,
        chunk: u32,
    ) -> Result<Option<Location>, HeaderError>;

    /// Move every region after `index_id` in `chunk` forward by `delta` bytes.
    fn shift_index_beginnings_after(
        &self,
        index_id: u32,
        chunk: u32,
        delta: u64,
    ) -> Result<(), HeaderError>;

    /// Regions in `chunk`, ordered by offset.
    fn get_indexes_in_chunk(&self, chunk: u32) -> Result<Vec<IndexBeginning>, HeaderError>;

    /// Chunks holding a region of `index_id`, ascending.
    fn get_chunks_of_index(&self, index_id: u32) -> Result<Vec<u32>, HeaderError>;
}

fn lock(header: &Mutex<Header>) -> Result<MutexGuard<'_, Header>, HeaderError> {
    header.lock().map_err(|_| HeaderError::LockPoisoned)
}

/// Header kept only in memory.
#[derive(Debug, Default)]
pub struct InMemoryHeaderManager {
    header: Mutex<Header>,
}

impl InMemoryHeaderManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl IndexHeaderManager for InMemoryHeaderManager {
    fn get_root(&self, index_id: u32) -> Result<Option<Location>, HeaderError> {
        Ok(lock(&self.header)?.root(index_id))
    }

    fn set_root(&self, index_id: u32, location: Location) -> Result<(), HeaderError> {
        lock(&self.header)?.set_root(index_id, location);
        Ok(())
    }

    fn clear_root(&self, index_id: u32) -> Result<(), HeaderError> {
        lock(&self.header)?.clear_root(index_id);
        Ok(())
    }

    fn get_index_beginning_in_chunk(
        &self,
        index_id: u32,
        chunk: u32,
    ) -> Result<Option<Location>, HeaderError> {
        Ok(lock(&self.header)?.beginning(index_id, chunk))
    }

    fn set_index_beginning_in_chunk(
        &self,
        index_id: u32,
        location: Location,
    ) -> Result<(), HeaderError> {
        lock(&self.header)?.set_beginning(index_id, location);
        Ok(())
    }

    fn get_next_index_beginning_in_chunk(
        &self,
        index_id: u32,
        chunk: u32,
    ) -> Result<Option<Location>, HeaderError> {
        Ok(lock(&self.header)?.next_beginning(index_id, chunk))
    }

    fn shift_index_beginnings_after(
        &self,
        index_id: u32,
        chunk: u32,
        delta: u64,
    ) -> Result<(), HeaderError> {
        lock(&self.header)?.shift_after(index_id, chunk, delta);
        Ok(())
    }

    fn get_indexes_in_chunk(&self, chunk: u32) -> Result<Vec<IndexBeginning>, HeaderError> {
        Ok(lock(&self.header)?.indexes_in_chunk(chunk))
    }

    fn get_chunks_of_index(&self, index_id: u32) -> Result<Vec<u32>, HeaderError> {
        Ok(lock(&self.header)?.chunks_of_index(index_id))
    }
}

/// Header persisted as JSON after every change.
#[derive(Debug)]
pub struct JsonHeaderManager {
    path: PathBuf,
    header: Mutex<Header>,
}

impl JsonHeaderManager {
    /// Open `header.json` in `directory`, starting empty if it does not exist.
    pub fn open(directory: &Path) -> Result<Self, HeaderError> {
        let path = directory.join(HEADER_FILE_NAME);
        let header = match std::fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => Header::default(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Header::default(),
            Err(e) => return Err(e.into()),
        };
        tracing::info!("Opened index header {}", path.display());

        Ok(Self {
            path,
            header: Mutex::new(header),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply a mutation and persist the result while still holding the lock.
    fn update(&self, mutate: impl FnOnce(&mut Header)) -> Result<(), HeaderError> {
        let mut header = lock(&self.header)?;
        let before = header.clone();
        mutate(&mut header);
        if *header == before {
            return Ok(());
        }
        if let Err(e) = self.persist(&header) {
            *header = before;
            return Err(e);
        }
        Ok(())
    }

    fn persist(&self, header: &Header) -> Result<(), HeaderError> {
        let bytes = serde_json::to_vec_pretty(header)?;
        let temp = self.path.with_extension("json.tmp");
        std::fs::write(&temp, bytes)?;
        std::fs::rename(&temp, &self.path)?;
        Ok(())
    }
}

impl IndexHeaderManager for JsonHeaderManager {
    fn get_root(&self, index_id: u32) -> Result<Option<Location>, HeaderError> {
        Ok(lock(&self.header)?.root(index_id))
    }

    fn set_root(&self, index_id: u32, location: Location) -> Result<(), HeaderError> {
        self.update(|h| h.set_root(index_id, location))
    }

    fn clear_root(&self, index_id: u32) -> Result<(), HeaderError> {
        self.update(|h| h.clear_root(index_id))
    }

    fn get_index_beginning_in_chunk(
        &self,
        index_id: u32,
        chunk: u32,
    ) -> Result<Option<Location>, HeaderError> {
        Ok(lock(&self.header)?.beginning(index_id, chunk))
    }

    fn set_index_beginning_in_chunk(
        &self,
        index_id: u32,
        location: Location,
    ) -> Result<(), HeaderError> {
        self.update(|h| h.set_beginning(index_id, location))
    }

    fn get_next_index_beginning_in_chunk(
        &self,
        index_id: u32,
        chunk: u32,
    ) -> Result<Option<Location>, HeaderError> {
        Ok(lock(&self.header)?.next_beginning(index_id, chunk))
    }

    fn shift_index_beginnings_after(
        &self,
        index_id: u32,
        chunk: u32,
        delta: u64,
    ) -> Result<(), HeaderError> {
        self.update(|h| h.shift_after(index_id, chunk, delta))
    }

    fn get_indexes_in_chunk(&self, chunk: u32) -> Result<Vec<IndexBeginning>, HeaderError> {
        Ok(lock(&self.header)?.indexes_in_chunk(chunk))
    }

    fn get_chunks_of_index(&self, index_id: u32) -> Result<Vec<u32>, HeaderError> {
        Ok(lock(&self.header)?.chunks_of_index(index_id))
    }
}
