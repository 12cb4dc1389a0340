//! Bounded pool of open chunk files.
//!
//! Files are opened on first acquire and shared by every concurrent user of
//! the same path. A lease returns its handle automatically via RAII (Drop on
//! [`ChannelLease`]); idle handles stay open until the pool needs room.
//!
//! # Design
//!
//! - `max_open_files = None` never evicts; otherwise the least recently used
//!   idle handle is closed to make room
//! - When every handle is busy, `acquire` waits on a condition variable up to
//!   the caller's timeout
//! - Reads and writes run on a dedicated blocking-I/O runtime and complete
//!   through an [`IoFuture`]; callers block on it with [`wait`]
//!
//! # Invariants
//!
//! - `handles.len() <= max_open_files` when a limit is set
//! - A handle with `users > 0` is never evicted

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::runtime::{Handle, Runtime};
use tokio::task::JoinHandle;

use crate::storage::io::StorageError;

/// Completion of one positional I/O operation.
pub type IoFuture<T> = JoinHandle<Result<T, StorageError>>;

/// Block until an I/O operation completes.
pub fn wait<T>(future: IoFuture<T>) -> Result<T, StorageError> {
    futures::executor::block_on(future).map_err(|e| StorageError::Worker(e.to_string()))?
}

#[cfg(unix)]
fn read_at_position(file: &File, buf: &mut [u8], position: u64) -> std::io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, position)
}

#[cfg(windows)]
fn read_at_position(file: &File, buf: &mut [u8], position: u64) -> std::io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, position)
}

#[cfg(unix)]
fn write_at_position(file: &File, buf: &[u8], position: u64) -> std::io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.write_at(buf, position)
}

#[cfg(windows)]
fn write_at_position(file: &File, buf: &[u8], position: u64) -> std::io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_write(buf, position)
}

/// Positional I/O on one open file.
#[derive(Debug, Clone)]
pub struct FileChannel {
    file: Arc<File>,
    io: Handle,
}

impl FileChannel {
    /// Read exactly `len` bytes at `position`.
    #[allow(clippy::disallowed_methods)] // Arc::clone moves the file into the worker
    pub fn read_at(&self, position: u64, len: usize) -> IoFuture<Vec<u8>> {
        let file = Arc::clone(&self.file);
        self.io.spawn_blocking(move || {
            let mut buf = vec![0u8; len];
            let mut filled = 0;
            while filled < len {
                match read_at_position(&file, &mut buf[filled..], position + filled as u64) {
                    Ok(0) => break,
                    Ok(n) => filled += n,
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                    Err(e) => return Err(StorageError::Io(e)),
                }
            }
            if filled < len {
                return Err(StorageError::ShortRead {
                    expected: len,
                    actual: filled,
                });
            }
            Ok(buf)
        })
    }

    /// Write all of `bytes` at `position`.
    #[allow(clippy::disallowed_methods)] // Arc::clone moves the file into the worker
    pub fn write_at(&self, position: u64, bytes: Vec<u8>) -> IoFuture<()> {
        let file = Arc::clone(&self.file);
        self.io.spawn_blocking(move || {
            let mut written = 0;
            while written < bytes.len() {
                match write_at_position(&file, &bytes[written..], position + written as u64) {
                    Ok(0) => break,
                    Ok(n) => written += n,
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                    Err(e) => return Err(StorageError::Io(e)),
                }
            }
            if written < bytes.len() {
                return Err(StorageError::ShortWrite {
                    expected: bytes.len(),
                    actual: written,
                });
            }
            Ok(())
        })
    }

    /// Current file length.
    #[allow(clippy::disallowed_methods)] // Arc::clone moves the file into the worker
    pub fn size(&self) -> IoFuture<u64> {
        let file = Arc::clone(&self.file);
        self.io
            .spawn_blocking(move || Ok(file.metadata().map_err(StorageError::Io)?.len()))
    }

    /// Flush file contents to disk.
    #[allow(clippy::disallowed_methods)] // Arc::clone moves the file into the worker
    pub fn sync(&self) -> IoFuture<()> {
        let file = Arc::clone(&self.file);
        self.io
            .spawn_blocking(move || file.sync_data().map_err(StorageError::Io))
    }
}

struct PooledHandle {
    file: Arc<File>,
    users: usize,
    last_used: u64,
}

#[derive(Default)]
struct PoolState {
    handles: HashMap<PathBuf, PooledHandle>,
    clock: u64,
    closed: bool,
}

impl PoolState {
    fn least_recently_used_idle(&self) -> Option<PathBuf> {
        self.handles
            .iter()
            .filter(|(_, handle)| handle.users == 0)
            .min_by_key(|(_, handle)| handle.last_used)
            .map(|(path, _)| path.clone())
    }
}

/// A pool of open chunk files.
pub struct FileHandlerPool {
    state: Mutex<PoolState>,
    released: Condvar,
    max_open_files: Option<usize>,
    runtime: Mutex<Option<Runtime>>,
    io: Handle,
}

impl std::fmt::Debug for FileHandlerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileHandlerPool")
            .field("max_open_files", &self.max_open_files)
            .field("open_files", &self.open_files())
            .finish_non_exhaustive()
    }
}

impl FileHandlerPool {
    /// Create a pool whose I/O runs on `io_threads` blocking workers.
    pub fn new(max_open_files: Option<usize>, io_threads: usize) -> Result<Self, StorageError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(io_threads.max(1))
            .thread_name("index-io")
            .build()?;
        let io = runtime.handle().clone();

        Ok(Self {
            state: Mutex::new(PoolState::default()),
            released: Condvar::new(),
            max_open_files: max_open_files.map(|max| max.max(1)),
            runtime: Mutex::new(Some(runtime)),
            io,
        })
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, PoolState>, StorageError> {
        self.state.lock().map_err(|_| StorageError::LockPoisoned)
    }

    /// Lease the file at `path`, opening it if needed.
    ///
    /// Fails with [`StorageError::PoolTimeout`] if the pool is full of busy
    /// handles for longer than `timeout`.
    pub fn acquire(&self, path: &Path, timeout: Duration) -> Result<ChannelLease<'_>, StorageError> {
        let started = Instant::now();
        let mut state = self.lock_state()?;

        loop {
            if state.closed {
                return Err(StorageError::Closed);
            }
            state.clock += 1;
            let now = state.clock;

            if let Some(handle) = state.handles.get_mut(path) {
                handle.users += 1;
                handle.last_used = now;
                return Ok(self.lease(path, &handle.file));
            }

            let full = self
                .max_open_files
                .is_some_and(|max| state.handles.len() >= max);
            if !full {
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(false)
                    .open(path)?;
                let file = Arc::new(file);
                let lease = self.lease(path, &file);
                state.handles.insert(
                    path.to_path_buf(),
                    PooledHandle {
                        file,
                        users: 1,
                        last_used: now,
                    },
                );
                return Ok(lease);
            }

            if let Some(idle) = state.least_recently_used_idle() {
                tracing::debug!("Closing idle file handle {}", idle.display());
                state.handles.remove(&idle);
                continue;
            }

            let waited = started.elapsed();
            if waited >= timeout {
                tracing::warn!(
                    "Timed out waiting for a file handle to {} after {}ms",
                    path.display(),
                    waited.as_millis()
                );
                return Err(StorageError::PoolTimeout {
                    path: path.to_path_buf(),
                    waited,
                });
            }
            let (guard, _) = self
                .released
                .wait_timeout(state, timeout - waited)
                .map_err(|_| StorageError::LockPoisoned)?;
            state = guard;
        }
    }

    #[allow(clippy::disallowed_methods)] // Arc::clone shares the open file with the lease
    fn lease(&self, path: &Path, file: &Arc<File>) -> ChannelLease<'_> {
        ChannelLease {
            pool: self,
            path: path.to_path_buf(),
            channel: FileChannel {
                file: Arc::clone(file),
                io: self.io.clone(),
            },
        }
    }

    fn release(&self, path: &Path) {
        // A poisoned pool cannot hand out handles anymore, so there is nothing to release.
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if let Some(handle) = state.handles.get_mut(path) {
            handle.users = handle.users.saturating_sub(1);
        }
        drop(state);
        self.released.notify_all();
    }

    /// Number of currently open files.
    #[must_use]
    pub fn open_files(&self) -> usize {
        self.state.lock().map_or(0, |state| state.handles.len())
    }

    /// Close every idle handle and stop the I/O workers.
    ///
    /// Leases still held keep their files open until dropped; any further
    /// acquire fails with [`StorageError::Closed`].
    pub fn close_all(&self) -> Result<(), StorageError> {
        let mut state = self.lock_state()?;
        state.closed = true;
        state.handles.retain(|_, handle| handle.users > 0);
        drop(state);
        self.released.notify_all();

        let runtime = self
            .runtime
            .lock()
            .map_err(|_| StorageError::LockPoisoned)?
            .take();
        if let Some(runtime) = runtime {
            runtime.shutdown_background();
        }
        Ok(())
    }
}

impl Drop for FileHandlerPool {
    fn drop(&mut self) {
        // Dropping a runtime from inside another runtime's context panics.
        if let Ok(mut runtime) = self.runtime.lock() {
            if let Some(runtime) = runtime.take() {
                runtime.shutdown_background();
            }
        }
    }
}

/// A leased file; released back to the pool when dropped.
pub struct ChannelLease<'a> {
    pool: &'a FileHandlerPool,
    path: PathBuf,
    channel: FileChannel,
}

impl ChannelLease<'_> {
    #[must_use]
    pub const fn channel(&self) -> &FileChannel {
        &self.channel
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self, position: u64, len: usize) -> Result<Vec<u8>, StorageError> {
        wait(self.channel.read_at(position, len))
    }

    pub fn write(&self, position: u64, bytes: Vec<u8>) -> Result<(), StorageError> {
        wait(self.channel.write_at(position, bytes))
    }

    pub fn size(&self) -> Result<u64, StorageError> {
        wait(self.channel.size())
    }
}

impl Drop for ChannelLease<'_> {
    fn drop(&mut self) {
        self.pool.release(&self.path);
    }
}
