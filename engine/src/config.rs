//! Engine configuration module.
//!
//! This module provides configuration loading for the index engine from
//! environment variables.
//!
//! # Environment Variables
//!
//! - `INDEX_ENGINE_DIRECTORY`: Directory for chunk files and the header (default: `./data`)
//! - `INDEX_ENGINE_BTREE_DEGREE`: Tree degree, at least 3 (default: `4`)
//! - `INDEX_ENGINE_GROWTH_NODE_COUNT`: Slots reserved per file growth (default: `50`)
//! - `INDEX_ENGINE_MAX_FILE_SIZE`: Chunk size in bytes before rolling over (default: unlimited)
//! - `INDEX_ENGINE_FILE_ACQUIRE_TIMEOUT_MS`: File handle wait in milliseconds (default: `10000`)
//! - `INDEX_ENGINE_MAX_OPEN_FILES`: Open file limit (default: unlimited)
//! - `INDEX_ENGINE_IO_THREADS`: I/O worker threads (default: `4`)
//! - `INDEX_ENGINE_SESSION`: `immediate` or `memory-snapshot` (default: `immediate`)
//! - `INDEX_ENGINE_LAYOUT`: `organized` or `compact` (default: `organized`)
//! - `INDEX_ENGINE_COMPACT_NAME`: File name stem of the compact layout (default: `indexes`)
//! - `INDEX_ENGINE_CACHE_SIZE`: LRU cache entries per unique index, 0 disables (default: `0`)
//!
//! # Invariants
//!
//! - `degree` is always at least [`MIN_DEGREE`]
//! - `growth_node_count` and `io_threads` are always at least 1

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::btree::node::MIN_DEGREE;
use crate::session::SessionStrategy;
use crate::storage::{
    FileHandlerPool, FileIndexStorage, JsonHeaderManager, StorageError, StorageLayout,
    StorageOptions,
};

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Directory holding chunk files and `header.json`.
    pub directory: PathBuf,
    pub degree: usize,
    pub growth_node_count: usize,
    pub max_file_size: Option<u64>,
    pub file_acquire_timeout: Duration,
    pub max_open_files: Option<usize>,
    pub io_threads: usize,
    pub session: SessionStrategy,
    pub layout: StorageLayout,
    /// Cache capacity per unique index; 0 disables caching.
    pub cache_size: usize,
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(Self::DEFAULT_DIRECTORY),
            degree: Self::DEFAULT_DEGREE,
            growth_node_count: StorageOptions::DEFAULT_GROWTH_NODE_ALLOCATION_COUNT,
            max_file_size: None,
            file_acquire_timeout: StorageOptions::DEFAULT_FILE_ACQUIRE_TIMEOUT,
            max_open_files: None,
            io_threads: Self::DEFAULT_IO_THREADS,
            session: SessionStrategy::Immediate,
            layout: StorageLayout::Organized,
            cache_size: 0,
        }
    }
}

impl EngineConfig {
    /// Default data directory.
    pub const DEFAULT_DIRECTORY: &'static str = "./data";
    /// Default tree degree.
    pub const DEFAULT_DEGREE: usize = 4;
    /// Default number of I/O worker threads.
    pub const DEFAULT_IO_THREADS: usize = 4;
    /// Default file name stem for the compact layout.
    pub const DEFAULT_COMPACT_NAME: &'static str = "indexes";

    /// Load configuration from environment variables.
    ///
    /// Unset variables take their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from any variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let directory = lookup("INDEX_ENGINE_DIRECTORY")
            .map_or_else(|| PathBuf::from(Self::DEFAULT_DIRECTORY), PathBuf::from);
        let degree = Self::load_at_least(&lookup, "INDEX_ENGINE_BTREE_DEGREE", MIN_DEGREE)?
            .unwrap_or(Self::DEFAULT_DEGREE);
        let growth_node_count = Self::load_at_least(&lookup, "INDEX_ENGINE_GROWTH_NODE_COUNT", 1)?
            .unwrap_or(StorageOptions::DEFAULT_GROWTH_NODE_ALLOCATION_COUNT);
        let max_file_size = Self::load_parsed::<u64>(&lookup, "INDEX_ENGINE_MAX_FILE_SIZE")?;
        let file_acquire_timeout =
            Self::load_parsed::<u64>(&lookup, "INDEX_ENGINE_FILE_ACQUIRE_TIMEOUT_MS")?
                .map_or(StorageOptions::DEFAULT_FILE_ACQUIRE_TIMEOUT, Duration::from_millis);
        let max_open_files = Self::load_at_least(&lookup, "INDEX_ENGINE_MAX_OPEN_FILES", 1)?;
        let io_threads = Self::load_at_least(&lookup, "INDEX_ENGINE_IO_THREADS", 1)?
            .unwrap_or(Self::DEFAULT_IO_THREADS);
        let session = Self::load_parsed::<SessionStrategy>(&lookup, "INDEX_ENGINE_SESSION")?
            .unwrap_or_default();
        let layout = Self::load_layout(&lookup)?;
        let cache_size = Self::load_parsed::<usize>(&lookup, "INDEX_ENGINE_CACHE_SIZE")?
            .unwrap_or(0);

        Ok(Self {
            directory,
            degree,
            growth_node_count,
            max_file_size,
            file_acquire_timeout,
            max_open_files,
            io_threads,
            session,
            layout,
            cache_size,
        })
    }

    /// Parse a variable if it is set.
    fn load_parsed<T>(
        lookup: &impl Fn(&str) -> Option<String>,
        name: &str,
    ) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        lookup(name)
            .map(|value| {
                value.trim().parse::<T>().map_err(|e| ConfigError::InvalidValue {
                    name: name.to_string(),
                    message: format!("'{value}': {e}"),
                })
            })
            .transpose()
    }

    /// Parse a number that must be at least `min` if it is set.
    fn load_at_least(
        lookup: &impl Fn(&str) -> Option<String>,
        name: &str,
        min: usize,
    ) -> Result<Option<usize>, ConfigError> {
        match Self::load_parsed::<usize>(lookup, name)? {
            Some(value) if value < min => Err(ConfigError::InvalidValue {
                name: name.to_string(),
                message: format!("{value} is below the minimum of {min}"),
            }),
            other => Ok(other),
        }
    }

    fn load_layout(lookup: &impl Fn(&str) -> Option<String>) -> Result<StorageLayout, ConfigError> {
        match lookup("INDEX_ENGINE_LAYOUT").as_deref().map(str::trim) {
            None | Some("organized") => Ok(StorageLayout::Organized),
            Some("compact") => {
                let name = lookup("INDEX_ENGINE_COMPACT_NAME")
                    .unwrap_or_else(|| Self::DEFAULT_COMPACT_NAME.to_string());
                if name.is_empty() || name.contains(['/', '\\', '.']) {
                    return Err(ConfigError::InvalidValue {
                        name: "INDEX_ENGINE_COMPACT_NAME".to_string(),
                        message: format!("'{name}' is not a valid file name stem"),
                    });
                }
                Ok(StorageLayout::Compact { name })
            }
            Some(other) => Err(ConfigError::InvalidValue {
                name: "INDEX_ENGINE_LAYOUT".to_string(),
                message: format!("'{other}' is not 'organized' or 'compact'"),
            }),
        }
    }

    /// Storage tuning derived from this configuration.
    #[must_use]
    pub const fn storage_options(&self) -> StorageOptions {
        StorageOptions {
            growth_node_allocation_count: self.growth_node_count,
            max_file_size: self.max_file_size,
            file_acquire_timeout: self.file_acquire_timeout,
        }
    }

    /// Open the configured storage: header file, file pool and chunk files.
    pub fn open_storage(&self) -> Result<FileIndexStorage, StorageError> {
        std::fs::create_dir_all(&self.directory)?;
        let header = Arc::new(JsonHeaderManager::open(&self.directory)?);
        let pool = Arc::new(FileHandlerPool::new(self.max_open_files, self.io_threads)?);
        match &self.layout {
            StorageLayout::Organized => FileIndexStorage::organized(
                &self.directory,
                header,
                pool,
                self.storage_options(),
            ),
            StorageLayout::Compact { name } => FileIndexStorage::compact(
                &self.directory,
                name,
                header,
                pool,
                self.storage_options(),
            ),
        }
    }
}
