#![cfg_attr(test, allow(clippy::disallowed_methods))]
// Forbid unwrap() in production code to prevent panics from corrupt data.
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
use std::num::NonZeroUsize;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};

use index_engine::index::IndexLockRegistry;
use index_engine::storage::IndexStorageManager;
use index_engine::{
    BPlusTreeIndexManager, CachedIndexManager, EngineConfig, IndexError, IndexManager, KeyPolicy,
    LockedIndexManager, Order, Pointer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Inspect and edit one index of the engine.
///
/// Storage settings come from `INDEX_ENGINE_*` variables.
#[derive(Parser, Debug)]
#[command(name = "index-engine", version, about = "B+Tree index engine over chunk files")]
struct Cli {
    /// Id of the index to work on.
    #[arg(value_name = "INDEX_ID")]
    index_id: u32,

    #[command(subcommand)]
    command: Command,
}

/// One CLI action on an index.
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Store a data pointer under a key.
    Insert {
        #[arg(allow_negative_numbers = true)]
        key: i64,
        #[command(flatten)]
        location: Location,
    },
    /// Print the pointer stored under a key.
    Get {
        #[arg(allow_negative_numbers = true)]
        key: i64,
    },
    /// Replace the pointer stored under a key.
    Update {
        #[arg(allow_negative_numbers = true)]
        key: i64,
        #[command(flatten)]
        location: Location,
    },
    /// Remove a key.
    Remove {
        #[arg(allow_negative_numbers = true)]
        key: i64,
    },
    /// Print the number of entries.
    Size,
    /// Print every entry in key order.
    List {
        #[arg(long, help = "Walk from the largest key down")]
        descending: bool,
    },
    /// Remove every entry of the index.
    Purge,
}

/// Where a data pointer points.
#[derive(Args, Debug, Clone, Copy, PartialEq, Eq)]
struct Location {
    /// Byte position of the record.
    position: u64,

    /// Chunk holding the record.
    #[arg(default_value_t = 0)]
    chunk: u32,
}

impl Location {
    const fn pointer(self) -> Pointer {
        Pointer::data(self.position, self.chunk)
    }
}

type Index = Box<dyn IndexManager<i64, Pointer>>;

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "index_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let Cli { index_id, command } = Cli::parse();

    let config = match EngineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        "Loaded configuration: directory={}, degree={}, session={:?}, layout={:?}",
        config.directory.display(),
        config.degree,
        config.session,
        config.layout
    );

    let storage: Arc<dyn IndexStorageManager> = match config.open_storage() {
        Ok(storage) => Arc::new(storage),
        Err(e) => {
            tracing::error!("Failed to open index storage: {e}");
            std::process::exit(1);
        }
    };

    #[allow(clippy::disallowed_methods)] // Arc::clone is required for shared ownership
    let result = open_index(&config, index_id, Arc::clone(&storage))
        .and_then(|index| run(index.as_ref(), command));

    if let Err(e) = storage.close() {
        tracing::warn!("Failed to close index storage: {e}");
    }
    if let Err(e) = result {
        tracing::error!("{command:?} on index {index_id} failed: {e}");
        std::process::exit(1);
    }
}

/// Build the unique index for `index_id`, locked and optionally cached.
fn open_index(
    config: &EngineConfig,
    index_id: u32,
    storage: Arc<dyn IndexStorageManager>,
) -> Result<Index, IndexError> {
    let tree = BPlusTreeIndexManager::new(
        index_id,
        config.degree,
        storage,
        config.session,
        KeyPolicy::Unique,
    )?;
    let registry = IndexLockRegistry::new();
    let locked = LockedIndexManager::table_level(tree, &registry)?;

    match NonZeroUsize::new(config.cache_size) {
        Some(capacity) => Ok(Box::new(CachedIndexManager::new(locked, capacity)?)),
        None => Ok(Box::new(locked)),
    }
}

fn run(index: &dyn IndexManager<i64, Pointer>, command: Command) -> Result<(), IndexError> {
    let index_id = index.index_id();
    match command {
        Command::Insert { key, location } => {
            let value = location.pointer();
            index.add_index(key, value)?;
            tracing::info!("Inserted {key} -> {value} into index {index_id}");
        }
        Command::Get { key } => match index.get_index(&key)? {
            Some(value) => println!("{key}\t{value}"),
            None => tracing::info!("Key {key} not found in index {index_id}"),
        },
        Command::Update { key, location } => {
            let value = location.pointer();
            if index.update_index(&key, value)? {
                tracing::info!("Updated {key} -> {value} in index {index_id}");
            } else {
                tracing::info!("Key {key} not found in index {index_id}");
            }
        }
        Command::Remove { key } => {
            if index.remove_index(&key)? {
                tracing::info!("Removed {key} from index {index_id}");
            } else {
                tracing::info!("Key {key} not found in index {index_id}");
            }
        }
        Command::Size => println!("{}", index.size()?),
        Command::List { descending } => {
            let order = if descending {
                Order::Descending
            } else {
                Order::Ascending
            };
            for entry in index.sorted_iter(order)? {
                let (key, value) = entry?;
                println!("{key}\t{value}");
            }
        }
        Command::Purge => {
            index.purge()?;
            tracing::info!("Purged index {index_id}");
        }
    }
    Ok(())
}
