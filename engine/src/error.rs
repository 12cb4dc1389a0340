//! Errors surfaced by index managers.

use crate::btree::node::NodeError;
use crate::codec::CodecError;
use crate::storage::StorageError;

/// Error returned by every index manager operation.
///
/// Storage failures are wrapped, so callers never see a raw I/O error.
#[derive(Debug)]
pub enum IndexError {
    /// The storage layer failed.
    InternalOperation(StorageError),
    /// A unique index already holds the key.
    IndexExists(String),
    /// The tree's stored structure is inconsistent.
    Corruption(NodeError),
    /// A key or value cannot be stored.
    InvalidValue(CodecError),
    /// A commit failed and so did undoing it.
    RollbackFailed {
        cause: Box<IndexError>,
        rollback: Box<IndexError>,
    },
    /// The operation is not available for this index.
    Unsupported(&'static str),
    /// A lock guarding the index was poisoned.
    LockPoisoned,
}

impl std::fmt::Display for IndexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InternalOperation(e) => write!(f, "internal operation failed: {e}"),
            Self::IndexExists(key) => write!(f, "index already exists for key {key}"),
            Self::Corruption(e) => write!(f, "index corruption: {e}"),
            Self::InvalidValue(e) => write!(f, "invalid value: {e}"),
            Self::RollbackFailed { cause, rollback } => {
                write!(f, "rollback failed ({rollback}) after: {cause}")
            }
            Self::Unsupported(what) => write!(f, "unsupported: {what}"),
            Self::LockPoisoned => write!(f, "index lock poisoned"),
        }
    }
}

impl std::error::Error for IndexError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InternalOperation(e) => Some(e),
            Self::Corruption(e) => Some(e),
            Self::InvalidValue(e) => Some(e),
            Self::RollbackFailed { cause, .. } => Some(cause.as_ref()),
            Self::IndexExists(_) | Self::Unsupported(_) | Self::LockPoisoned => None,
        }
    }
}

impl From<StorageError> for IndexError {
    fn from(e: StorageError) -> Self {
        Self::InternalOperation(e)
    }
}

impl From<NodeError> for IndexError {
    fn from(e: NodeError) -> Self {
        match e {
            NodeError::Codec(codec) => Self::InvalidValue(codec),
            other => Self::Corruption(other),
        }
    }
}

impl From<CodecError> for IndexError {
    fn from(e: CodecError) -> Self {
        Self::InvalidValue(e)
    }
}
