//! Error types for fstrans.
//!
//! All operations return `Result<T>` which aliases `Result<T, TransactionError>`.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors from transaction operations.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// Target is not a directory, or the snapshot pattern is unusable.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Another transaction held the tree for the whole timeout.
    #[error("Cannot lock directory {0}")]
    LockTimeout(PathBuf),

    /// Operation requires an open transaction.
    #[error("Transaction is not open")]
    NotOpen,

    /// Operation requires a closed transaction.
    #[error("Transaction is already open")]
    AlreadyOpen,

    /// Path resolves outside the current transaction root.
    #[error("Path '{}' should be inside {}", path.display(), root.display())]
    OutsideTree { path: PathBuf, root: PathBuf },

    /// Building the shadow tree failed for a reason other than contention.
    #[error("Failed to clone tree into {}: {source}", path.display())]
    CloneFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Commit or rollback took effect, but the scratch directory could not
    /// be removed.
    #[error("Failed to remove scratch directory {}: {source}", path.display())]
    Cleanup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// File system operation failed.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// Unexpected error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TransactionError {
    /// Wraps an I/O error with the action and path that produced it.
    pub(crate) fn io(action: &str, path: &Path, err: io::Error) -> Self {
        TransactionError::Io(io::Error::new(
            err.kind(),
            format!("Failed to {} {}: {}", action, path.display(), err),
        ))
    }
}

/// Result type alias for fstrans operations.
pub type Result<T> = std::result::Result<T, TransactionError>;
