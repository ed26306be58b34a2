//! Index error types.

use std::path::PathBuf;
use thiserror::Error;

/// Index error type.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The index file could not be opened.
    #[error("index unavailable at {path}: {source}")]
    Unavailable {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// The index opened but does not have the expected layout.
    #[error("corrupt index {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// A query against an already opened index failed.
    #[error("index query failed: {0}")]
    Query(#[from] rusqlite::Error),

    /// I/O error while preparing index files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl IndexError {
    /// Create a Corrupt error.
    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Returns true for errors that make the whole index unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Corrupt { .. })
    }
}

/// Index result type.
pub type IndexResult<T> = Result<T, IndexError>;
