//! Error types for storage primitives.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// I/O error without further path context.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// I/O error tied to a specific path.
    #[error("I/O error on {path}: {source}")]
    PathIo {
        /// The file the operation was acting on.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },
}

impl StorageError {
    /// Wraps an I/O error with the path it occurred on.
    pub fn path_io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::PathIo {
            path: path.into(),
            source,
        }
    }
}
