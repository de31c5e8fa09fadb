//! Error types for the datastore.

use jotdb_model::{ModelError, Value};
use jotdb_storage::StorageError;
use std::io;
use thiserror::Error;

/// Result type for datastore operations.
pub type DatastoreResult<T> = Result<T, DatastoreError>;

/// Errors that can occur in datastore operations.
#[derive(Debug, Error)]
pub enum DatastoreError {
    /// Document model error (invalid field name, query or modifier).
    #[error(transparent)]
    Model(#[from] ModelError),

    /// Storage primitive error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A unique index rejected a key already held by another document.
    #[error("unique constraint violated for key {key:?} in index over `{field_name}`")]
    UniqueViolated {
        /// Field the index is declared on.
        field_name: String,
        /// The offending key.
        key: Value,
    },

    /// The data file holds more corrupt lines than the configured
    /// threshold tolerates.
    #[error("data file corruption: {message}")]
    Corruption {
        /// Description of what was found.
        message: String,
    },

    /// The serialization hook pair is incomplete or not a bijection.
    #[error("serialization hook mismatch: {message}")]
    HookMismatch {
        /// Description of the problem.
        message: String,
    },

    /// Invalid argument provided to an API.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the argument issue.
        message: String,
    },
}

impl DatastoreError {
    /// Creates a unique violation error.
    pub fn unique_violated(field_name: impl Into<String>, key: Value) -> Self {
        Self::UniqueViolated {
            field_name: field_name.into(),
            key,
        }
    }

    /// Creates a corruption error.
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::Corruption {
            message: message.into(),
        }
    }

    /// Creates a hook mismatch error.
    pub fn hook_mismatch(message: impl Into<String>) -> Self {
        Self::HookMismatch {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }
}
