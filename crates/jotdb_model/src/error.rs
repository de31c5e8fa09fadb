//! Error types for the document model.

use thiserror::Error;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors that can occur while validating, serializing or evaluating documents.
#[derive(Debug, Error)]
pub enum ModelError {
    /// A document field name is forbidden (`$` prefix or embedded `.`).
    #[error("invalid field name `{name}`: {reason}")]
    InvalidFieldName {
        /// The offending field name.
        name: String,
        /// Why the name was rejected.
        reason: String,
    },

    /// A query document is malformed.
    #[error("invalid query: {message}")]
    InvalidQuery {
        /// Description of the problem.
        message: String,
    },

    /// An update document uses an unknown modifier or a wrong-shaped argument.
    #[error("invalid modifier: {message}")]
    InvalidModifier {
        /// Description of the problem.
        message: String,
    },

    /// A serialized line could not be parsed back into a value.
    #[error("bad serialized value: {0}")]
    BadSerializedValue(#[from] serde_json::Error),
}

impl ModelError {
    /// Creates an invalid field name error.
    pub fn invalid_field_name(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidFieldName {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid query error.
    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery {
            message: message.into(),
        }
    }

    /// Creates an invalid modifier error.
    pub fn invalid_modifier(message: impl Into<String>) -> Self {
        Self::InvalidModifier {
            message: message.into(),
        }
    }
}
