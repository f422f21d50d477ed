//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur during serialization or deserialization.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Failed to serialize a value.
    #[error("serialization failed: {message}")]
    SerializationFailed {
        /// Description of the serialization error.
        message: String,
    },

    /// Failed to deserialize bytes.
    #[error("deserialization failed: {message}")]
    DeserializationFailed {
        /// Description of the deserialization error.
        message: String,
    },

    /// Input ended before a complete value was read.
    #[error("unexpected end of input")]
    UnexpectedEof,
}

impl CodecError {
    /// Create a serialization failed error.
    pub fn serialization_failed(message: impl Into<String>) -> Self {
        Self::SerializationFailed {
            message: message.into(),
        }
    }

    /// Create a deserialization failed error.
    pub fn deserialization_failed(message: impl Into<String>) -> Self {
        Self::DeserializationFailed {
            message: message.into(),
        }
    }
}
