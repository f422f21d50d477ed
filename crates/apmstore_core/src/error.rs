//! Error types for apmstore core.

use serde::Serialize;
use std::fmt;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Business error codes surfaced by storage lifecycle operations.
///
/// These are returned when the state of a storage forbids the requested
/// operation, or when required input is missing. None of them are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StorageErrorCode {
    /// A storage was created without a name.
    NameNotProvided,
    /// The storage is already closed.
    AlreadyClosed,
    /// The storage is the active recording target.
    InUseByRecording,
    /// No storage with the given id exists.
    DoesNotExist,
    /// Writing into the storage is not permitted right now.
    WriteFailed,
    /// A recording is already active or scheduled.
    RecordingAlreadyActive,
    /// There is not enough free disk space to accept writes.
    LowDiskSpace,
    /// The storage has no active writer.
    WriterNotAvailable,
    /// The recording properties are incomplete.
    InvalidRecordingProperties,
}

impl StorageErrorCode {
    /// Returns a short human readable description of the code.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::NameNotProvided => "storage name is not provided",
            Self::AlreadyClosed => "storage is already closed",
            Self::InUseByRecording => "storage is in use by an active recording",
            Self::DoesNotExist => "storage does not exist",
            Self::WriteFailed => "writing to the storage is not possible",
            Self::RecordingAlreadyActive => "a recording is already active",
            Self::LowDiskSpace => "not enough free disk space",
            Self::WriterNotAvailable => "storage has no active writer",
            Self::InvalidRecordingProperties => "recording properties are invalid",
        }
    }
}

impl fmt::Display for StorageErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Errors that can occur in apmstore core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Channel layer error.
    #[error("channel error: {0}")]
    Channel(#[from] apmstore_channel::ChannelError),

    /// Serialization error.
    #[error("codec error: {0}")]
    Codec(#[from] apmstore_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The storage state forbids the operation.
    #[error("{operation} failed: {code}")]
    Business {
        /// The operation that was attempted.
        operation: String,
        /// Why it was refused.
        code: StorageErrorCode,
    },

    /// The indexing tree rejected a reservation.
    #[error("indexing error: {message}")]
    Indexing {
        /// Description of the rejection.
        message: String,
    },

    /// The storage root is locked by another process.
    #[error("storage root locked: another process has exclusive access")]
    RootLocked,

    /// The storage root or a storage directory is malformed.
    #[error("invalid storage layout: {message}")]
    InvalidLayout {
        /// Description of the layout issue.
        message: String,
    },
}

impl CoreError {
    /// Creates a business error for `operation`.
    pub fn business(operation: impl Into<String>, code: StorageErrorCode) -> Self {
        Self::Business {
            operation: operation.into(),
            code,
        }
    }

    /// Creates an indexing error.
    pub fn indexing(message: impl Into<String>) -> Self {
        Self::Indexing {
            message: message.into(),
        }
    }

    /// Creates an invalid layout error.
    pub fn invalid_layout(message: impl Into<String>) -> Self {
        Self::InvalidLayout {
            message: message.into(),
        }
    }

    /// Returns the business code, if this is a business error.
    #[must_use]
    pub const fn code(&self) -> Option<StorageErrorCode> {
        match self {
            Self::Business { code, .. } => Some(*code),
            _ => None,
        }
    }
}
