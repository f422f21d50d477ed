//! Error types for channel operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for channel operations.
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Errors that can occur during channel operations.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of a channel.
    #[error("read beyond end of channel: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current channel size.
        size: u64,
    },

    /// The channel has not been opened or was already finalized.
    #[error("channel not open: {}", path.display())]
    NotOpen {
        /// Path of the channel.
        path: PathBuf,
    },

    /// An empty payload was handed to the channel.
    #[error("refusing to write an empty payload to {}", path.display())]
    EmptyPayload {
        /// Path of the channel.
        path: PathBuf,
    },
}

impl ChannelError {
    /// Creates a not-open error for the given channel path.
    pub fn not_open(path: impl Into<PathBuf>) -> Self {
        Self::NotOpen { path: path.into() }
    }
}
