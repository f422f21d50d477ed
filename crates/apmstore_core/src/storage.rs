//! Storage metadata and its state machine.

use crate::error::{CoreError, CoreResult, StorageErrorCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

/// Lifecycle state of a storage.
///
/// ```text
/// CreatedNotOpened ──open──▶ Opened ──close──▶ Closed
///                              ▲  │
///                   stop rec.  │  │ start rec.
///                              │  ▼
///                            Recording
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageState {
    /// Created, never opened for writing.
    CreatedNotOpened,
    /// Open and accepting writes.
    Opened,
    /// Open and the target of the active recording.
    Recording,
    /// Closed; readable only.
    Closed,
}

impl fmt::Display for StorageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CreatedNotOpened => "created",
            Self::Opened => "opened",
            Self::Recording => "recording",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Persisted description of one storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageData {
    id: String,
    /// Display name.
    pub name: String,
    /// Free-form description.
    pub description: Option<String>,
    /// Bytes occupied on disk, refreshed periodically and on close.
    pub disk_size: u64,
    /// Version of the server that created the storage.
    pub server_version: String,
    /// Labels attached to the storage.
    pub labels: BTreeSet<String>,
    state: StorageState,
}

impl StorageData {
    /// Creates metadata for a new storage with a fresh id.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        description: Option<String>,
        server_version: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            description,
            disk_size: 0,
            server_version: server_version.into(),
            labels: BTreeSet::new(),
            state: StorageState::CreatedNotOpened,
        }
    }

    /// Returns the storage id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the current state.
    #[must_use]
    pub const fn state(&self) -> StorageState {
        self.state
    }

    /// True if the storage can currently be written to.
    #[must_use]
    pub const fn is_writable(&self) -> bool {
        matches!(self.state, StorageState::Opened | StorageState::Recording)
    }

    /// True if the storage is closed.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self.state, StorageState::Closed)
    }

    /// Moves to `Opened`.
    ///
    /// Returns `false` if the storage was already open (or recording).
    ///
    /// # Errors
    ///
    /// Fails with [`StorageErrorCode::AlreadyClosed`] for a closed storage.
    pub fn mark_opened(&mut self) -> CoreResult<bool> {
        match self.state {
            StorageState::CreatedNotOpened => {
                self.state = StorageState::Opened;
                Ok(true)
            }
            StorageState::Opened | StorageState::Recording => Ok(false),
            StorageState::Closed => Err(refused("open storage", StorageErrorCode::AlreadyClosed)),
        }
    }

    /// Moves from `Opened` to `Recording`.
    ///
    /// # Errors
    ///
    /// Fails if the storage is already recording, closed, or not open yet.
    pub fn mark_recording(&mut self) -> CoreResult<()> {
        match self.state {
            StorageState::Opened => {
                self.state = StorageState::Recording;
                Ok(())
            }
            StorageState::Recording => Err(refused(
                "start recording",
                StorageErrorCode::RecordingAlreadyActive,
            )),
            StorageState::Closed => {
                Err(refused("start recording", StorageErrorCode::AlreadyClosed))
            }
            StorageState::CreatedNotOpened => Err(refused(
                "start recording",
                StorageErrorCode::WriterNotAvailable,
            )),
        }
    }

    /// Moves from `Recording` back to `Opened`. No-op in any other state.
    pub fn mark_recording_stopped(&mut self) {
        if self.state == StorageState::Recording {
            self.state = StorageState::Opened;
        }
    }

    /// Moves to `Closed`.
    ///
    /// # Errors
    ///
    /// Fails while recording or when already closed.
    pub fn mark_closed(&mut self) -> CoreResult<()> {
        match self.state {
            StorageState::CreatedNotOpened | StorageState::Opened => {
                self.state = StorageState::Closed;
                Ok(())
            }
            StorageState::Recording => {
                Err(refused("close storage", StorageErrorCode::InUseByRecording))
            }
            StorageState::Closed => Err(refused("close storage", StorageErrorCode::AlreadyClosed)),
        }
    }

    pub(crate) fn restore_state(&mut self, state: StorageState) {
        self.state = state;
    }
}

fn refused(operation: &str, code: StorageErrorCode) -> CoreError {
    CoreError::business(operation, code)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> StorageData {
        StorageData::new("nightly", None, "1.0")
    }

    #[test]
    fn new_storage_has_unique_id() {
        let a = storage();
        let b = storage();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.state(), StorageState::CreatedNotOpened);
    }

    #[test]
    fn open_is_idempotent() {
        let mut data = storage();
        assert!(data.mark_opened().unwrap());
        assert!(!data.mark_opened().unwrap());
        assert!(data.is_writable());
    }

    #[test]
    fn closed_storage_cannot_reopen() {
        let mut data = storage();
        data.mark_closed().unwrap();
        let err = data.mark_opened().unwrap_err();
        assert_eq!(err.code(), Some(StorageErrorCode::AlreadyClosed));
    }

    #[test]
    fn close_refused_while_recording_or_closed() {
        let mut data = storage();
        data.mark_opened().unwrap();
        data.mark_recording().unwrap();

        let err = data.mark_closed().unwrap_err();
        assert_eq!(err.code(), Some(StorageErrorCode::InUseByRecording));

        data.mark_recording_stopped();
        data.mark_closed().unwrap();

        let err = data.mark_closed().unwrap_err();
        assert_eq!(err.code(), Some(StorageErrorCode::AlreadyClosed));
    }

    #[test]
    fn recording_twice_fails() {
        let mut data = storage();
        data.mark_opened().unwrap();
        data.mark_recording().unwrap();
        let err = data.mark_recording().unwrap_err();
        assert_eq!(err.code(), Some(StorageErrorCode::RecordingAlreadyActive));
    }
}
