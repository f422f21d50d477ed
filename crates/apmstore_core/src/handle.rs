//! Completion handles for submitted write tasks.

use crate::index::Descriptor;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Why a single record was not written.
///
/// Failures are local to one record; other tasks are unaffected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WriteFailure {
    /// The disk space gate closed before the task ran.
    #[error("not enough disk space")]
    DiskSpace,
    /// The queued payload was reclaimed before the task ran.
    #[error("record payload was reclaimed before it could be written")]
    Reclaimed,
    /// The indexing tree refused the record.
    #[error("indexing failed: {0}")]
    Indexing(String),
    /// The record could not be serialized.
    #[error("serialization failed: {0}")]
    Serialization(String),
    /// The channel write failed.
    #[error("channel write failed: {0}")]
    Channel(String),
    /// The task was dropped by a shutdown before completing.
    #[error("write task aborted")]
    Aborted,
}

/// Terminal outcome of one write task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The record is on disk at the given location.
    Written(Descriptor),
    /// The record was dropped.
    Failed(WriteFailure),
}

impl WriteOutcome {
    /// True if the record was written.
    #[must_use]
    pub const fn is_written(&self) -> bool {
        matches!(self, Self::Written(_))
    }
}

#[derive(Debug, Default)]
struct Slot {
    outcome: Mutex<Option<WriteOutcome>>,
    done: Condvar,
}

/// Handle on the eventual completion of a write task.
///
/// Cloning is cheap; every clone observes the same outcome.
#[derive(Debug, Clone, Default)]
pub struct WriteHandle {
    slot: Arc<Slot>,
}

impl WriteHandle {
    pub(crate) fn pending() -> Self {
        Self::default()
    }

    /// Sets the outcome. Only the first call has an effect.
    pub(crate) fn complete(&self, outcome: WriteOutcome) -> bool {
        let mut slot = self.slot.outcome.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(outcome);
        self.slot.done.notify_all();
        true
    }

    /// True once the task reached a terminal state.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.slot.outcome.lock().is_some()
    }

    /// Returns the outcome if the task is done.
    #[must_use]
    pub fn outcome(&self) -> Option<WriteOutcome> {
        self.slot.outcome.lock().clone()
    }

    /// Blocks until the task is done.
    pub fn wait(&self) -> WriteOutcome {
        let mut slot = self.slot.outcome.lock();
        loop {
            if let Some(outcome) = slot.as_ref() {
                return outcome.clone();
            }
            self.slot.done.wait(&mut slot);
        }
    }

    /// Blocks until the task is done or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<WriteOutcome> {
        let mut slot = self.slot.outcome.lock();
        if slot.is_none() {
            self.slot.done.wait_for(&mut slot, timeout);
        }
        slot.clone()
    }
}

/// Blocks until every handle is done, waking at most every `step`.
pub fn wait_all(handles: &[WriteHandle], step: Duration) -> Vec<WriteOutcome> {
    handles
        .iter()
        .map(|handle| loop {
            if let Some(outcome) = handle.wait_timeout(step) {
                break outcome;
            }
        })
        .collect()
}
