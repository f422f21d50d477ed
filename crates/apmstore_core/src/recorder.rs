//! Recording session: continuous capture of live records into one storage.

use crate::error::{CoreError, CoreResult, StorageErrorCode};
use crate::handle::WriteHandle;
use crate::processor::DataProcessor;
use crate::record::DataRecord;
use crate::writer::StorageWriter;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// State of the recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RecordingState {
    /// No recording.
    Off,
    /// A recording waits for its start delay to elapse.
    Scheduled,
    /// Records are being captured.
    On,
}

/// How a recording is run.
pub struct RecordingProperties {
    processors: Vec<Box<dyn DataProcessor>>,
    start_delay: Option<Duration>,
    duration: Option<Duration>,
    auto_finalize: bool,
}

impl RecordingProperties {
    /// Creates properties routing recorded data through `processors`.
    #[must_use]
    pub fn new(processors: Vec<Box<dyn DataProcessor>>) -> Self {
        Self {
            processors,
            start_delay: None,
            duration: None,
            auto_finalize: false,
        }
    }

    /// Delays the start of the recording.
    #[must_use]
    pub const fn start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = Some(delay);
        self
    }

    /// Stops the recording automatically after `duration` of recording.
    #[must_use]
    pub const fn duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Closes the storage once the recording stops.
    #[must_use]
    pub const fn auto_finalize(mut self, value: bool) -> Self {
        self.auto_finalize = value;
        self
    }

    /// Configured start delay.
    #[must_use]
    pub const fn get_start_delay(&self) -> Option<Duration> {
        self.start_delay
    }

    /// Configured recording duration.
    #[must_use]
    pub const fn get_duration(&self) -> Option<Duration> {
        self.duration
    }
}

impl fmt::Debug for RecordingProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingProperties")
            .field("processors", &self.processors)
            .field("start_delay", &self.start_delay)
            .field("duration", &self.duration)
            .field("auto_finalize", &self.auto_finalize)
            .finish()
    }
}

struct Session {
    writer: StorageWriter,
    processors: Vec<Box<dyn DataProcessor>>,
    auto_finalize: bool,
    state: RecordingState,
    timers: Vec<JoinHandle<()>>,
}

/// Holds the single recording session of a storage manager.
#[derive(Default)]
pub struct StorageRecorder {
    session: Option<Session>,
}

impl StorageRecorder {
    /// Creates an idle recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> RecordingState {
        self.session
            .as_ref()
            .map_or(RecordingState::Off, |session| session.state)
    }

    /// True while records are being captured.
    #[must_use]
    pub fn is_recording_on(&self) -> bool {
        self.state() == RecordingState::On
    }

    /// True while a recording waits for its start delay.
    #[must_use]
    pub fn is_recording_scheduled(&self) -> bool {
        self.state() == RecordingState::Scheduled
    }

    /// Starts recording into `writer`, or schedules the start if the
    /// properties carry a non-zero start delay.
    ///
    /// # Errors
    ///
    /// Fails with [`StorageErrorCode::InvalidRecordingProperties`] when no
    /// processors are given, and with
    /// [`StorageErrorCode::RecordingAlreadyActive`] while another recording
    /// is on or scheduled.
    pub fn start_or_schedule(
        &mut self,
        writer: StorageWriter,
        properties: RecordingProperties,
    ) -> CoreResult<RecordingState> {
        if properties.processors.is_empty() {
            return Err(CoreError::business(
                "start recording",
                StorageErrorCode::InvalidRecordingProperties,
            ));
        }
        if self.session.is_some() {
            return Err(CoreError::business(
                "start recording",
                StorageErrorCode::RecordingAlreadyActive,
            ));
        }

        let state = match properties.start_delay {
            Some(delay) if !delay.is_zero() => RecordingState::Scheduled,
            _ => RecordingState::On,
        };
        info!(storage = writer.storage_id(), ?state, "recording started");
        self.session = Some(Session {
            writer,
            processors: properties.processors,
            auto_finalize: properties.auto_finalize,
            state,
            timers: Vec::new(),
        });
        Ok(state)
    }

    /// Turns a scheduled recording on. Returns `false` if nothing was scheduled.
    pub fn activate(&mut self) -> bool {
        match &mut self.session {
            Some(session) if session.state == RecordingState::Scheduled => {
                session.state = RecordingState::On;
                info!(storage = session.writer.storage_id(), "scheduled recording is now on");
                true
            }
            _ => false,
        }
    }

    /// Routes `record` through the recording processors while recording is on.
    pub fn record(&mut self, record: &Arc<DataRecord>) -> Vec<WriteHandle> {
        let Some(session) = self.session.as_mut() else {
            return Vec::new();
        };
        if session.state != RecordingState::On {
            debug!(record = record.id, "recording not on yet, record skipped");
            return Vec::new();
        }
        let mut handles = Vec::new();
        for processor in &mut session.processors {
            handles.extend(processor.process(record, &session.writer));
        }
        handles
    }

    /// Keeps a timer alive for the session and aborts it on stop.
    pub fn attach_timer(&mut self, timer: JoinHandle<()>) {
        match &mut self.session {
            Some(session) => session.timers.push(timer),
            None => timer.abort(),
        }
    }

    /// Stops the recording, flushing every processor into the writer.
    ///
    /// Returns the writer and whether the storage should be closed, or
    /// `None` if no recording was active.
    pub fn stop(&mut self) -> Option<(StorageWriter, bool)> {
        let mut session = self.session.take()?;
        for timer in session.timers.drain(..) {
            timer.abort();
        }
        let mut flushed = 0;
        for processor in &mut session.processors {
            flushed += processor.flush(&session.writer).len();
        }
        info!(storage = session.writer.storage_id(), flushed, "recording stopped");
        Some((session.writer, session.auto_finalize))
    }

    /// Writer of the active or scheduled recording.
    #[must_use]
    pub fn storage_writer(&self) -> Option<&StorageWriter> {
        self.session.as_ref().map(|session| &session.writer)
    }
}

impl fmt::Debug for StorageRecorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageRecorder")
            .field("state", &self.state())
            .field("storage", &self.storage_writer().map(StorageWriter::storage_id))
            .finish()
    }
}
