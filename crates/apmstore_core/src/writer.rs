//! Storage writer: the asynchronous write pipeline of one open storage.

use crate::cache::PayloadCache;
use crate::config::StorageConfig;
use crate::disk::DiskSpaceGate;
use crate::drain::DrainSignal;
use crate::error::{CoreError, CoreResult, StorageErrorCode};
use crate::handle::{wait_all, WriteFailure, WriteHandle, WriteOutcome};
use crate::index::{IndexingTreeHandler, TaskId};
use crate::layout::CHANNEL_EXTENSION;
use crate::processor::DataProcessor;
use crate::record::{DataRecord, RecordId};
use crate::scheduler::Scheduler;
use crate::status::{WritingStatus, WritingStatusTracker};
use apmstore_channel::{ChannelResult, ChannelWriter};
use apmstore_codec::{SerializationOptions, Serializer};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::{Builder, Runtime};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Anything records can be written to.
///
/// Data processors emit their output through this trait, so they work the
/// same against a real [`StorageWriter`] and against test doubles.
pub trait RecordWriter: Send + Sync {
    /// Submits one record. Returns `None` if the record was not accepted.
    fn write(&self, record: Arc<DataRecord>, options: SerializationOptions) -> Option<WriteHandle>;
}

/// Process-wide collaborators shared by every writer.
#[derive(Clone)]
pub struct WriterServices {
    /// Disk space gate consulted before every write.
    pub gate: Arc<DiskSpaceGate>,
    /// Serializer turning records into channel bytes.
    pub serializer: Arc<dyn Serializer<DataRecord>>,
    /// Channel layer receiving the bytes.
    pub channels: Arc<dyn ChannelWriter>,
    /// Scheduler running maintenance ticks.
    pub scheduler: Arc<Scheduler>,
}

impl fmt::Debug for WriterServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriterServices")
            .field("gate", &self.gate)
            .finish_non_exhaustive()
    }
}

/// Snapshot of a writer's task counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WriterStats {
    /// Tasks accepted since the writer was created.
    pub submitted: u64,
    /// Tasks that reached a terminal state.
    pub completed: u64,
    /// Tasks that ended in failure.
    pub failed: u64,
    /// Tasks not yet terminal.
    pub queued: u64,
    /// Tasks holding an indexing tree reservation.
    pub in_flight: usize,
    /// Payloads waiting in the queue cache.
    pub cached: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Created,
    Active,
    Finalized,
    Cancelled,
}

struct WriterInner {
    storage: String,
    storage_dir: PathBuf,
    config: Arc<StorageConfig>,
    services: WriterServices,
    state: Mutex<WriterState>,
    writing_on: AtomicBool,
    cancelled: AtomicBool,
    tree: IndexingTreeHandler,
    cache: PayloadCache,
    pool: RwLock<Option<Runtime>>,
    /// Held shared by a task while it hands bytes to a channel, and
    /// exclusively by teardown while it closes the channels.
    channel_gate: RwLock<()>,
    channels_closed: AtomicBool,
    opened_channels: Mutex<BTreeSet<PathBuf>>,
    next_task_id: AtomicU64,
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    drain: DrainSignal,
    status: Mutex<WritingStatusTracker>,
    status_ticker: Mutex<Option<JoinHandle<()>>>,
}

/// Writes records of one storage.
///
/// [`StorageWriter::write`] never blocks: it caches the payload, queues a
/// write task on the writer's pool, and returns a [`WriteHandle`]. Each task
/// reserves a descriptor, serializes the record and hands the bytes to the
/// channel layer; the channel's completion commits or rolls back the
/// descriptor.
///
/// # Thread Safety
///
/// A writer is shared between the storage manager, the recorder, and any
/// number of submitting threads. Teardown ([`StorageWriter::finalize_write`]
/// or [`StorageWriter::cancel`]) is idempotent and serialized internally.
#[derive(Clone)]
pub struct StorageWriter {
    inner: Arc<WriterInner>,
}

impl StorageWriter {
    /// Creates a writer for the storage `storage` living in `storage_dir`.
    ///
    /// Nothing is started until [`StorageWriter::prepare_for_write`].
    #[must_use]
    pub fn new(
        storage: impl Into<String>,
        storage_dir: impl Into<PathBuf>,
        config: Arc<StorageConfig>,
        services: WriterServices,
    ) -> Self {
        let storage = storage.into();
        let storage_dir = storage_dir.into();
        let tree = IndexingTreeHandler::new(
            storage.clone(),
            storage_dir.clone(),
            &config,
            Arc::clone(&services.scheduler),
        );
        let cache = PayloadCache::new(config.payload_cache_capacity);

        Self {
            inner: Arc::new(WriterInner {
                storage,
                storage_dir,
                config,
                services,
                state: Mutex::new(WriterState::Created),
                writing_on: AtomicBool::new(false),
                cancelled: AtomicBool::new(false),
                tree,
                cache,
                pool: RwLock::new(None),
                channel_gate: RwLock::new(()),
                channels_closed: AtomicBool::new(false),
                opened_channels: Mutex::new(BTreeSet::new()),
                next_task_id: AtomicU64::new(0),
                submitted: AtomicU64::new(0),
                completed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                drain: DrainSignal::new(),
                status: Mutex::new(WritingStatusTracker::new()),
                status_ticker: Mutex::new(None),
            }),
        }
    }

    /// Creates the writing directory, prepares the indexing tree, starts the
    /// write pool and the writing status check.
    ///
    /// Calling it again on an active writer does nothing.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors, or if the writer was already finalized or cancelled.
    pub fn prepare_for_write(&self) -> CoreResult<()> {
        let inner = &self.inner;
        let mut state = inner.state.lock();
        match *state {
            WriterState::Active => return Ok(()),
            WriterState::Finalized | WriterState::Cancelled => {
                return Err(CoreError::business(
                    "prepare for write",
                    StorageErrorCode::WriterNotAvailable,
                ));
            }
            WriterState::Created => {}
        }

        std::fs::create_dir_all(&inner.storage_dir)?;
        inner.tree.prepare()?;

        let runtime = match Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(inner.config.write_threads.max(1))
            .thread_name("apmstore-writer")
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                inner.tree.cancel();
                *state = WriterState::Cancelled;
                return Err(e.into());
            }
        };
        *inner.pool.write() = Some(runtime);

        let weak = Arc::downgrade(inner);
        let ticker = inner
            .services
            .scheduler
            .every(inner.config.writing_status_interval, move || match weak.upgrade() {
                Some(inner) => {
                    inner.sample_status();
                    true
                }
                None => false,
            });
        *inner.status_ticker.lock() = Some(ticker);

        inner.writing_on.store(true, Ordering::Release);
        *state = WriterState::Active;
        info!(
            storage = %inner.storage,
            dir = %inner.storage_dir.display(),
            "storage writer prepared"
        );
        Ok(())
    }

    /// Submits one record without blocking.
    ///
    /// Returns `None` if the writer is not active or the disk space gate
    /// refuses further writes.
    pub fn write(
        &self,
        record: Arc<DataRecord>,
        options: SerializationOptions,
    ) -> Option<WriteHandle> {
        let inner = &self.inner;
        if !inner.writing_on.load(Ordering::Acquire) {
            debug!(
                storage = %inner.storage,
                record = record.id,
                "writer not active, record refused"
            );
            return None;
        }
        if !inner.services.gate.can_write_more() {
            debug!(
                storage = %inner.storage,
                record = record.id,
                "disk space gate closed, record refused"
            );
            return None;
        }

        let pool = inner.pool.read();
        let runtime = pool.as_ref()?;

        let task_id = inner.next_task_id.fetch_add(1, Ordering::AcqRel) + 1;
        inner.cache.insert(task_id, record);
        inner.submitted.fetch_add(1, Ordering::AcqRel);

        let handle = WriteHandle::pending();
        let task = WriteTask {
            inner: Arc::clone(inner),
            task_id,
            handle: handle.clone(),
            options,
            finished: false,
        };
        runtime.spawn_blocking(move || task.run());
        Some(handle)
    }

    /// Routes `records` through `processors` and returns every resulting handle.
    ///
    /// With no processors every record is written directly. Otherwise each
    /// record passes through every processor in order, and every processor is
    /// flushed at the end.
    pub fn process(
        &self,
        records: &[Arc<DataRecord>],
        processors: &mut [Box<dyn DataProcessor>],
    ) -> Vec<WriteHandle> {
        if processors.is_empty() {
            return records
                .iter()
                .filter_map(|record| self.write(Arc::clone(record), SerializationOptions::new()))
                .collect();
        }

        let mut handles = Vec::new();
        for record in records {
            for processor in processors.iter_mut() {
                handles.extend(processor.process(record, self));
            }
        }
        for processor in processors.iter_mut() {
            handles.extend(processor.flush(self));
        }
        handles
    }

    /// Like [`StorageWriter::process`], but blocks until every resulting
    /// write is complete.
    pub fn process_synchronously(
        &self,
        records: &[Arc<DataRecord>],
        processors: &mut [Box<dyn DataProcessor>],
    ) -> Vec<WriteOutcome> {
        let handles = self.process(records, processors);
        wait_all(&handles, self.inner.config.sync_poll_interval)
    }

    /// Stops accepting writes, drains queued tasks (bounded), shuts down the
    /// pool, persists the final indexing tree generation and closes every
    /// channel this writer opened.
    ///
    /// Idempotent. If the queue does not drain in time a warning is logged
    /// and teardown proceeds; the undrained records are lost.
    pub fn finalize_write(&self) {
        let inner = &self.inner;
        let mut state = inner.state.lock();
        match *state {
            WriterState::Finalized | WriterState::Cancelled => return,
            WriterState::Created => {
                *state = WriterState::Finalized;
                return;
            }
            WriterState::Active => {}
        }

        info!(storage = %inner.storage, queued = inner.queued(), "finalizing storage writer");
        inner.writing_on.store(false, Ordering::Release);
        inner.stop_status_ticker();

        inner.drain.wait_until(
            || inner.queued() == 0,
            inner.config.finalize_wait_interval,
            inner.config.finalize_wait_iterations,
            "queued write tasks",
        );
        if let Some(runtime) = inner.pool.write().take() {
            runtime.shutdown_timeout(inner.config.pool_shutdown_timeout);
        }

        inner.tree.finish();
        inner.close_channels();
        *state = WriterState::Finalized;
        info!(storage = %inner.storage, stats = ?self.stats(), "storage writer finalized");
    }

    /// Tears the writer down without draining and without persisting the
    /// indexing tree. Idempotent.
    pub fn cancel(&self) {
        let inner = &self.inner;
        let mut state = inner.state.lock();
        if matches!(*state, WriterState::Finalized | WriterState::Cancelled) {
            return;
        }

        inner.writing_on.store(false, Ordering::Release);
        inner.cancelled.store(true, Ordering::Release);
        inner.stop_status_ticker();
        if let Some(runtime) = inner.pool.write().take() {
            runtime.shutdown_background();
        }
        inner.tree.cancel();
        inner.cache.clear();
        inner.close_channels();
        *state = WriterState::Cancelled;
        info!(storage = %inner.storage, "storage writer cancelled");
    }

    /// Id of the storage this writer belongs to.
    #[must_use]
    pub fn storage_id(&self) -> &str {
        &self.inner.storage
    }

    /// Directory records and index files are written to.
    #[must_use]
    pub fn storage_dir(&self) -> &Path {
        &self.inner.storage_dir
    }

    /// True while writes are accepted.
    #[must_use]
    pub fn is_writing_on(&self) -> bool {
        self.inner.writing_on.load(Ordering::Acquire)
    }

    /// Number of submitted tasks that have not reached a terminal state.
    #[must_use]
    pub fn queued_task_count(&self) -> u64 {
        self.inner.queued()
    }

    /// Last computed writing status.
    #[must_use]
    pub fn writing_status(&self) -> WritingStatus {
        self.inner.status.lock().status()
    }

    /// Recomputes the writing status now.
    pub fn sample_writing_status(&self) -> WritingStatus {
        self.inner.sample_status()
    }

    /// The writer's indexing tree.
    #[must_use]
    pub fn indexing_tree(&self) -> &IndexingTreeHandler {
        &self.inner.tree
    }

    /// Snapshot of the task counters.
    #[must_use]
    pub fn stats(&self) -> WriterStats {
        let inner = &self.inner;
        WriterStats {
            submitted: inner.submitted.load(Ordering::Acquire),
            completed: inner.completed.load(Ordering::Acquire),
            failed: inner.failed.load(Ordering::Acquire),
            queued: inner.queued(),
            in_flight: inner.tree.in_flight_count(),
            cached: inner.cache.len(),
        }
    }
}

impl RecordWriter for StorageWriter {
    fn write(&self, record: Arc<DataRecord>, options: SerializationOptions) -> Option<WriteHandle> {
        StorageWriter::write(self, record, options)
    }
}

impl fmt::Debug for StorageWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageWriter")
            .field("storage", &self.inner.storage)
            .field("state", &*self.inner.state.lock())
            .field("queued", &self.inner.queued())
            .finish_non_exhaustive()
    }
}

impl WriterInner {
    fn queued(&self) -> u64 {
        let completed = self.completed.load(Ordering::Acquire);
        self.submitted.load(Ordering::Acquire).saturating_sub(completed)
    }

    fn channel_path(&self, channel_id: u32) -> PathBuf {
        self.storage_dir.join(format!("{channel_id}.{CHANNEL_EXTENSION}"))
    }

    fn sample_status(&self) -> WritingStatus {
        let submitted = self.submitted.load(Ordering::Acquire);
        let completed = self.completed.load(Ordering::Acquire);
        let status = self.status.lock().sample(submitted, completed);
        if status.is_degrading() {
            warn!(
                storage = %self.storage,
                ?status,
                queued = submitted.saturating_sub(completed),
                "storage writer is falling behind"
            );
        } else {
            debug!(storage = %self.storage, ?status, "writing status sampled");
        }
        status
    }

    fn stop_status_ticker(&self) {
        if let Some(ticker) = self.status_ticker.lock().take() {
            ticker.abort();
        }
    }

    /// Waits for tasks writing to a channel, then closes every channel.
    /// Tasks arriving later are aborted before they touch a channel.
    fn close_channels(&self) {
        let _closing = self.channel_gate.write();
        self.channels_closed.store(true, Ordering::Release);
        let channels = std::mem::take(&mut *self.opened_channels.lock());
        for path in channels {
            if let Err(e) = self.services.channels.finalize_channel(&path) {
                error!(
                    storage = %self.storage,
                    channel = %path.display(),
                    error = %e,
                    "failed to finalize channel"
                );
            }
        }
    }
}

impl Drop for WriterInner {
    fn drop(&mut self) {
        if let Some(ticker) = self.status_ticker.get_mut().take() {
            ticker.abort();
        }
        if let Some(runtime) = self.pool.get_mut().take() {
            runtime.shutdown_background();
        }
    }
}

/// One queued record write.
///
/// Dropping a task that never reached a terminal state (for example because
/// the pool was shut down before it ran) rolls it back as aborted.
struct WriteTask {
    inner: Arc<WriterInner>,
    task_id: TaskId,
    handle: WriteHandle,
    options: SerializationOptions,
    finished: bool,
}

impl WriteTask {
    fn run(mut self) {
        let inner = Arc::clone(&self.inner);

        if !inner.services.gate.can_write_more() {
            return self.finish(WriteOutcome::Failed(WriteFailure::DiskSpace));
        }
        let Some(record) = inner.cache.take(self.task_id) else {
            debug!(storage = %inner.storage, task = self.task_id, "payload reclaimed before write");
            return self.finish(WriteOutcome::Failed(WriteFailure::Reclaimed));
        };

        let placeholder = match inner.tree.start_write(self.task_id, Some(&record)) {
            Ok(placeholder) => placeholder,
            Err(e) => {
                warn!(
                    storage = %inner.storage,
                    record = record.id,
                    error = %e,
                    "record not indexed, dropped"
                );
                return self.finish(WriteOutcome::Failed(WriteFailure::Indexing(e.to_string())));
            }
        };

        let mut bytes = Vec::new();
        if let Err(e) = inner
            .services
            .serializer
            .serialize(&record, &self.options, &mut bytes)
        {
            inner.tree.write_failed(self.task_id);
            error!(
                storage = %inner.storage,
                record = record.id,
                error = %e,
                "record serialization failed, dropped"
            );
            return self.finish(WriteOutcome::Failed(WriteFailure::Serialization(e.to_string())));
        }

        let _writing = inner.channel_gate.read();
        if inner.cancelled.load(Ordering::Acquire)
            || inner.channels_closed.load(Ordering::Acquire)
        {
            inner.tree.write_failed(self.task_id);
            return self.finish(WriteOutcome::Failed(WriteFailure::Aborted));
        }

        let path = inner.channel_path(placeholder.channel_id);
        inner.opened_channels.lock().insert(path.clone());
        let record_id = record.id;
        inner.services.channels.write(
            Bytes::from(bytes),
            &path,
            Box::new(move |result| self.channel_done(record_id, result)),
        );
    }

    fn channel_done(mut self, record_id: RecordId, result: ChannelResult<(u64, u64)>) {
        let outcome = match result {
            Ok((offset, length)) => {
                match self.inner.tree.write_successful(self.task_id, offset, length) {
                    Some(descriptor) => {
                        debug!(
                            storage = %self.inner.storage,
                            record = record_id,
                            ?descriptor,
                            "record written"
                        );
                        WriteOutcome::Written(descriptor)
                    }
                    None => WriteOutcome::Failed(WriteFailure::Indexing(
                        "reservation was dropped before commit".to_string(),
                    )),
                }
            }
            Err(e) => {
                self.inner.tree.write_failed(self.task_id);
                error!(
                    storage = %self.inner.storage,
                    record = record_id,
                    error = %e,
                    "channel write failed, record dropped"
                );
                WriteOutcome::Failed(WriteFailure::Channel(e.to_string()))
            }
        };
        self.finish(outcome);
    }

    fn finish(&mut self, outcome: WriteOutcome) {
        if self.finished {
            return;
        }
        self.finished = true;

        if !outcome.is_written() {
            self.inner.failed.fetch_add(1, Ordering::AcqRel);
        }
        self.inner.completed.fetch_add(1, Ordering::AcqRel);
        self.handle.complete(outcome);
        self.inner.drain.notify();
    }
}

impl Drop for WriteTask {
    fn drop(&mut self) {
        if !self.finished {
            self.inner.tree.write_failed(self.task_id);
            self.inner.cache.take(self.task_id);
            self.finish(WriteOutcome::Failed(WriteFailure::Aborted));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::PersistedIndex;
    use crate::processor::{AgentFilterProcessor, DataSaverProcessor};
    use apmstore_channel::ChannelManager;
    use apmstore_codec::{CborSerializer, CodecError, CodecResult};
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    struct FailFor(RecordId);

    impl Serializer<DataRecord> for FailFor {
        fn serialize(
            &self,
            value: &DataRecord,
            options: &SerializationOptions,
            output: &mut Vec<u8>,
        ) -> apmstore_codec::CodecResult<()> {
            if value.id == self.0 {
                return Err(CodecError::serialization_failed("induced"));
            }
            CborSerializer::new().serialize(value, options, output)
        }

        fn deserialize(&self, bytes: &[u8]) -> CodecResult<DataRecord> {
            CborSerializer::new().deserialize(bytes)
        }
    }

    struct SlowChannels {
        inner: Arc<ChannelManager>,
        delay: Duration,
    }

    impl ChannelWriter for SlowChannels {
        fn write(&self, bytes: Bytes, path: &Path, on_complete: apmstore_channel::WriteCallback) {
            std::thread::sleep(self.delay);
            self.inner.write(bytes, path, on_complete);
        }

        fn finalize_channel(&self, path: &Path) -> apmstore_channel::ChannelResult<()> {
            self.inner.finalize_channel(path)
        }
    }

    fn writer_with(serializer: Arc<dyn Serializer<DataRecord>>) -> (TempDir, StorageWriter) {
        build_writer(serializer, Arc::new(ChannelManager::file()))
    }

    fn build_writer(
        serializer: Arc<dyn Serializer<DataRecord>>,
        channels: Arc<dyn ChannelWriter>,
    ) -> (TempDir, StorageWriter) {
        let dir = tempdir().unwrap();
        let config = Arc::new(
            StorageConfig::new()
                .root_dir(dir.path())
                .disk_thresholds(0, 0)
                .finalize_wait(Duration::from_millis(10), 200)
                .finish_wait(Duration::from_millis(10), 200),
        );
        let services = WriterServices {
            gate: Arc::new(DiskSpaceGate::new(&config)),
            serializer,
            channels,
            scheduler: Arc::new(Scheduler::new().unwrap()),
        };
        let writer = StorageWriter::new("s1", dir.path().join("s1"), config, services);
        (dir, writer)
    }

    fn writer() -> (TempDir, StorageWriter) {
        let (dir, writer) = writer_with(Arc::new(CborSerializer::new()));
        writer.prepare_for_write().unwrap();
        (dir, writer)
    }

    fn record(id: RecordId) -> Arc<DataRecord> {
        Arc::new(DataRecord::timer(id, 1, 1_000, 2.5))
    }

    fn persisted(writer: &StorageWriter) -> Vec<PersistedIndex> {
        PersistedIndex::load_all(writer.storage_dir()).unwrap()
    }

    #[test]
    fn write_is_refused_before_prepare() {
        let (_dir, writer) = writer_with(Arc::new(CborSerializer::new()));
        assert!(writer.write(record(1), SerializationOptions::new()).is_none());
    }

    #[test]
    fn prepare_is_idempotent() {
        let (_dir, writer) = writer();
        writer.prepare_for_write().unwrap();
        assert!(writer.is_writing_on());
        assert!(writer.storage_dir().is_dir());
        writer.finalize_write();
    }

    #[test]
    fn written_record_is_committed_and_persisted_on_finalize() {
        let (_dir, writer) = writer();
        let handle = writer.write(record(7), SerializationOptions::new()).unwrap();

        let WriteOutcome::Written(descriptor) = handle.wait() else {
            panic!("record was not written");
        };
        assert!(descriptor.is_committed());

        writer.finalize_write();
        let index = persisted(&writer);
        assert_eq!(index.len(), 1);
        let entries: Vec<_> = index[0].descriptors().collect();
        assert_eq!(entries, vec![(7, descriptor)]);

        let channel = writer
            .storage_dir()
            .join(format!("{}.{CHANNEL_EXTENSION}", descriptor.channel_id));
        assert_eq!(std::fs::metadata(channel).unwrap().len(), descriptor.length);
    }

    #[test]
    fn finalize_twice_persists_once() {
        let (_dir, writer) = writer();
        for id in 1..=10 {
            writer.write(record(id), SerializationOptions::new());
        }
        writer.finalize_write();
        writer.finalize_write();

        assert_eq!(writer.queued_task_count(), 0);
        assert_eq!(persisted(&writer).len(), 1);
        assert!(writer.write(record(11), SerializationOptions::new()).is_none());
        assert_eq!(
            writer.prepare_for_write().unwrap_err().code(),
            Some(StorageErrorCode::WriterNotAvailable)
        );
    }

    #[test]
    fn serialization_failure_is_local_to_the_record() {
        let (_dir, writer) = writer_with(Arc::new(FailFor(2)));
        writer.prepare_for_write().unwrap();

        let bad = writer.write(record(2), SerializationOptions::new()).unwrap();
        assert!(matches!(
            bad.wait(),
            WriteOutcome::Failed(WriteFailure::Serialization(_))
        ));
        let good = writer.write(record(3), SerializationOptions::new()).unwrap();
        assert!(good.wait().is_written());

        writer.finalize_write();
        let ids: Vec<_> = persisted(&writer)
            .iter()
            .flat_map(|index| index.descriptors().map(|(id, _)| id).collect::<Vec<_>>())
            .collect();
        assert_eq!(ids, vec![3]);
        assert_eq!(writer.stats().failed, 1);
    }

    #[test]
    fn closed_gate_refuses_writes() {
        let (_dir, writer) = writer();
        writer.inner.services.gate.update(0);
        assert!(writer.write(record(1), SerializationOptions::new()).is_none());
        writer.inner.services.gate.update(u64::MAX);
        assert!(writer.write(record(1), SerializationOptions::new()).is_some());
        writer.finalize_write();
    }

    #[test]
    fn cancel_skips_index_persistence() {
        let (_dir, writer) = writer();
        let handle = writer.write(record(1), SerializationOptions::new()).unwrap();
        handle.wait();

        writer.cancel();
        writer.cancel();
        writer.finalize_write();
        assert!(persisted(&writer).is_empty());
        assert!(!writer.is_writing_on());
    }

    #[test]
    fn cancel_waits_for_channel_writes_and_closes_their_channels() {
        let files = Arc::new(ChannelManager::file());
        let channels = Arc::new(SlowChannels {
            inner: Arc::clone(&files),
            delay: Duration::from_millis(300),
        });
        let (_dir, writer) = build_writer(Arc::new(CborSerializer::new()), channels);
        writer.prepare_for_write().unwrap();

        let in_channel = writer.write(record(1), SerializationOptions::new()).unwrap();
        std::thread::sleep(Duration::from_millis(100));
        writer.cancel();
        std::fs::remove_dir_all(writer.storage_dir()).unwrap();

        let late = writer.write(record(2), SerializationOptions::new());
        assert!(late.is_none());
        assert!(in_channel.wait_timeout(Duration::from_secs(5)).is_some());
        assert!(!writer.storage_dir().exists());
        assert_eq!(files.open_channel_count(), 0);
    }

    #[test]
    fn finalize_closes_channels_opened_by_slow_writes() {
        let files = Arc::new(ChannelManager::file());
        let channels = Arc::new(SlowChannels {
            inner: Arc::clone(&files),
            delay: Duration::from_millis(50),
        });
        let (_dir, writer) = build_writer(Arc::new(CborSerializer::new()), channels);
        writer.prepare_for_write().unwrap();

        let handles: Vec<_> = (1..=5)
            .filter_map(|id| writer.write(record(id), SerializationOptions::new()))
            .collect();
        writer.finalize_write();

        assert!(handles.iter().all(|handle| handle.is_done()));
        assert_eq!(files.open_channel_count(), 0);
    }

    #[test]
    fn process_without_processors_writes_everything() {
        let (_dir, writer) = writer();
        let records: Vec<_> = (1..=25).map(record).collect();
        let outcomes = writer.process_synchronously(&records, &mut []);
        assert_eq!(outcomes.len(), 25);
        assert!(outcomes.iter().all(WriteOutcome::is_written));
        writer.finalize_write();
    }

    #[test]
    fn process_routes_through_processors() {
        let (_dir, writer) = writer();
        let records: Vec<_> = (1..=4)
            .map(|id| Arc::new(DataRecord::timer(id, id % 2, 0, 1.0)))
            .collect();
        let mut processors: Vec<Box<dyn DataProcessor>> = vec![Box::new(AgentFilterProcessor::new(
            [1],
            vec![Box::new(DataSaverProcessor::all())],
        ))];

        let outcomes = writer.process_synchronously(&records, &mut processors);
        assert_eq!(outcomes.len(), 2);
        writer.finalize_write();

        let mut ids: Vec<_> = persisted(&writer)
            .iter()
            .flat_map(|index| index.descriptors().map(|(id, _)| id).collect::<Vec<_>>())
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn status_is_good_when_keeping_up() {
        let (_dir, writer) = writer();
        let records: Vec<_> = (1..=10).map(record).collect();
        writer.process_synchronously(&records, &mut []);
        assert_eq!(writer.sample_writing_status(), WritingStatus::Good);
        assert_eq!(writer.writing_status(), WritingStatus::Good);
        writer.finalize_write();
    }
}
