//! Storage lifecycle manager.
//!
//! The manager is the only authority over which storages exist, which are
//! open for writing, and which one is the recording target. Transitions of
//! one storage are serialized by that storage's own lock, so different
//! storages move through their lifecycle concurrently.

use crate::config::StorageConfig;
use crate::disk::DiskSpaceGate;
use crate::error::{CoreError, CoreResult, StorageErrorCode};
use crate::handle::{wait_all, WriteHandle};
use crate::layout::StorageRoot;
use crate::processor::DataProcessor;
use crate::record::{DataRecord, RecordId};
use crate::recorder::{RecordingProperties, RecordingState, StorageRecorder};
use crate::scheduler::Scheduler;
use crate::source::RecordSource;
use crate::status::WritingStatus;
use crate::storage::{StorageData, StorageState};
use crate::writer::{StorageWriter, WriterServices};
use apmstore_channel::{ChannelManager, ChannelWriter};
use apmstore_codec::{CborSerializer, Serializer};
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

struct StorageEntry {
    data: Mutex<StorageData>,
    /// Set under the `data` lock once the storage is deleted.
    deleted: AtomicBool,
}

impl StorageEntry {
    fn new(data: StorageData) -> Arc<Self> {
        Arc::new(Self {
            data: Mutex::new(data),
            deleted: AtomicBool::new(false),
        })
    }

    /// Locks the storage for `operation`. A caller that looked the entry up
    /// before a concurrent delete finds it gone here.
    fn lock(&self, operation: &str) -> CoreResult<MutexGuard<'_, StorageData>> {
        let data = self.data.lock();
        if self.is_deleted() {
            return Err(CoreError::business(operation, StorageErrorCode::DoesNotExist));
        }
        Ok(data)
    }

    fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }
}

struct ManagerInner {
    config: Arc<StorageConfig>,
    root: StorageRoot,
    services: WriterServices,
    existing: DashMap<String, Arc<StorageEntry>>,
    opened: DashMap<String, StorageWriter>,
    recorder: Mutex<StorageRecorder>,
    recording_target: RwLock<Option<String>>,
    maintenance: Mutex<Vec<JoinHandle<()>>>,
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        for ticker in self.maintenance.get_mut().drain(..) {
            ticker.abort();
        }
    }
}

/// Creates, opens, closes, deletes and records into storages.
///
/// # Example
///
/// ```no_run
/// use apmstore_core::{DataRecord, StorageConfig, StorageManager};
/// use std::sync::Arc;
///
/// let manager = StorageManager::open(StorageConfig::new().root_dir("/var/lib/apmstore"))?;
/// let storage = manager.create_storage("nightly load test", None)?;
/// manager.open_storage(storage.id())?;
///
/// let records = vec![Arc::new(DataRecord::timer(1, 10, 1_700_000_000_000, 12.5))];
/// manager.write_to_storage(storage.id(), &records, Vec::new(), true)?;
///
/// manager.close_storage(storage.id())?;
/// manager.shutdown();
/// # Ok::<(), apmstore_core::CoreError>(())
/// ```
#[derive(Clone)]
pub struct StorageManager {
    inner: Arc<ManagerInner>,
}

impl StorageManager {
    /// Opens the storage root with file channels and CBOR serialization.
    ///
    /// # Errors
    ///
    /// Fails if the root cannot be created or locked, or its metadata
    /// cannot be listed.
    pub fn open(config: StorageConfig) -> CoreResult<Self> {
        Self::with_collaborators(
            config,
            Arc::new(CborSerializer::new()),
            Arc::new(ChannelManager::file()),
        )
    }

    /// Opens the storage root with the given serializer and channel layer.
    ///
    /// Closed storages found under the root are loaded; storages left in any
    /// other state are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Same as [`StorageManager::open`].
    pub fn with_collaborators(
        config: StorageConfig,
        serializer: Arc<dyn Serializer<DataRecord>>,
        channels: Arc<dyn ChannelWriter>,
    ) -> CoreResult<Self> {
        let root = StorageRoot::open(&config.root_dir)?;
        let config = Arc::new(config);
        let services = WriterServices {
            gate: Arc::new(DiskSpaceGate::new(&config)),
            serializer,
            channels,
            scheduler: Arc::new(Scheduler::new()?),
        };

        let existing = DashMap::new();
        for data in root.list_metadata()? {
            if data.is_closed() {
                existing.insert(data.id().to_string(), StorageEntry::new(data));
            } else {
                warn!(
                    storage = %data.id(),
                    state = %data.state(),
                    "storage was not closed properly, skipped"
                );
            }
        }

        let manager = Self {
            inner: Arc::new(ManagerInner {
                config,
                root,
                services,
                existing,
                opened: DashMap::new(),
                recorder: Mutex::new(StorageRecorder::new()),
                recording_target: RwLock::new(None),
                maintenance: Mutex::new(Vec::new()),
            }),
        };
        manager.refresh_disk_space();
        manager.start_maintenance();

        info!(
            root = %manager.inner.root.path().display(),
            storages = manager.inner.existing.len(),
            "storage manager started"
        );
        Ok(manager)
    }

    /// Creates a new storage.
    ///
    /// # Errors
    ///
    /// Fails with [`StorageErrorCode::NameNotProvided`] for a blank name, or
    /// if the metadata cannot be written.
    pub fn create_storage(
        &self,
        name: &str,
        description: Option<String>,
    ) -> CoreResult<StorageData> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CoreError::business(
                "create storage",
                StorageErrorCode::NameNotProvided,
            ));
        }

        let data = StorageData::new(name, description, self.inner.config.server_version.clone());
        self.inner.root.save_metadata(&data)?;
        self.inner
            .existing
            .insert(data.id().to_string(), StorageEntry::new(data.clone()));
        info!(storage = %data.id(), name, "storage created");
        Ok(data)
    }

    /// Opens a storage for writing. Opening an open storage does nothing.
    ///
    /// # Errors
    ///
    /// Fails with [`StorageErrorCode::AlreadyClosed`] for a closed storage.
    pub fn open_storage(&self, id: &str) -> CoreResult<()> {
        let entry = self.entry(id, "open storage")?;
        let mut data = entry.lock("open storage")?;
        self.open_locked(&mut data).map(|_| ())
    }

    /// Finalizes the storage's writer and closes the storage for good.
    ///
    /// # Errors
    ///
    /// Fails with [`StorageErrorCode::InUseByRecording`] while the storage is
    /// recording, and with [`StorageErrorCode::AlreadyClosed`] when it is
    /// already closed.
    pub fn close_storage(&self, id: &str) -> CoreResult<()> {
        let entry = self.entry(id, "close storage")?;
        if self.is_recording_target(id) {
            return Err(CoreError::business(
                "close storage",
                StorageErrorCode::InUseByRecording,
            ));
        }

        let mut data = entry.lock("close storage")?;
        match data.state() {
            StorageState::Recording => {
                return Err(CoreError::business(
                    "close storage",
                    StorageErrorCode::InUseByRecording,
                ));
            }
            StorageState::Closed => {
                return Err(CoreError::business(
                    "close storage",
                    StorageErrorCode::AlreadyClosed,
                ));
            }
            StorageState::CreatedNotOpened | StorageState::Opened => {}
        }

        if let Some((_, writer)) = self.inner.opened.remove(id) {
            writer.finalize_write();
        }
        data.disk_size = self.inner.root.storage_disk_size(id)?;
        data.mark_closed()?;
        self.inner.root.save_metadata(&data)?;
        info!(storage = %id, disk_size = data.disk_size, "storage closed");
        Ok(())
    }

    /// Deletes a storage and everything it wrote.
    ///
    /// An open writer is cancelled, not finalized.
    ///
    /// # Errors
    ///
    /// Fails with [`StorageErrorCode::InUseByRecording`] while the storage is
    /// recording.
    pub fn delete_storage(&self, id: &str) -> CoreResult<()> {
        let entry = self.entry(id, "delete storage")?;
        if self.is_recording_target(id) {
            return Err(CoreError::business(
                "delete storage",
                StorageErrorCode::InUseByRecording,
            ));
        }

        let data = entry.lock("delete storage")?;
        if data.state() == StorageState::Recording {
            return Err(CoreError::business(
                "delete storage",
                StorageErrorCode::InUseByRecording,
            ));
        }

        if let Some((_, writer)) = self.inner.opened.remove(id) {
            writer.cancel();
        }
        self.inner.root.delete_storage_dir(id)?;
        entry.deleted.store(true, Ordering::Release);
        self.inner.existing.remove(id);
        info!(storage = %id, name = %data.name, "storage deleted");
        Ok(())
    }

    /// Starts a recording into the storage, or schedules it when the
    /// properties carry a start delay. The storage is opened if needed.
    ///
    /// # Errors
    ///
    /// Fails with [`StorageErrorCode::RecordingAlreadyActive`] while another
    /// recording is on or scheduled, with
    /// [`StorageErrorCode::InvalidRecordingProperties`] when no processors
    /// are given, and with [`StorageErrorCode::AlreadyClosed`] for a closed
    /// storage.
    pub fn start_or_schedule_recording(
        &self,
        id: &str,
        properties: RecordingProperties,
    ) -> CoreResult<RecordingState> {
        let entry = self.entry(id, "start recording")?;
        let mut recorder = self.inner.recorder.lock();
        if recorder.state() != RecordingState::Off {
            return Err(CoreError::business(
                "start recording",
                StorageErrorCode::RecordingAlreadyActive,
            ));
        }

        let mut data = entry.lock("start recording")?;
        let writer = self.open_locked(&mut data)?;
        let start_delay = properties.get_start_delay().unwrap_or_default();
        let duration = properties.get_duration();

        let state = recorder.start_or_schedule(writer, properties)?;
        if let Err(e) = data.mark_recording() {
            recorder.stop();
            return Err(e);
        }
        if let Err(e) = self.inner.root.save_metadata(&data) {
            data.mark_recording_stopped();
            recorder.stop();
            return Err(e);
        }
        *self.inner.recording_target.write() = Some(id.to_string());
        drop(data);

        let scheduler = &self.inner.services.scheduler;
        if state == RecordingState::Scheduled {
            let weak = Arc::downgrade(&self.inner);
            recorder.attach_timer(scheduler.after(start_delay, move || {
                if let Some(manager) = Self::upgrade(&weak) {
                    manager.inner.recorder.lock().activate();
                }
            }));
        }
        if let Some(duration) = duration {
            let weak = Arc::downgrade(&self.inner);
            recorder.attach_timer(scheduler.after(start_delay + duration, move || {
                if let Some(manager) = Self::upgrade(&weak) {
                    if let Err(e) = manager.stop_recording() {
                        error!(error = %e, "failed to stop recording after its duration");
                    }
                }
            }));
        }

        info!(storage = %id, ?state, ?start_delay, ?duration, "recording requested");
        Ok(state)
    }

    /// Stops the active or scheduled recording. Does nothing if there is none.
    ///
    /// The storage goes back to `Opened`, or is closed if the recording was
    /// started with auto finalize.
    ///
    /// # Errors
    ///
    /// Fails if the storage metadata cannot be written or the auto close fails.
    pub fn stop_recording(&self) -> CoreResult<()> {
        let (writer, auto_finalize) = {
            let mut recorder = self.inner.recorder.lock();
            let Some(stopped) = recorder.stop() else {
                return Ok(());
            };
            self.inner.recording_target.write().take();
            stopped
        };

        let id = writer.storage_id().to_string();
        let Some(entry) = self.lookup(&id) else {
            return Ok(());
        };
        {
            let mut data = entry.lock("stop recording")?;
            data.mark_recording_stopped();
            self.inner.root.save_metadata(&data)?;
        }
        if auto_finalize {
            self.close_storage(&id)?;
        }
        Ok(())
    }

    /// Passes a live record to the active recording.
    ///
    /// If the disk space gate refuses writes, the recording is stopped and
    /// nothing is written.
    pub fn record(&self, record: Arc<DataRecord>) -> Vec<WriteHandle> {
        if !self.inner.services.gate.can_write_more() {
            let recording = self.inner.recorder.lock().state() != RecordingState::Off;
            if recording {
                warn!(
                    bytes_left = self.inner.services.gate.bytes_left(),
                    "not enough disk space, stopping recording"
                );
                if let Err(e) = self.stop_recording() {
                    error!(error = %e, "failed to stop recording");
                }
            }
            return Vec::new();
        }
        self.inner.recorder.lock().record(&record)
    }

    /// Writes records into a storage, opening it if it was only created.
    ///
    /// With `synchronously` the call returns once every write completed.
    ///
    /// # Errors
    ///
    /// Fails with [`StorageErrorCode::WriteFailed`] if the storage is the
    /// recording target and with [`StorageErrorCode::AlreadyClosed`] if it is
    /// closed.
    pub fn write_to_storage(
        &self,
        id: &str,
        records: &[Arc<DataRecord>],
        mut processors: Vec<Box<dyn DataProcessor>>,
        synchronously: bool,
    ) -> CoreResult<Vec<WriteHandle>> {
        let entry = self.entry(id, "write to storage")?;
        if self.is_recording_target(id) {
            return Err(CoreError::business(
                "write to storage",
                StorageErrorCode::WriteFailed,
            ));
        }

        let writer = {
            let mut data = entry.lock("write to storage")?;
            match data.state() {
                StorageState::Recording => {
                    return Err(CoreError::business(
                        "write to storage",
                        StorageErrorCode::WriteFailed,
                    ));
                }
                StorageState::Closed => {
                    return Err(CoreError::business(
                        "write to storage",
                        StorageErrorCode::AlreadyClosed,
                    ));
                }
                StorageState::CreatedNotOpened | StorageState::Opened => {}
            }
            self.open_locked(&mut data)?
        };

        let handles = writer.process(records, &mut processors);
        if synchronously {
            wait_all(&handles, self.inner.config.sync_poll_interval);
        }
        debug!(
            storage = %id,
            records = records.len(),
            writes = handles.len(),
            "records written to storage"
        );
        Ok(handles)
    }

    /// Copies buffered records of the given agents into a storage.
    ///
    /// The time window comes from the first processor that declares one,
    /// otherwise everything from the oldest buffered record on is copied.
    /// Returns the number of records read from the source.
    ///
    /// # Errors
    ///
    /// Same as [`StorageManager::write_to_storage`], plus close errors when
    /// `auto_finalize` is set.
    pub fn copy_buffer_to_storage(
        &self,
        id: &str,
        source: &dyn RecordSource,
        platforms: &[u64],
        processors: Vec<Box<dyn DataProcessor>>,
        auto_finalize: bool,
    ) -> CoreResult<usize> {
        let (from_ms, to_ms) = processors
            .iter()
            .find_map(|processor| processor.time_frame())
            .unwrap_or_else(|| (source.oldest_timestamp().unwrap_or(i64::MIN), i64::MAX));

        let records = source.records_for_agents(platforms, from_ms, to_ms);
        self.write_to_storage(id, &records, processors, true)?;
        if auto_finalize {
            self.close_storage(id)?;
        }
        info!(storage = %id, records = records.len(), from_ms, to_ms, "buffer copied to storage");
        Ok(records.len())
    }

    /// Copies the records with the given ids of one agent into a storage.
    ///
    /// Duplicate ids are copied once. Returns the number of records found.
    ///
    /// # Errors
    ///
    /// Same as [`StorageManager::copy_buffer_to_storage`].
    pub fn copy_data_to_storage(
        &self,
        id: &str,
        source: &dyn RecordSource,
        record_ids: &[RecordId],
        platform_ident: u64,
        processors: Vec<Box<dyn DataProcessor>>,
        auto_finalize: bool,
    ) -> CoreResult<usize> {
        let ids: BTreeSet<RecordId> = record_ids.iter().copied().collect();
        let records = source.records_by_ids(platform_ident, &ids);
        self.write_to_storage(id, &records, processors, true)?;
        if auto_finalize {
            self.close_storage(id)?;
        }
        info!(
            storage = %id,
            requested = ids.len(),
            found = records.len(),
            "data copied to storage"
        );
        Ok(records.len())
    }

    /// Replaces a storage's name, description and labels.
    ///
    /// # Errors
    ///
    /// Fails with [`StorageErrorCode::NameNotProvided`] for a blank name.
    pub fn update_storage_data(
        &self,
        id: &str,
        name: &str,
        description: Option<String>,
        labels: BTreeSet<String>,
    ) -> CoreResult<StorageData> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CoreError::business(
                "update storage",
                StorageErrorCode::NameNotProvided,
            ));
        }
        let entry = self.entry(id, "update storage")?;
        let mut data = entry.lock("update storage")?;
        data.name = name.to_string();
        data.description = description;
        data.labels = labels;
        self.inner.root.save_metadata(&data)?;
        Ok(data.clone())
    }

    /// Every known storage, sorted by name.
    #[must_use]
    pub fn existing_storages(&self) -> Vec<StorageData> {
        self.storages_where(|_| true)
    }

    /// Storages open for writing, including the recording one.
    #[must_use]
    pub fn opened_storages(&self) -> Vec<StorageData> {
        self.storages_where(StorageData::is_writable)
    }

    /// Closed storages, which can be read.
    #[must_use]
    pub fn readable_storages(&self) -> Vec<StorageData> {
        self.storages_where(StorageData::is_closed)
    }

    /// Metadata of one storage.
    ///
    /// # Errors
    ///
    /// Fails with [`StorageErrorCode::DoesNotExist`] for an unknown id.
    pub fn storage(&self, id: &str) -> CoreResult<StorageData> {
        let entry = self.entry(id, "get storage")?;
        let data = entry.lock("get storage")?;
        Ok(data.clone())
    }

    /// Writer of an open storage.
    #[must_use]
    pub fn writer(&self, id: &str) -> Option<StorageWriter> {
        self.inner.opened.get(id).map(|writer| writer.value().clone())
    }

    /// Write tasks not yet completed across all open storages.
    #[must_use]
    pub fn queued_task_count(&self) -> u64 {
        self.inner
            .opened
            .iter()
            .map(|writer| writer.value().queued_task_count())
            .sum()
    }

    /// Writing status of every open storage.
    #[must_use]
    pub fn writers_status(&self) -> BTreeMap<String, WritingStatus> {
        self.inner
            .opened
            .iter()
            .map(|writer| (writer.key().clone(), writer.value().writing_status()))
            .collect()
    }

    /// Current recording state.
    #[must_use]
    pub fn recording_state(&self) -> RecordingState {
        self.inner.recorder.lock().state()
    }

    /// The storage being recorded into, if any.
    #[must_use]
    pub fn recording_storage(&self) -> Option<StorageData> {
        let id = self.inner.recording_target.read().clone()?;
        self.storage(&id).ok()
    }

    /// The disk space gate shared by all writers.
    #[must_use]
    pub fn disk_gate(&self) -> &DiskSpaceGate {
        &self.inner.services.gate
    }

    /// Root directory of all storages.
    #[must_use]
    pub fn root_path(&self) -> &Path {
        self.inner.root.path()
    }

    /// Effective configuration.
    #[must_use]
    pub fn config(&self) -> &StorageConfig {
        &self.inner.config
    }

    /// Stops maintenance and any recording, then closes every open storage.
    pub fn shutdown(&self) {
        for ticker in self.inner.maintenance.lock().drain(..) {
            ticker.abort();
        }
        if let Err(e) = self.stop_recording() {
            error!(error = %e, "failed to stop recording on shutdown");
        }

        let opened: Vec<String> = self
            .inner
            .opened
            .iter()
            .map(|writer| writer.key().clone())
            .collect();
        for id in opened {
            if let Err(e) = self.close_storage(&id) {
                error!(storage = %id, error = %e, "failed to close storage on shutdown");
            }
        }
        info!("storage manager shut down");
    }

    fn upgrade(weak: &Weak<ManagerInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    fn lookup(&self, id: &str) -> Option<Arc<StorageEntry>> {
        self.inner.existing.get(id).map(|entry| Arc::clone(entry.value()))
    }

    fn entry(&self, id: &str, operation: &str) -> CoreResult<Arc<StorageEntry>> {
        self.lookup(id)
            .ok_or_else(|| CoreError::business(operation, StorageErrorCode::DoesNotExist))
    }

    fn is_recording_target(&self, id: &str) -> bool {
        self.inner.recording_target.read().as_deref() == Some(id)
    }

    fn storages_where(&self, filter: impl Fn(&StorageData) -> bool) -> Vec<StorageData> {
        let entries: Vec<Arc<StorageEntry>> = self
            .inner
            .existing
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let mut storages: Vec<StorageData> = entries
            .iter()
            .filter_map(|entry| entry.lock("list storages").ok().map(|data| data.clone()))
            .filter(|data| filter(data))
            .collect();
        storages.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id().cmp(b.id())));
        storages
    }

    /// Returns the writer of the storage, creating and preparing one first if
    /// the storage is not open yet. The caller holds the storage's lock.
    fn open_locked(&self, data: &mut StorageData) -> CoreResult<StorageWriter> {
        let id = data.id().to_string();
        if let Some(writer) = self.inner.opened.get(&id) {
            return Ok(writer.value().clone());
        }
        if data.is_closed() {
            return Err(CoreError::business(
                "open storage",
                StorageErrorCode::AlreadyClosed,
            ));
        }

        let writer = StorageWriter::new(
            id.clone(),
            self.inner.root.storage_dir(&id),
            Arc::clone(&self.inner.config),
            self.inner.services.clone(),
        );
        writer.prepare_for_write()?;

        let previous = data.state();
        if let Err(e) = data.mark_opened() {
            writer.cancel();
            return Err(e);
        }
        if let Err(e) = self.inner.root.save_metadata(data) {
            writer.cancel();
            data.restore_state(previous);
            return Err(e);
        }
        self.inner.opened.insert(id.clone(), writer.clone());
        info!(storage = %id, "storage opened");
        Ok(writer)
    }

    fn start_maintenance(&self) {
        let scheduler = &self.inner.services.scheduler;

        let weak = Arc::downgrade(&self.inner);
        let disk = scheduler.every(self.inner.config.disk_check_interval, move || {
            Self::upgrade(&weak).is_some_and(|manager| {
                manager.check_disk_space();
                true
            })
        });

        let weak = Arc::downgrade(&self.inner);
        let sizes = scheduler.every(self.inner.config.size_refresh_interval, move || {
            Self::upgrade(&weak).is_some_and(|manager| {
                manager.refresh_storage_sizes();
                true
            })
        });

        self.inner.maintenance.lock().extend([disk, sizes]);
    }

    fn refresh_disk_space(&self) {
        let occupied = if self.inner.config.max_hard_drive_occupancy.is_some() {
            let ids: Vec<String> = self
                .inner
                .existing
                .iter()
                .map(|entry| entry.key().clone())
                .collect();
            ids.iter()
                .map(|id| self.inner.root.storage_disk_size(id).unwrap_or(0))
                .sum()
        } else {
            0
        };
        if let Err(e) = self.inner.services.gate.refresh(occupied) {
            warn!(error = %e, "failed to check free disk space");
        }
    }

    fn check_disk_space(&self) {
        self.refresh_disk_space();
        if self.inner.services.gate.can_write_more() {
            return;
        }
        let recording = self.inner.recorder.lock().state() != RecordingState::Off;
        if recording {
            warn!(
                bytes_left = self.inner.services.gate.bytes_left(),
                "not enough disk space, stopping recording"
            );
            if let Err(e) = self.stop_recording() {
                error!(error = %e, "failed to stop recording");
            }
        }
    }

    fn refresh_storage_sizes(&self) {
        let opened: Vec<String> = self
            .inner
            .opened
            .iter()
            .map(|writer| writer.key().clone())
            .collect();
        for id in opened {
            let Some(entry) = self.lookup(&id) else {
                continue;
            };
            // skip storages in the middle of a transition
            let Some(mut data) = entry.data.try_lock() else {
                continue;
            };
            if entry.is_deleted() || !data.is_writable() {
                continue;
            }
            match self.inner.root.storage_disk_size(&id) {
                Ok(size) if size != data.disk_size => {
                    data.disk_size = size;
                    if let Err(e) = self.inner.root.save_metadata(&data) {
                        warn!(storage = %id, error = %e, "failed to save refreshed storage size");
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(storage = %id, error = %e, "failed to compute storage size"),
            }
        }
    }
}

impl fmt::Debug for StorageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageManager")
            .field("root", &self.inner.root.path())
            .field("existing", &self.inner.existing.len())
            .field("opened", &self.inner.opened.len())
            .field("recording", &*self.inner.recording_target.read())
            .finish_non_exhaustive()
    }
}
