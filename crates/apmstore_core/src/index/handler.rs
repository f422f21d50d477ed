//! Rotating indexing tree shared by the write tasks of one storage writer.

use super::descriptor::Descriptor;
use super::generation::IndexGeneration;
use super::persist::PersistedIndex;
use crate::config::StorageConfig;
use crate::drain::DrainSignal;
use crate::error::{CoreError, CoreResult};
use crate::record::{DataRecord, RecordId};
use crate::scheduler::Scheduler;
use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Identifier of one write task.
pub type TaskId = u64;

#[derive(Debug)]
struct Reservation {
    /// `None` until the generation serving the task is known.
    generation: Option<Arc<IndexGeneration>>,
    record_id: RecordId,
}

#[derive(Debug, Clone, Copy)]
struct TreeSettings {
    max_size: u64,
    check_interval: Duration,
    persist_recheck: Duration,
    finish_wait_interval: Duration,
    finish_wait_iterations: u32,
}

impl From<&StorageConfig> for TreeSettings {
    fn from(config: &StorageConfig) -> Self {
        Self {
            max_size: config.max_indexing_tree_size,
            check_interval: config.tree_check_interval,
            persist_recheck: config.persist_recheck_interval,
            finish_wait_interval: config.finish_wait_interval,
            finish_wait_iterations: config.finish_wait_iterations,
        }
    }
}

struct TreeInner {
    storage: String,
    storage_dir: PathBuf,
    settings: TreeSettings,
    scheduler: Arc<Scheduler>,
    current: ArcSwapOption<IndexGeneration>,
    in_flight: DashMap<TaskId, Reservation>,
    retired: Mutex<Vec<Arc<IndexGeneration>>>,
    deferred: Mutex<Vec<JoinHandle<()>>>,
    persist_lock: Mutex<()>,
    ticker: Mutex<Option<JoinHandle<()>>>,
    drain: DrainSignal,
    next_generation: AtomicU64,
    persisted: AtomicU64,
    finished: AtomicBool,
}

/// Owns the indexing tree of one open storage.
///
/// Write tasks reserve descriptors from the current generation, which is
/// published through a single atomic reference. A periodic check swaps in a
/// fresh generation once the current one grows past the configured size, and
/// persists the retired generation after every task that reserved from it
/// has committed or rolled back.
///
/// # Example
///
/// ```rust,ignore
/// let tree = IndexingTreeHandler::new("storage-id", dir, &config, scheduler);
/// tree.prepare()?;
/// let placeholder = tree.start_write(task_id, Some(&record))?;
/// // ... write bytes to channel `placeholder.channel_id` ...
/// tree.write_successful(task_id, offset, length);
/// tree.finish();
/// ```
pub struct IndexingTreeHandler {
    inner: Arc<TreeInner>,
}

impl IndexingTreeHandler {
    /// Creates a handler persisting generations into `storage_dir`.
    #[must_use]
    pub fn new(
        storage: impl Into<String>,
        storage_dir: impl Into<PathBuf>,
        config: &StorageConfig,
        scheduler: Arc<Scheduler>,
    ) -> Self {
        Self {
            inner: Arc::new(TreeInner {
                storage: storage.into(),
                storage_dir: storage_dir.into(),
                settings: TreeSettings::from(config),
                scheduler,
                current: ArcSwapOption::from(None),
                in_flight: DashMap::new(),
                retired: Mutex::new(Vec::new()),
                deferred: Mutex::new(Vec::new()),
                persist_lock: Mutex::new(()),
                ticker: Mutex::new(None),
                drain: DrainSignal::new(),
                next_generation: AtomicU64::new(0),
                persisted: AtomicU64::new(0),
                finished: AtomicBool::new(false),
            }),
        }
    }

    /// Allocates the first generation and starts the rotation check.
    ///
    /// Calling it again on a prepared tree does nothing.
    ///
    /// # Errors
    ///
    /// Fails if the tree was already finished or cancelled, or if the
    /// storage directory cannot be created.
    pub fn prepare(&self) -> CoreResult<()> {
        if self.inner.finished.load(Ordering::Acquire) {
            return Err(CoreError::indexing("indexing tree was already finished"));
        }

        let mut ticker = self.inner.ticker.lock();
        if ticker.is_some() {
            return Ok(());
        }

        std::fs::create_dir_all(&self.inner.storage_dir)?;
        let generation = self.inner.new_generation();
        debug!(
            storage = %self.inner.storage,
            channel = generation.channel_id(),
            "indexing tree prepared"
        );
        self.inner.current.store(Some(Arc::new(generation)));

        let weak = Arc::downgrade(&self.inner);
        *ticker = Some(
            self.inner
                .scheduler
                .every(self.inner.settings.check_interval, move || match weak.upgrade() {
                    Some(inner) => {
                        inner.rotate_if_needed();
                        true
                    }
                    None => false,
                }),
        );
        Ok(())
    }

    /// Reserves a descriptor for the record of `task_id`.
    ///
    /// Returns the placeholder descriptor naming the channel the record must
    /// be written to.
    ///
    /// # Errors
    ///
    /// Fails if the record is absent, the tree is not active, or the current
    /// generation rejects the record id. No reservation is left behind.
    pub fn start_write(
        &self,
        task_id: TaskId,
        record: Option<&DataRecord>,
    ) -> CoreResult<Descriptor> {
        let Some(record) = record else {
            return Err(CoreError::indexing("record payload is absent"));
        };

        // registered before the generation is read, so a concurrent rotation
        // always sees this task in its snapshot
        self.inner.in_flight.insert(
            task_id,
            Reservation {
                generation: None,
                record_id: record.id,
            },
        );

        let Some(generation) = self.inner.current.load_full() else {
            self.inner.release(task_id);
            return Err(CoreError::indexing("indexing tree is not active"));
        };

        match generation.reserve(record.id) {
            Ok(descriptor) => {
                if let Some(mut reservation) = self.inner.in_flight.get_mut(&task_id) {
                    reservation.generation = Some(generation);
                }
                Ok(descriptor)
            }
            Err(e) => {
                self.inner.release(task_id);
                Err(e)
            }
        }
    }

    /// Commits the reservation of `task_id` with its real location.
    ///
    /// Returns the committed descriptor, or `None` if the task had no
    /// reservation.
    pub fn write_successful(
        &self,
        task_id: TaskId,
        offset: u64,
        length: u64,
    ) -> Option<Descriptor> {
        let (generation, record_id) = self.inner.reservation(task_id)?;
        let descriptor = generation.and_then(|g| g.commit(record_id, offset, length));
        self.inner.release(task_id);
        descriptor
    }

    /// Rolls back the reservation of `task_id`.
    pub fn write_failed(&self, task_id: TaskId) {
        let Some((generation, record_id)) = self.inner.reservation(task_id) else {
            return;
        };
        if let Some(generation) = generation {
            generation.remove(record_id);
        }
        self.inner.release(task_id);
    }

    /// Rotates the current generation if it exceeds the size threshold.
    ///
    /// Returns true if this call performed the rotation.
    pub fn rotate_if_needed(&self) -> bool {
        self.inner.rotate_if_needed()
    }

    /// Stops rotation, drains in-flight tasks (bounded), and persists the
    /// final generation together with any retired generation still pending.
    ///
    /// Returns the number of generations persisted by this call; a second
    /// call persists nothing.
    pub fn finish(&self) -> usize {
        if self.inner.finished.swap(true, Ordering::AcqRel) {
            return 0;
        }
        if let Some(ticker) = self.inner.ticker.lock().take() {
            ticker.abort();
        }

        let last = self.inner.current.swap(None);
        let inner = &self.inner;
        inner.drain.wait_until(
            || inner.in_flight.is_empty(),
            inner.settings.finish_wait_interval,
            inner.settings.finish_wait_iterations,
            "indexing tree tasks",
        );

        let mut persisted = 0;
        if let Some(generation) = last {
            if inner.persist(&generation) {
                persisted += 1;
            }
        }
        let retired = std::mem::take(&mut *inner.retired.lock());
        for generation in retired {
            if inner.persist(&generation) {
                persisted += 1;
            }
        }
        for task in inner.deferred.lock().drain(..) {
            task.abort();
        }
        // a deferred persistence that already claimed its generation finishes first
        drop(inner.persist_lock.lock());

        info!(storage = %inner.storage, persisted, "indexing tree finished");
        persisted
    }

    /// Drops the tree without persisting anything.
    pub fn cancel(&self) {
        if self.inner.finished.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(ticker) = self.inner.ticker.lock().take() {
            ticker.abort();
        }
        for task in self.inner.deferred.lock().drain(..) {
            task.abort();
        }
        self.inner.current.store(None);
        self.inner.retired.lock().clear();
        self.inner.in_flight.clear();
        self.inner.drain.notify();
        debug!(storage = %self.inner.storage, "indexing tree cancelled");
    }

    /// Number of tasks holding a reservation.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.inner.in_flight.len()
    }

    /// The generation currently serving reservations.
    #[must_use]
    pub fn current_generation(&self) -> Option<Arc<IndexGeneration>> {
        self.inner.current.load_full()
    }

    /// Number of generations written to disk so far.
    #[must_use]
    pub fn persisted_generations(&self) -> u64 {
        self.inner.persisted.load(Ordering::Acquire)
    }

    /// Directory the index files are written to.
    #[must_use]
    pub fn storage_dir(&self) -> &Path {
        &self.inner.storage_dir
    }
}

impl Drop for IndexingTreeHandler {
    fn drop(&mut self) {
        if let Some(ticker) = self.inner.ticker.lock().take() {
            ticker.abort();
        }
    }
}

impl fmt::Debug for IndexingTreeHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexingTreeHandler")
            .field("storage", &self.inner.storage)
            .field("in_flight", &self.inner.in_flight.len())
            .field("persisted", &self.persisted_generations())
            .finish_non_exhaustive()
    }
}

impl TreeInner {
    fn new_generation(&self) -> IndexGeneration {
        let mut channel_id = 0;
        while channel_id == 0 {
            channel_id = rand::random::<u32>();
        }
        IndexGeneration::new(self.next_generation.fetch_add(1, Ordering::AcqRel), channel_id)
    }

    fn reservation(&self, task_id: TaskId) -> Option<(Option<Arc<IndexGeneration>>, RecordId)> {
        // the map guard must be dropped before `release` removes the entry
        let reservation = self.in_flight.get(&task_id)?;
        Some((reservation.generation.clone(), reservation.record_id))
    }

    fn release(&self, task_id: TaskId) {
        self.in_flight.remove(&task_id);
        self.drain.notify();
    }

    fn rotate_if_needed(self: &Arc<Self>) -> bool {
        if self.finished.load(Ordering::Acquire) {
            return false;
        }
        let current = self.current.load_full();
        let Some(old) = current.as_ref() else {
            return false;
        };
        let size = old.estimated_size();
        if size <= self.settings.max_size {
            return false;
        }

        let fresh = Arc::new(self.new_generation());
        let previous = self.current.compare_and_swap(&current, Some(fresh));
        let swapped = matches!(&*previous, Some(p) if Arc::ptr_eq(p, old));
        if !swapped {
            debug!(storage = %self.storage, "rotation lost a race, retrying on next check");
            return false;
        }

        self.retired.lock().push(Arc::clone(old));
        let pending: Vec<TaskId> = self
            .in_flight
            .iter()
            .filter(|entry| match &entry.generation {
                Some(generation) => Arc::ptr_eq(generation, old),
                None => true,
            })
            .map(|entry| *entry.key())
            .collect();

        info!(
            storage = %self.storage,
            generation = old.generation(),
            size,
            pending = pending.len(),
            "indexing tree rotated"
        );

        let task = self
            .scheduler
            .spawn(persist_when_drained(Arc::clone(self), Arc::clone(old), pending));
        let mut deferred = self.deferred.lock();
        deferred.retain(|handle| !handle.is_finished());
        deferred.push(task);
        true
    }

    /// Persists `generation` unless it was already claimed.
    ///
    /// Returns true if this call claimed it.
    fn persist(&self, generation: &Arc<IndexGeneration>) -> bool {
        let _guard = self.persist_lock.lock();
        if !generation.claim_persist() {
            return false;
        }
        self.retired.lock().retain(|g| !Arc::ptr_eq(g, generation));

        let index = PersistedIndex::from_generation(generation);
        if index.entries.is_empty() {
            debug!(
                storage = %self.storage,
                generation = generation.generation(),
                "skipping empty indexing tree generation"
            );
            return true;
        }

        match index.save(&self.storage_dir) {
            Ok(path) => {
                self.persisted.fetch_add(1, Ordering::AcqRel);
                info!(
                    storage = %self.storage,
                    generation = generation.generation(),
                    entries = index.entries.len(),
                    file = %path.display(),
                    "indexing tree generation persisted"
                );
            }
            Err(e) => {
                error!(
                    storage = %self.storage,
                    generation = generation.generation(),
                    error = %e,
                    "failed to persist indexing tree generation, its index is lost"
                );
            }
        }
        true
    }
}

/// Waits until none of `pending` is in flight any more, then persists.
async fn persist_when_drained(
    inner: Arc<TreeInner>,
    generation: Arc<IndexGeneration>,
    mut pending: Vec<TaskId>,
) {
    loop {
        let notified = inner.drain.notified();
        pending.retain(|task_id| inner.in_flight.contains_key(task_id));
        if pending.is_empty() {
            break;
        }
        tokio::select! {
            () = notified => {}
            () = tokio::time::sleep(inner.settings.persist_recheck) => {}
        }
    }

    let _ = tokio::task::spawn_blocking(move || inner.persist(&generation)).await;
}
