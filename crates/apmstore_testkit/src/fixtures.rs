//! Storage manager fixtures.
//!
//! Every fixture owns a temporary storage root that is removed when the
//! fixture is dropped.

use apmstore_channel::{ChannelManager, ChannelWriter};
use apmstore_codec::{CborSerializer, Serializer};
use apmstore_core::{
    DataRecord, PersistedIndex, RecordId, StorageConfig, StorageManager,
};
use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Configuration with short waits, suited to tests.
///
/// Disk space thresholds are zero so a nearly full test machine does not
/// close the write gate.
pub fn fast_config(root: &Path) -> StorageConfig {
    StorageConfig::new()
        .root_dir(root)
        .disk_thresholds(0, 0)
        .persist_recheck_interval(Duration::from_millis(10))
        .finish_wait(Duration::from_millis(10), 500)
        .finalize_wait(Duration::from_millis(10), 500)
        .pool_shutdown_timeout(Duration::from_secs(1))
        .sync_poll_interval(Duration::from_millis(5))
}

/// A storage manager on a temporary root.
pub struct TestStorageManager {
    /// The manager instance.
    pub manager: StorageManager,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: TempDir,
}

impl TestStorageManager {
    /// Creates a manager with file channels, CBOR and [`fast_config`].
    pub fn new() -> Self {
        Self::with_config(|config| config)
    }

    /// Creates a manager with a customized [`fast_config`].
    pub fn with_config(customize: impl FnOnce(StorageConfig) -> StorageConfig) -> Self {
        Self::build(customize, Arc::new(CborSerializer::new()), Arc::new(ChannelManager::file()))
    }

    /// Creates a manager with the given serializer and channel layer.
    pub fn with_collaborators(
        serializer: Arc<dyn Serializer<DataRecord>>,
        channels: Arc<dyn ChannelWriter>,
    ) -> Self {
        Self::build(|config| config, serializer, channels)
    }

    fn build(
        customize: impl FnOnce(StorageConfig) -> StorageConfig,
        serializer: Arc<dyn Serializer<DataRecord>>,
        channels: Arc<dyn ChannelWriter>,
    ) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = customize(fast_config(temp_dir.path()));
        let manager = StorageManager::with_collaborators(config, serializer, channels)
            .expect("Failed to open storage manager");
        Self {
            manager,
            _temp_dir: temp_dir,
        }
    }

    /// Root directory of the storages.
    pub fn root(&self) -> &Path {
        self._temp_dir.path()
    }

    /// Creates and opens a storage, returning its id.
    pub fn open_new_storage(&self, name: &str) -> String {
        let data = self
            .manager
            .create_storage(name, None)
            .expect("Failed to create storage");
        self.manager
            .open_storage(data.id())
            .expect("Failed to open storage");
        data.id().to_string()
    }

    /// Every persisted index generation of a storage.
    pub fn persisted_indexes(&self, id: &str) -> Vec<PersistedIndex> {
        PersistedIndex::load_all(&self.root().join(id)).expect("Failed to load index files")
    }

    /// How many times each record id appears across a storage's persisted
    /// index generations.
    pub fn indexed_record_counts(&self, id: &str) -> BTreeMap<RecordId, usize> {
        let mut counts = BTreeMap::new();
        for index in self.persisted_indexes(id) {
            for (record_id, _) in index.descriptors() {
                *counts.entry(record_id).or_insert(0) += 1;
            }
        }
        counts
    }
}

impl Default for TestStorageManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestStorageManager {
    type Target = StorageManager;

    fn deref(&self) -> &Self::Target {
        &self.manager
    }
}

impl Drop for TestStorageManager {
    fn drop(&mut self) {
        self.manager.shutdown();
    }
}

/// Timer records with the given ids, one millisecond apart.
pub fn timer_records(ids: RangeInclusive<RecordId>, platform_ident: u64) -> Vec<Arc<DataRecord>> {
    ids.map(|id| {
        Arc::new(DataRecord::timer(
            id,
            platform_ident,
            1_700_000_000_000 + id as i64,
            (id % 97) as f64 + 0.5,
        ))
    })
    .collect()
}

/// Runs a test with a temporary storage manager.
pub fn with_temp_manager<F, R>(f: F) -> R
where
    F: FnOnce(&TestStorageManager) -> R,
{
    let env = TestStorageManager::new();
    f(&env)
}
