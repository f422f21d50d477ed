//! Storage engine configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for the storage manager and its writers.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Directory holding one sub-directory per storage.
    pub root_dir: PathBuf,

    /// Maximum number of threads executing write tasks for one writer.
    pub write_threads: usize,

    /// Estimated size (bytes) above which an indexing tree generation is rotated.
    pub max_indexing_tree_size: u64,

    /// How often the rotation check runs.
    pub tree_check_interval: Duration,

    /// How long a deferred persistence waits between drain re-checks.
    pub persist_recheck_interval: Duration,

    /// Wait step while the indexing tree drains on finish.
    pub finish_wait_interval: Duration,

    /// Maximum number of wait steps while the indexing tree drains on finish.
    pub finish_wait_iterations: u32,

    /// Wait step while queued write tasks drain on finalize.
    pub finalize_wait_interval: Duration,

    /// Maximum number of wait steps while queued write tasks drain on finalize.
    pub finalize_wait_iterations: u32,

    /// How long the write pool is given to stop once drained.
    pub pool_shutdown_timeout: Duration,

    /// How often the writing status is recomputed.
    pub writing_status_interval: Duration,

    /// Writes are refused once free space drops to this many bytes.
    pub stop_write_bytes_left: u64,

    /// A warning is raised once free space drops below this many bytes.
    pub warn_bytes_left: u64,

    /// Optional cap on the bytes all storages may occupy together.
    pub max_hard_drive_occupancy: Option<u64>,

    /// How often free disk space is checked.
    pub disk_check_interval: Duration,

    /// How often the on-disk size of opened storages is refreshed.
    pub size_refresh_interval: Duration,

    /// Upper bound for a single wait step in synchronous processing.
    pub sync_poll_interval: Duration,

    /// Number of queued record payloads a writer keeps before reclaiming the oldest.
    pub payload_cache_capacity: usize,

    /// Version recorded as the origin of newly created storages.
    pub server_version: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("storage"),
            write_threads: 4,
            max_indexing_tree_size: 50 * 1024 * 1024, // 50 MB
            tree_check_interval: Duration::from_secs(30),
            persist_recheck_interval: Duration::from_secs(1),
            finish_wait_interval: Duration::from_secs(1),
            finish_wait_iterations: 30,
            finalize_wait_interval: Duration::from_millis(500),
            finalize_wait_iterations: 120,
            pool_shutdown_timeout: Duration::from_secs(5),
            writing_status_interval: Duration::from_secs(30),
            stop_write_bytes_left: 100 * 1024 * 1024, // 100 MB
            warn_bytes_left: 1024 * 1024 * 1024,      // 1 GB
            max_hard_drive_occupancy: None,
            disk_check_interval: Duration::from_secs(5),
            size_refresh_interval: Duration::from_secs(30),
            sync_poll_interval: Duration::from_millis(50),
            payload_cache_capacity: 100_000,
            server_version: crate::VERSION.to_string(),
        }
    }
}

impl StorageConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the storage root directory.
    #[must_use]
    pub fn root_dir(mut self, path: impl AsRef<Path>) -> Self {
        self.root_dir = path.as_ref().to_path_buf();
        self
    }

    /// Sets the number of write threads per writer.
    #[must_use]
    pub const fn write_threads(mut self, threads: usize) -> Self {
        self.write_threads = threads;
        self
    }

    /// Sets the indexing tree rotation threshold.
    #[must_use]
    pub const fn max_indexing_tree_size(mut self, bytes: u64) -> Self {
        self.max_indexing_tree_size = bytes;
        self
    }

    /// Sets the rotation check interval.
    #[must_use]
    pub const fn tree_check_interval(mut self, interval: Duration) -> Self {
        self.tree_check_interval = interval;
        self
    }

    /// Sets the deferred persistence re-check interval.
    #[must_use]
    pub const fn persist_recheck_interval(mut self, interval: Duration) -> Self {
        self.persist_recheck_interval = interval;
        self
    }

    /// Sets the bounded wait used when the indexing tree finishes.
    #[must_use]
    pub const fn finish_wait(mut self, interval: Duration, iterations: u32) -> Self {
        self.finish_wait_interval = interval;
        self.finish_wait_iterations = iterations;
        self
    }

    /// Sets the bounded wait used when a writer finalizes.
    #[must_use]
    pub const fn finalize_wait(mut self, interval: Duration, iterations: u32) -> Self {
        self.finalize_wait_interval = interval;
        self.finalize_wait_iterations = iterations;
        self
    }

    /// Sets the write pool shutdown timeout.
    #[must_use]
    pub const fn pool_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.pool_shutdown_timeout = timeout;
        self
    }

    /// Sets the writing status interval.
    #[must_use]
    pub const fn writing_status_interval(mut self, interval: Duration) -> Self {
        self.writing_status_interval = interval;
        self
    }

    /// Sets the free-space thresholds for refusing writes and for warning.
    #[must_use]
    pub const fn disk_thresholds(
        mut self,
        stop_write_bytes_left: u64,
        warn_bytes_left: u64,
    ) -> Self {
        self.stop_write_bytes_left = stop_write_bytes_left;
        self.warn_bytes_left = warn_bytes_left;
        self
    }

    /// Caps the space all storages may occupy together.
    #[must_use]
    pub const fn max_hard_drive_occupancy(mut self, bytes: Option<u64>) -> Self {
        self.max_hard_drive_occupancy = bytes;
        self
    }

    /// Sets the free disk space check interval.
    #[must_use]
    pub const fn disk_check_interval(mut self, interval: Duration) -> Self {
        self.disk_check_interval = interval;
        self
    }

    /// Sets the storage size refresh interval.
    #[must_use]
    pub const fn size_refresh_interval(mut self, interval: Duration) -> Self {
        self.size_refresh_interval = interval;
        self
    }

    /// Sets the synchronous processing wait step.
    #[must_use]
    pub const fn sync_poll_interval(mut self, interval: Duration) -> Self {
        self.sync_poll_interval = interval;
        self
    }

    /// Sets the payload cache capacity.
    #[must_use]
    pub const fn payload_cache_capacity(mut self, capacity: usize) -> Self {
        self.payload_cache_capacity = capacity;
        self
    }

    /// Sets the server version stamped on new storages.
    #[must_use]
    pub fn server_version(mut self, version: impl Into<String>) -> Self {
        self.server_version = version.into();
        self
    }
}
