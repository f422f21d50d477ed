//! Process-wide disk space gate.

use crate::config::StorageConfig;
use crate::error::CoreResult;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{info, warn};

/// Decides whether writers may still accept records, based on free space.
///
/// The gate is consulted before every write acceptance and again when the
/// write task runs. It starts open and is refreshed by the storage manager's
/// maintenance tick.
#[derive(Debug)]
pub struct DiskSpaceGate {
    root: PathBuf,
    stop_write_bytes_left: u64,
    warn_bytes_left: u64,
    max_occupancy: Option<u64>,
    bytes_left: AtomicU64,
    can_write: AtomicBool,
    warn_active: AtomicBool,
}

impl DiskSpaceGate {
    /// Creates an open gate for the configured root.
    #[must_use]
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            root: config.root_dir.clone(),
            stop_write_bytes_left: config.stop_write_bytes_left,
            warn_bytes_left: config.warn_bytes_left,
            max_occupancy: config.max_hard_drive_occupancy,
            bytes_left: AtomicU64::new(u64::MAX),
            can_write: AtomicBool::new(true),
            warn_active: AtomicBool::new(false),
        }
    }

    /// Re-reads free space on the root's file system.
    ///
    /// `occupied` is the number of bytes all storages currently use; it only
    /// matters when a maximum occupancy is configured.
    pub fn refresh(&self, occupied: u64) -> CoreResult<()> {
        let available = fs2::available_space(&self.root)?;
        let left = match self.max_occupancy {
            Some(max) => available.min(max.saturating_sub(occupied)),
            None => available,
        };
        self.update(left);
        Ok(())
    }

    /// Sets the number of bytes left and re-evaluates the gate.
    pub fn update(&self, bytes_left: u64) {
        self.bytes_left.store(bytes_left, Ordering::Release);

        let can_write = bytes_left > self.stop_write_bytes_left;
        let was_writable = self.can_write.swap(can_write, Ordering::AcqRel);
        if was_writable && !can_write {
            warn!(bytes_left, "disk space exhausted, writes are refused");
        } else if !was_writable && can_write {
            info!(bytes_left, "disk space available again, writes are accepted");
        }

        let warn_active = bytes_left < self.warn_bytes_left;
        let was_warning = self.warn_active.swap(warn_active, Ordering::AcqRel);
        if warn_active && !was_warning {
            warn!(bytes_left, "disk space is running low");
        }
    }

    /// True while writes may be accepted.
    #[must_use]
    pub fn can_write_more(&self) -> bool {
        self.can_write.load(Ordering::Acquire)
    }

    /// True while free space is below the warning threshold.
    #[must_use]
    pub fn is_space_warn_active(&self) -> bool {
        self.warn_active.load(Ordering::Acquire)
    }

    /// Bytes left at the last refresh.
    #[must_use]
    pub fn bytes_left(&self) -> u64 {
        self.bytes_left.load(Ordering::Acquire)
    }
}
