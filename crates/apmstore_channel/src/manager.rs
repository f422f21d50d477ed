//! Channel writer contract and the default channel manager.

use crate::backend::ChannelBackend;
use crate::error::{ChannelError, ChannelResult};
use crate::file::FileBackend;
use crate::memory::InMemoryBackend;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Completion callback for a channel write.
///
/// Receives `(offset, length)` of the placed bytes, or the error that
/// prevented the write.
pub type WriteCallback = Box<dyn FnOnce(ChannelResult<(u64, u64)>) + Send>;

/// Writes serialized records into channels.
///
/// Implementations must invoke `on_complete` exactly once per call to
/// [`ChannelWriter::write`], either on the calling thread or later.
pub trait ChannelWriter: Send + Sync {
    /// Appends `bytes` to the channel at `path` and reports where they landed.
    fn write(&self, bytes: Bytes, path: &Path, on_complete: WriteCallback);

    /// Flushes and closes the channel at `path`.
    ///
    /// Finalizing a channel that is not open is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the final flush or sync fails.
    fn finalize_channel(&self, path: &Path) -> ChannelResult<()>;
}

type SharedBackend = Arc<Mutex<Box<dyn ChannelBackend>>>;
type Opener = Box<dyn Fn(&Path) -> ChannelResult<Box<dyn ChannelBackend>> + Send + Sync>;

/// Default [`ChannelWriter`] keeping one backend per open channel path.
///
/// Writes to different channels proceed in parallel; writes to the same
/// channel are serialized by that channel's lock.
pub struct ChannelManager {
    open: RwLock<HashMap<PathBuf, SharedBackend>>,
    opener: Opener,
}

impl ChannelManager {
    /// Creates a manager that stores channels as files on disk.
    #[must_use]
    pub fn file() -> Self {
        Self::with_opener(|path| {
            let backend = FileBackend::open(path)?;
            Ok(Box::new(backend) as Box<dyn ChannelBackend>)
        })
    }

    /// Creates a manager whose channels live in memory.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::with_opener(|_| Ok(Box::new(InMemoryBackend::new()) as Box<dyn ChannelBackend>))
    }

    /// Creates a manager with a custom backend factory.
    pub fn with_opener<F>(opener: F) -> Self
    where
        F: Fn(&Path) -> ChannelResult<Box<dyn ChannelBackend>> + Send + Sync + 'static,
    {
        Self {
            open: RwLock::new(HashMap::new()),
            opener: Box::new(opener),
        }
    }

    /// Returns the number of channels currently open.
    #[must_use]
    pub fn open_channel_count(&self) -> usize {
        self.open.read().len()
    }

    /// Returns true if the channel at `path` is open.
    #[must_use]
    pub fn is_open(&self, path: &Path) -> bool {
        self.open.read().contains_key(path)
    }

    /// Reads bytes from an open channel.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::NotOpen`] if the channel is not open.
    pub fn read_at(&self, path: &Path, offset: u64, len: usize) -> ChannelResult<Vec<u8>> {
        let channel = self
            .open
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| ChannelError::not_open(path))?;
        let backend = channel.lock();
        backend.read_at(offset, len)
    }

    fn channel(&self, path: &Path) -> ChannelResult<SharedBackend> {
        if let Some(channel) = self.open.read().get(path) {
            return Ok(Arc::clone(channel));
        }

        let mut open = self.open.write();
        if let Some(channel) = open.get(path) {
            return Ok(Arc::clone(channel));
        }

        let backend = (self.opener)(path)?;
        let channel = Arc::new(Mutex::new(backend));
        open.insert(path.to_path_buf(), Arc::clone(&channel));
        debug!(channel = %path.display(), "channel opened");
        Ok(channel)
    }

    fn append(&self, bytes: &[u8], path: &Path) -> ChannelResult<(u64, u64)> {
        if bytes.is_empty() {
            return Err(ChannelError::EmptyPayload {
                path: path.to_path_buf(),
            });
        }

        let channel = self.channel(path)?;
        let mut backend = channel.lock();
        let offset = backend.append(bytes)?;
        Ok((offset, bytes.len() as u64))
    }
}

impl ChannelWriter for ChannelManager {
    fn write(&self, bytes: Bytes, path: &Path, on_complete: WriteCallback) {
        on_complete(self.append(&bytes, path));
    }

    fn finalize_channel(&self, path: &Path) -> ChannelResult<()> {
        let Some(channel) = self.open.write().remove(path) else {
            return Ok(());
        };

        let mut backend = channel.lock();
        backend.flush()?;
        backend.sync()?;
        debug!(channel = %path.display(), "channel finalized");
        Ok(())
    }
}

impl fmt::Debug for ChannelManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelManager")
            .field("open_channels", &self.open_channel_count())
            .finish_non_exhaustive()
    }
}
