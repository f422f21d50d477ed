//! Channel files on disk.

use crate::backend::ChannelBackend;
use crate::error::{ChannelError, ChannelResult};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

#[derive(Debug)]
struct ChannelFile {
    file: File,
    len: u64,
    /// Bytes appended since the last `sync`.
    dirty: u64,
}

/// One `<channel id>.itdata` file.
///
/// Writers open channels with [`FileBackend::open`], which appends after the
/// last byte of an existing file. Inspection tools use
/// [`FileBackend::open_existing`], which never creates anything.
///
/// `sync` is a no-op when nothing was appended since the previous one, so
/// finalizing an idle channel does not touch the disk.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    state: Mutex<ChannelFile>,
}

impl FileBackend {
    /// Opens a channel file for appending, creating the file if needed.
    ///
    /// The directory must already exist. A channel of a storage whose
    /// directory was removed is never brought back.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory is missing or the file cannot be
    /// created.
    pub fn open(path: &Path) -> ChannelResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)?;
        Self::from_file(path, file)
    }

    /// Opens an existing channel file for reading only.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist or cannot be read.
    pub fn open_existing(path: &Path) -> ChannelResult<Self> {
        let file = File::open(path)?;
        Self::from_file(path, file)
    }

    fn from_file(path: &Path, file: File) -> ChannelResult<Self> {
        let len = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            state: Mutex::new(ChannelFile { file, len, dirty: 0 }),
        })
    }

    /// Path of the channel file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ChannelBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> ChannelResult<Vec<u8>> {
        let mut state = self.state.lock();
        let size = state.len;
        match offset.checked_add(len as u64) {
            Some(end) if end <= size => {}
            _ => return Err(ChannelError::ReadPastEnd { offset, len, size }),
        }

        let mut bytes = vec![0u8; len];
        if len > 0 {
            state.file.seek(SeekFrom::Start(offset))?;
            state.file.read_exact(&mut bytes)?;
        }
        Ok(bytes)
    }

    fn append(&mut self, data: &[u8]) -> ChannelResult<u64> {
        let state = self.state.get_mut();
        let offset = state.len;
        if !data.is_empty() {
            // append mode: the write lands at the end whatever the cursor is
            state.file.write_all(data)?;
            state.len += data.len() as u64;
            state.dirty += data.len() as u64;
        }
        Ok(offset)
    }

    fn flush(&mut self) -> ChannelResult<()> {
        self.state.get_mut().file.flush()?;
        Ok(())
    }

    fn size(&self) -> ChannelResult<u64> {
        Ok(self.state.lock().len)
    }

    fn sync(&mut self) -> ChannelResult<()> {
        let state = self.state.get_mut();
        if state.dirty > 0 {
            state.file.sync_data()?;
            state.dirty = 0;
        }
        Ok(())
    }
}
