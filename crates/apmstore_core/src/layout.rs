//! On-disk layout of the storage root.
//!
//! ```text
//! <root>/
//! ├─ LOCK                     # Advisory lock for single-process access
//! └─ <storage id>/
//!    ├─ <storage id>.storage  # Metadata, rewritten on every state change
//!    ├─ <channel id>.itdata   # Record bytes of one indexing tree generation
//!    └─ <uuid>.index          # One persisted indexing tree generation
//! ```

use crate::error::{CoreError, CoreResult};
use crate::storage::StorageData;
use apmstore_codec::{from_cbor, to_cbor};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

const LOCK_FILE: &str = "LOCK";

/// Extension of storage metadata files.
pub const METADATA_EXTENSION: &str = "storage";
/// Extension of channel files.
pub const CHANNEL_EXTENSION: &str = "itdata";
/// Extension of persisted indexing tree generations.
pub const INDEX_EXTENSION: &str = "index";

/// Handle on the storage root directory.
///
/// A root opened with [`StorageRoot::open`] holds an exclusive advisory lock
/// until dropped, so only one process writes storages at a time. Tools that
/// only inspect storages use [`StorageRoot::open_read_only`].
#[derive(Debug)]
pub struct StorageRoot {
    path: PathBuf,
    _lock_file: Option<File>,
}

impl StorageRoot {
    /// Opens (creating if needed) and locks the storage root.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RootLocked`] if another process holds the lock,
    /// or an I/O error.
    pub fn open(path: &Path) -> CoreResult<Self> {
        fs::create_dir_all(path)?;
        if !path.is_dir() {
            return Err(CoreError::invalid_layout(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::RootLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: Some(lock_file),
        })
    }

    /// Opens an existing storage root without taking the lock.
    ///
    /// # Errors
    ///
    /// Fails if the path does not exist or is not a directory.
    pub fn open_read_only(path: &Path) -> CoreResult<Self> {
        if !path.is_dir() {
            return Err(CoreError::invalid_layout(format!(
                "storage root does not exist: {}",
                path.display()
            )));
        }
        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: None,
        })
    }

    /// Returns the root path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the directory of one storage.
    #[must_use]
    pub fn storage_dir(&self, id: &str) -> PathBuf {
        self.path.join(id)
    }

    /// Returns the metadata file of one storage.
    #[must_use]
    pub fn metadata_path(&self, id: &str) -> PathBuf {
        self.storage_dir(id)
            .join(format!("{id}.{METADATA_EXTENSION}"))
    }

    /// Writes a storage's metadata atomically, creating its directory if needed.
    pub fn save_metadata(&self, data: &StorageData) -> CoreResult<()> {
        fs::create_dir_all(self.storage_dir(data.id()))?;
        let bytes = to_cbor(data)?;
        write_atomic(&self.metadata_path(data.id()), &bytes)
    }

    /// Loads one storage's metadata. Returns `None` if it was never saved.
    pub fn load_metadata(&self, id: &str) -> CoreResult<Option<StorageData>> {
        let path = self.metadata_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path)?;
        Ok(Some(from_cbor(&bytes)?))
    }

    /// Loads the metadata of every storage under the root.
    ///
    /// Directories without readable metadata are skipped with a warning.
    pub fn list_metadata(&self) -> CoreResult<Vec<StorageData>> {
        let mut storages = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let id = entry.file_name().to_string_lossy().into_owned();
            match self.load_metadata(&id) {
                Ok(Some(data)) => storages.push(data),
                Ok(None) => {}
                Err(e) => warn!(storage = %id, error = %e, "skipping unreadable storage metadata"),
            }
        }
        storages.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id().cmp(b.id())));
        Ok(storages)
    }

    /// Removes a storage directory and everything in it.
    pub fn delete_storage_dir(&self, id: &str) -> CoreResult<()> {
        let dir = self.storage_dir(id);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
            sync_directory(&self.path)?;
        }
        Ok(())
    }

    /// Returns the total size of the files in a storage directory.
    pub fn storage_disk_size(&self, id: &str) -> CoreResult<u64> {
        let dir = self.storage_dir(id);
        if !dir.exists() {
            return Ok(0);
        }
        let mut total = 0;
        for entry in fs::read_dir(&dir)? {
            let metadata = entry?.metadata()?;
            if metadata.is_file() {
                total += metadata.len();
            }
        }
        Ok(total)
    }

    /// Lists the files of a storage with the given extension, sorted by name.
    pub fn files_with_extension(&self, id: &str, extension: &str) -> CoreResult<Vec<PathBuf>> {
        list_files(&self.storage_dir(id), extension)
    }
}

pub(crate) fn list_files(dir: &Path, extension: &str) -> CoreResult<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some(extension) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Writes `data` to `path` through a temporary file and a rename.
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> CoreResult<()> {
    let dir = path
        .parent()
        .ok_or_else(|| CoreError::invalid_layout(format!("no parent: {}", path.display())))?;
    let temp_path = path.with_extension("tmp");

    let mut file = File::create(&temp_path)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp_path, path)?;
    sync_directory(dir)
}

#[cfg(unix)]
fn sync_directory(dir: &Path) -> CoreResult<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_directory(_dir: &Path) -> CoreResult<()> {
    // NTFS journals metadata updates
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_directory() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("root");

        let root = StorageRoot::open(&path).unwrap();
        assert!(path.is_dir());
        assert_eq!(root.path(), path);
    }

    #[test]
    fn lock_prevents_second_open() {
        let temp = tempdir().unwrap();
        let _root = StorageRoot::open(temp.path()).unwrap();

        let result = StorageRoot::open(temp.path());
        assert!(matches!(result, Err(CoreError::RootLocked)));

        // inspection does not need the lock
        assert!(StorageRoot::open_read_only(temp.path()).is_ok());
    }

    #[test]
    fn lock_released_on_drop() {
        let temp = tempdir().unwrap();
        {
            let _root = StorageRoot::open(temp.path()).unwrap();
        }
        let _root = StorageRoot::open(temp.path()).unwrap();
    }

    #[test]
    fn metadata_save_and_list() {
        let temp = tempdir().unwrap();
        let root = StorageRoot::open(temp.path()).unwrap();

        let a = StorageData::new("b-storage", None, "1.0");
        let b = StorageData::new("a-storage", Some("desc".into()), "1.0");
        root.save_metadata(&a).unwrap();
        root.save_metadata(&b).unwrap();

        assert_eq!(root.load_metadata(a.id()).unwrap(), Some(a.clone()));
        assert!(root.load_metadata("missing").unwrap().is_none());

        let names: Vec<_> = root
            .list_metadata()
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["a-storage", "b-storage"]);
        assert!(root.metadata_path(a.id()).ends_with(format!("{}.storage", a.id())));
    }

    #[test]
    fn corrupt_metadata_is_skipped() {
        let temp = tempdir().unwrap();
        let root = StorageRoot::open(temp.path()).unwrap();
        let good = StorageData::new("good", None, "1.0");
        root.save_metadata(&good).unwrap();

        fs::create_dir_all(root.storage_dir("broken")).unwrap();
        fs::write(root.metadata_path("broken"), b"\xff\xff").unwrap();

        let listed = root.list_metadata().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id(), good.id());
    }

    #[test]
    fn size_and_delete() {
        let temp = tempdir().unwrap();
        let root = StorageRoot::open(temp.path()).unwrap();
        let data = StorageData::new("sized", None, "1.0");
        root.save_metadata(&data).unwrap();
        fs::write(root.storage_dir(data.id()).join("1.itdata"), [0u8; 100]).unwrap();

        let size = root.storage_disk_size(data.id()).unwrap();
        assert!(size >= 100);
        assert_eq!(
            root.files_with_extension(data.id(), CHANNEL_EXTENSION).unwrap().len(),
            1
        );

        root.delete_storage_dir(data.id()).unwrap();
        assert!(!root.storage_dir(data.id()).exists());
        assert_eq!(root.storage_disk_size(data.id()).unwrap(), 0);
    }
}
