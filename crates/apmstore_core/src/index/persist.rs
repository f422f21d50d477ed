//! On-disk form of an indexing tree generation.

use super::descriptor::Descriptor;
use super::generation::IndexGeneration;
use crate::error::CoreResult;
use crate::layout::{list_files, write_atomic, INDEX_EXTENSION};
use crate::record::RecordId;
use apmstore_codec::{from_cbor, to_cbor};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// One committed record location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// The record.
    pub record_id: RecordId,
    /// Byte offset in the channel.
    pub offset: u64,
    /// Byte length in the channel.
    pub length: u64,
}

/// A persisted indexing tree generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedIndex {
    /// Generation sequence number.
    pub generation: u64,
    /// Channel holding the records.
    pub channel_id: u32,
    /// Committed entries, ordered by record id.
    pub entries: Vec<IndexEntry>,
}

impl PersistedIndex {
    /// Snapshots the committed descriptors of a generation.
    #[must_use]
    pub fn from_generation(generation: &IndexGeneration) -> Self {
        Self {
            generation: generation.generation(),
            channel_id: generation.channel_id(),
            entries: generation
                .committed()
                .into_iter()
                .map(|(record_id, descriptor)| IndexEntry {
                    record_id,
                    offset: descriptor.offset,
                    length: descriptor.length,
                })
                .collect(),
        }
    }

    /// Writes the index under a fresh random name in `dir`, which must exist.
    pub fn save(&self, dir: &Path) -> CoreResult<PathBuf> {
        let path = dir.join(format!("{}.{INDEX_EXTENSION}", Uuid::new_v4()));
        write_atomic(&path, &to_cbor(self)?)?;
        Ok(path)
    }

    /// Reads one index file.
    pub fn load(path: &Path) -> CoreResult<Self> {
        let bytes = fs::read(path)?;
        Ok(from_cbor(&bytes)?)
    }

    /// Reads every index file in a storage directory.
    pub fn load_all(dir: &Path) -> CoreResult<Vec<Self>> {
        list_files(dir, INDEX_EXTENSION)?
            .iter()
            .map(|path| Self::load(path))
            .collect()
    }

    /// Returns the descriptor of every entry.
    pub fn descriptors(&self) -> impl Iterator<Item = (RecordId, Descriptor)> + '_ {
        self.entries.iter().map(|entry| {
            (
                entry.record_id,
                Descriptor::new(self.channel_id, entry.offset, entry.length),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn only_committed_entries_are_persisted() {
        let generation = IndexGeneration::new(3, 77);
        generation.reserve(1).unwrap();
        generation.reserve(2).unwrap();
        generation.commit(2, 0, 30).unwrap();

        let index = PersistedIndex::from_generation(&generation);
        assert_eq!(index.generation, 3);
        assert_eq!(
            index.entries,
            vec![IndexEntry {
                record_id: 2,
                offset: 0,
                length: 30
            }]
        );
    }

    #[test]
    fn save_and_load_all() {
        let dir = tempdir().unwrap();
        let generation = IndexGeneration::new(0, 5);
        generation.reserve(10).unwrap();
        generation.commit(10, 100, 20).unwrap();

        let index = PersistedIndex::from_generation(&generation);
        let first = index.save(dir.path()).unwrap();
        let second = index.save(dir.path()).unwrap();
        assert_ne!(first, second);
        assert_eq!(first.extension().unwrap(), "index");

        let loaded = PersistedIndex::load_all(dir.path()).unwrap();
        assert_eq!(loaded, vec![index.clone(), index]);
        assert_eq!(
            loaded[0].descriptors().collect::<Vec<_>>(),
            vec![(10, Descriptor::new(5, 100, 20))]
        );
    }

    #[test]
    fn save_does_not_recreate_a_removed_directory() {
        let dir = tempdir().unwrap();
        let removed = dir.path().join("removed");
        let generation = IndexGeneration::new(0, 5);
        generation.reserve(1).unwrap();
        generation.commit(1, 0, 8).unwrap();

        assert!(PersistedIndex::from_generation(&generation).save(&removed).is_err());
        assert!(!removed.exists());
    }
}
