//! One generation of the indexing tree.

use super::descriptor::Descriptor;
use crate::error::{CoreError, CoreResult};
use crate::record::RecordId;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Fixed bookkeeping cost of a generation, in estimated bytes.
const BASE_OVERHEAD: u64 = 256;
/// Estimated bytes per indexed record.
const ENTRY_OVERHEAD: u64 = 64;

/// A batch of descriptors sharing one channel and one on-disk index file.
///
/// Entries start out reserved (`None`) and become visible to
/// [`IndexGeneration::committed`] only once filled in.
#[derive(Debug)]
pub struct IndexGeneration {
    generation: u64,
    channel_id: u32,
    entries: RwLock<BTreeMap<RecordId, Option<(u64, u64)>>>,
    persisted: AtomicBool,
}

impl IndexGeneration {
    /// Creates an empty generation writing into `channel_id`.
    #[must_use]
    pub fn new(generation: u64, channel_id: u32) -> Self {
        Self {
            generation,
            channel_id,
            entries: RwLock::new(BTreeMap::new()),
            persisted: AtomicBool::new(false),
        }
    }

    /// Sequence number of this generation within its tree.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Channel the records of this generation are written to.
    #[must_use]
    pub const fn channel_id(&self) -> u32 {
        self.channel_id
    }

    /// Reserves an empty descriptor for `record_id`.
    ///
    /// # Errors
    ///
    /// Fails for the reserved id zero and for ids already in the generation.
    pub fn reserve(&self, record_id: RecordId) -> CoreResult<Descriptor> {
        if record_id == 0 {
            return Err(CoreError::indexing("record id 0 cannot be indexed"));
        }
        let mut entries = self.entries.write();
        if entries.contains_key(&record_id) {
            return Err(CoreError::indexing(format!(
                "record {record_id} is already indexed in generation {}",
                self.generation
            )));
        }
        entries.insert(record_id, None);
        Ok(Descriptor::reserved(self.channel_id))
    }

    /// Fills in the reservation for `record_id`.
    ///
    /// Returns `None` if there is no reservation for the id.
    pub fn commit(&self, record_id: RecordId, offset: u64, length: u64) -> Option<Descriptor> {
        let mut entries = self.entries.write();
        let slot = entries.get_mut(&record_id)?;
        *slot = Some((offset, length));
        Some(Descriptor::new(self.channel_id, offset, length))
    }

    /// Removes the entry for `record_id`, reserved or committed.
    pub fn remove(&self, record_id: RecordId) -> bool {
        self.entries.write().remove(&record_id).is_some()
    }

    /// Returns the committed descriptor for `record_id`.
    #[must_use]
    pub fn get(&self, record_id: RecordId) -> Option<Descriptor> {
        self.entries
            .read()
            .get(&record_id)
            .copied()
            .flatten()
            .map(|(offset, length)| Descriptor::new(self.channel_id, offset, length))
    }

    /// Returns every committed descriptor, ordered by record id.
    #[must_use]
    pub fn committed(&self) -> Vec<(RecordId, Descriptor)> {
        self.entries
            .read()
            .iter()
            .filter_map(|(&id, slot)| {
                slot.map(|(offset, length)| (id, Descriptor::new(self.channel_id, offset, length)))
            })
            .collect()
    }

    /// Number of entries, reserved and committed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True if the generation holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Estimated in-memory size in bytes.
    #[must_use]
    pub fn estimated_size(&self) -> u64 {
        BASE_OVERHEAD + self.len() as u64 * ENTRY_OVERHEAD
    }

    /// Claims the right to persist this generation.
    ///
    /// Returns true exactly once over the lifetime of the generation.
    pub fn claim_persist(&self) -> bool {
        !self.persisted.swap(true, Ordering::AcqRel)
    }

    /// True once the generation was claimed for persistence.
    #[must_use]
    pub fn is_persisted(&self) -> bool {
        self.persisted.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn reserve_commit_and_read() {
        let generation = IndexGeneration::new(0, 9);
        let reserved = generation.reserve(5).unwrap();
        assert!(!reserved.is_committed());
        assert!(generation.get(5).is_none());
        assert!(generation.committed().is_empty());

        let descriptor = generation.commit(5, 40, 12).unwrap();
        assert_eq!(descriptor, Descriptor::new(9, 40, 12));
        assert_eq!(generation.get(5), Some(descriptor));
    }

    #[test]
    fn zero_and_duplicate_ids_are_rejected() {
        let generation = IndexGeneration::new(0, 1);
        assert!(matches!(generation.reserve(0), Err(CoreError::Indexing { .. })));
        generation.reserve(3).unwrap();
        assert!(matches!(generation.reserve(3), Err(CoreError::Indexing { .. })));
    }

    #[test]
    fn commit_without_reservation_is_ignored() {
        let generation = IndexGeneration::new(0, 1);
        assert!(generation.commit(8, 0, 10).is_none());
        assert!(generation.is_empty());
    }

    #[test]
    fn claim_persist_once() {
        let generation = IndexGeneration::new(0, 1);
        assert!(!generation.is_persisted());
        assert!(generation.claim_persist());
        assert!(!generation.claim_persist());
        assert!(generation.is_persisted());
    }

    proptest! {
        #[test]
        fn failed_reservations_leave_nothing_behind(
            ops in prop::collection::vec((1u64..200, any::<bool>()), 1..100)
        ) {
            let generation = IndexGeneration::new(0, 1);
            let mut expected = std::collections::BTreeSet::new();
            for (id, succeed) in ops {
                if generation.reserve(id).is_err() {
                    continue;
                }
                if succeed {
                    generation.commit(id, id * 10, 10).unwrap();
                    expected.insert(id);
                } else {
                    prop_assert!(generation.remove(id));
                }
            }
            let committed: std::collections::BTreeSet<_> =
                generation.committed().into_iter().map(|(id, _)| id).collect();
            prop_assert_eq!(committed, expected);
            prop_assert_eq!(generation.len(), generation.committed().len());
        }
    }
}
