//! Sources of already captured records, used when copying data into a storage.

use crate::record::{DataRecord, RecordId};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Read access to records held outside any storage, such as the live buffer.
pub trait RecordSource: Send + Sync {
    /// Capture time of the oldest record available, if any.
    fn oldest_timestamp(&self) -> Option<i64>;

    /// Records of the given agents captured in `[from_ms, to_ms]`.
    ///
    /// An empty `platforms` slice selects every agent.
    fn records_for_agents(
        &self,
        platforms: &[u64],
        from_ms: i64,
        to_ms: i64,
    ) -> Vec<Arc<DataRecord>>;

    /// Records of one agent with the given ids. Unknown ids are skipped.
    fn records_by_ids(&self, platform_ident: u64, ids: &BTreeSet<RecordId>) -> Vec<Arc<DataRecord>>;
}

/// In-memory [`RecordSource`].
#[derive(Debug, Default)]
pub struct MemoryRecordSource {
    records: RwLock<Vec<Arc<DataRecord>>>,
}

impl MemoryRecordSource {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a record.
    pub fn push(&self, record: DataRecord) {
        self.records.write().push(Arc::new(record));
    }

    /// Adds many records.
    pub fn extend(&self, records: impl IntoIterator<Item = DataRecord>) {
        self.records
            .write()
            .extend(records.into_iter().map(Arc::new));
    }

    /// Number of records held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// True if no records are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl RecordSource for MemoryRecordSource {
    fn oldest_timestamp(&self) -> Option<i64> {
        self.records.read().iter().map(|r| r.timestamp_ms).min()
    }

    fn records_for_agents(
        &self,
        platforms: &[u64],
        from_ms: i64,
        to_ms: i64,
    ) -> Vec<Arc<DataRecord>> {
        self.records
            .read()
            .iter()
            .filter(|r| platforms.is_empty() || platforms.contains(&r.platform_ident))
            .filter(|r| (from_ms..=to_ms).contains(&r.timestamp_ms))
            .cloned()
            .collect()
    }

    fn records_by_ids(
        &self,
        platform_ident: u64,
        ids: &BTreeSet<RecordId>,
    ) -> Vec<Arc<DataRecord>> {
        self.records
            .read()
            .iter()
            .filter(|r| r.platform_ident == platform_ident && ids.contains(&r.id))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> MemoryRecordSource {
        let source = MemoryRecordSource::new();
        source.extend([
            DataRecord::timer(1, 1, 100, 1.0),
            DataRecord::timer(2, 2, 200, 1.0),
            DataRecord::timer(3, 1, 300, 1.0),
        ]);
        source
    }

    #[test]
    fn oldest_timestamp() {
        assert_eq!(source().oldest_timestamp(), Some(100));
        assert_eq!(MemoryRecordSource::new().oldest_timestamp(), None);
    }

    #[test]
    fn filters_by_agent_and_window() {
        let ids = |records: Vec<Arc<DataRecord>>| records.iter().map(|r| r.id).collect::<Vec<_>>();
        let source = source();
        assert_eq!(ids(source.records_for_agents(&[1], 0, 1000)), vec![1, 3]);
        assert_eq!(ids(source.records_for_agents(&[], 150, 300)), vec![2, 3]);
    }

    #[test]
    fn selects_by_ids_of_one_agent() {
        let wanted: BTreeSet<_> = [1, 2, 3, 9].into_iter().collect();
        let found = source().records_by_ids(1, &wanted);
        assert_eq!(found.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1, 3]);
    }
}
