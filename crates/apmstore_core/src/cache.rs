//! Bounded cache of queued record payloads.

use crate::record::DataRecord;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Holds the payload of every queued write task until the task runs.
///
/// The cache is bounded: once full, the oldest payload is reclaimed and its
/// task fails when it finally asks for it.
#[derive(Debug)]
pub(crate) struct PayloadCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<u64, Arc<DataRecord>>,
    order: VecDeque<u64>,
}

impl PayloadCache {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(CacheInner::default()),
        }
    }

    /// Caches the payload of `task_id`, reclaiming the oldest entries if full.
    pub(crate) fn insert(&self, task_id: u64, record: Arc<DataRecord>) {
        let mut inner = self.inner.lock();
        inner.entries.insert(task_id, record);
        inner.order.push_back(task_id);

        while inner.entries.len() > self.capacity {
            match inner.order.pop_front() {
                Some(oldest) => {
                    inner.entries.remove(&oldest);
                }
                None => break,
            }
        }

        // ids of already taken payloads linger in `order`
        if inner.order.len() > self.capacity.saturating_mul(2) {
            let CacheInner { entries, order } = &mut *inner;
            order.retain(|id| entries.contains_key(id));
        }
    }

    /// Removes and returns the payload of `task_id`, if it was not reclaimed.
    pub(crate) fn take(&self, task_id: u64) -> Option<Arc<DataRecord>> {
        self.inner.lock().entries.remove(&task_id)
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub(crate) fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: u64) -> Arc<DataRecord> {
        Arc::new(DataRecord::timer(id, 1, 0, 1.0))
    }

    #[test]
    fn take_returns_payload_once() {
        let cache = PayloadCache::new(4);
        cache.insert(1, record(10));
        assert_eq!(cache.take(1).unwrap().id, 10);
        assert!(cache.take(1).is_none());
    }

    #[test]
    fn oldest_payload_is_reclaimed() {
        let cache = PayloadCache::new(2);
        cache.insert(1, record(1));
        cache.insert(2, record(2));
        cache.insert(3, record(3));

        assert!(cache.take(1).is_none());
        assert!(cache.take(2).is_some());
        assert!(cache.take(3).is_some());
    }

    #[test]
    fn taken_ids_do_not_cause_reclaim() {
        let cache = PayloadCache::new(2);
        for id in 0..100 {
            cache.insert(id, record(id));
            assert!(cache.take(id).is_some());
        }
        assert_eq!(cache.len(), 0);

        cache.insert(500, record(500));
        cache.clear();
        assert!(cache.take(500).is_none());
    }
}
