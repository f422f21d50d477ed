use super::DataProcessor;
use crate::handle::WriteHandle;
use crate::record::{DataRecord, RecordKind};
use crate::writer::RecordWriter;
use apmstore_codec::SerializationOptions;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::debug;

type AggregationKey = (u64, u64, i64);

/// Aggregates timers of the same agent and sensor into fixed time buckets.
///
/// An aggregate keeps the id of the first timer that fell into its bucket
/// and is stamped with the bucket start. Aggregates are written on flush, or
/// oldest first once more than `max_elements` buckets are open. Records of
/// other kinds are ignored.
#[derive(Debug)]
pub struct DataAggregatorProcessor {
    bucket_ms: i64,
    max_elements: usize,
    options: SerializationOptions,
    buckets: HashMap<AggregationKey, DataRecord>,
    order: VecDeque<AggregationKey>,
}

impl DataAggregatorProcessor {
    /// Creates an aggregator with buckets of `bucket_ms` milliseconds holding
    /// at most `max_elements` open aggregates.
    #[must_use]
    pub fn new(bucket_ms: i64, max_elements: usize) -> Self {
        Self {
            bucket_ms: bucket_ms.max(1),
            max_elements: max_elements.max(1),
            options: SerializationOptions::new(),
            buckets: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Number of open aggregates.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buckets.len()
    }

    fn key(&self, record: &DataRecord) -> AggregationKey {
        let bucket = record.timestamp_ms - record.timestamp_ms.rem_euclid(self.bucket_ms);
        (record.platform_ident, record.sensor_type_ident, bucket)
    }

    fn write_oldest(&mut self, writer: &dyn RecordWriter) -> Option<WriteHandle> {
        let key = self.order.pop_front()?;
        let aggregate = self.buckets.remove(&key)?;
        writer.write(Arc::new(aggregate), self.options)
    }
}

impl DataProcessor for DataAggregatorProcessor {
    fn name(&self) -> &'static str {
        "data-aggregator"
    }

    fn process(&mut self, record: &Arc<DataRecord>, writer: &dyn RecordWriter) -> Vec<WriteHandle> {
        let RecordKind::Timer { duration_ms, count } = record.kind else {
            return Vec::new();
        };

        let key = self.key(record);
        if let Some(aggregate) = self.buckets.get_mut(&key) {
            if let RecordKind::Timer {
                duration_ms: total,
                count: total_count,
            } = &mut aggregate.kind
            {
                *total += duration_ms;
                *total_count += count;
            }
            return Vec::new();
        }

        let mut handles = Vec::new();
        if self.buckets.len() >= self.max_elements {
            debug!(open = self.buckets.len(), "aggregation buffer full, writing oldest aggregate");
            handles.extend(self.write_oldest(writer));
        }
        self.buckets.insert(
            key,
            DataRecord {
                timestamp_ms: key.2,
                ..DataRecord::clone(record)
            },
        );
        self.order.push_back(key);
        handles
    }

    fn flush(&mut self, writer: &dyn RecordWriter) -> Vec<WriteHandle> {
        let mut handles = Vec::with_capacity(self.buckets.len());
        while !self.order.is_empty() {
            handles.extend(self.write_oldest(writer));
        }
        self.buckets.clear();
        handles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::testing::CollectingWriter;

    fn timer(id: u64, ts: i64, duration: f64) -> Arc<DataRecord> {
        Arc::new(DataRecord::timer(id, 1, ts, duration))
    }

    #[test]
    fn aggregates_within_bucket_and_writes_on_flush() {
        let writer = CollectingWriter::default();
        let mut aggregator = DataAggregatorProcessor::new(1000, 10);
        for (id, ts) in [(1, 1000), (2, 1500), (3, 1999), (4, 2000)] {
            assert!(aggregator.process(&timer(id, ts, 2.0), &writer).is_empty());
        }
        assert_eq!(aggregator.pending(), 2);

        let handles = aggregator.flush(&writer);
        assert_eq!(handles.len(), 2);
        assert_eq!(aggregator.pending(), 0);

        let written = writer.written.lock();
        let first = &written[0].0;
        assert_eq!(first.id, 1);
        assert_eq!(first.timestamp_ms, 1000);
        match first.kind {
            RecordKind::Timer { duration_ms, count } => {
                assert!((duration_ms - 6.0).abs() < f64::EPSILON);
                assert_eq!(count, 3);
            }
            _ => panic!("expected timer"),
        }
        assert_eq!(written[1].0.id, 4);
    }

    #[test]
    fn full_buffer_writes_oldest() {
        let writer = CollectingWriter::default();
        let mut aggregator = DataAggregatorProcessor::new(10, 2);
        aggregator.process(&timer(1, 0, 1.0), &writer);
        aggregator.process(&timer(2, 10, 1.0), &writer);
        let handles = aggregator.process(&timer(3, 20, 1.0), &writer);

        assert_eq!(handles.len(), 1);
        assert_eq!(writer.ids(), vec![1]);
        assert_eq!(aggregator.pending(), 2);
    }

    #[test]
    fn non_timers_are_ignored() {
        let writer = CollectingWriter::default();
        let mut aggregator = DataAggregatorProcessor::new(10, 2);
        let mut record = DataRecord::timer(1, 1, 0, 1.0);
        record.kind = RecordKind::Exception {
            message: "boom".to_string(),
        };
        aggregator.process(&Arc::new(record), &writer);
        assert_eq!(aggregator.pending(), 0);
    }
}
