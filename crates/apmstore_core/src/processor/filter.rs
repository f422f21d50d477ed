use super::{flush_chain, forward, DataProcessor};
use crate::handle::WriteHandle;
use crate::record::DataRecord;
use crate::writer::RecordWriter;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Forwards only records produced by the given agents.
#[derive(Debug)]
pub struct AgentFilterProcessor {
    platforms: BTreeSet<u64>,
    chain: Vec<Box<dyn DataProcessor>>,
}

impl AgentFilterProcessor {
    /// Creates a filter passing records of `platforms` on to `chain`.
    #[must_use]
    pub fn new(
        platforms: impl IntoIterator<Item = u64>,
        chain: Vec<Box<dyn DataProcessor>>,
    ) -> Self {
        Self {
            platforms: platforms.into_iter().collect(),
            chain,
        }
    }

    /// Agents whose records pass.
    #[must_use]
    pub fn platforms(&self) -> &BTreeSet<u64> {
        &self.platforms
    }
}

impl DataProcessor for AgentFilterProcessor {
    fn name(&self) -> &'static str {
        "agent-filter"
    }

    fn process(&mut self, record: &Arc<DataRecord>, writer: &dyn RecordWriter) -> Vec<WriteHandle> {
        if self.platforms.contains(&record.platform_ident) {
            forward(&mut self.chain, record, writer)
        } else {
            Vec::new()
        }
    }

    fn flush(&mut self, writer: &dyn RecordWriter) -> Vec<WriteHandle> {
        flush_chain(&mut self.chain, writer)
    }
}

/// Forwards only records captured inside a time window.
#[derive(Debug)]
pub struct TimeFrameProcessor {
    from_ms: i64,
    to_ms: i64,
    chain: Vec<Box<dyn DataProcessor>>,
}

impl TimeFrameProcessor {
    /// Creates a filter for `[from_ms, to_ms]` (inclusive, epoch millis).
    #[must_use]
    pub fn new(from_ms: i64, to_ms: i64, chain: Vec<Box<dyn DataProcessor>>) -> Self {
        Self {
            from_ms,
            to_ms,
            chain,
        }
    }
}

impl DataProcessor for TimeFrameProcessor {
    fn name(&self) -> &'static str {
        "time-frame"
    }

    fn process(&mut self, record: &Arc<DataRecord>, writer: &dyn RecordWriter) -> Vec<WriteHandle> {
        if (self.from_ms..=self.to_ms).contains(&record.timestamp_ms) {
            forward(&mut self.chain, record, writer)
        } else {
            Vec::new()
        }
    }

    fn flush(&mut self, writer: &dyn RecordWriter) -> Vec<WriteHandle> {
        flush_chain(&mut self.chain, writer)
    }

    fn time_frame(&self) -> Option<(i64, i64)> {
        Some((self.from_ms, self.to_ms))
    }
}
