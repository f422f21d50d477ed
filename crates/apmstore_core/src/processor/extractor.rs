use super::{flush_chain, forward, DataProcessor};
use crate::handle::WriteHandle;
use crate::record::DataRecord;
use crate::writer::RecordWriter;
use std::sync::Arc;

/// Forwards every record nested inside a trace, at any depth, to its chain.
///
/// The trace itself is not forwarded; chain a [`super::DataSaverProcessor`]
/// next to this one to keep it.
#[derive(Debug)]
pub struct TraceExtractorProcessor {
    chain: Vec<Box<dyn DataProcessor>>,
}

impl TraceExtractorProcessor {
    /// Creates an extractor feeding `chain`.
    #[must_use]
    pub fn new(chain: Vec<Box<dyn DataProcessor>>) -> Self {
        Self { chain }
    }
}

impl DataProcessor for TraceExtractorProcessor {
    fn name(&self) -> &'static str {
        "trace-extractor"
    }

    fn process(&mut self, record: &Arc<DataRecord>, writer: &dyn RecordWriter) -> Vec<WriteHandle> {
        let mut handles = Vec::new();
        for child in record.descendants() {
            handles.extend(forward(&mut self.chain, &Arc::new(child.clone()), writer));
        }
        handles
    }

    fn flush(&mut self, writer: &dyn RecordWriter) -> Vec<WriteHandle> {
        flush_chain(&mut self.chain, writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::testing::CollectingWriter;
    use crate::processor::DataSaverProcessor;
    use crate::record::RecordKind;

    #[test]
    fn extracts_nested_children() {
        let inner = DataRecord {
            kind: RecordKind::Trace {
                duration_ms: 1.0,
                children: vec![DataRecord::timer(4, 1, 0, 0.5)],
            },
            ..DataRecord::timer(3, 1, 0, 1.0)
        };
        let trace = DataRecord {
            kind: RecordKind::Trace {
                duration_ms: 3.0,
                children: vec![DataRecord::timer(2, 1, 0, 1.0), inner],
            },
            ..DataRecord::timer(1, 1, 0, 3.0)
        };

        let writer = CollectingWriter::default();
        let mut extractor = TraceExtractorProcessor::new(vec![Box::new(DataSaverProcessor::all())]);
        let handles = extractor.process(&Arc::new(trace), &writer);

        assert_eq!(writer.ids(), vec![2, 3, 4]);
        assert_eq!(handles.len(), 3);
    }

    #[test]
    fn plain_records_yield_nothing() {
        let writer = CollectingWriter::default();
        let mut extractor = TraceExtractorProcessor::new(vec![Box::new(DataSaverProcessor::all())]);
        assert!(extractor
            .process(&Arc::new(DataRecord::timer(1, 1, 0, 1.0)), &writer)
            .is_empty());
    }
}
