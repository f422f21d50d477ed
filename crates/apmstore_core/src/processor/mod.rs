//! Data processors: filters, transforms and aggregations applied to records
//! on their way to a storage writer.
//!
//! A processor receives every record through [`DataProcessor::process`] and
//! writes whatever it wants to keep through the [`RecordWriter`] it is given.
//! Filtering processors forward matching records to their chained
//! processors instead of writing them. Processors that buffer (aggregation)
//! emit their output on [`DataProcessor::flush`], which is called once after
//! a batch or when a recording stops.

mod aggregator;
mod extractor;
mod filter;
mod saver;

pub use aggregator::DataAggregatorProcessor;
pub use extractor::TraceExtractorProcessor;
pub use filter::{AgentFilterProcessor, TimeFrameProcessor};
pub use saver::DataSaverProcessor;

use crate::handle::WriteHandle;
use crate::record::DataRecord;
use crate::writer::RecordWriter;
use std::sync::Arc;

/// A step in the record processing pipeline.
pub trait DataProcessor: Send {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Handles one record and returns the handles of any writes it caused.
    fn process(&mut self, record: &Arc<DataRecord>, writer: &dyn RecordWriter) -> Vec<WriteHandle>;

    /// Emits buffered output. The processor is empty afterwards.
    fn flush(&mut self, _writer: &dyn RecordWriter) -> Vec<WriteHandle> {
        Vec::new()
    }

    /// Time window `[from, to]` in epoch milliseconds this processor limits
    /// records to, if any.
    fn time_frame(&self) -> Option<(i64, i64)> {
        None
    }
}

impl std::fmt::Debug for dyn DataProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Passes `record` to every processor in `chain`.
fn forward(
    chain: &mut [Box<dyn DataProcessor>],
    record: &Arc<DataRecord>,
    writer: &dyn RecordWriter,
) -> Vec<WriteHandle> {
    chain
        .iter_mut()
        .flat_map(|processor| processor.process(record, writer))
        .collect()
}

fn flush_chain(
    chain: &mut [Box<dyn DataProcessor>],
    writer: &dyn RecordWriter,
) -> Vec<WriteHandle> {
    chain
        .iter_mut()
        .flat_map(|processor| processor.flush(writer))
        .collect()
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::handle::WriteOutcome;
    use crate::index::Descriptor;
    use apmstore_codec::SerializationOptions;
    use parking_lot::Mutex;

    /// Writer double that accepts everything and completes immediately.
    #[derive(Default)]
    pub(crate) struct CollectingWriter {
        pub(crate) written: Mutex<Vec<(Arc<DataRecord>, SerializationOptions)>>,
    }

    impl CollectingWriter {
        pub(crate) fn ids(&self) -> Vec<u64> {
            self.written.lock().iter().map(|(r, _)| r.id).collect()
        }
    }

    impl RecordWriter for CollectingWriter {
        fn write(
            &self,
            record: Arc<DataRecord>,
            options: SerializationOptions,
        ) -> Option<WriteHandle> {
            let mut written = self.written.lock();
            let offset = written.len() as u64;
            written.push((record, options));
            let handle = WriteHandle::pending();
            handle.complete(WriteOutcome::Written(Descriptor::new(1, offset, 1)));
            Some(handle)
        }
    }
}
