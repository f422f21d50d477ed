use super::DataProcessor;
use crate::handle::WriteHandle;
use crate::record::{DataRecord, KindTag};
use crate::writer::RecordWriter;
use apmstore_codec::SerializationOptions;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Writes records selected by kind.
#[derive(Debug, Clone)]
pub struct DataSaverProcessor {
    kinds: BTreeSet<KindTag>,
    exclude: bool,
    options: SerializationOptions,
}

impl DataSaverProcessor {
    /// Saves only records of the given kinds.
    #[must_use]
    pub fn including(kinds: impl IntoIterator<Item = KindTag>) -> Self {
        Self {
            kinds: kinds.into_iter().collect(),
            exclude: false,
            options: SerializationOptions::new(),
        }
    }

    /// Saves every record except those of the given kinds.
    #[must_use]
    pub fn excluding(kinds: impl IntoIterator<Item = KindTag>) -> Self {
        Self {
            exclude: true,
            ..Self::including(kinds)
        }
    }

    /// Saves every record.
    #[must_use]
    pub fn all() -> Self {
        Self::excluding([])
    }

    /// Sets the serialization options used for saved records.
    #[must_use]
    pub const fn with_options(mut self, options: SerializationOptions) -> Self {
        self.options = options;
        self
    }

    fn accepts(&self, kind: KindTag) -> bool {
        self.kinds.contains(&kind) != self.exclude
    }
}

impl DataProcessor for DataSaverProcessor {
    fn name(&self) -> &'static str {
        "data-saver"
    }

    fn process(&mut self, record: &Arc<DataRecord>, writer: &dyn RecordWriter) -> Vec<WriteHandle> {
        if !self.accepts(record.kind_tag()) {
            return Vec::new();
        }
        writer
            .write(Arc::clone(record), self.options)
            .into_iter()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::testing::CollectingWriter;
    use crate::record::RecordKind;

    fn records() -> Vec<Arc<DataRecord>> {
        let mut sql = DataRecord::timer(2, 1, 0, 1.0);
        sql.kind = RecordKind::Sql {
            sql: "select 1".to_string(),
            duration_ms: 1.0,
        };
        vec![Arc::new(DataRecord::timer(1, 1, 0, 1.0)), Arc::new(sql)]
    }

    #[test]
    fn including_saves_listed_kinds() {
        let writer = CollectingWriter::default();
        let mut saver = DataSaverProcessor::including([KindTag::Sql]);
        for record in records() {
            saver.process(&record, &writer);
        }
        assert_eq!(writer.ids(), vec![2]);
    }

    #[test]
    fn excluding_saves_the_rest() {
        let writer = CollectingWriter::default();
        let mut saver = DataSaverProcessor::excluding([KindTag::Sql]);
        let handles: Vec<_> = records()
            .iter()
            .flat_map(|record| saver.process(record, &writer))
            .collect();
        assert_eq!(writer.ids(), vec![1]);
        assert_eq!(handles.len(), 1);
    }

    #[test]
    fn options_are_passed_through() {
        let writer = CollectingWriter::default();
        let options = SerializationOptions::new().omit_children(true);
        let mut saver = DataSaverProcessor::all().with_options(options);
        saver.process(&records()[0], &writer);
        assert_eq!(writer.written.lock()[0].1, options);
    }
}
