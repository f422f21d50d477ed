//! Monitoring records handled by the write engine.

use apmstore_codec::{Prune, SerializationOptions};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Identifier of a record. Zero is reserved and never indexed.
pub type RecordId = u64;

/// A single telemetry record submitted by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRecord {
    /// Unique, non-zero record id.
    pub id: RecordId,
    /// Agent (platform) that produced the record.
    pub platform_ident: u64,
    /// Sensor that produced the record.
    pub sensor_type_ident: u64,
    /// Capture time in milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    /// Kind-specific payload.
    pub kind: RecordKind,
}

/// Kind-specific payload of a [`DataRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RecordKind {
    /// An aggregated method timer.
    Timer {
        /// Total duration in milliseconds.
        duration_ms: f64,
        /// Number of invocations aggregated into this timer.
        count: u64,
    },
    /// A database statement.
    Sql {
        /// The statement text.
        sql: String,
        /// Execution duration in milliseconds.
        duration_ms: f64,
    },
    /// A captured exception.
    Exception {
        /// Exception message.
        message: String,
    },
    /// An invocation trace with nested calls.
    Trace {
        /// Duration of the whole trace in milliseconds.
        duration_ms: f64,
        /// Records captured inside the trace.
        children: Vec<DataRecord>,
    },
}

/// Discriminant of [`RecordKind`], used for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KindTag {
    /// [`RecordKind::Timer`]
    Timer,
    /// [`RecordKind::Sql`]
    Sql,
    /// [`RecordKind::Exception`]
    Exception,
    /// [`RecordKind::Trace`]
    Trace,
}

impl DataRecord {
    /// Creates a timer record.
    #[must_use]
    pub fn timer(id: RecordId, platform_ident: u64, timestamp_ms: i64, duration_ms: f64) -> Self {
        Self {
            id,
            platform_ident,
            sensor_type_ident: 0,
            timestamp_ms,
            kind: RecordKind::Timer {
                duration_ms,
                count: 1,
            },
        }
    }

    /// Returns the kind discriminant.
    #[must_use]
    pub const fn kind_tag(&self) -> KindTag {
        match self.kind {
            RecordKind::Timer { .. } => KindTag::Timer,
            RecordKind::Sql { .. } => KindTag::Sql,
            RecordKind::Exception { .. } => KindTag::Exception,
            RecordKind::Trace { .. } => KindTag::Trace,
        }
    }

    /// Returns the direct children of a trace, or an empty slice.
    #[must_use]
    pub fn children(&self) -> &[DataRecord] {
        match &self.kind {
            RecordKind::Trace { children, .. } => children,
            _ => &[],
        }
    }

    /// Returns every record nested below this one, depth first.
    #[must_use]
    pub fn descendants(&self) -> Vec<&DataRecord> {
        let mut out = Vec::new();
        let mut stack: Vec<&DataRecord> = self.children().iter().rev().collect();
        while let Some(record) = stack.pop() {
            out.push(record);
            stack.extend(record.children().iter().rev());
        }
        out
    }
}

impl Prune for DataRecord {
    fn pruned(&self, options: &SerializationOptions) -> Cow<'_, Self> {
        match &self.kind {
            RecordKind::Trace {
                duration_ms,
                children,
            } if options.omit_children && !children.is_empty() => Cow::Owned(Self {
                kind: RecordKind::Trace {
                    duration_ms: *duration_ms,
                    children: Vec::new(),
                },
                ..self.clone()
            }),
            _ => Cow::Borrowed(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trace() -> DataRecord {
        let mut nested = DataRecord::timer(3, 1, 10, 1.0);
        nested.kind = RecordKind::Trace {
            duration_ms: 2.0,
            children: vec![DataRecord::timer(4, 1, 10, 0.5)],
        };
        DataRecord {
            id: 1,
            platform_ident: 1,
            sensor_type_ident: 7,
            timestamp_ms: 10,
            kind: RecordKind::Trace {
                duration_ms: 5.0,
                children: vec![DataRecord::timer(2, 1, 10, 1.0), nested],
            },
        }
    }

    #[test]
    fn descendants_are_depth_first() {
        let ids: Vec<_> = trace().descendants().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2, 3, 4]);
    }

    #[test]
    fn pruning_drops_trace_children_only_when_asked() {
        let record = trace();
        let keep = record.pruned(&SerializationOptions::new());
        assert!(matches!(keep, Cow::Borrowed(_)));

        let pruned = record.pruned(&SerializationOptions::new().omit_children(true));
        assert!(pruned.children().is_empty());
        assert_eq!(pruned.id, 1);
    }

    #[test]
    fn kind_tags() {
        assert_eq!(DataRecord::timer(1, 1, 0, 1.0).kind_tag(), KindTag::Timer);
        assert_eq!(trace().kind_tag(), KindTag::Trace);
    }
}
