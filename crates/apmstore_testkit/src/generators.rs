//! Property-based test generators using proptest.
//!
//! Generated records always carry non-zero ids, and batches never repeat an
//! id, so they can be written into one storage as they are.

use apmstore_core::{DataRecord, RecordKind};
use proptest::prelude::*;
use std::sync::Arc;

/// Strategy for record payloads without nesting.
pub fn leaf_kind_strategy() -> impl Strategy<Value = RecordKind> {
    prop_oneof![
        (0.0f64..10_000.0, 1u64..1_000)
            .prop_map(|(duration_ms, count)| RecordKind::Timer { duration_ms, count }),
        ("select [a-z_]{1,16} from [a-z_]{1,16}", 0.0f64..5_000.0)
            .prop_map(|(sql, duration_ms)| RecordKind::Sql { sql, duration_ms }),
        "[A-Za-z ]{0,48}".prop_map(|message| RecordKind::Exception { message }),
    ]
}

/// Strategy for a single record with the given id.
pub fn record_strategy(id: u64) -> impl Strategy<Value = DataRecord> {
    (1u64..16, 1u64..64, 1_600_000_000_000i64..1_800_000_000_000, leaf_kind_strategy()).prop_map(
        move |(platform_ident, sensor_type_ident, timestamp_ms, kind)| DataRecord {
            id,
            platform_ident,
            sensor_type_ident,
            timestamp_ms,
            kind,
        },
    )
}

/// Strategy for a trace with `children` leaf children.
///
/// The trace gets id `id` and its children the ids directly after it.
pub fn trace_strategy(id: u64, children: usize) -> impl Strategy<Value = DataRecord> {
    let child_ids = (id + 1)..=(id + children as u64);
    (
        record_strategy(id),
        child_ids.map(record_strategy).collect::<Vec<_>>(),
        0.0f64..60_000.0,
    )
        .prop_map(|(mut trace, children, duration_ms)| {
            trace.kind = RecordKind::Trace {
                duration_ms,
                children,
            };
            trace
        })
}

/// Strategy for a batch of up to `max` records with ids `1..=len`.
pub fn record_batch_strategy(max: usize) -> impl Strategy<Value = Vec<Arc<DataRecord>>> {
    (1..=max.max(1)).prop_flat_map(|len| {
        (1..=len as u64)
            .map(record_strategy)
            .collect::<Vec<_>>()
            .prop_map(|records| records.into_iter().map(Arc::new).collect())
    })
}
