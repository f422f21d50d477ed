//! Stress driver for concurrent writes.
//!
//! Spreads a range of record ids over several submitting threads, all
//! writing into one open storage, and reports how each write ended.

use crate::fixtures::timer_records;
use apmstore_codec::SerializationOptions;
use apmstore_core::{StorageManager, WriteHandle, WriteOutcome};
use serde::Serialize;
use std::thread;
use std::time::{Duration, Instant};

/// Configuration for a stress run.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of records written in total.
    pub records: u64,
    /// Number of submitting threads.
    pub threads: usize,
    /// Agent the records are attributed to.
    pub platform_ident: u64,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            records: 1_000,
            threads: 8,
            platform_ident: 1,
        }
    }
}

/// Result of a stress run.
#[derive(Debug, Clone, Serialize)]
pub struct StressReport {
    /// Records handed to the writer.
    pub submitted: u64,
    /// Records the writer did not accept.
    pub refused: u64,
    /// Records written.
    pub written: u64,
    /// Records that failed.
    pub failed: u64,
    /// Wall time of the run.
    pub duration: Duration,
    /// Written records per second.
    pub records_per_second: f64,
}

impl StressReport {
    fn new(submitted: u64, refused: u64, outcomes: &[WriteOutcome], duration: Duration) -> Self {
        let written = outcomes.iter().filter(|o| o.is_written()).count() as u64;
        let failed = outcomes.len() as u64 - written;
        let records_per_second = if duration.as_secs_f64() > 0.0 {
            written as f64 / duration.as_secs_f64()
        } else {
            0.0
        };
        Self {
            submitted,
            refused,
            written,
            failed,
            duration,
            records_per_second,
        }
    }

    /// Serializes the report as JSON.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Prints a summary of the run.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Submitted: {}", self.submitted);
        println!("Refused: {}", self.refused);
        println!("Written: {}", self.written);
        println!("Failed: {}", self.failed);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} records/sec", self.records_per_second);
    }
}

/// Writes `config.records` timers into the open storage `id` from
/// `config.threads` threads and waits for every write to complete.
///
/// # Panics
///
/// Panics if the storage is not open or a submitting thread panics.
pub fn stress_concurrent_writes(
    manager: &StorageManager,
    id: &str,
    config: &StressConfig,
) -> StressReport {
    let writer = manager.writer(id).expect("storage is not open");
    let threads = config.threads.max(1) as u64;
    let per_thread = config.records.div_ceil(threads);

    let start = Instant::now();
    let results: Vec<(u64, Vec<WriteHandle>)> = thread::scope(|scope| {
        let workers: Vec<_> = (0..threads)
            .map(|t| {
                let writer = writer.clone();
                let first = t * per_thread + 1;
                let last = ((t + 1) * per_thread).min(config.records);
                scope.spawn(move || {
                    let mut refused = 0;
                    let mut handles = Vec::new();
                    if first > last {
                        return (refused, handles);
                    }
                    for record in timer_records(first..=last, config.platform_ident) {
                        match writer.write(record, SerializationOptions::new()) {
                            Some(handle) => handles.push(handle),
                            None => refused += 1,
                        }
                    }
                    (refused, handles)
                })
            })
            .collect();
        workers
            .into_iter()
            .map(|worker| worker.join().expect("stress worker panicked"))
            .collect()
    });

    let refused = results.iter().map(|(refused, _)| refused).sum();
    let handles: Vec<WriteHandle> = results.into_iter().flat_map(|(_, handles)| handles).collect();
    let outcomes: Vec<WriteOutcome> = handles.iter().map(WriteHandle::wait).collect();
    StressReport::new(config.records, refused, &outcomes, start.elapsed())
}
