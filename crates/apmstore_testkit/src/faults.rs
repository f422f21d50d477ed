//! Collaborators that fail on demand.

use apmstore_channel::{ChannelError, ChannelResult, ChannelWriter, WriteCallback};
use apmstore_codec::{CborSerializer, CodecError, CodecResult, SerializationOptions, Serializer};
use apmstore_core::{DataRecord, RecordId};
use bytes::Bytes;
use std::collections::BTreeSet;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// CBOR serializer that refuses to serialize chosen record ids.
#[derive(Debug, Default)]
pub struct FailingSerializer {
    fail_ids: BTreeSet<RecordId>,
    failures: AtomicUsize,
}

impl FailingSerializer {
    /// Fails every record whose id is in `ids`.
    pub fn failing(ids: impl IntoIterator<Item = RecordId>) -> Self {
        Self {
            fail_ids: ids.into_iter().collect(),
            failures: AtomicUsize::new(0),
        }
    }

    /// Number of induced failures so far.
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }
}

impl Serializer<DataRecord> for FailingSerializer {
    fn serialize(
        &self,
        value: &DataRecord,
        options: &SerializationOptions,
        output: &mut Vec<u8>,
    ) -> CodecResult<()> {
        if self.fail_ids.contains(&value.id) {
            self.failures.fetch_add(1, Ordering::SeqCst);
            return Err(CodecError::serialization_failed(format!(
                "induced failure for record {}",
                value.id
            )));
        }
        CborSerializer::new().serialize(value, options, output)
    }

    fn deserialize(&self, bytes: &[u8]) -> CodecResult<DataRecord> {
        CborSerializer::new().deserialize(bytes)
    }
}

/// Channel writer wrapper that fails selected writes and can slow every write down.
pub struct FaultyChannelWriter {
    inner: Arc<dyn ChannelWriter>,
    fail_every: usize,
    delay: Duration,
    writes: AtomicUsize,
    failures: AtomicUsize,
}

impl FaultyChannelWriter {
    /// Wraps `inner` without injecting anything.
    pub fn new(inner: Arc<dyn ChannelWriter>) -> Self {
        Self {
            inner,
            fail_every: 0,
            delay: Duration::ZERO,
            writes: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
        }
    }

    /// Fails every `n`-th write (1-based). Zero disables failures.
    pub fn fail_every(mut self, n: usize) -> Self {
        self.fail_every = n;
        self
    }

    /// Sleeps for `delay` before every write.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of writes attempted.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of induced failures.
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }
}

impl ChannelWriter for FaultyChannelWriter {
    fn write(&self, bytes: Bytes, path: &Path, on_complete: WriteCallback) {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let n = self.writes.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_every > 0 && n % self.fail_every == 0 {
            self.failures.fetch_add(1, Ordering::SeqCst);
            on_complete(Err(ChannelError::Io(io::Error::new(
                io::ErrorKind::Other,
                "induced channel failure",
            ))));
            return;
        }
        self.inner.write(bytes, path, on_complete);
    }

    fn finalize_channel(&self, path: &Path) -> ChannelResult<()> {
        self.inner.finalize_channel(path)
    }
}
