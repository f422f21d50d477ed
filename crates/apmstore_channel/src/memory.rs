//! Channels kept in memory.

use crate::backend::ChannelBackend;
use crate::error::{ChannelError, ChannelResult};

/// A channel held in a growable buffer.
///
/// Used by tests and by writers whose output does not need to outlive the
/// process. Mutation only happens through `&mut self`, so no lock is needed.
#[derive(Debug, Default, Clone)]
pub struct InMemoryBackend {
    bytes: Vec<u8>,
}

impl InMemoryBackend {
    /// Creates an empty channel.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything appended so far.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl ChannelBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> ChannelResult<Vec<u8>> {
        let size = self.bytes.len() as u64;
        let range = usize::try_from(offset)
            .ok()
            .and_then(|start| Some(start..start.checked_add(len)?))
            .filter(|range| range.end <= self.bytes.len());
        match range {
            Some(range) => Ok(self.bytes[range].to_vec()),
            None => Err(ChannelError::ReadPastEnd { offset, len, size }),
        }
    }

    fn append(&mut self, data: &[u8]) -> ChannelResult<u64> {
        let offset = self.bytes.len() as u64;
        self.bytes.extend_from_slice(data);
        Ok(offset)
    }

    fn flush(&mut self) -> ChannelResult<()> {
        Ok(())
    }

    fn size(&self) -> ChannelResult<u64> {
        Ok(self.bytes.len() as u64)
    }

    fn sync(&mut self) -> ChannelResult<()> {
        Ok(())
    }
}
