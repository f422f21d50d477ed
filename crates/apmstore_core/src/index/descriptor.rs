//! Record locator.

use serde::{Deserialize, Serialize};

/// Locates one record: the channel it was written to and its byte range.
///
/// A reserved but not yet written descriptor has length zero and is never
/// handed out to readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Descriptor {
    /// Channel the record bytes live in.
    pub channel_id: u32,
    /// Byte offset inside the channel.
    pub offset: u64,
    /// Byte length of the serialized record.
    pub length: u64,
}

impl Descriptor {
    /// Creates a descriptor.
    #[must_use]
    pub const fn new(channel_id: u32, offset: u64, length: u64) -> Self {
        Self {
            channel_id,
            offset,
            length,
        }
    }

    /// Creates the placeholder handed out at reservation time.
    #[must_use]
    pub const fn reserved(channel_id: u32) -> Self {
        Self::new(channel_id, 0, 0)
    }

    /// True once offset and length were filled in.
    #[must_use]
    pub const fn is_committed(&self) -> bool {
        self.length > 0
    }
}
