//! # apmstore Codec
//!
//! Record serialization for apmstore.
//!
//! The storage writer never depends on a concrete wire format. It hands each
//! record to a [`Serializer`] together with the [`SerializationOptions`] the
//! caller chose, and writes whatever bytes come back. [`CborSerializer`] is
//! the implementation used by default; storage metadata and persisted index
//! generations are also encoded as CBOR through [`to_cbor`] and [`from_cbor`].
//!
//! ## Usage
//!
//! ```
//! use apmstore_codec::{from_cbor, to_cbor};
//!
//! let bytes = to_cbor(&(7u64, "timer")).unwrap();
//! let decoded: (u64, String) = from_cbor(&bytes).unwrap();
//! assert_eq!(decoded, (7, "timer".to_string()));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cbor;
mod error;

pub use cbor::{from_cbor, to_cbor, CborSerializer};
pub use error::{CodecError, CodecResult};

use std::borrow::Cow;

/// Per-write options that shape how a record is serialized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SerializationOptions {
    /// Drop nested children (for example the calls inside a trace) and keep
    /// only the top-level element.
    pub omit_children: bool,
}

impl SerializationOptions {
    /// Creates default options: everything is written.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            omit_children: false,
        }
    }

    /// Sets whether nested children are dropped.
    #[must_use]
    pub const fn omit_children(mut self, value: bool) -> Self {
        self.omit_children = value;
        self
    }
}

/// Types that can drop parts of themselves before being serialized.
pub trait Prune: Clone {
    /// Returns the value to serialize under `options`.
    ///
    /// Borrowing is the common case; an owned copy is only needed when the
    /// options actually remove something.
    fn pruned(&self, options: &SerializationOptions) -> Cow<'_, Self>;
}

/// Serializes values of type `T` into a byte buffer.
pub trait Serializer<T>: Send + Sync {
    /// Serializes `value` and appends the bytes to `output`.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be serialized. `output` may
    /// contain partial data in that case and should be discarded.
    fn serialize(
        &self,
        value: &T,
        options: &SerializationOptions,
        output: &mut Vec<u8>,
    ) -> CodecResult<()>;

    /// Deserializes a value previously produced by [`Serializer::serialize`].
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid encoding of `T`.
    fn deserialize(&self, input: &[u8]) -> CodecResult<T>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Node {
        name: String,
        children: Vec<Node>,
    }

    impl Prune for Node {
        fn pruned(&self, options: &SerializationOptions) -> Cow<'_, Self> {
            if options.omit_children && !self.children.is_empty() {
                Cow::Owned(Node {
                    name: self.name.clone(),
                    children: Vec::new(),
                })
            } else {
                Cow::Borrowed(self)
            }
        }
    }

    fn tree() -> Node {
        Node {
            name: "root".into(),
            children: vec![Node {
                name: "child".into(),
                children: Vec::new(),
            }],
        }
    }

    #[test]
    fn serializer_writes_full_value_by_default() {
        let serializer = CborSerializer::new();
        let mut out = Vec::new();
        serializer
            .serialize(&tree(), &SerializationOptions::new(), &mut out)
            .unwrap();

        let decoded: Node = serializer.deserialize(&out).unwrap();
        assert_eq!(decoded, tree());
    }

    #[test]
    fn serializer_applies_options() {
        let serializer = CborSerializer::new();
        let mut full = Vec::new();
        let mut pruned = Vec::new();
        let options = SerializationOptions::new().omit_children(true);

        serializer
            .serialize(&tree(), &SerializationOptions::new(), &mut full)
            .unwrap();
        serializer.serialize(&tree(), &options, &mut pruned).unwrap();

        let decoded: Node = serializer.deserialize(&pruned).unwrap();
        assert!(decoded.children.is_empty());
        assert!(pruned.len() < full.len());
    }

    #[test]
    fn truncated_input_is_reported() {
        let bytes = to_cbor(&tree()).unwrap();
        let result: CodecResult<Node> = from_cbor(&bytes[..bytes.len() - 2]);
        assert!(result.is_err());
    }

    #[test]
    fn garbage_input_fails_to_decode() {
        let result: CodecResult<Node> = from_cbor(&[0xff, 0x00, 0x13]);
        assert!(matches!(
            result,
            Err(CodecError::DeserializationFailed { .. }) | Err(CodecError::UnexpectedEof)
        ));
    }

    proptest::proptest! {
        #[test]
        fn decoding_arbitrary_bytes_never_panics(
            bytes in proptest::collection::vec(proptest::num::u8::ANY, 0..64)
        ) {
            let _ = from_cbor::<Node>(&bytes);
        }
    }
}
