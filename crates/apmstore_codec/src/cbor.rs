//! CBOR serialization over `ciborium`.

use crate::error::{CodecError, CodecResult};
use crate::{Prune, SerializationOptions, Serializer};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io;

/// Encodes a value to CBOR bytes.
///
/// # Errors
///
/// Returns an error if the value cannot be represented in CBOR.
pub fn to_cbor<T: Serialize + ?Sized>(value: &T) -> CodecResult<Vec<u8>> {
    let mut output = Vec::new();
    write_cbor(value, &mut output)?;
    Ok(output)
}

/// Decodes a value from CBOR bytes.
///
/// # Errors
///
/// Returns an error if the bytes are truncated or do not describe a `T`.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    ciborium::de::from_reader(bytes).map_err(|e| match e {
        ciborium::de::Error::Io(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
            CodecError::UnexpectedEof
        }
        other => CodecError::deserialization_failed(other.to_string()),
    })
}

fn write_cbor<T: Serialize + ?Sized>(value: &T, output: &mut Vec<u8>) -> CodecResult<()> {
    ciborium::ser::into_writer(value, output)
        .map_err(|e| CodecError::serialization_failed(e.to_string()))
}

/// The default [`Serializer`]: CBOR with options applied through [`Prune`].
#[derive(Debug, Default, Clone, Copy)]
pub struct CborSerializer;

impl CborSerializer {
    /// Creates a new CBOR serializer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl<T> Serializer<T> for CborSerializer
where
    T: Serialize + DeserializeOwned + Prune + Send + Sync,
{
    fn serialize(
        &self,
        value: &T,
        options: &SerializationOptions,
        output: &mut Vec<u8>,
    ) -> CodecResult<()> {
        let pruned = value.pruned(options);
        write_cbor(&*pruned, output)
    }

    fn deserialize(&self, input: &[u8]) -> CodecResult<T> {
        from_cbor(input)
    }
}
