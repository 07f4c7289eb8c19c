//! Serialization boundary between the repository and its stores.
//!
//! Events and snapshots cross the store boundary as bytes. The [`Codec`]
//! trait is the seam; [`JsonCodec`] is the default implementation.

/// Byte-level serialization strategy.
pub trait Codec {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Serialize a value to bytes.
    ///
    /// # Errors
    ///
    /// Returns a codec-specific error when the value cannot be encoded.
    fn serialize<T>(&self, value: &T) -> Result<Vec<u8>, Self::Error>
    where
        T: serde::Serialize;

    /// Deserialize a value from bytes.
    ///
    /// # Errors
    ///
    /// Returns a codec-specific error when the bytes do not decode to `T`.
    fn deserialize<T>(&self, data: &[u8]) -> Result<T, Self::Error>
    where
        T: serde::de::DeserializeOwned;
}

/// JSON codec backed by `serde_json`.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    type Error = serde_json::Error;

    fn serialize<T>(&self, value: &T) -> Result<Vec<u8>, Self::Error>
    where
        T: serde::Serialize,
    {
        serde_json::to_vec(value)
    }

    fn deserialize<T>(&self, data: &[u8]) -> Result<T, Self::Error>
    where
        T: serde::de::DeserializeOwned,
    {
        serde_json::from_slice(data)
    }
}
