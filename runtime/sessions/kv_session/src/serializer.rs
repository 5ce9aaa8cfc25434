use std::collections::HashMap;

use errors::SerializerError;

/// The set of key-value pairs attached to a session.
pub type SessionValues = HashMap<String, serde_json::Value>;

/// Converts session values to and from the bytes persisted in the cache.
///
/// The persisted payload is the raw output of [`serialize`](SessionSerializer::serialize),
/// without any envelope.
pub trait SessionSerializer: std::fmt::Debug + Send + Sync {
    /// Encode `values` into a payload.
    fn serialize(&self, values: &SessionValues) -> Result<Vec<u8>, SerializerError>;

    /// Decode `payload` and merge its entries into `values`.
    ///
    /// Entries already in `values` are overwritten if the payload
    /// contains the same key.
    fn deserialize(&self, payload: &[u8], values: &mut SessionValues)
    -> Result<(), SerializerError>;
}

#[derive(Debug, Clone, Copy, Default)]
/// Persist session values as a JSON object.
///
/// This is the default serializer. Integers and floats are kept apart:
/// `1` comes back as an integer, `1.0` as a float.
pub struct JsonSerializer;

impl SessionSerializer for JsonSerializer {
    fn serialize(&self, values: &SessionValues) -> Result<Vec<u8>, SerializerError> {
        serde_json::to_vec(values).map_err(|e| SerializerError::Serialization(e.into()))
    }

    fn deserialize(
        &self,
        payload: &[u8],
        values: &mut SessionValues,
    ) -> Result<(), SerializerError> {
        let decoded: SessionValues = serde_json::from_slice(payload)
            .map_err(|e| SerializerError::Deserialization(e.into()))?;
        values.extend(decoded);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
/// Persist session values using [RON](https://github.com/ron-rs/ron).
pub struct RonSerializer;

impl SessionSerializer for RonSerializer {
    fn serialize(&self, values: &SessionValues) -> Result<Vec<u8>, SerializerError> {
        ron::to_string(values)
            .map(String::into_bytes)
            .map_err(|e| SerializerError::Serialization(e.into()))
    }

    fn deserialize(
        &self,
        payload: &[u8],
        values: &mut SessionValues,
    ) -> Result<(), SerializerError> {
        let payload = std::str::from_utf8(payload)
            .map_err(|e| SerializerError::Deserialization(e.into()))?;
        let decoded: SessionValues =
            ron::from_str(payload).map_err(|e| SerializerError::Deserialization(e.into()))?;
        values.extend(decoded);
        Ok(())
    }
}

/// Errors that can occur when (de)serializing session values.
pub mod errors {
    #[non_exhaustive]
    #[derive(Debug, thiserror::Error)]
    /// The error returned by [`SessionSerializer`][super::SessionSerializer].
    pub enum SerializerError {
        /// Failed to serialize the session values.
        #[error("Failed to serialize the session values.")]
        Serialization(#[source] anyhow::Error),
        /// Failed to deserialize the session values.
        #[error("Failed to deserialize the session values.")]
        Deserialization(#[source] anyhow::Error),
    }
}
