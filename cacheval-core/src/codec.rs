use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::error::BoxError;

/// Failure to turn a value into a payload or a payload back into a value.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode value: {0}")]
    Encode(#[source] BoxError),
    #[error("failed to decode payload: {0}")]
    Decode(#[source] BoxError),
}

impl CodecError {
    pub fn encode(err: impl Into<BoxError>) -> Self {
        CodecError::Encode(err.into())
    }

    pub fn decode(err: impl Into<BoxError>) -> Self {
        CodecError::Decode(err.into())
    }
}

/// Encodes values of type `T` into byte payloads and back.
///
/// Every caller of a cached function gets its own copy of the value, decoded
/// from the stored payload.
///
/// # Examples
///
/// A codec for a type that serde cannot represent:
///
/// ```
/// use cacheval_core::{Codec, CodecError};
///
/// struct Celsius(f32);
///
/// struct CelsiusCodec;
///
/// impl Codec<Celsius> for CelsiusCodec {
///     fn encode(&self, value: &Celsius) -> Result<Vec<u8>, CodecError> {
///         Ok(value.0.to_le_bytes().to_vec())
///     }
///
///     fn decode(&self, payload: &[u8]) -> Result<Celsius, CodecError> {
///         let bytes: [u8; 4] = payload
///             .try_into()
///             .map_err(|_| CodecError::decode("expected 4 bytes"))?;
///         Ok(Celsius(f32::from_le_bytes(bytes)))
///     }
/// }
///
/// let codec = CelsiusCodec;
/// let payload = codec.encode(&Celsius(21.5)).unwrap();
/// assert_eq!(codec.decode(&payload).unwrap().0, 21.5);
/// ```
pub trait Codec<T>: Send + Sync {
    fn encode(&self, value: &T) -> Result<Vec<u8>, CodecError>;
    fn decode(&self, payload: &[u8]) -> Result<T, CodecError>;
}

/// Default codec: JSON through `serde_json`.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl<T: Serialize + DeserializeOwned> Codec<T> for JsonCodec {
    fn encode(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(CodecError::encode)
    }

    fn decode(&self, payload: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(payload).map_err(CodecError::decode)
    }
}
