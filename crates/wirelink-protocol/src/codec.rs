//! Codec trait and implementations for serializing/deserializing payloads.
//!
//! A "codec" (coder/decoder) converts between Rust types and raw bytes.
//! The protocol layer doesn't care HOW payloads are serialized — it just
//! needs something that implements the [`Codec`] trait, so codecs can be
//! swapped without touching the rest of the stack.
//!
//! Currently we provide [`JsonCodec`] (human-readable, great for
//! debugging). A compact binary codec can be added later without changing
//! any other code.

use serde::{de::DeserializeOwned, Serialize};

use crate::ProtocolError;

/// A codec that can encode Rust types to bytes and decode bytes back.
///
/// `Send + Sync + 'static` because a codec is shared by every reader and
/// writer task of a connection for its whole lifetime.
///
/// The methods are generic over the value type: `encode` works for any
/// `T: Serialize`, `decode` for any `T: DeserializeOwned` (the result owns
/// all its data, so the input buffer can be dropped immediately).
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed,
    /// incomplete, or don't match the expected type.
    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// Behind the `json` feature flag (enabled by default).
///
/// ## Example
///
/// ```rust
/// use wirelink_protocol::{Codec, JsonCodec, Payload, MessageKind};
///
/// let codec = JsonCodec;
/// let payload = Payload::User {
///     kind: MessageKind(3),
///     data: vec![1, 2, 3],
/// };
///
/// let bytes = codec.encode(&payload).unwrap();
/// let decoded: Payload = codec.decode(&bytes).unwrap();
/// assert_eq!(payload, decoded);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}
