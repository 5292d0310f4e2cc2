//! Error types for the protocol layer.
//!
//! Each crate in Wirelink defines its own error enum. This keeps errors
//! specific and meaningful — when you see a `ProtocolError`, you know the
//! problem is in framing or serialization, not in networking or
//! connection management.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a payload into bytes).
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed (turning bytes into a payload).
    ///
    /// On a reliable channel this is fatal: once a byte stream
    /// desynchronizes from its framing there is no way to resynchronize.
    /// On a best-effort channel the offending datagram is simply dropped.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// A payload exceeds what the 16-bit length prefix can describe.
    ///
    /// The framing format caps a single message at
    /// [`MAX_PAYLOAD`](crate::MAX_PAYLOAD) bytes. Larger messages are a
    /// caller error — the substrate does not fragment.
    #[error("payload of {len} bytes exceeds the {max}-byte frame limit")]
    FrameTooLarge { len: usize, max: usize },

    /// The message is invalid at the protocol level.
    ///
    /// For logical errors that pass deserialization but violate protocol
    /// rules — e.g., a registration carrying an assigned identity from a
    /// client, or a channel index that was never configured.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
