//! Error types for the client layer.

use wirelink_protocol::ProtocolError;

/// Errors that can occur in the client session layer.
///
/// Transport errors cross a generic boundary (the client works against
/// any [`Connector`](wirelink_transport::Connector) implementation), so
/// they are carried boxed rather than as a concrete type.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// A protocol-level error (framing, encode, decode).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A transport-level error (connect, send, receive).
    #[error("transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A channel closed without being asked to.
    #[error("connection lost on {0}")]
    ConnectionLost(String),

    /// A send named a channel index that was never configured.
    #[error("invalid channel index {0}")]
    InvalidChannel(usize),

    /// The session is closed; no further sends are possible.
    #[error("session closed: {0}")]
    Closed(String),

    /// An application listener panicked during dispatch.
    #[error("message handler panicked: {0}")]
    Handler(String),
}

impl ClientError {
    /// Wraps a transport error of any concrete type.
    pub fn transport<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Transport(Box::new(error))
    }
}
