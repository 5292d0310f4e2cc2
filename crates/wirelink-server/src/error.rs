//! Error types for the server layer.

use wirelink_protocol::{ConnectionId, ProtocolError};

/// Errors that can occur in the server hosting layer.
///
/// Transport errors cross a generic boundary (the server works against
/// any [`Acceptor`](wirelink_transport::Acceptor) implementation), so
/// they are carried boxed rather than as a concrete type.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// A protocol-level error (framing, encode, decode).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A transport-level error (accept, send, close).
    #[error("transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The server was assembled without a required piece.
    #[error("invalid server configuration: {0}")]
    Config(String),

    /// A send named a connection the server is not hosting.
    #[error("no such connection: {0}")]
    UnknownConnection(ConnectionId),

    /// A send named a channel index that was never configured.
    #[error("invalid channel index {0}")]
    InvalidChannel(usize),

    /// An application listener panicked during dispatch.
    #[error("message handler panicked: {0}")]
    Handler(String),
}

impl ServerError {
    /// Wraps a transport error of any concrete type.
    pub fn transport<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Transport(Box::new(error))
    }
}
