//! Unified error type for the Wirelink substrate.

use wirelink_client::ClientError;
use wirelink_protocol::ProtocolError;
use wirelink_server::ServerError;
use wirelink_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `wirelink` meta-crate, you deal with this single
/// error type instead of importing errors from each sub-crate.
/// The `#[from]` attribute on each variant auto-generates `From` impls,
/// so the `?` operator converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum WirelinkError {
    /// A transport-level error (connection, send, accept).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (framing, encode, decode).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A client-session error (handshake, channel fault, closed).
    #[error(transparent)]
    Client(#[from] ClientError),

    /// A server-hosting error (configuration, unknown connection).
    #[error(transparent)]
    Server(#[from] ServerError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::ConnectionClosed("gone".into());
        let wirelink_err: WirelinkError = err.into();
        assert!(matches!(wirelink_err, WirelinkError::Transport(_)));
        assert!(wirelink_err.to_string().contains("gone"));
    }

    #[test]
    fn test_from_protocol_error() {
        let err = ProtocolError::InvalidMessage("bad".into());
        let wirelink_err: WirelinkError = err.into();
        assert!(matches!(wirelink_err, WirelinkError::Protocol(_)));
    }

    #[test]
    fn test_from_client_error() {
        let err = ClientError::InvalidChannel(3);
        let wirelink_err: WirelinkError = err.into();
        assert!(matches!(wirelink_err, WirelinkError::Client(_)));
    }

    #[test]
    fn test_from_server_error() {
        let err = ServerError::UnknownConnection(wirelink_protocol::ConnectionId(9));
        let wirelink_err: WirelinkError = err.into();
        assert!(matches!(wirelink_err, WirelinkError::Server(_)));
        assert!(wirelink_err.to_string().contains("C-9"));
    }
}
