/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection was closed.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Nothing is listening on the requested port.
    #[error("connection refused on port {0}")]
    ConnectionRefused(i32),

    /// An acceptor is already bound to the requested port.
    #[error("port {0} already in use")]
    PortInUse(i32),

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// The transport was shut down.
    #[error("transport shut down")]
    Shutdown,
}
