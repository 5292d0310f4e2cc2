//! Transport abstraction layer for Wirelink.
//!
//! Provides the traits the messaging substrate is written against:
//!
//! - [`Connector`] — client side, one physical connection.
//! - [`ConnectorFactory`] — opens additional connectors (the best-effort
//!   channel and any alternate channels announced during the handshake).
//! - [`Acceptor`] / [`Endpoint`] — server side, one listener that owns
//!   many physical endpoints and multiplexes their events and data.
//!
//! Concrete socket transports live outside this workspace; what ships
//! here is an in-memory transport for tests and demos.
//!
//! # Feature Flags
//!
//! - `mem` (default) — in-memory transport via [`MemNetwork`]
//!
//! Trait methods are declared as `fn ... -> impl Future + Send` rather
//! than `async fn` so the futures carry a `Send` bound: the client and
//! server spawn their read loops onto the tokio runtime through these
//! traits. Implementations still write plain `async fn`.

mod error;
#[cfg(feature = "mem")]
mod mem;

pub use error::TransportError;
#[cfg(feature = "mem")]
pub use mem::{MemAcceptor, MemConnector, MemEndpoint, MemNetwork};

use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Opaque identifier for a server-side endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointId(u64);

impl EndpointId {
    /// Creates a new `EndpointId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ep-{}", self.0)
    }
}

/// Client side: one physical connection that can send and receive raw
/// byte blocks.
pub trait Connector: Send + Sync + 'static {
    /// The error type for connector operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Receives the next block of bytes from the remote peer.
    ///
    /// Awaits until data arrives; returns `Ok(None)` when the connection
    /// is cleanly closed. A close from another task must cause a pending
    /// `read` to resolve.
    fn read(
        &self,
    ) -> impl Future<Output = Result<Option<Vec<u8>>, Self::Error>> + Send;

    /// Sends a block of bytes to the remote peer.
    fn write(
        &self,
        data: &[u8],
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Closes the connection. Must be idempotent.
    ///
    /// `flush` asks the transport to deliver already-queued data before
    /// tearing down, where it can.
    fn close(
        &self,
        flush: bool,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Whether the connection is still up.
    fn is_connected(&self) -> bool;

    /// A human-readable address for logging.
    fn address(&self) -> String;
}

/// Opens connectors to a host by port.
///
/// The client uses one factory for all of its channels: the reliable and
/// best-effort defaults at connect time, and any alternate channels the
/// server announces during the handshake.
pub trait ConnectorFactory: Send + Sync + 'static {
    /// The connector type produced by this factory.
    type Connector: Connector;
    /// The error type for connect operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Opens a new connection to the given port.
    fn connect(
        &self,
        port: i32,
    ) -> impl Future<Output = Result<Self::Connector, Self::Error>> + Send;
}

/// Server side: one physical connection owned by an [`Acceptor`].
pub trait Endpoint: Send + Sync + 'static {
    /// The error type for endpoint operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Returns the unique identifier for this endpoint.
    fn id(&self) -> EndpointId;

    /// A human-readable address for logging.
    fn address(&self) -> String;

    /// Whether the endpoint is still connected.
    fn is_connected(&self) -> bool;

    /// Sends a block of bytes to the remote peer.
    fn write(
        &self,
        data: &[u8],
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Closes the endpoint. Must be idempotent.
    fn close(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// One inbound raw data delivery, tagged with its source endpoint.
#[derive(Debug)]
pub struct Envelope<E> {
    /// The endpoint the data arrived on.
    pub endpoint: Arc<E>,
    /// The raw bytes, exactly as the transport delivered them.
    pub data: Vec<u8>,
}

/// An endpoint joining or leaving an acceptor.
#[derive(Debug)]
pub enum AcceptorEvent<E> {
    /// A new endpoint connected.
    Added(Arc<E>),
    /// An endpoint disconnected (remote close or transport failure).
    Removed(Arc<E>),
}

/// The result of an [`Acceptor::read`] call.
#[derive(Debug)]
pub enum Inbound<E> {
    /// A block of data arrived.
    Data(Envelope<E>),
    /// Endpoint add/remove events are queued; drain them with
    /// [`Acceptor::next_event`] before reading again.
    EventsPending,
}

/// Server side: accepts and owns many endpoints, multiplexing their
/// lifecycle events and inbound data behind a single read call.
pub trait Acceptor: Send + 'static {
    /// The endpoint type produced by this acceptor.
    type Endpoint: Endpoint;
    /// The error type for acceptor operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Prepares the acceptor for use.
    fn initialize(&mut self) -> Result<(), Self::Error>;

    /// Awaits the next inbound data block, or reports that endpoint
    /// events are pending.
    ///
    /// Returns [`Inbound::EventsPending`] instead of blocking whenever
    /// add/remove events are queued, so callers drain [`next_event`]
    /// promptly.
    ///
    /// [`next_event`]: Acceptor::next_event
    fn read(
        &mut self,
    ) -> impl Future<Output = Result<Inbound<Self::Endpoint>, Self::Error>> + Send;

    /// Pops the next queued endpoint event, if any. Never blocks.
    fn next_event(&mut self) -> Option<AcceptorEvent<Self::Endpoint>>;

    /// Shuts the acceptor down, closing every owned endpoint.
    ///
    /// Endpoints that connected but were never observed through
    /// [`read`](Acceptor::read) are closed too.
    fn terminate(
        &mut self,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}
