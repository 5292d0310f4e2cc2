//! # Wirelink
//!
//! A client/server messaging substrate for games: several physical
//! channels (reliable, best-effort, and optional alternates) presented as
//! one logical connection with a single identity on each side.
//!
//! The pieces, each also available as its own crate:
//!
//! - [`wirelink_protocol`] — length-prefixed framing, control messages,
//!   codecs, and listener fan-out.
//! - [`wirelink_transport`] — the [`Connector`]/[`Acceptor`] traits the
//!   substrate is written against, plus an in-memory transport.
//! - [`wirelink_client`] — the [`Client`] session and its channel
//!   adapters.
//! - [`wirelink_server`] — the [`Server`], its connection registry, and
//!   hosted [`Connection`]s.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use wirelink::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), WirelinkError> {
//!     let net = MemNetwork::new();
//!
//!     let server = ServerBuilder::new("Demo", 1)
//!         .reliable(net.listen(7000)?)
//!         .best_effort(net.listen(7001)?)
//!         .start()?;
//!     server.add_listener(Arc::new(
//!         |conn: &Connection<MemEndpoint, JsonCodec>, msg: &Message| {
//!             println!("{} sent {:?}", conn.id(), msg.kind());
//!         },
//!     ));
//!
//!     let client = Client::connect(
//!         net.clone(),
//!         JsonCodec,
//!         "Demo",
//!         1,
//!         7000,
//!         7001,
//!         ClientConfig::default(),
//!     )
//!     .await?;
//!     client.send(&Message::reliable(MessageKind(1), b"hello".to_vec())).await?;
//!     Ok(())
//! }
//! ```
//!
//! [`Connector`]: wirelink_transport::Connector
//! [`Acceptor`]: wirelink_transport::Acceptor

mod error;

pub use error::WirelinkError;

pub use wirelink_client::{
    Client, ClientConfig, ClientError, DisconnectInfo, SessionListener, SessionState,
};
pub use wirelink_protocol::{
    frame, Codec, ConnectionId, ControlMessage, DisconnectKind, ErrorListener,
    ListenerRegistry, Message, MessageKind, MessageListener, Payload, ProtocolError,
    Reassembler, LENGTH_PREFIX_LEN, MAX_PAYLOAD, UNASSIGNED_ID,
};
#[cfg(feature = "json")]
pub use wirelink_protocol::JsonCodec;
pub use wirelink_server::{
    Connection, ConnectionListener, Server, ServerBuilder, ServerConfig, ServerError,
};
pub use wirelink_transport::{
    Acceptor, AcceptorEvent, Connector, ConnectorFactory, Endpoint, EndpointId,
    Envelope, Inbound, TransportError,
};
#[cfg(feature = "mem")]
pub use wirelink_transport::{MemAcceptor, MemConnector, MemEndpoint, MemNetwork};

/// Everything a typical application needs in one import.
pub mod prelude {
    pub use crate::{
        Client, ClientConfig, Connection, ConnectionId, ConnectionListener,
        DisconnectInfo, DisconnectKind, Message, MessageKind, Server, ServerBuilder,
        ServerConfig, SessionListener, SessionState, WirelinkError,
    };
    #[cfg(feature = "json")]
    pub use crate::JsonCodec;
    #[cfg(feature = "mem")]
    pub use crate::{MemEndpoint, MemNetwork};
}
