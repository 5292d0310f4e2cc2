//! Wire protocol for Wirelink.
//!
//! This crate defines the "language" that clients and servers speak:
//!
//! - **Types** ([`Message`], [`Payload`], [`ControlMessage`], etc.) — the
//!   structures that travel on the wire.
//! - **Framing** ([`frame`], [`Reassembler`]) — how message bytes are
//!   delimited on a raw byte stream.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]) — how payloads are
//!   converted to/from bytes.
//! - **Listeners** ([`MessageListener`], [`ListenerRegistry`]) — how
//!   received messages fan out to application handlers.
//! - **Errors** ([`ProtocolError`]) — what can go wrong along the way.
//!
//! # Architecture
//!
//! The protocol layer sits between transport (raw bytes) and the logical
//! connection layers. It doesn't know about channels or connections — it
//! only knows how to frame, serialize, and dispatch messages.
//!
//! ```text
//! Transport (bytes) → Framing (frames) → Codec (Payload) → Listeners
//! ```

mod codec;
mod error;
mod framing;
mod listener;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use framing::{frame, Reassembler, LENGTH_PREFIX_LEN, MAX_PAYLOAD};
pub use listener::{ErrorListener, ListenerRegistry, MessageListener};
pub use types::{
    ConnectionId, ControlMessage, DisconnectKind, Message, MessageKind,
    Payload, UNASSIGNED_ID,
};
