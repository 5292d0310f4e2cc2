//! Server side of the Wirelink messaging substrate.
//!
//! A [`Server`] hosts one acceptor per channel and unifies each client's
//! physical channels into a single [`Connection`] through the
//! registration handshake:
//!
//! 1. Every channel a client opens registers under the same temporary
//!    identity.
//! 2. The registry stitches the registrations together; the last channel
//!    to arrive promotes the connection and exactly one caller observes
//!    the promotion.
//! 3. The server answers on the reliable channel with the assigned
//!    identity, then the start-of-service sentinel, and fires
//!    `connection_added`.
//!
//! ```text
//! Acceptor ──► drain task ──► ServerCore ──► ConnectionRegistry
//!   (one per channel)           ├─ control → handshake
//!                               └─ user    → listeners (per-connection order)
//! ```
//!
//! From then on the connection sends by reliability flag, carries
//! application attributes, and tears down as a unit: one failed channel
//! removes the whole client, with `connection_removed` fired exactly
//! once.

mod adapter;
mod connection;
mod error;
mod registry;
mod server;
#[cfg(test)]
mod testutil;

pub use connection::{Connection, ConnectionListener};
pub use error::ServerError;
pub use server::{Server, ServerBuilder, ServerConfig};
