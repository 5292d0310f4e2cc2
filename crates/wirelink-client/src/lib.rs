//! Client side of the Wirelink messaging substrate.
//!
//! A [`Client`] turns several physical connections — one reliable, one
//! best-effort, plus any alternate channels the server announces — into a
//! single logical session:
//!
//! 1. **Connect**: open the two default channels and register both under
//!    a client-generated temporary identity.
//! 2. **Handshake**: open any alternate channels the server lists, wait
//!    for the server to assign a permanent identity.
//! 3. **Run**: typed send (the `reliable` flag picks the channel) and
//!    listener-based receive, with per-session serialized dispatch.
//!
//! ```text
//! Connector ──► ChannelAdapter (reader/writer tasks) ──► Client dispatcher
//!                                                          ├─ control → state machine
//!                                                          └─ user    → listeners
//! ```

mod adapter;
mod client;
mod error;

pub use client::{
    Client, ClientConfig, DisconnectInfo, SessionListener, SessionState,
};
pub use error::ClientError;
