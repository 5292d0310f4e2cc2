//! A hosted connection: one client as the server sees it.
//!
//! A [`Connection`] stitches the client's physical channels (one endpoint
//! per channel, possibly owned by different acceptors) into a single
//! logical peer with one identity, one attribute bag, and one dispatch
//! order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use wirelink_protocol::{
    frame, Codec, ConnectionId, ControlMessage, DisconnectKind, Message, UNASSIGNED_ID,
};
use wirelink_transport::Endpoint;

use crate::error::ServerError;

/// Observer for connections joining and leaving the server.
///
/// `connection_added` fires exactly once per client, after the handshake
/// completes on every channel. `connection_removed` fires exactly once
/// for every connection that was added, regardless of how many of its
/// channels fail.
pub trait ConnectionListener<S>: Send + Sync {
    /// A client finished registering on all channels.
    fn connection_added(&self, connection: &Arc<S>);

    /// A previously added client is gone.
    fn connection_removed(&self, connection: &Arc<S>);
}

/// One client, unified across its physical channels.
///
/// Channel 0 is the reliable default, channel 1 the best-effort default,
/// and channels 2+ are the configured alternates, in announcement order.
pub struct Connection<E, C> {
    temp_id: i64,
    id: AtomicI64,
    codec: C,
    endpoints: Mutex<Vec<Option<Arc<E>>>>,
    attributes: Mutex<HashMap<String, serde_json::Value>>,
    closed: AtomicBool,
    created_at: Instant,
    /// Serializes listener dispatch so each connection sees its messages
    /// in arrival order even when channels are drained concurrently.
    pub(crate) dispatch_lock: tokio::sync::Mutex<()>,
}

impl<E, C> Connection<E, C>
where
    E: Endpoint,
    C: Codec + Clone,
{
    pub(crate) fn new(temp_id: i64, channels: usize, codec: C) -> Self {
        Self {
            temp_id,
            id: AtomicI64::new(UNASSIGNED_ID),
            codec,
            endpoints: Mutex::new(vec![None; channels]),
            attributes: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            created_at: Instant::now(),
            dispatch_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// The temporary identity the client registered under.
    pub fn temp_id(&self) -> i64 {
        self.temp_id
    }

    /// The server-assigned identity, or [`UNASSIGNED_ID`] while the
    /// handshake is still incomplete.
    pub fn id(&self) -> ConnectionId {
        ConnectionId(self.id.load(Ordering::SeqCst))
    }

    pub(crate) fn assign_id(&self, id: i64) {
        self.id.store(id, Ordering::SeqCst);
    }

    /// How long ago the first channel registered.
    pub(crate) fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Records the endpoint for a channel. Registering the same channel
    /// twice keeps the first endpoint. Returns `true` once every channel
    /// slot is filled.
    pub(crate) fn register_endpoint(&self, channel: usize, endpoint: Arc<E>) -> bool {
        let mut slots = self.endpoints.lock().expect("endpoint table poisoned");
        match slots.get_mut(channel) {
            Some(slot @ None) => *slot = Some(endpoint),
            Some(Some(existing)) => {
                if existing.id() != endpoint.id() {
                    tracing::warn!(
                        temp_id = self.temp_id,
                        channel,
                        "channel re-registered with a different endpoint, keeping the first"
                    );
                }
            }
            None => {
                tracing::warn!(
                    temp_id = self.temp_id,
                    channel,
                    "registration named a channel the server never configured"
                );
                return false;
            }
        }
        slots.iter().all(Option::is_some)
    }

    /// The endpoint behind a channel, if that channel has registered.
    pub fn endpoint(&self, channel: usize) -> Option<Arc<E>> {
        let slots = self.endpoints.lock().expect("endpoint table poisoned");
        slots.get(channel)?.clone()
    }

    /// Every endpoint registered so far.
    pub fn endpoints(&self) -> Vec<Arc<E>> {
        let slots = self.endpoints.lock().expect("endpoint table poisoned");
        slots.iter().flatten().cloned().collect()
    }

    /// The remote address of the reliable channel, for logging.
    pub fn address(&self) -> String {
        match self.endpoint(0) {
            Some(ep) => ep.address(),
            None => "<unregistered>".to_string(),
        }
    }

    /// Attaches application state to this connection.
    pub fn set_attribute(&self, key: impl Into<String>, value: serde_json::Value) {
        self.attributes
            .lock()
            .expect("attribute map poisoned")
            .insert(key.into(), value);
    }

    /// Reads back an attribute set earlier.
    pub fn attribute(&self, key: &str) -> Option<serde_json::Value> {
        self.attributes
            .lock()
            .expect("attribute map poisoned")
            .get(key)
            .cloned()
    }

    /// Removes an attribute, returning its last value.
    pub fn remove_attribute(&self, key: &str) -> Option<serde_json::Value> {
        self.attributes
            .lock()
            .expect("attribute map poisoned")
            .remove(key)
    }

    /// Sends a message, picking the channel from the message's
    /// reliability flag: channel 0 for reliable, channel 1 for
    /// best-effort when it exists, channel 0 otherwise.
    pub async fn send(&self, message: &Message) -> Result<(), ServerError> {
        let channel = if message.reliable || self.endpoint(1).is_none() {
            0
        } else {
            1
        };
        self.send_on(channel, message).await
    }

    /// Sends a message on a specific channel.
    pub async fn send_on(&self, channel: usize, message: &Message) -> Result<(), ServerError> {
        let endpoint = self
            .endpoint(channel)
            .ok_or(ServerError::InvalidChannel(channel))?;
        let bytes = frame(&self.codec.encode(&message.payload)?)?;
        endpoint
            .write(&bytes)
            .await
            .map_err(ServerError::transport)
    }

    /// Ejects the client: a best-effort `Disconnect` notice on the
    /// reliable channel, then every endpoint closed. The transport close
    /// is what ultimately drives the removal event.
    pub async fn close(&self, reason: &str) {
        let notice = Message::control(ControlMessage::Disconnect {
            kind: DisconnectKind::Kick,
            reason: reason.to_string(),
        });
        if let Err(error) = self.send(&notice).await {
            tracing::debug!(id = %self.id(), %error, "disconnect notice not delivered");
        }
        self.close_endpoints().await;
    }

    pub(crate) async fn close_endpoints(&self) {
        for endpoint in self.endpoints() {
            if let Err(error) = endpoint.close().await {
                tracing::debug!(id = %self.id(), %error, "endpoint close failed");
            }
        }
    }

    /// Flips the closed flag, returning `true` only for the first caller.
    /// Guards the removal notification when several channels fail at
    /// once.
    pub(crate) fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::StubEndpoint;
    use wirelink_protocol::{JsonCodec, MessageKind, Payload};

    fn conn(channels: usize) -> Connection<StubEndpoint, JsonCodec> {
        Connection::new(42, channels, JsonCodec)
    }

    #[test]
    fn test_register_endpoint_reports_complete_when_all_slots_fill() {
        let connection = conn(2);
        assert!(!connection.register_endpoint(0, StubEndpoint::new(1)));
        assert!(connection.register_endpoint(1, StubEndpoint::new(2)));
    }

    #[test]
    fn test_register_endpoint_same_channel_twice_keeps_first() {
        let connection = conn(2);
        let first = StubEndpoint::new(1);
        connection.register_endpoint(0, first.clone());
        connection.register_endpoint(0, StubEndpoint::new(9));
        assert_eq!(connection.endpoint(0).unwrap().id(), first.id());
    }

    #[test]
    fn test_register_endpoint_out_of_range_channel_is_ignored() {
        let connection = conn(2);
        assert!(!connection.register_endpoint(5, StubEndpoint::new(1)));
        assert!(connection.endpoints().is_empty());
    }

    #[test]
    fn test_id_is_unassigned_until_promoted() {
        let connection = conn(2);
        assert_eq!(connection.id(), ConnectionId(UNASSIGNED_ID));
        connection.assign_id(7);
        assert_eq!(connection.id(), ConnectionId(7));
    }

    #[test]
    fn test_attributes_set_get_remove() {
        let connection = conn(2);
        connection.set_attribute("player", serde_json::json!({ "name": "alice" }));
        assert_eq!(
            connection.attribute("player").unwrap()["name"],
            "alice"
        );
        assert_eq!(
            connection.remove_attribute("player").unwrap()["name"],
            "alice"
        );
        assert!(connection.attribute("player").is_none());
    }

    #[tokio::test]
    async fn test_send_routes_by_reliability_flag() {
        let connection = conn(2);
        let reliable = StubEndpoint::new(1);
        let best_effort = StubEndpoint::new(2);
        connection.register_endpoint(0, reliable.clone());
        connection.register_endpoint(1, best_effort.clone());

        connection
            .send(&Message::reliable(MessageKind(1), vec![1]))
            .await
            .unwrap();
        connection
            .send(&Message::best_effort(MessageKind(2), vec![2]))
            .await
            .unwrap();

        assert_eq!(reliable.frames().len(), 1);
        assert_eq!(best_effort.frames().len(), 1);
    }

    #[tokio::test]
    async fn test_send_best_effort_falls_back_to_reliable_channel() {
        let connection = conn(2);
        let reliable = StubEndpoint::new(1);
        connection.register_endpoint(0, reliable.clone());

        connection
            .send(&Message::best_effort(MessageKind(2), vec![2]))
            .await
            .unwrap();

        assert_eq!(reliable.frames().len(), 1);
    }

    #[tokio::test]
    async fn test_send_on_unregistered_channel_is_invalid() {
        let connection = conn(2);
        let result = connection
            .send_on(1, &Message::reliable(MessageKind(1), vec![]))
            .await;
        assert!(matches!(result, Err(ServerError::InvalidChannel(1))));
    }

    #[tokio::test]
    async fn test_close_sends_kick_notice_then_closes_endpoints() {
        let connection = conn(2);
        let reliable = StubEndpoint::new(1);
        let best_effort = StubEndpoint::new(2);
        connection.register_endpoint(0, reliable.clone());
        connection.register_endpoint(1, best_effort.clone());

        connection.close("session over").await;

        let payloads = reliable.frames();
        assert_eq!(payloads.len(), 1);
        match &payloads[0] {
            Payload::Control(ControlMessage::Disconnect { kind, reason }) => {
                assert_eq!(*kind, DisconnectKind::Kick);
                assert_eq!(reason, "session over");
            }
            other => panic!("expected disconnect, got {other:?}"),
        }
        assert!(!reliable.is_connected());
        assert!(!best_effort.is_connected());
    }

    #[test]
    fn test_mark_closed_is_first_caller_only() {
        let connection = conn(2);
        assert!(connection.mark_closed());
        assert!(!connection.mark_closed());
    }
}
