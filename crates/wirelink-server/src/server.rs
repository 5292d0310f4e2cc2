//! The hosting server: acceptors in, hosted connections out.
//!
//! A [`Server`] owns one acceptor per channel — reliable, best-effort,
//! and any alternates — and runs one drain task per acceptor. The drain
//! tasks feed a shared [`ServerCore`], which owns the registry, the
//! handshake logic, and listener fan-out.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::Notify;

use wirelink_protocol::{
    frame, Codec, ConnectionId, ControlMessage, DisconnectKind, ErrorListener,
    ListenerRegistry, Message, MessageKind, MessageListener, Payload, UNASSIGNED_ID,
};
use wirelink_transport::{Acceptor, Endpoint};

use crate::adapter::run_acceptor;
use crate::connection::{Connection, ConnectionListener};
use crate::error::ServerError;
use crate::registry::{ConnectionRegistry, Registration};

/// Configuration for server behavior.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// How long a pending connection may sit with missing channels before
    /// the server gives up on it. Zero disables the age-out. Default: 90
    /// seconds.
    pub pending_max_age: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            pending_max_age: Duration::from_secs(90),
        }
    }
}

/// Shared state behind every acceptor drain task.
pub(crate) struct ServerCore<E, C> {
    pub(crate) game_name: String,
    pub(crate) version: i32,
    pub(crate) alternate_ports: Vec<i32>,
    pub(crate) codec: C,
    pub(crate) registry: ConnectionRegistry<E, C>,
    listeners: StdMutex<ListenerRegistry<Connection<E, C>>>,
    connection_listeners:
        StdMutex<Vec<Arc<dyn ConnectionListener<Connection<E, C>>>>>,
    error_listeners:
        StdMutex<Vec<Arc<dyn ErrorListener<Connection<E, C>, ServerError>>>>,
}

impl<E, C> ServerCore<E, C>
where
    E: Endpoint,
    C: Codec + Clone,
{
    /// Routes one decoded payload from a drain task.
    pub(crate) async fn handle_payload(
        &self,
        channel: usize,
        reliable: bool,
        endpoint: &Arc<E>,
        payload: Payload,
    ) {
        match payload {
            Payload::Control(ControlMessage::Register {
                temp_id,
                game_name,
                version,
                ..
            }) => {
                self.handle_register(channel, endpoint, temp_id, &game_name, version)
                    .await;
            }
            Payload::Control(ControlMessage::Disconnect { kind, reason }) => {
                tracing::info!(?kind, %reason, "client signed off");
                self.teardown_endpoint(endpoint).await;
            }
            Payload::Control(ControlMessage::ChannelInfo { .. }) => {
                tracing::warn!(channel, "unexpected channel info from a client, ignoring");
            }
            user @ Payload::User { .. } => {
                self.dispatch_user(endpoint, Message { reliable, payload: user })
                    .await;
            }
        }
    }

    /// One channel registration. Channel 0 carries the game name and
    /// version, which gate the whole client; the last channel to register
    /// promotes the connection and triggers the identity reply.
    async fn handle_register(
        &self,
        channel: usize,
        endpoint: &Arc<E>,
        temp_id: i64,
        game_name: &str,
        version: i32,
    ) {
        if channel == 0 && (game_name != self.game_name || version != self.version) {
            tracing::warn!(
                temp_id,
                client_game = game_name,
                client_version = version,
                "rejecting client: game name/version mismatch"
            );
            let reason = format!("server hosts {} v{}", self.game_name, self.version);
            self.send_control(
                endpoint,
                ControlMessage::Disconnect {
                    kind: DisconnectKind::Error,
                    reason,
                },
            )
            .await;
            if let Err(error) = endpoint.close().await {
                tracing::debug!(%error, "close after rejection failed");
            }
            // Sibling channels may have registered before this one; the
            // rejection kills the whole handshake, not just channel 0.
            if let Some(pending) = self.registry.remove_pending(temp_id).await {
                pending.mark_closed();
                pending.close_endpoints().await;
            }
            return;
        }

        let (outcome, expired) = self
            .registry
            .register(temp_id, channel, Arc::clone(endpoint))
            .await;

        // Stale handshakes surface here; their clients never see an added
        // or removed event, just a dead transport.
        for stale in expired {
            stale.mark_closed();
            stale.close_endpoints().await;
        }

        // Alternate channels are announced on channel 0, before any
        // promotion reply can exist (the alternates themselves are still
        // missing at this point).
        if channel == 0 && !self.alternate_ports.is_empty() {
            self.send_control(
                endpoint,
                ControlMessage::ChannelInfo {
                    temp_id,
                    ports: self.alternate_ports.clone(),
                },
            )
            .await;
        }

        if let Registration::Promoted(conn) = outcome {
            // The identity reply goes out on the client's reliable
            // channel: first the assigned id, then the unassigned
            // sentinel meaning "the server is done wiring you up".
            if let Some(reliable) = conn.endpoint(0) {
                self.send_control(
                    &reliable,
                    ControlMessage::Register {
                        temp_id,
                        assigned_id: conn.id().0,
                        game_name: self.game_name.clone(),
                        version: self.version,
                    },
                )
                .await;
                self.send_control(
                    &reliable,
                    ControlMessage::Register {
                        temp_id,
                        assigned_id: UNASSIGNED_ID,
                        game_name: self.game_name.clone(),
                        version: self.version,
                    },
                )
                .await;
            }
            tracing::info!(id = %conn.id(), address = %conn.address(), "connection registered");
            self.fire_added(&conn);
        }
    }

    /// Fans a user message out to listeners, serialized per connection.
    /// Messages arriving before the handshake completes have no
    /// connection to stand on and are dropped.
    async fn dispatch_user(&self, endpoint: &Arc<E>, message: Message) {
        let Some(conn) = self.registry.find_live_by_endpoint(endpoint.id()).await
        else {
            tracing::debug!(
                endpoint = %endpoint.id(),
                "user message before registration completed, dropping"
            );
            return;
        };

        let _ordering = conn.dispatch_lock.lock().await;
        // Snapshot first, dispatch unlocked: a listener may register or
        // remove listeners on this server while it runs.
        let snapshot = {
            let listeners = self.listeners.lock().expect("listener registry poisoned");
            listeners.snapshot_for(message.kind())
        };
        if snapshot.is_empty() {
            tracing::debug!(kind = ?message.kind(), "message had no listeners");
        }
        let result = catch_unwind(AssertUnwindSafe(|| {
            for listener in &snapshot {
                listener.message_received(&conn, &message);
            }
        }));

        if let Err(panic) = result {
            let error = ServerError::Handler(panic_text(&panic));
            tracing::error!(id = %conn.id(), %error, "message listener panicked");
            if !self.fire_error(&conn, &error) {
                conn.close("unhandled error").await;
            }
        }
    }

    /// Tears down whatever connection owns the given endpoint. One failed
    /// channel ends the whole logical connection; the closed flag and the
    /// registry's unindexing together make the removal event fire exactly
    /// once.
    pub(crate) async fn teardown_endpoint(&self, endpoint: &Arc<E>) {
        let Some(conn) = self.registry.remove_by_endpoint(endpoint.id()).await
        else {
            // Already torn down, or never registered.
            if let Err(error) = endpoint.close().await {
                tracing::debug!(%error, "endpoint close failed");
            }
            return;
        };

        let was_live = conn.id().0 != UNASSIGNED_ID;
        let first = conn.mark_closed();
        conn.close_endpoints().await;

        if first && was_live {
            tracing::info!(id = %conn.id(), "connection closed");
            self.fire_removed(&conn);
        }
    }

    async fn send_control(&self, endpoint: &Arc<E>, control: ControlMessage) {
        let payload = Payload::Control(control);
        let bytes = match self.codec.encode(&payload).and_then(|b| frame(&b)) {
            Ok(bytes) => bytes,
            Err(error) => {
                tracing::error!(%error, "control message encode failed");
                return;
            }
        };
        if let Err(error) = endpoint.write(&bytes).await {
            tracing::debug!(%error, "control message write failed");
        }
    }

    fn fire_added(&self, conn: &Arc<Connection<E, C>>) {
        let listeners: Vec<_> = {
            let listeners = self
                .connection_listeners
                .lock()
                .expect("connection listeners poisoned");
            listeners.iter().cloned().collect()
        };
        for listener in listeners {
            listener.connection_added(conn);
        }
    }

    fn fire_removed(&self, conn: &Arc<Connection<E, C>>) {
        let listeners: Vec<_> = {
            let listeners = self
                .connection_listeners
                .lock()
                .expect("connection listeners poisoned");
            listeners.iter().cloned().collect()
        };
        for listener in listeners {
            listener.connection_removed(conn);
        }
    }

    /// Reports an error to listeners. Returns whether anyone was
    /// listening.
    fn fire_error(&self, conn: &Arc<Connection<E, C>>, error: &ServerError) -> bool {
        let listeners: Vec<_> = {
            let listeners = self
                .error_listeners
                .lock()
                .expect("error listeners poisoned");
            listeners.iter().cloned().collect()
        };
        let had_listeners = !listeners.is_empty();
        for listener in listeners {
            listener.error_occurred(conn, error);
        }
        had_listeners
    }
}

/// Extracts a readable message from a panic payload.
fn panic_text(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Assembles a [`Server`] from its acceptors.
///
/// A reliable and a best-effort acceptor are required; alternates are
/// optional and become channels 2+ in the order they are added.
pub struct ServerBuilder<A, C> {
    game_name: String,
    version: i32,
    config: ServerConfig,
    codec: C,
    reliable: Option<A>,
    best_effort: Option<A>,
    alternates: Vec<(i32, A)>,
}

#[cfg(feature = "json")]
impl<A: Acceptor> ServerBuilder<A, wirelink_protocol::JsonCodec> {
    /// Starts a builder with the default JSON codec.
    pub fn new(game_name: impl Into<String>, version: i32) -> Self {
        Self::with_codec(game_name, version, wirelink_protocol::JsonCodec)
    }
}

impl<A, C> ServerBuilder<A, C>
where
    A: Acceptor,
    C: Codec + Clone,
{
    /// Starts a builder with an explicit codec.
    pub fn with_codec(game_name: impl Into<String>, version: i32, codec: C) -> Self {
        Self {
            game_name: game_name.into(),
            version,
            config: ServerConfig::default(),
            codec,
            reliable: None,
            best_effort: None,
            alternates: Vec::new(),
        }
    }

    /// The acceptor for channel 0, the reliable default. Required.
    pub fn reliable(mut self, acceptor: A) -> Self {
        self.reliable = Some(acceptor);
        self
    }

    /// The acceptor for channel 1, the best-effort default. Required.
    pub fn best_effort(mut self, acceptor: A) -> Self {
        self.best_effort = Some(acceptor);
        self
    }

    /// An additional reliable acceptor, announced to clients during the
    /// handshake under the given port.
    pub fn alternate(mut self, port: i32, acceptor: A) -> Self {
        self.alternates.push((port, acceptor));
        self
    }

    /// Overrides the default configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Initializes every acceptor and spawns one drain task per channel.
    ///
    /// # Errors
    /// Returns [`ServerError::Config`] if a required acceptor is missing,
    /// or a transport error if an acceptor fails to initialize.
    pub fn start(self) -> Result<Server<A, C>, ServerError> {
        let mut reliable = self.reliable.ok_or_else(|| {
            ServerError::Config("a reliable acceptor is required".into())
        })?;
        let mut best_effort = self.best_effort.ok_or_else(|| {
            ServerError::Config("a best-effort acceptor is required".into())
        })?;

        let channels = 2 + self.alternates.len();
        let core = Arc::new(ServerCore {
            game_name: self.game_name,
            version: self.version,
            alternate_ports: self.alternates.iter().map(|(port, _)| *port).collect(),
            codec: self.codec.clone(),
            registry: ConnectionRegistry::new(
                channels,
                self.config.pending_max_age,
                self.codec,
            ),
            listeners: StdMutex::new(ListenerRegistry::new()),
            connection_listeners: StdMutex::new(Vec::new()),
            error_listeners: StdMutex::new(Vec::new()),
        });
        let shutdown = Arc::new(Notify::new());

        reliable.initialize().map_err(ServerError::transport)?;
        best_effort.initialize().map_err(ServerError::transport)?;
        tokio::spawn(run_acceptor(
            reliable,
            0,
            true,
            Arc::clone(&core),
            Arc::clone(&shutdown),
        ));
        tokio::spawn(run_acceptor(
            best_effort,
            1,
            false,
            Arc::clone(&core),
            Arc::clone(&shutdown),
        ));
        for (index, (port, mut acceptor)) in self.alternates.into_iter().enumerate() {
            acceptor.initialize().map_err(ServerError::transport)?;
            tracing::debug!(port, channel = 2 + index, "alternate channel hosted");
            tokio::spawn(run_acceptor(
                acceptor,
                2 + index,
                true,
                Arc::clone(&core),
                Arc::clone(&shutdown),
            ));
        }

        tracing::info!(
            game = %core.game_name,
            version = core.version,
            channels,
            "server started"
        );
        Ok(Server {
            core,
            shutdown,
            closed: AtomicBool::new(false),
        })
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// A running host: the public face over [`ServerCore`].
pub struct Server<A: Acceptor, C> {
    core: Arc<ServerCore<A::Endpoint, C>>,
    shutdown: Arc<Notify>,
    closed: AtomicBool,
}

impl<A, C> Server<A, C>
where
    A: Acceptor,
    C: Codec + Clone,
{
    /// Every live connection, in no particular order.
    pub async fn connections(&self) -> Vec<Arc<Connection<A::Endpoint, C>>> {
        self.core.registry.connections().await
    }

    /// Looks up a live connection by its assigned identity.
    pub async fn connection(
        &self,
        id: ConnectionId,
    ) -> Option<Arc<Connection<A::Endpoint, C>>> {
        self.core.registry.get(id).await
    }

    /// How many connections are live right now.
    pub async fn connection_count(&self) -> usize {
        self.core.registry.connection_count().await
    }

    /// Sends one message to one connection.
    ///
    /// # Errors
    /// Returns [`ServerError::UnknownConnection`] if no live connection
    /// has that identity.
    pub async fn send_to(
        &self,
        id: ConnectionId,
        message: &Message,
    ) -> Result<(), ServerError> {
        let conn = self
            .core
            .registry
            .get(id)
            .await
            .ok_or(ServerError::UnknownConnection(id))?;
        conn.send(message).await
    }

    /// Sends one message to every live connection.
    pub async fn broadcast(&self, message: &Message) -> Result<(), ServerError> {
        self.broadcast_filtered(|_| true, message).await
    }

    /// Sends one message to every live connection the filter accepts.
    ///
    /// The message is serialized once, not per recipient, and nothing is
    /// serialized at all when no connections exist.
    pub async fn broadcast_filtered<P>(
        &self,
        filter: P,
        message: &Message,
    ) -> Result<(), ServerError>
    where
        P: Fn(&Connection<A::Endpoint, C>) -> bool,
    {
        let connections = self.core.registry.connections().await;
        if connections.is_empty() {
            return Ok(());
        }

        let bytes = frame(&self.core.codec.encode(&message.payload)?)?;
        let channel = if message.reliable { 0 } else { 1 };
        for conn in connections.into_iter().filter(|conn| filter(conn)) {
            let endpoint = conn.endpoint(channel).or_else(|| conn.endpoint(0));
            if let Some(endpoint) = endpoint {
                if let Err(error) = endpoint.write(&bytes).await {
                    tracing::debug!(id = %conn.id(), %error, "broadcast write failed");
                }
            }
        }
        Ok(())
    }

    /// Ejects one connection with a reason the client gets to see.
    ///
    /// # Errors
    /// Returns [`ServerError::UnknownConnection`] if no live connection
    /// has that identity.
    pub async fn kick(
        &self,
        id: ConnectionId,
        reason: &str,
    ) -> Result<(), ServerError> {
        let conn = self
            .core
            .registry
            .get(id)
            .await
            .ok_or(ServerError::UnknownConnection(id))?;
        tracing::info!(%id, reason, "kicking connection");
        conn.close(reason).await;
        Ok(())
    }

    /// Registers a catch-all message listener.
    pub fn add_listener(
        &self,
        listener: Arc<dyn MessageListener<Connection<A::Endpoint, C>>>,
    ) {
        self.core
            .listeners
            .lock()
            .expect("listener registry poisoned")
            .add_listener(listener);
    }

    /// Registers a listener for specific message kinds.
    pub fn add_listener_for(
        &self,
        kinds: &[MessageKind],
        listener: Arc<dyn MessageListener<Connection<A::Endpoint, C>>>,
    ) {
        self.core
            .listeners
            .lock()
            .expect("listener registry poisoned")
            .add_listener_for(kinds, listener);
    }

    /// Removes a message listener everywhere it was registered.
    pub fn remove_listener(
        &self,
        listener: &Arc<dyn MessageListener<Connection<A::Endpoint, C>>>,
    ) {
        self.core
            .listeners
            .lock()
            .expect("listener registry poisoned")
            .remove_listener(listener);
    }

    /// Registers a lifecycle listener for added/removed connections.
    pub fn add_connection_listener(
        &self,
        listener: Arc<dyn ConnectionListener<Connection<A::Endpoint, C>>>,
    ) {
        self.core
            .connection_listeners
            .lock()
            .expect("connection listeners poisoned")
            .push(listener);
    }

    /// Registers an error listener. With at least one registered,
    /// application faults are reported instead of closing the faulting
    /// connection.
    pub fn add_error_listener(
        &self,
        listener: Arc<dyn ErrorListener<Connection<A::Endpoint, C>, ServerError>>,
    ) {
        self.core
            .error_listeners
            .lock()
            .expect("error listeners poisoned")
            .push(listener);
    }

    /// Stops the server: every connection is closed with a notice, then
    /// every drain task winds down and terminates its acceptor.
    /// Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for conn in self.core.registry.connections().await {
            conn.close("server shutting down").await;
        }
        self.shutdown.notify_waiters();
        tracing::info!("server stopped");
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_default_pending_age() {
        assert_eq!(
            ServerConfig::default().pending_max_age,
            Duration::from_secs(90)
        );
    }

    #[test]
    fn test_panic_text_extracts_str_and_string() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_text(&*boxed), "boom");

        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("kaboom"));
        assert_eq!(panic_text(&*boxed), "kaboom");

        let boxed: Box<dyn std::any::Any + Send> = Box::new(17u8);
        assert_eq!(panic_text(&*boxed), "unknown panic");
    }
}
