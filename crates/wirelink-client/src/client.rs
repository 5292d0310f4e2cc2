//! The logical client session: one identity over many physical channels.
//!
//! # Handshake state machine
//!
//! ```text
//! Disconnected ──(connect)──► AwaitingId ──(assigned id)──► Connected
//!                                  │                            │
//!                                  └────────(close/fault)───────┴──► Closed
//! ```
//!
//! The client registers every channel under one temporary identity; the
//! server stitches them together and answers with a permanent identity on
//! channel 0, followed by a negative-id sentinel meaning "services may
//! start". Sends issued before the assignment wait; they are released the
//! moment the session reaches `Connected` (or fail once it closes).
//!
//! All inbound traffic — control and user alike — funnels through one
//! dispatcher task, so application listeners never run concurrently for
//! the same session.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, watch};

use wirelink_protocol::{
    frame, Codec, ConnectionId, ControlMessage, DisconnectKind,
    ErrorListener, ListenerRegistry, Message, MessageKind, MessageListener,
    Payload, UNASSIGNED_ID,
};
use wirelink_transport::ConnectorFactory;

use crate::adapter::{ChannelAdapter, ChannelEvent, DEFAULT_OUTBOUND_DEPTH};
use crate::ClientError;

/// Counter mixed into temporary identities so two sessions created in
/// the same millisecond stay distinct.
static TEMP_ID_COUNTER: AtomicI64 = AtomicI64::new(0);

/// Generates a temporary identity: wall-clock milliseconds in the high
/// bits, a process-wide counter in the low 16. Unique enough for the
/// handshake window, which is all it has to be.
fn next_temp_id() -> i64 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    let count = TEMP_ID_COUNTER.fetch_add(1, Ordering::Relaxed) & 0xFFFF;
    (millis << 16) | count
}

/// Configuration for client behavior.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Depth of each channel's outbound queue. Once a queue is full,
    /// `send` waits for a slot — backpressure instead of unbounded
    /// memory growth. Default: 16,000 blocks.
    pub outbound_queue_depth: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            outbound_queue_depth: DEFAULT_OUTBOUND_DEPTH,
        }
    }
}

/// The lifecycle of a client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No handshake attempted yet.
    Disconnected,
    /// Channels are open and registered; waiting for the server to
    /// assign a permanent identity.
    AwaitingId,
    /// Fully registered; sends flow.
    Connected,
    /// Torn down, deliberately or by fault. Terminal.
    Closed,
}

/// Why a session ended.
#[derive(Debug, Clone)]
pub struct DisconnectInfo {
    /// Whether the close was deliberate or failure-driven.
    pub kind: DisconnectKind,
    /// Human-readable reason, suitable for logs and UI.
    pub reason: String,
}

/// Observes session lifecycle: the start-of-service signal and the
/// (exactly-once) disconnect.
pub trait SessionListener<S>: Send + Sync {
    /// The server finished the handshake; application traffic may start.
    fn connected(&self, client: &S);

    /// The session ended. Fired exactly once per session.
    fn disconnected(&self, client: &S, info: &DisconnectInfo);
}

/// A logical client session over a [`ConnectorFactory`]'s connections.
///
/// Created with [`Client::connect`], which returns an `Arc` because the
/// internal dispatcher task shares ownership.
pub struct Client<F: ConnectorFactory, C: Codec + Clone> {
    factory: F,
    codec: C,
    config: ClientConfig,
    game_name: String,
    version: i32,
    temp_id: i64,
    id: AtomicI64,
    state_tx: watch::Sender<SessionState>,
    channels: StdMutex<Vec<ChannelAdapter<F::Connector>>>,
    events_tx: mpsc::UnboundedSender<ChannelEvent>,
    listeners: StdMutex<ListenerRegistry<Self>>,
    session_listeners: StdMutex<Vec<Arc<dyn SessionListener<Self>>>>,
    error_listeners:
        StdMutex<Vec<Arc<dyn ErrorListener<Self, ClientError>>>>,
    closed: AtomicBool,
}

impl<F, C> Client<F, C>
where
    F: ConnectorFactory,
    C: Codec + Clone,
{
    /// Opens the two default channels, registers both, and starts the
    /// handshake.
    ///
    /// The returned session is in [`SessionState::AwaitingId`]; use
    /// [`send`](Self::send) (which waits for the handshake) or
    /// [`wait_connected`](Self::wait_connected) to rendezvous with
    /// completion.
    pub async fn connect(
        factory: F,
        codec: C,
        game_name: impl Into<String>,
        version: i32,
        reliable_port: i32,
        fast_port: i32,
        config: ClientConfig,
    ) -> Result<Arc<Self>, ClientError> {
        let game_name = game_name.into();
        let temp_id = next_temp_id();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(SessionState::Disconnected);

        let client = Arc::new(Self {
            factory,
            codec,
            config,
            game_name,
            version,
            temp_id,
            id: AtomicI64::new(UNASSIGNED_ID),
            state_tx,
            channels: StdMutex::new(Vec::new()),
            events_tx,
            listeners: StdMutex::new(ListenerRegistry::new()),
            session_listeners: StdMutex::new(Vec::new()),
            error_listeners: StdMutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });

        // Channel 0 (reliable) first: registration must reach the server
        // on it before anything else.
        let opened = async {
            client.open_channel(reliable_port, true).await?;
            client.open_channel(fast_port, false).await
        }
        .await;
        if let Err(error) = opened {
            // A half-open session must not leave its earlier channels
            // (and their reader tasks) running.
            client
                .shutdown(
                    DisconnectInfo {
                        kind: DisconnectKind::Error,
                        reason: error.to_string(),
                    },
                    false,
                )
                .await;
            return Err(error);
        }

        tokio::spawn(Arc::clone(&client).run_dispatcher(events_rx));

        client.state_tx.send_replace(SessionState::AwaitingId);
        let registered = async {
            client.send_registration(0).await?;
            client.send_registration(1).await
        }
        .await;
        if let Err(error) = registered {
            client
                .shutdown(
                    DisconnectInfo {
                        kind: DisconnectKind::Error,
                        reason: error.to_string(),
                    },
                    false,
                )
                .await;
            return Err(error);
        }
        tracing::info!(temp_id, "registration sent, awaiting identity");

        Ok(client)
    }

    /// The permanent identity assigned by the server, or
    /// [`UNASSIGNED_ID`] while the handshake is still in flight.
    pub fn id(&self) -> ConnectionId {
        ConnectionId(self.id.load(Ordering::SeqCst))
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    /// Whether the handshake has completed and the session is usable.
    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Waits until the session is [`SessionState::Connected`].
    ///
    /// No timeout is imposed here; a caller that wants one can wrap this
    /// in `tokio::time::timeout`.
    ///
    /// # Errors
    /// Returns [`ClientError::Closed`] if the session closes first.
    pub async fn wait_connected(&self) -> Result<(), ClientError> {
        let mut state_rx = self.state_tx.subscribe();
        loop {
            match *state_rx.borrow_and_update() {
                SessionState::Connected => return Ok(()),
                SessionState::Closed => {
                    return Err(ClientError::Closed(
                        "closed before the handshake completed".into(),
                    ));
                }
                _ => {}
            }
            state_rx.changed().await.map_err(|_| {
                ClientError::Closed("session dropped".into())
            })?;
        }
    }

    /// Sends a message on the channel its `reliable` flag selects:
    /// channel 0 when reliable (or when no best-effort channel exists),
    /// channel 1 otherwise.
    ///
    /// Waits for the handshake to complete, and for queue space when the
    /// chosen channel is backed up.
    pub async fn send(&self, message: &Message) -> Result<(), ClientError> {
        let channel = if message.reliable {
            0
        } else {
            let channels =
                self.channels.lock().expect("channel table poisoned");
            if channels.len() > 1 { 1 } else { 0 }
        };
        self.send_on(channel, message).await
    }

    /// Sends a message on a specific channel (0, 1, or an alternate
    /// index announced by the server).
    ///
    /// # Errors
    /// Returns [`ClientError::InvalidChannel`] for an index that was
    /// never configured.
    pub async fn send_on(
        &self,
        channel: usize,
        message: &Message,
    ) -> Result<(), ClientError> {
        self.wait_connected().await?;
        self.write_payload(channel, &message.payload).await
    }

    /// Closes the session: announces a deliberate disconnect on the
    /// reliable channel (best effort), then closes every channel.
    pub async fn close(&self) {
        self.shutdown(
            DisconnectInfo {
                kind: DisconnectKind::Kick,
                reason: "client closed".into(),
            },
            true,
        )
        .await;
    }

    /// Registers a catch-all message listener.
    pub fn add_listener(&self, listener: Arc<dyn MessageListener<Self>>) {
        self.listeners
            .lock()
            .expect("listener registry poisoned")
            .add_listener(listener);
    }

    /// Registers a listener for specific message kinds.
    pub fn add_listener_for(
        &self,
        kinds: &[MessageKind],
        listener: Arc<dyn MessageListener<Self>>,
    ) {
        self.listeners
            .lock()
            .expect("listener registry poisoned")
            .add_listener_for(kinds, listener);
    }

    /// Removes a message listener everywhere it was registered.
    pub fn remove_listener(
        &self,
        listener: &Arc<dyn MessageListener<Self>>,
    ) {
        self.listeners
            .lock()
            .expect("listener registry poisoned")
            .remove_listener(listener);
    }

    /// Registers a lifecycle listener.
    pub fn add_session_listener(
        &self,
        listener: Arc<dyn SessionListener<Self>>,
    ) {
        self.session_listeners
            .lock()
            .expect("session listeners poisoned")
            .push(listener);
    }

    /// Registers an error listener. With at least one registered,
    /// application faults are reported instead of closing the session.
    pub fn add_error_listener(
        &self,
        listener: Arc<dyn ErrorListener<Self, ClientError>>,
    ) {
        self.error_listeners
            .lock()
            .expect("error listeners poisoned")
            .push(listener);
    }

    // -- internals --------------------------------------------------------

    /// Opens a connector and spawns its channel adapter at the next
    /// index. Returns the index.
    async fn open_channel(
        &self,
        port: i32,
        reliable: bool,
    ) -> Result<usize, ClientError> {
        let connector = self
            .factory
            .connect(port)
            .await
            .map_err(ClientError::transport)?;

        let mut channels =
            self.channels.lock().expect("channel table poisoned");
        let index = channels.len();
        channels.push(ChannelAdapter::spawn(
            connector,
            index,
            reliable,
            self.codec.clone(),
            self.config.outbound_queue_depth,
            self.events_tx.clone(),
        ));
        tracing::debug!(index, reliable, port, "channel opened");
        Ok(index)
    }

    fn channel(
        &self,
        index: usize,
    ) -> Result<ChannelAdapter<F::Connector>, ClientError> {
        self.channels
            .lock()
            .expect("channel table poisoned")
            .get(index)
            .cloned()
            .ok_or(ClientError::InvalidChannel(index))
    }

    /// Frames and enqueues a payload without waiting for `Connected` —
    /// the handshake itself uses this.
    async fn write_payload(
        &self,
        channel: usize,
        payload: &Payload,
    ) -> Result<(), ClientError> {
        let adapter = self.channel(channel)?;
        let bytes = self.codec.encode(payload)?;
        adapter.write(frame(&bytes)?).await
    }

    async fn send_registration(
        &self,
        channel: usize,
    ) -> Result<(), ClientError> {
        let register = Payload::Control(ControlMessage::Register {
            temp_id: self.temp_id,
            assigned_id: UNASSIGNED_ID,
            game_name: self.game_name.clone(),
            version: self.version,
        });
        self.write_payload(channel, &register).await
    }

    async fn run_dispatcher(
        self: Arc<Self>,
        mut events_rx: mpsc::UnboundedReceiver<ChannelEvent>,
    ) {
        while let Some(event) = events_rx.recv().await {
            match event {
                ChannelEvent::Inbound { channel, message } => {
                    self.handle_inbound(channel, message).await;
                }
                ChannelEvent::Fault { channel, error } => {
                    self.handle_fault(channel, error).await;
                }
            }
            if self.state() == SessionState::Closed {
                return;
            }
        }
    }

    async fn handle_inbound(&self, channel: usize, message: Message) {
        match message.payload {
            Payload::Control(control) => {
                self.handle_control(channel, control).await;
            }
            Payload::User { .. } => self.dispatch_user(&message).await,
        }
    }

    async fn handle_control(&self, channel: usize, control: ControlMessage) {
        match control {
            ControlMessage::Register { assigned_id, .. } => {
                if assigned_id >= 0 {
                    // Step one of the server's reply: our identity.
                    self.id.store(assigned_id, Ordering::SeqCst);
                    self.state_tx.send_replace(SessionState::Connected);
                    tracing::info!(id = assigned_id, "session connected");
                } else {
                    // The sentinel: the server finished wiring us up.
                    self.fire_connected();
                }
            }
            ControlMessage::ChannelInfo { ports, .. } => {
                tracing::debug!(?ports, "opening alternate channels");
                for port in ports {
                    if let Err(error) = self.open_alternate(port).await {
                        self.handle_fault(channel, error).await;
                        return;
                    }
                }
            }
            ControlMessage::Disconnect { kind, reason } => {
                tracing::info!(%reason, "server closed the session");
                self.shutdown(DisconnectInfo { kind, reason }, false)
                    .await;
            }
        }
    }

    /// Opens one alternate reliable channel and registers it under the
    /// session's temporary identity.
    async fn open_alternate(&self, port: i32) -> Result<(), ClientError> {
        let index = self.open_channel(port, true).await?;
        self.send_registration(index).await
    }

    /// Fans a user message out to listeners. A panicking listener is an
    /// application fault: it must not kill the dispatcher, so it is
    /// caught here and routed to error listeners — or, with none
    /// registered, the session closes.
    async fn dispatch_user(&self, message: &Message) {
        // Snapshot first, dispatch unlocked: a listener may register or
        // remove listeners on this session while it runs.
        let snapshot = {
            let listeners =
                self.listeners.lock().expect("listener registry poisoned");
            listeners.snapshot_for(message.kind())
        };
        if snapshot.is_empty() {
            tracing::debug!(kind = ?message.kind(), "message had no listeners");
        }
        let result = catch_unwind(AssertUnwindSafe(|| {
            for listener in &snapshot {
                listener.message_received(self, message);
            }
        }));

        if let Err(panic) = result {
            let error = ClientError::Handler(panic_text(&panic));
            tracing::error!(%error, "message listener panicked");
            if !self.fire_error(&error) {
                self.shutdown(
                    DisconnectInfo {
                        kind: DisconnectKind::Error,
                        reason: "unhandled error".into(),
                    },
                    true,
                )
                .await;
            }
        }
    }

    /// A channel fault cascades to full teardown: every channel is
    /// required, so one dying ends the session.
    async fn handle_fault(&self, channel: usize, error: ClientError) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        tracing::warn!(channel, %error, "channel fault, closing session");
        self.fire_error(&error);
        self.shutdown(
            DisconnectInfo {
                kind: DisconnectKind::Error,
                reason: error.to_string(),
            },
            false,
        )
        .await;
    }

    /// One-way, idempotent teardown. Fires `disconnected` exactly once.
    async fn shutdown(&self, info: DisconnectInfo, announce: bool) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if announce {
            // Best effort: the queue may be torn down before the block
            // leaves the process, which the protocol tolerates.
            let disconnect =
                Payload::Control(ControlMessage::Disconnect {
                    kind: info.kind,
                    reason: info.reason.clone(),
                });
            let _ = self.write_payload(0, &disconnect).await;
        }

        let channels: Vec<_> = {
            let channels =
                self.channels.lock().expect("channel table poisoned");
            channels.iter().cloned().collect()
        };
        for adapter in channels {
            adapter.close().await;
        }

        self.state_tx.send_replace(SessionState::Closed);
        tracing::info!(reason = %info.reason, "session closed");

        let listeners: Vec<_> = {
            let listeners = self
                .session_listeners
                .lock()
                .expect("session listeners poisoned");
            listeners.iter().cloned().collect()
        };
        for listener in listeners {
            listener.disconnected(self, &info);
        }
    }

    fn fire_connected(&self) {
        let listeners: Vec<_> = {
            let listeners = self
                .session_listeners
                .lock()
                .expect("session listeners poisoned");
            listeners.iter().cloned().collect()
        };
        for listener in listeners {
            listener.connected(self);
        }
    }

    /// Reports an error to listeners. Returns whether anyone was
    /// listening.
    fn fire_error(&self, error: &ClientError) -> bool {
        let listeners: Vec<_> = {
            let listeners = self
                .error_listeners
                .lock()
                .expect("error listeners poisoned");
            listeners.iter().cloned().collect()
        };
        let had_listeners = !listeners.is_empty();
        for listener in listeners {
            listener.error_occurred(self, error);
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

// =========================================================================
// Tests
// =========================================================================
