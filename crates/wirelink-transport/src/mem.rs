//! In-memory transport implementation.
//!
//! A [`MemNetwork`] is a process-local "internet": acceptors bind to
//! integer ports, connectors dial them, and every delivery is a whole
//! byte block over a tokio channel. It exists so the full client/server
//! stack can be exercised in tests without touching sockets.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{mpsc, Mutex};

use crate::{
    Acceptor, AcceptorEvent, Connector, ConnectorFactory, Endpoint,
    EndpointId, Envelope, Inbound, TransportError,
};

/// Counter for generating unique endpoint IDs.
static NEXT_ENDPOINT_ID: AtomicU64 = AtomicU64::new(1);

/// What flows from connectors into an acceptor's multiplexed stream.
enum Item {
    Connected(Arc<MemEndpoint>),
    Data(Arc<MemEndpoint>, Vec<u8>),
    Disconnected(EndpointId),
}

/// A process-local network: a registry of listening ports.
///
/// Cloning is cheap; all clones share the same port space.
#[derive(Clone, Default)]
pub struct MemNetwork {
    ports: Arc<StdMutex<HashMap<i32, mpsc::UnboundedSender<Item>>>>,
}

impl MemNetwork {
    /// Creates an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds an acceptor to the given port.
    pub fn listen(&self, port: i32) -> Result<MemAcceptor, TransportError> {
        let mut ports = self.ports.lock().expect("port table poisoned");
        if ports.contains_key(&port) {
            return Err(TransportError::PortInUse(port));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        ports.insert(port, tx);
        tracing::debug!(port, "mem acceptor listening");

        Ok(MemAcceptor {
            port,
            ports: Arc::clone(&self.ports),
            rx,
            pending: VecDeque::new(),
            endpoints: HashMap::new(),
            closed: false,
        })
    }

    /// Dials the acceptor listening on the given port.
    pub fn dial(&self, port: i32) -> Result<MemConnector, TransportError> {
        let tx = {
            let ports = self.ports.lock().expect("port table poisoned");
            ports
                .get(&port)
                .cloned()
                .ok_or(TransportError::ConnectionRefused(port))?
        };

        let id = EndpointId::new(
            NEXT_ENDPOINT_ID.fetch_add(1, Ordering::Relaxed),
        );
        let (to_client_tx, to_client_rx) = mpsc::unbounded_channel();

        let endpoint = Arc::new(MemEndpoint {
            id,
            port,
            to_client: StdMutex::new(Some(to_client_tx)),
            server_tx: tx.clone(),
            connected: AtomicBool::new(true),
        });

        tx.send(Item::Connected(Arc::clone(&endpoint)))
            .map_err(|_| TransportError::ConnectionRefused(port))?;
        tracing::debug!(%id, port, "mem connection established");

        Ok(MemConnector {
            endpoint,
            rx: Mutex::new(to_client_rx),
            closed: AtomicBool::new(false),
        })
    }
}

impl ConnectorFactory for MemNetwork {
    type Connector = MemConnector;
    type Error = TransportError;

    async fn connect(
        &self,
        port: i32,
    ) -> Result<Self::Connector, Self::Error> {
        self.dial(port)
    }
}

// ---------------------------------------------------------------------------
// MemConnector (client side)
// ---------------------------------------------------------------------------

/// The client half of an in-memory connection.
pub struct MemConnector {
    endpoint: Arc<MemEndpoint>,
    rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    closed: AtomicBool,
}

impl Connector for MemConnector {
    type Error = TransportError;

    async fn read(&self) -> Result<Option<Vec<u8>>, Self::Error> {
        // Returns None once the endpoint half (or a local close) drops
        // the sender, which also resolves any read pending at that time.
        Ok(self.rx.lock().await.recv().await)
    }

    async fn write(&self, data: &[u8]) -> Result<(), Self::Error> {
        if !self.endpoint.is_connected() {
            return Err(TransportError::ConnectionClosed(
                self.endpoint.address(),
            ));
        }
        self.endpoint
            .server_tx
            .send(Item::Data(Arc::clone(&self.endpoint), data.to_vec()))
            .map_err(|_| {
                TransportError::SendFailed("acceptor is gone".into())
            })
    }

    async fn close(&self, _flush: bool) -> Result<(), Self::Error> {
        // Deliveries are synchronous channel sends, so there is nothing
        // left to flush by the time close runs.
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if self.endpoint.shut_down() {
            let _ = self
                .endpoint
                .server_tx
                .send(Item::Disconnected(self.endpoint.id));
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.endpoint.is_connected()
    }

    fn address(&self) -> String {
        self.endpoint.address()
    }
}

// ---------------------------------------------------------------------------
// MemEndpoint (server side)
// ---------------------------------------------------------------------------

/// The server half of an in-memory connection, owned by a [`MemAcceptor`].
pub struct MemEndpoint {
    id: EndpointId,
    port: i32,
    to_client: StdMutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    server_tx: mpsc::UnboundedSender<Item>,
    connected: AtomicBool,
}

impl MemEndpoint {
    /// Marks the connection dead and drops the client-bound sender so a
    /// pending connector read resolves to `None`. Returns `true` on the
    /// first call only.
    fn shut_down(&self) -> bool {
        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        self.to_client.lock().expect("sender poisoned").take();
        was_connected
    }
}

impl Endpoint for MemEndpoint {
    type Error = TransportError;

    fn id(&self) -> EndpointId {
        self.id
    }

    fn address(&self) -> String {
        format!("mem:{}/{}", self.port, self.id)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn write(&self, data: &[u8]) -> Result<(), Self::Error> {
        let tx = self
            .to_client
            .lock()
            .expect("sender poisoned")
            .clone()
            .ok_or_else(|| {
                TransportError::ConnectionClosed(self.address())
            })?;
        tx.send(data.to_vec()).map_err(|_| {
            TransportError::SendFailed("client reader is gone".into())
        })
    }

    async fn close(&self) -> Result<(), Self::Error> {
        if self.shut_down() {
            let _ = self.server_tx.send(Item::Disconnected(self.id));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemAcceptor
// ---------------------------------------------------------------------------

/// An in-memory listener multiplexing many [`MemEndpoint`]s.
pub struct MemAcceptor {
    port: i32,
    ports: Arc<StdMutex<HashMap<i32, mpsc::UnboundedSender<Item>>>>,
    rx: mpsc::UnboundedReceiver<Item>,
    pending: VecDeque<AcceptorEvent<MemEndpoint>>,
    endpoints: HashMap<EndpointId, Arc<MemEndpoint>>,
    closed: bool,
}

impl Acceptor for MemAcceptor {
    type Endpoint = MemEndpoint;
    type Error = TransportError;

    fn initialize(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    async fn read(&mut self) -> Result<Inbound<MemEndpoint>, Self::Error> {
        loop {
            if self.closed {
                return Err(TransportError::Shutdown);
            }
            if !self.pending.is_empty() {
                return Ok(Inbound::EventsPending);
            }

            match self.rx.recv().await {
                Some(Item::Connected(endpoint)) => {
                    self.endpoints
                        .insert(endpoint.id(), Arc::clone(&endpoint));
                    self.pending.push_back(AcceptorEvent::Added(endpoint));
                }
                Some(Item::Data(endpoint, data)) => {
                    // A datagram can race a disconnect; drop it quietly.
                    if endpoint.is_connected() {
                        return Ok(Inbound::Data(Envelope {
                            endpoint,
                            data,
                        }));
                    }
                }
                Some(Item::Disconnected(id)) => {
                    if let Some(endpoint) = self.endpoints.remove(&id) {
                        self.pending
                            .push_back(AcceptorEvent::Removed(endpoint));
                    }
                }
                None => return Err(TransportError::Shutdown),
            }
        }
    }

    fn next_event(&mut self) -> Option<AcceptorEvent<MemEndpoint>> {
        self.pending.pop_front()
    }

    async fn terminate(&mut self) -> Result<(), Self::Error> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        self.ports
            .lock()
            .expect("port table poisoned")
            .remove(&self.port);
        for endpoint in self.endpoints.values() {
            endpoint.shut_down();
        }
        self.endpoints.clear();
        // Connectors that dialed in but were never surfaced through read
        // are still queued; close them so their clients see the shutdown.
        while let Ok(item) = self.rx.try_recv() {
            if let Item::Connected(endpoint) = item {
                endpoint.shut_down();
            }
        }
        tracing::debug!(port = self.port, "mem acceptor terminated");
        Ok(())
    }
}
