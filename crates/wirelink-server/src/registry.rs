//! The connection registry: pending handshakes and live connections.
//!
//! One mutex guards all three maps, so the "last channel registers →
//! connection promotes" transition is atomic: exactly one caller observes
//! the completion, no matter how many channels register concurrently.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use wirelink_protocol::{Codec, ConnectionId, UNASSIGNED_ID};
use wirelink_transport::{Endpoint, EndpointId};

use crate::connection::Connection;

/// The outcome of registering one channel.
pub(crate) enum Registration<E, C> {
    /// More channels are still missing (or this was a duplicate).
    Pending,
    /// This registration was the last one: the connection just went live.
    /// Exactly one registration per client observes this.
    Promoted(Arc<Connection<E, C>>),
}

struct Inner<E, C> {
    /// Handshakes in flight, keyed by the client's temporary identity.
    pending: HashMap<i64, Arc<Connection<E, C>>>,
    /// Fully registered connections, keyed by assigned identity.
    live: HashMap<ConnectionId, Arc<Connection<E, C>>>,
    /// Every known endpoint back to its owning connection, pending or
    /// live. Lets a transport-level close on any channel find the whole
    /// connection.
    by_endpoint: HashMap<EndpointId, Arc<Connection<E, C>>>,
}

pub(crate) struct ConnectionRegistry<E, C> {
    inner: Mutex<Inner<E, C>>,
    next_id: AtomicI64,
    channels: usize,
    pending_max_age: Duration,
    codec: C,
}

impl<E, C> ConnectionRegistry<E, C>
where
    E: Endpoint,
    C: Codec + Clone,
{
    pub(crate) fn new(channels: usize, pending_max_age: Duration, codec: C) -> Self {
        Self {
            inner: Mutex::new(Inner {
                pending: HashMap::new(),
                live: HashMap::new(),
                by_endpoint: HashMap::new(),
            }),
            next_id: AtomicI64::new(0),
            channels,
            pending_max_age,
            codec,
        }
    }

    /// Records one channel registration, creating the pending connection
    /// on first sight and promoting it when the last channel arrives.
    ///
    /// Also returns any pending connections that aged out, so the caller
    /// can close their endpoints outside the registry lock.
    pub(crate) async fn register(
        &self,
        temp_id: i64,
        channel: usize,
        endpoint: Arc<E>,
    ) -> (Registration<E, C>, Vec<Arc<Connection<E, C>>>) {
        let mut inner = self.inner.lock().await;
        let expired = Self::sweep(&mut inner, self.pending_max_age);

        // A channel re-registering after promotion must not resurrect a
        // pending entry under the same temporary identity.
        if let Some(live) = inner
            .live
            .values()
            .find(|conn| conn.temp_id() == temp_id)
            .cloned()
        {
            live.register_endpoint(channel, Arc::clone(&endpoint));
            inner.by_endpoint.insert(endpoint.id(), live);
            return (Registration::Pending, expired);
        }

        let conn = Arc::clone(inner.pending.entry(temp_id).or_insert_with(|| {
            Arc::new(Connection::new(temp_id, self.channels, self.codec.clone()))
        }));
        let complete = conn.register_endpoint(channel, Arc::clone(&endpoint));
        inner.by_endpoint.insert(endpoint.id(), Arc::clone(&conn));

        if complete {
            inner.pending.remove(&temp_id);
            conn.assign_id(self.next_id.fetch_add(1, Ordering::SeqCst));
            inner.live.insert(conn.id(), Arc::clone(&conn));
            (Registration::Promoted(conn), expired)
        } else {
            (Registration::Pending, expired)
        }
    }

    /// Resolves an endpoint to its connection, but only once that
    /// connection is live. Messages on half-registered connections have
    /// nowhere sensible to go.
    pub(crate) async fn find_live_by_endpoint(
        &self,
        id: EndpointId,
    ) -> Option<Arc<Connection<E, C>>> {
        let inner = self.inner.lock().await;
        let conn = inner.by_endpoint.get(&id)?;
        (conn.id().0 != UNASSIGNED_ID).then(|| Arc::clone(conn))
    }

    /// Removes the whole connection owning the given endpoint, pending or
    /// live, unindexing every one of its endpoints. Subsequent calls for
    /// any sibling endpoint return `None`.
    pub(crate) async fn remove_by_endpoint(
        &self,
        id: EndpointId,
    ) -> Option<Arc<Connection<E, C>>> {
        let mut inner = self.inner.lock().await;
        let conn = inner.by_endpoint.remove(&id)?;
        for endpoint in conn.endpoints() {
            inner.by_endpoint.remove(&endpoint.id());
        }
        inner.live.remove(&conn.id());
        inner.pending.remove(&conn.temp_id());
        Some(conn)
    }

    /// Drops a pending handshake outright, unindexing every endpoint it
    /// registered so far. The caller closes those endpoints outside the
    /// lock. Used when channel 0 fails validation: sibling channels that
    /// registered first must not linger until the age-out sweep.
    pub(crate) async fn remove_pending(
        &self,
        temp_id: i64,
    ) -> Option<Arc<Connection<E, C>>> {
        let mut inner = self.inner.lock().await;
        let conn = inner.pending.remove(&temp_id)?;
        for endpoint in conn.endpoints() {
            inner.by_endpoint.remove(&endpoint.id());
        }
        Some(conn)
    }

    pub(crate) async fn get(&self, id: ConnectionId) -> Option<Arc<Connection<E, C>>> {
        self.inner.lock().await.live.get(&id).cloned()
    }

    /// A snapshot of every live connection.
    pub(crate) async fn connections(&self) -> Vec<Arc<Connection<E, C>>> {
        self.inner.lock().await.live.values().cloned().collect()
    }

    pub(crate) async fn connection_count(&self) -> usize {
        self.inner.lock().await.live.len()
    }

    #[cfg(test)]
    pub(crate) async fn pending_count(&self) -> usize {
        self.inner.lock().await.pending.len()
    }

    fn sweep(inner: &mut Inner<E, C>, max_age: Duration) -> Vec<Arc<Connection<E, C>>> {
        if max_age.is_zero() {
            return Vec::new();
        }
        let stale: Vec<i64> = inner
            .pending
            .iter()
            .filter(|(_, conn)| conn.age() > max_age)
            .map(|(temp_id, _)| *temp_id)
            .collect();
        let mut expired = Vec::new();
        for temp_id in stale {
            if let Some(conn) = inner.pending.remove(&temp_id) {
                for endpoint in conn.endpoints() {
                    inner.by_endpoint.remove(&endpoint.id());
                }
                tracing::warn!(temp_id, "handshake never completed, dropping pending connection");
                expired.push(conn);
            }
        }
        expired
    }
}

// =========================================================================
// Tests
// =========================================================================
