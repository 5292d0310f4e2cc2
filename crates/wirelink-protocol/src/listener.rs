//! Message fan-out: listener traits and the type-keyed registry.
//!
//! Both the client and the server dispatch received messages the same
//! way: every catch-all listener fires first, then every listener keyed
//! to the message's exact [`MessageKind`]. A message nobody listens to is
//! a diagnostic, not an error.
//!
//! The generic parameter `S` is the message *source* — the client session
//! on the client side, the hosted connection on the server side — so the
//! same registry serves both without knowing either.

use std::collections::HashMap;
use std::sync::Arc;

use crate::{Message, MessageKind};

/// A handler for received messages.
///
/// Implementations must be `Send + Sync` because dispatch happens on the
/// substrate's reader/acceptor tasks. A blanket impl lets plain closures
/// act as listeners:
///
/// ```rust
/// use wirelink_protocol::{ListenerRegistry, Message, MessageKind};
///
/// let mut registry: ListenerRegistry<()> = ListenerRegistry::new();
/// registry.add_listener(std::sync::Arc::new(
///     |_source: &(), msg: &Message| {
///         println!("got {:?}", msg.kind());
///     },
/// ));
/// ```
pub trait MessageListener<S>: Send + Sync {
    /// Called for every message this listener is registered for.
    fn message_received(&self, source: &S, message: &Message);
}

impl<S, F> MessageListener<S> for F
where
    F: Fn(&S, &Message) + Send + Sync,
{
    fn message_received(&self, source: &S, message: &Message) {
        self(source, message)
    }
}

/// A handler for errors raised outside any application call path
/// (listener panics, send failures noticed by a writer task, ...).
///
/// If no error listener is registered, the owning connection falls back
/// to closing itself — errors are never silently swallowed.
pub trait ErrorListener<S, E>: Send + Sync {
    /// Called when an error surfaces on the given source.
    fn error_occurred(&self, source: &S, error: &E);
}

impl<S, E, F> ErrorListener<S, E> for F
where
    F: Fn(&S, &E) + Send + Sync,
{
    fn error_occurred(&self, source: &S, error: &E) {
        self(source, error)
    }
}

/// Catch-all and kind-keyed listener sets with ordered fan-out.
pub struct ListenerRegistry<S> {
    all: Vec<Arc<dyn MessageListener<S>>>,
    by_kind: HashMap<MessageKind, Vec<Arc<dyn MessageListener<S>>>>,
}

impl<S> Default for ListenerRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> ListenerRegistry<S> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            all: Vec::new(),
            by_kind: HashMap::new(),
        }
    }

    /// Registers a catch-all listener: it sees every dispatched message.
    pub fn add_listener(&mut self, listener: Arc<dyn MessageListener<S>>) {
        self.all.push(listener);
    }

    /// Registers a listener for specific message kinds only.
    pub fn add_listener_for(
        &mut self,
        kinds: &[MessageKind],
        listener: Arc<dyn MessageListener<S>>,
    ) {
        for kind in kinds {
            self.by_kind
                .entry(*kind)
                .or_default()
                .push(Arc::clone(&listener));
        }
    }

    /// Removes a listener (by identity) from the catch-all list and from
    /// every kind it was registered for.
    pub fn remove_listener(&mut self, listener: &Arc<dyn MessageListener<S>>) {
        self.all.retain(|l| !Arc::ptr_eq(l, listener));
        for listeners in self.by_kind.values_mut() {
            listeners.retain(|l| !Arc::ptr_eq(l, listener));
        }
        self.by_kind.retain(|_, listeners| !listeners.is_empty());
    }

    /// Fans a message out: catch-all listeners first, then listeners
    /// keyed to the message's exact kind.
    ///
    /// Returns how many listeners were invoked. Zero is not an error —
    /// the caller logs it as a diagnostic.
    pub fn dispatch(&self, source: &S, message: &Message) -> usize {
        let mut delivered = 0;

        for listener in &self.all {
            listener.message_received(source, message);
            delivered += 1;
        }

        if let Some(kind) = message.kind() {
            if let Some(listeners) = self.by_kind.get(&kind) {
                for listener in listeners {
                    listener.message_received(source, message);
                    delivered += 1;
                }
            }
        }

        if delivered == 0 {
            tracing::debug!(kind = ?message.kind(), "message had no listeners");
        }
        delivered
    }

    /// The listeners a message of the given kind would fan out to, in
    /// dispatch order: catch-all listeners first, then listeners keyed to
    /// that exact kind.
    ///
    /// Callers that guard the registry with a lock dispatch from this
    /// snapshot instead of calling [`dispatch`](Self::dispatch) under the
    /// lock, so a listener is free to register or remove listeners while
    /// it runs.
    pub fn snapshot_for(
        &self,
        kind: Option<MessageKind>,
    ) -> Vec<Arc<dyn MessageListener<S>>> {
        let mut listeners = self.all.clone();
        if let Some(kind) = kind {
            if let Some(keyed) = self.by_kind.get(&kind) {
                listeners.extend(keyed.iter().cloned());
            }
        }
        listeners
    }

    /// Total number of registrations (kind-specific ones counted once per
    /// kind).
    pub fn len(&self) -> usize {
        self.all.len()
            + self.by_kind.values().map(Vec::len).sum::<usize>()
    }

    /// Returns `true` if no listeners are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn user_msg(kind: u16) -> Message {
        Message::reliable(MessageKind(kind), vec![])
    }

    /// A listener that records the kinds it saw, in order.
    struct Recorder {
        seen: Mutex<Vec<Option<MessageKind>>>,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    impl MessageListener<()> for Recorder {
        fn message_received(&self, _source: &(), message: &Message) {
            self.seen.lock().unwrap().push(message.kind());
        }
    }

    #[test]
    fn test_dispatch_catch_all_sees_every_kind() {
        let mut registry: ListenerRegistry<()> = ListenerRegistry::new();
        let recorder = Recorder::new();
        registry.add_listener(recorder.clone());

        registry.dispatch(&(), &user_msg(1));
        registry.dispatch(&(), &user_msg(2));

        assert_eq!(
            *recorder.seen.lock().unwrap(),
            vec![Some(MessageKind(1)), Some(MessageKind(2))]
        );
    }

    #[test]
    fn test_dispatch_kind_listener_only_sees_its_kind() {
        let mut registry: ListenerRegistry<()> = ListenerRegistry::new();
        let recorder = Recorder::new();
        registry.add_listener_for(&[MessageKind(1)], recorder.clone());

        registry.dispatch(&(), &user_msg(1));
        registry.dispatch(&(), &user_msg(2));

        assert_eq!(
            *recorder.seen.lock().unwrap(),
            vec![Some(MessageKind(1))]
        );
    }

    #[test]
    fn test_dispatch_catch_all_fires_before_kind_listener() {
        let mut registry: ListenerRegistry<()> = ListenerRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o = Arc::clone(&order);
        registry.add_listener(Arc::new(move |_: &(), _: &Message| {
            o.lock().unwrap().push("all");
        }));
        let o = Arc::clone(&order);
        registry.add_listener_for(
            &[MessageKind(1)],
            Arc::new(move |_: &(), _: &Message| {
                o.lock().unwrap().push("kind");
            }),
        );

        registry.dispatch(&(), &user_msg(1));

        assert_eq!(*order.lock().unwrap(), vec!["all", "kind"]);
    }

    #[test]
    fn test_dispatch_returns_delivery_count() {
        let mut registry: ListenerRegistry<()> = ListenerRegistry::new();
        registry.add_listener(Recorder::new());
        registry.add_listener_for(&[MessageKind(1)], Recorder::new());

        assert_eq!(registry.dispatch(&(), &user_msg(1)), 2);
        assert_eq!(registry.dispatch(&(), &user_msg(9)), 1);
    }

    #[test]
    fn test_dispatch_zero_listeners_is_not_an_error() {
        let registry: ListenerRegistry<()> = ListenerRegistry::new();
        assert_eq!(registry.dispatch(&(), &user_msg(1)), 0);
    }

    #[test]
    fn test_remove_listener_stops_delivery_everywhere() {
        let mut registry: ListenerRegistry<()> = ListenerRegistry::new();
        let recorder = Recorder::new();
        let as_dyn: Arc<dyn MessageListener<()>> = recorder.clone();
        registry.add_listener(Arc::clone(&as_dyn));
        registry.add_listener_for(&[MessageKind(1)], Arc::clone(&as_dyn));

        registry.remove_listener(&as_dyn);
        registry.dispatch(&(), &user_msg(1));

        assert!(recorder.seen.lock().unwrap().is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_closure_listener_via_blanket_impl() {
        let mut registry: ListenerRegistry<()> = ListenerRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        registry.add_listener(Arc::new(move |_: &(), _: &Message| {
            h.fetch_add(1, Ordering::SeqCst);
        }));

        registry.dispatch(&(), &user_msg(5));

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_snapshot_for_preserves_dispatch_order() {
        let mut registry: ListenerRegistry<()> = ListenerRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o = Arc::clone(&order);
        registry.add_listener_for(
            &[MessageKind(1)],
            Arc::new(move |_: &(), _: &Message| {
                o.lock().unwrap().push("kind");
            }),
        );
        let o = Arc::clone(&order);
        registry.add_listener(Arc::new(move |_: &(), _: &Message| {
            o.lock().unwrap().push("all");
        }));

        let snapshot = registry.snapshot_for(Some(MessageKind(1)));
        assert_eq!(snapshot.len(), 2);
        for listener in &snapshot {
            listener.message_received(&(), &user_msg(1));
        }
        assert_eq!(*order.lock().unwrap(), vec!["all", "kind"]);
    }

    #[test]
    fn test_snapshot_for_unmatched_kind_is_catch_all_only() {
        let mut registry: ListenerRegistry<()> = ListenerRegistry::new();
        registry.add_listener(Recorder::new());
        registry.add_listener_for(&[MessageKind(1)], Recorder::new());

        assert_eq!(registry.snapshot_for(Some(MessageKind(9))).len(), 1);
        assert_eq!(registry.snapshot_for(None).len(), 1);
    }

    #[test]
    fn test_control_messages_reach_catch_all_only() {
        // Control messages have no kind, so kind-keyed listeners never
        // see them even if the dispatcher chooses to forward one.
        let mut registry: ListenerRegistry<()> = ListenerRegistry::new();
        let all = Recorder::new();
        let keyed = Recorder::new();
        registry.add_listener(all.clone());
        registry.add_listener_for(&[MessageKind(0)], keyed.clone());

        let msg = Message::control(crate::ControlMessage::Disconnect {
            kind: crate::DisconnectKind::Error,
            reason: "x".into(),
        });
        registry.dispatch(&(), &msg);

        assert_eq!(all.seen.lock().unwrap().len(), 1);
        assert!(keyed.seen.lock().unwrap().is_empty());
    }
}
