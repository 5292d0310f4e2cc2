//! One physical channel: a reader task and a writer task over a
//! [`Connector`].
//!
//! The reader feeds raw chunks through a [`Reassembler`], decodes every
//! completed frame, tags it with this channel's reliability, and forwards
//! it to the owning session's event queue. The writer drains a bounded
//! queue of pre-framed byte blocks — the bound is what gives `send` its
//! backpressure: once the queue is full, callers wait instead of growing
//! memory without limit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Notify};

use wirelink_protocol::{Codec, Message, Payload, Reassembler};
use wirelink_transport::Connector;

use crate::ClientError;

/// Default depth of each channel's outbound queue.
pub(crate) const DEFAULT_OUTBOUND_DEPTH: usize = 16_000;

/// What a channel reports to the session's dispatcher.
pub(crate) enum ChannelEvent {
    /// A complete message arrived on `channel`.
    Inbound { channel: usize, message: Message },
    /// The channel failed; the session decides how to cascade.
    Fault { channel: usize, error: ClientError },
}

/// Handle to one running channel: the outbound queue plus the shared
/// stop signal. Cloneable so the session can hand out senders freely.
pub(crate) struct ChannelAdapter<T: Connector> {
    connector: Arc<T>,
    outbound: mpsc::Sender<Vec<u8>>,
    stop: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl<T: Connector> Clone for ChannelAdapter<T> {
    fn clone(&self) -> Self {
        Self {
            connector: Arc::clone(&self.connector),
            outbound: self.outbound.clone(),
            stop: Arc::clone(&self.stop),
            notify: Arc::clone(&self.notify),
        }
    }
}

impl<T: Connector> ChannelAdapter<T> {
    /// Spawns the reader and writer tasks for one channel.
    pub(crate) fn spawn<C: Codec + Clone>(
        connector: T,
        channel: usize,
        reliable: bool,
        codec: C,
        queue_depth: usize,
        events: mpsc::UnboundedSender<ChannelEvent>,
    ) -> Self {
        let connector = Arc::new(connector);
        let (outbound, outbound_rx) = mpsc::channel(queue_depth);
        let stop = Arc::new(AtomicBool::new(false));
        let notify = Arc::new(Notify::new());

        tokio::spawn(read_loop(
            Arc::clone(&connector),
            channel,
            reliable,
            codec,
            Arc::clone(&stop),
            Arc::clone(&notify),
            events.clone(),
        ));
        tokio::spawn(write_loop(
            Arc::clone(&connector),
            channel,
            outbound_rx,
            Arc::clone(&stop),
            Arc::clone(&notify),
            events,
        ));

        Self {
            connector,
            outbound,
            stop,
            notify,
        }
    }

    /// Enqueues a pre-framed block for sending.
    ///
    /// Waits when the queue is at capacity — this is the backpressure
    /// path, never a drop and never an error.
    pub(crate) async fn write(
        &self,
        block: Vec<u8>,
    ) -> Result<(), ClientError> {
        self.outbound.send(block).await.map_err(|_| {
            ClientError::Closed("channel writer stopped".into())
        })
    }

    /// Signals both loops to stop and closes the connector.
    ///
    /// Idempotent and safe to call from any task; the connector close is
    /// what unblocks a reader parked in `read`.
    pub(crate) async fn close(&self) {
        if self.stop.swap(true, Ordering::SeqCst) {
            return;
        }
        self.notify.notify_waiters();
        if self.connector.is_connected() {
            let _ = self.connector.close(false).await;
        }
    }
}

/// Reader: transport chunks → reassembled frames → decoded messages.
async fn read_loop<T: Connector, C: Codec>(
    connector: Arc<T>,
    channel: usize,
    reliable: bool,
    codec: C,
    stop: Arc<AtomicBool>,
    notify: Arc<Notify>,
    events: mpsc::UnboundedSender<ChannelEvent>,
) {
    let mut reassembler = Reassembler::new();

    loop {
        if stop.load(Ordering::SeqCst) {
            return;
        }

        let read = tokio::select! {
            _ = notify.notified() => return,
            read = connector.read() => read,
        };

        let chunk = match read {
            Ok(Some(chunk)) => chunk,
            Ok(None) => {
                // Asked to stop: a quiet exit. Otherwise the transport
                // dropped underneath us.
                if !stop.load(Ordering::SeqCst) {
                    let _ = events.send(ChannelEvent::Fault {
                        channel,
                        error: ClientError::ConnectionLost(
                            connector.address(),
                        ),
                    });
                }
                return;
            }
            Err(error) => {
                if !stop.load(Ordering::SeqCst) {
                    let _ = events.send(ChannelEvent::Fault {
                        channel,
                        error: ClientError::transport(error),
                    });
                }
                return;
            }
        };

        reassembler.add_bytes(&chunk);
        while let Some(frame) = reassembler.poll_frame() {
            match codec.decode::<Payload>(&frame) {
                Ok(payload) => {
                    let _ = events.send(ChannelEvent::Inbound {
                        channel,
                        message: Message { reliable, payload },
                    });
                }
                Err(error) if reliable => {
                    // A desynchronized reliable stream can't recover.
                    let _ = events.send(ChannelEvent::Fault {
                        channel,
                        error: error.into(),
                    });
                    return;
                }
                Err(error) => {
                    tracing::warn!(
                        channel,
                        %error,
                        "dropping undecodable best-effort frame"
                    );
                    reassembler.clear();
                    break;
                }
            }
        }

        // Datagram channels deliver whole frames per block; leftover
        // bytes mean a malformed datagram, which is a local error here,
        // not a protocol violation.
        if !reliable && !reassembler.is_empty() {
            tracing::warn!(
                channel,
                "datagram did not align to a frame boundary; discarding"
            );
            reassembler.clear();
        }
    }
}

/// Writer: drains the bounded outbound queue in FIFO order.
async fn write_loop<T: Connector>(
    connector: Arc<T>,
    channel: usize,
    mut outbound: mpsc::Receiver<Vec<u8>>,
    stop: Arc<AtomicBool>,
    notify: Arc<Notify>,
    events: mpsc::UnboundedSender<ChannelEvent>,
) {
    loop {
        let block = tokio::select! {
            _ = notify.notified() => return,
            block = outbound.recv() => match block {
                Some(block) => block,
                None => return,
            },
        };

        if let Err(error) = connector.write(&block).await {
            if !stop.load(Ordering::SeqCst) {
                let _ = events.send(ChannelEvent::Fault {
                    channel,
                    error: ClientError::transport(error),
                });
            }
            return;
        }
    }
}

// =========================================================================
// Tests
// =========================================================================
