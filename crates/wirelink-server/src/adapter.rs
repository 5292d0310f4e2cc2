//! The per-acceptor drain task.
//!
//! Each channel's acceptor gets one task that alternates between draining
//! endpoint lifecycle events and reading inbound data, reassembling each
//! endpoint's byte stream into frames and handing decoded payloads to the
//! shared [`ServerCore`].

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Notify;

use wirelink_protocol::{Codec, Payload, Reassembler};
use wirelink_transport::{Acceptor, AcceptorEvent, Endpoint, EndpointId, Inbound};

use crate::server::ServerCore;

/// Drains one acceptor until shutdown or transport failure.
///
/// Events are drained before every read so endpoint removals are never
/// starved by a busy data stream, and again whenever the read reports
/// [`Inbound::EventsPending`].
pub(crate) async fn run_acceptor<A, C>(
    mut acceptor: A,
    channel: usize,
    reliable: bool,
    core: Arc<ServerCore<A::Endpoint, C>>,
    shutdown: Arc<Notify>,
) where
    A: Acceptor,
    C: Codec + Clone,
{
    let mut buffers: HashMap<EndpointId, Reassembler> = HashMap::new();

    loop {
        while let Some(event) = acceptor.next_event() {
            match event {
                AcceptorEvent::Added(endpoint) => {
                    tracing::debug!(channel, endpoint = %endpoint.id(), "endpoint connected");
                }
                AcceptorEvent::Removed(endpoint) => {
                    tracing::debug!(channel, endpoint = %endpoint.id(), "endpoint disconnected");
                    buffers.remove(&endpoint.id());
                    core.teardown_endpoint(&endpoint).await;
                }
            }
        }

        let inbound = tokio::select! {
            _ = shutdown.notified() => break,
            result = acceptor.read() => result,
        };

        match inbound {
            Ok(Inbound::EventsPending) => continue,
            Ok(Inbound::Data(envelope)) => {
                let frames = {
                    let buffer = buffers.entry(envelope.endpoint.id()).or_default();
                    buffer.add_bytes(&envelope.data);
                    let mut frames = Vec::new();
                    while let Some(frame) = buffer.poll_frame() {
                        frames.push(frame);
                    }
                    // A best-effort delivery is all-or-nothing: leftover
                    // bytes are a truncated datagram, not a frame in
                    // progress.
                    if !reliable && !buffer.is_empty() {
                        tracing::warn!(
                            channel,
                            endpoint = %envelope.endpoint.id(),
                            "partial frame in a best-effort delivery, discarding"
                        );
                        buffer.clear();
                    }
                    frames
                };

                for data in frames {
                    match core.codec.decode::<Payload>(&data) {
                        Ok(payload) => {
                            core.handle_payload(channel, reliable, &envelope.endpoint, payload)
                                .await;
                        }
                        Err(error) if reliable => {
                            // A reliable stream that produced garbage can
                            // never recover its framing.
                            tracing::warn!(
                                channel,
                                endpoint = %envelope.endpoint.id(),
                                %error,
                                "undecodable frame on a reliable channel, closing"
                            );
                            core.teardown_endpoint(&envelope.endpoint).await;
                            break;
                        }
                        Err(error) => {
                            tracing::debug!(
                                channel,
                                endpoint = %envelope.endpoint.id(),
                                %error,
                                "undecodable best-effort frame, dropping"
                            );
                        }
                    }
                }
            }
            Err(error) => {
                tracing::error!(channel, %error, "acceptor failed");
                break;
            }
        }
    }

    if let Err(error) = acceptor.terminate().await {
        tracing::debug!(channel, %error, "acceptor terminate failed");
    }
    tracing::debug!(channel, "drain task stopped");
}
