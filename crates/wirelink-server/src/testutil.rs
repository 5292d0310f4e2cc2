//! Shared test doubles.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use wirelink_protocol::{Codec, JsonCodec, Payload, Reassembler};
use wirelink_transport::{Endpoint, EndpointId};

/// An endpoint that records writes and close calls.
pub(crate) struct StubEndpoint {
    id: EndpointId,
    written: Mutex<Vec<Vec<u8>>>,
    closed: AtomicBool,
}

impl StubEndpoint {
    pub(crate) fn new(id: u64) -> Arc<Self> {
        Arc::new(Self {
            id: EndpointId::new(id),
            written: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Reassembles and decodes everything written so far.
    pub(crate) fn frames(&self) -> Vec<Payload> {
        let mut reassembler = Reassembler::new();
        for chunk in self.written.lock().unwrap().iter() {
            reassembler.add_bytes(chunk);
        }
        let mut payloads = Vec::new();
        while let Some(frame) = reassembler.poll_frame() {
            payloads.push(JsonCodec.decode(&frame).unwrap());
        }
        payloads
    }
}

impl Endpoint for StubEndpoint {
    type Error = std::io::Error;

    fn id(&self) -> EndpointId {
        self.id
    }

    fn address(&self) -> String {
        format!("stub-{}", self.id)
    }

    fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    async fn write(&self, data: &[u8]) -> Result<(), Self::Error> {
        self.written.lock().unwrap().push(data.to_vec());
        Ok(())
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
