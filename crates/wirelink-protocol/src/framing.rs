//! Wire framing: length-prefixed message blocks and partial-read recovery.
//!
//! Byte-stream transports deliver bytes, not messages — a single `read`
//! may return half a message, or three and a half. This module restores
//! message boundaries:
//!
//! - [`frame`] prefixes a serialized payload with its length so the
//!   receiver knows where it ends.
//! - [`Reassembler`] accumulates raw bytes per physical channel and
//!   yields complete payloads, no matter how the stream was chunked.
//!
//! The prefix is a 2-byte big-endian unsigned length, which caps a single
//! payload at [`MAX_PAYLOAD`] bytes. Larger messages are a caller error;
//! the substrate does not fragment.

use crate::ProtocolError;

/// Width of the length prefix in bytes.
pub const LENGTH_PREFIX_LEN: usize = 2;

/// Maximum serialized payload size a single frame can carry.
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

/// Wraps a serialized payload in a length-prefixed frame.
///
/// # Errors
/// Returns [`ProtocolError::FrameTooLarge`] if the payload exceeds
/// [`MAX_PAYLOAD`] bytes.
pub fn frame(payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    if payload.len() > MAX_PAYLOAD {
        return Err(ProtocolError::FrameTooLarge {
            len: payload.len(),
            max: MAX_PAYLOAD,
        });
    }

    let mut block = Vec::with_capacity(LENGTH_PREFIX_LEN + payload.len());
    block.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    block.extend_from_slice(payload);
    Ok(block)
}

/// Per-channel stateful framing decoder.
///
/// Feed it whatever the transport delivers with [`add_bytes`], then drain
/// complete payloads with [`poll_frame`] in a loop. The accumulator holds
/// at most one partially received frame at any time, and no byte is ever
/// lost across calls.
///
/// On a best-effort (datagram) channel every `add_bytes` call should carry
/// whole frames; the adapter treats a datagram that completes nothing as a
/// local error and calls [`clear`].
///
/// [`add_bytes`]: Reassembler::add_bytes
/// [`poll_frame`]: Reassembler::poll_frame
/// [`clear`]: Reassembler::clear
#[derive(Debug, Default)]
pub struct Reassembler {
    buf: Vec<u8>,
}

impl Reassembler {
    /// Creates an empty reassembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends raw bytes from the transport.
    ///
    /// Returns `true` if at least one complete frame is now available.
    pub fn add_bytes(&mut self, chunk: &[u8]) -> bool {
        self.buf.extend_from_slice(chunk);
        self.has_complete_frame()
    }

    /// Pops and returns the oldest complete payload, or `None` if the
    /// accumulator holds fewer bytes than the next length prefix requires.
    ///
    /// Call in a loop until it returns `None` — a single chunk may have
    /// completed several frames.
    pub fn poll_frame(&mut self) -> Option<Vec<u8>> {
        let len = self.next_frame_len()?;
        if self.buf.len() < LENGTH_PREFIX_LEN + len {
            return None;
        }

        let payload = self.buf[LENGTH_PREFIX_LEN..LENGTH_PREFIX_LEN + len]
            .to_vec();
        self.buf.drain(..LENGTH_PREFIX_LEN + len);
        Some(payload)
    }

    /// Discards any buffered bytes.
    ///
    /// Used by best-effort adapters after a malformed datagram, where the
    /// leftover bytes are garbage rather than a frame in progress.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Whether any bytes are buffered (i.e. a frame is in progress).
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn has_complete_frame(&self) -> bool {
        match self.next_frame_len() {
            Some(len) => self.buf.len() >= LENGTH_PREFIX_LEN + len,
            None => false,
        }
    }

    fn next_frame_len(&self) -> Option<usize> {
        if self.buf.len() < LENGTH_PREFIX_LEN {
            return None;
        }
        Some(u16::from_be_bytes([self.buf[0], self.buf[1]]) as usize)
    }
}

// =========================================================================
// Tests
// =========================================================================
