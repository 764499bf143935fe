//! Frame codec: pure transformation between logical messages and the byte
//! stream.
//!
//! The codec owns no I/O. Incoming bytes are appended with `extend` and
//! complete frames are pulled with `decode_next`; outgoing messages are
//! rendered by `encode`. All blocking is the connection's business.

use mysqlx_core::error::{Error, ProtocolError, ProtocolErrorKind};

use crate::protocol::{Message, DEFAULT_MAX_FRAME_SIZE};

/// Streaming frame decoder plus the stateless encoder.
#[derive(Debug)]
pub struct FrameCodec {
    buf: Vec<u8>,
    pos: usize,
    max_frame_size: u32,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: u32) -> Self {
        Self {
            buf: Vec::new(),
            pos: 0,
            max_frame_size,
        }
    }

    /// Encode one message into its wire form.
    ///
    /// Layout: `len(u32 LE) | type_id(u8) | payload`, where `len` counts the
    /// type byte and payload but not itself.
    pub fn encode(type_id: u8, payload: &[u8]) -> Vec<u8> {
        let len = 1 + payload.len() as u32;
        let mut frame = Vec::with_capacity(4 + len as usize);
        frame.extend_from_slice(&len.to_le_bytes());
        frame.push(type_id);
        frame.extend_from_slice(payload);
        frame
    }

    /// Append raw bytes read from the stream.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes buffered but not yet consumed by a decoded frame.
    pub fn buffered(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Pull the next complete frame out of the buffer.
    ///
    /// Returns `Ok(None)` when more bytes are needed. A declared length of
    /// zero is a malformed frame; a declared length above the configured
    /// maximum is rejected before any payload is buffered further.
    pub fn decode_next(&mut self) -> Result<Option<Message>, Error> {
        if self.buffered() < 4 {
            return Ok(None);
        }

        let header = &self.buf[self.pos..self.pos + 4];
        let declared = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);

        if declared == 0 {
            return Err(ProtocolError {
                kind: ProtocolErrorKind::MalformedFrame,
                message: "frame length must be at least 1".to_string(),
            }
            .into());
        }
        if declared > self.max_frame_size {
            return Err(ProtocolError {
                kind: ProtocolErrorKind::FrameTooLarge,
                message: format!(
                    "frame of {} bytes exceeds the maximum of {}",
                    declared, self.max_frame_size
                ),
            }
            .into());
        }

        let total = 4 + declared as usize;
        if self.buffered() < total {
            return Ok(None);
        }

        let type_id = self.buf[self.pos + 4];
        let payload = self.buf[self.pos + 5..self.pos + total].to_vec();
        self.pos += total;

        // Reclaim the buffer once fully drained; compact when the consumed
        // prefix dominates.
        if self.pos == self.buf.len() {
            self.buf.clear();
            self.pos = 0;
        } else if self.pos > 4096 && self.pos * 2 > self.buf.len() {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }

        Ok(Some(Message { type_id, payload }))
    }
}
