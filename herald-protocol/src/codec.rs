//! Buffered frame encoding and decoding.

use crate::error::ProtocolError;
use crate::frame::{Frame, FRAME_TERMINATOR};
use bytes::{Buf, BytesMut};

/// Encodes frames into wire bytes.
pub struct Encoder;

impl Encoder {
    /// Encodes a frame, terminator included.
    pub fn encode(frame: &Frame) -> BytesMut {
        frame.encode()
    }
}

/// Incremental decoder for a byte-stream transport.
///
/// Feed raw reads with [`extend`](Decoder::extend) and drain complete
/// frames with [`decode_frame`](Decoder::decode_frame). A frame that fails
/// to parse is consumed from the buffer, so one bad frame never wedges the
/// stream.
pub struct Decoder {
    buffer: BytesMut,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next frame from the buffer.
    ///
    /// Returns `Ok(None)` until a full terminator-delimited frame has been
    /// buffered.
    pub fn decode_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        let Some(end) = self.buffer.iter().position(|&b| b == FRAME_TERMINATOR) else {
            return Ok(None);
        };

        let raw = self.buffer.split_to(end);
        self.buffer.advance(1); // drop the terminator

        let text = std::str::from_utf8(&raw).map_err(|_| ProtocolError::InvalidUtf8)?;
        Frame::parse(text).map(Some)
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}
