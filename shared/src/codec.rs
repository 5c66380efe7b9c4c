//! Length-prefixed codec for TCP framing
//!
//! All messages are framed as:
//! ```text
//! [ 4 bytes: length (u32, big-endian) ][ N bytes: protobuf Envelope ]
//! ```
//!
//! This ensures message boundaries are preserved over TCP streams.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use prost::Message;
use thiserror::Error;

use crate::Envelope;

/// Maximum message size (32 MB). A Status carries the full captured output,
/// so this is larger than a typical control protocol needs.
pub const MAX_MESSAGE_SIZE: u32 = 32 * 1024 * 1024;

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Message too large: {0} bytes (max: {MAX_MESSAGE_SIZE})")]
    MessageTooLarge(usize),

    #[error("Invalid message length prefix: {0}")]
    InvalidLength(u32),

    #[error("Protobuf decode error: {0}")]
    DecodeError(#[from] prost::DecodeError),

    #[error("Protobuf encode error: {0}")]
    EncodeError(#[from] prost::EncodeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Encode an Envelope into a length-prefixed byte buffer
pub fn encode(envelope: &Envelope) -> Result<Bytes, CodecError> {
    let msg_len = envelope.encoded_len();

    if msg_len > MAX_MESSAGE_SIZE as usize {
        return Err(CodecError::MessageTooLarge(msg_len));
    }

    // 4 bytes for length prefix + message bytes
    let mut buf = BytesMut::with_capacity(4 + msg_len);

    // Write length prefix (big-endian u32)
    buf.put_u32(msg_len as u32);

    // Write protobuf message
    envelope.encode(&mut buf)?;

    Ok(buf.freeze())
}

/// Try to decode a length-prefixed Envelope from a buffer
///
/// Returns:
/// - `Ok(Some(envelope))` if a complete message was decoded
/// - `Ok(None)` if more data is needed
/// - `Err(...)` if the data is invalid
pub fn decode(buf: &mut BytesMut) -> Result<Option<Envelope>, CodecError> {
    // Need at least 4 bytes for the length prefix
    if buf.len() < 4 {
        return Ok(None);
    }

    // Peek at the length prefix without consuming
    let msg_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);

    // Validate length
    if msg_len > MAX_MESSAGE_SIZE {
        return Err(CodecError::InvalidLength(msg_len));
    }

    let total_len = 4 + msg_len as usize;

    // Check if we have the complete message
    if buf.len() < total_len {
        return Ok(None);
    }

    // Consume the length prefix
    buf.advance(4);

    // Split off the message bytes
    let msg_bytes = buf.split_to(msg_len as usize);

    // Decode the protobuf message
    let envelope = Envelope::decode(msg_bytes)?;

    Ok(Some(envelope))
}

/// Decoder state machine for streaming decoding
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Partial frame data being accumulated
    buffer: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Add data to the decoder buffer
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode the next frame from the buffer
    ///
    /// Call this repeatedly until it returns `Ok(None)` to drain all complete frames
    pub fn decode_next(&mut self) -> Result<Option<Envelope>, CodecError> {
        decode(&mut self.buffer)
    }

    /// Get the current buffer length (for debugging)
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }
}
