//! Message codec and length-prefixed framing.
//!
//! A message is encoded as a JSON object carrying its fields plus a
//! `"__dataclass__": "Message"` type tag, so peers can reconstruct it without
//! guessing a schema. On the wire each encoded message is prefixed with its
//! length as a 4-byte big-endian integer.

use bytes::{Buf, BytesMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use topicmesh_types::Message;

/// Size of the length prefix.
pub const FRAME_HEADER_LEN: usize = 4;

/// Default maximum frame payload (16 MB).
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Errors from encoding or decoding a message.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The bytes are not a well-formed message. The frame is dropped.
    #[error("Malformed message: {0}")]
    Malformed(#[source] serde_json::Error),
    /// The bytes end before the document does. Wait for more bytes.
    #[error("Incomplete message: {0}")]
    Incomplete(#[source] serde_json::Error),
    /// The message could not be serialized.
    #[error("Encode error: {0}")]
    Encode(#[source] serde_json::Error),
    /// The declared frame length exceeds the configured maximum.
    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u32, max: u32 },
}

impl CodecError {
    /// Whether waiting for more bytes could make the input decodable.
    pub fn is_incomplete(&self) -> bool {
        matches!(self, Self::Incomplete(_))
    }
}

/// Tagged wire representation of a message.
#[derive(Serialize, Deserialize)]
#[serde(tag = "__dataclass__")]
enum Envelope {
    Message(Message),
}

#[derive(Serialize)]
#[serde(tag = "__dataclass__")]
enum EnvelopeRef<'a> {
    Message(&'a Message),
}

/// Encode a message to its JSON payload (no length prefix).
pub fn encode(message: &Message) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(&EnvelopeRef::Message(message)).map_err(CodecError::Encode)
}

/// Decode a JSON payload into a message.
pub fn decode(bytes: &[u8]) -> Result<Message, CodecError> {
    match serde_json::from_slice::<Envelope>(bytes) {
        Ok(Envelope::Message(message)) => Ok(message),
        Err(e) if e.is_eof() => Err(CodecError::Incomplete(e)),
        Err(e) => Err(CodecError::Malformed(e)),
    }
}

/// Encode a message with its 4-byte big-endian length prefix.
///
/// Fails with `FrameTooLarge` when the payload exceeds `max_frame_size`, so a
/// frame the peer would refuse is never written.
pub fn encode_frame(message: &Message, max_frame_size: u32) -> Result<Vec<u8>, CodecError> {
    let payload = encode(message)?;
    let len = u32::try_from(payload.len()).unwrap_or(u32::MAX);
    if len > max_frame_size {
        return Err(CodecError::FrameTooLarge {
            size: len,
            max: max_frame_size,
        });
    }
    let mut bytes = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    bytes.extend_from_slice(&len.to_be_bytes());
    bytes.extend_from_slice(&payload);
    Ok(bytes)
}

/// Decode the length prefix from a 4-byte header.
pub fn decode_length(header: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*header)
}

/// Extracts complete frames from a growing byte buffer.
///
/// Bytes arrive from a stream in arbitrary chunks. [`FrameDecoder::decode`]
/// leaves the buffer untouched until a whole frame is present, then consumes
/// exactly that frame before decoding it. A malformed frame therefore never
/// desynchronises the stream. An oversized frame is never buffered: its
/// payload is discarded as it arrives.
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    max_frame_size: u32,
    /// Payload bytes of an oversized frame still to be thrown away.
    discard: usize,
}

impl FrameDecoder {
    pub fn new(max_frame_size: u32) -> Self {
        Self {
            max_frame_size,
            discard: 0,
        }
    }

    /// Whether the decoder is in the middle of skipping an oversized frame.
    pub fn is_skipping(&self) -> bool {
        self.discard > 0
    }

    /// Try to decode the next frame.
    ///
    /// - `Ok(None)`: need more bytes; nothing of a pending frame consumed.
    /// - `Ok(Some(msg))`: one frame consumed and decoded.
    /// - `Err(FrameTooLarge)`: the header was consumed and the payload will
    ///   be skipped as it arrives.
    /// - `Err(Malformed)`: the frame was consumed and dropped.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Message>, CodecError> {
        if self.discard > 0 {
            let skipped = self.discard.min(buf.len());
            buf.advance(skipped);
            self.discard -= skipped;
            if self.discard > 0 {
                return Ok(None);
            }
        }
        if buf.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }
        let header: [u8; 4] = [buf[0], buf[1], buf[2], buf[3]];
        let len = decode_length(&header);
        if len > self.max_frame_size {
            buf.advance(FRAME_HEADER_LEN);
            let skipped = (len as usize).min(buf.len());
            buf.advance(skipped);
            self.discard = len as usize - skipped;
            return Err(CodecError::FrameTooLarge {
                size: len,
                max: self.max_frame_size,
            });
        }
        let frame_len = FRAME_HEADER_LEN + len as usize;
        if buf.len() < frame_len {
            buf.reserve(frame_len - buf.len());
            return Ok(None);
        }
        buf.advance(FRAME_HEADER_LEN);
        let body = buf.split_to(len as usize);
        match decode(&body) {
            Ok(message) => Ok(Some(message)),
            // A complete frame that ends early is just as broken as any other.
            Err(CodecError::Incomplete(e)) => Err(CodecError::Malformed(e)),
            Err(e) => Err(e),
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(MAX_FRAME_SIZE)
    }
}
