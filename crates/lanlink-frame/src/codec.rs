use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Frame header: type tag (4) + payload length (4) = 8 bytes, both
/// big-endian (network byte order).
pub const HEADER_SIZE: usize = 8;

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Message type tags carried in the frame header.
///
/// The numeric values are the wire contract shared with every peer and
/// must never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageType {
    /// Unrecognized type tag. Frames with an out-of-range tag are
    /// delivered as `Invalid`; the stream keeps parsing.
    Invalid = 0,
    /// Text message.
    Message = 1,
    /// One chunk of a larger binary payload.
    BinaryChunk = 2,
    /// The sender is about to close the connection.
    Disconnect = 3,
}

impl MessageType {
    /// Map a wire tag to a message type. Unknown tags map to `Invalid`.
    pub fn from_wire(raw: u32) -> Self {
        match raw {
            1 => MessageType::Message,
            2 => MessageType::BinaryChunk,
            3 => MessageType::Disconnect,
            _ => MessageType::Invalid,
        }
    }

    /// The numeric wire tag for this type.
    pub fn as_wire(self) -> u32 {
        self as u32
    }

    /// Human-readable tag name.
    pub fn name(self) -> &'static str {
        match self {
            MessageType::Invalid => "INVALID",
            MessageType::Message => "MESSAGE",
            MessageType::BinaryChunk => "BINARY_CHUNK",
            MessageType::Disconnect => "DISCONNECT",
        }
    }
}

/// The fixed-width frame header.
///
/// `message_type` keeps the raw wire tag: any 8 bytes decode to *some*
/// header, and mapping unknown tags to [`MessageType::Invalid`] is the
/// framer's job, so header decoding never fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Raw message type tag.
    pub message_type: u32,
    /// Exact byte count of the payload that follows the header.
    pub length: u32,
}

impl MessageHeader {
    /// Create a new header.
    pub fn new(message_type: u32, length: u32) -> Self {
        Self {
            message_type,
            length,
        }
    }

    /// Encode into the fixed 8-byte wire layout.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[..4].copy_from_slice(&self.message_type.to_be_bytes());
        buf[4..].copy_from_slice(&self.length.to_be_bytes());
        buf
    }

    /// Decode from the fixed 8-byte wire layout. Total: every input
    /// produces a header.
    pub fn decode(buf: [u8; HEADER_SIZE]) -> Self {
        let message_type = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let length = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        Self {
            message_type,
            length,
        }
    }
}

/// A typed frame with its payload.
///
/// The payload is a read-only [`Bytes`] view sliced out of the receive
/// buffer, so delivery never copies it.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Decoded message type (unknown tags collapse to `Invalid`).
    pub message_type: MessageType,
    /// The message payload. May be empty.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(message_type: MessageType, payload: impl Into<Bytes>) -> Self {
        Self {
            message_type,
            payload: payload.into(),
        }
    }

    /// The header this frame encodes with.
    pub fn header(&self) -> MessageHeader {
        MessageHeader::new(self.message_type.as_wire(), self.payload.len() as u32)
    }

    /// The total wire size of this frame (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────┬──────────────┬─────────────────┐
/// │ Type (4B BE) │ Length       │ Payload         │
/// │              │ (4B BE)      │ (Length bytes)  │
/// └──────────────┴──────────────┴─────────────────┘
/// ```
///
/// The declared length is computed from the payload, so it always
/// matches the bytes written.
pub fn encode_frame(message_type: MessageType, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > u32::MAX as usize {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        });
    }
    let header = MessageHeader::new(message_type.as_wire(), payload.len() as u32);
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_slice(&header.encode());
    dst.put_slice(payload);
    Ok(())
}

/// Encode a frame with a caller-supplied header.
///
/// The declared length must exactly equal the payload size; a mismatch
/// is a programmer error and fails fast with
/// [`FrameError::LengthMismatch`] before anything is written.
pub fn encode_frame_with_header(
    header: MessageHeader,
    payload: &[u8],
    dst: &mut BytesMut,
) -> Result<()> {
    if header.length as usize != payload.len() {
        return Err(FrameError::LengthMismatch {
            declared: header.length as usize,
            actual: payload.len(),
        });
    }
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_slice(&header.encode());
    dst.put_slice(payload);
    Ok(())
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}
