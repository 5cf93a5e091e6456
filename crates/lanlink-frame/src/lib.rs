//! Typed, length-prefixed message framing for LAN peer links.
//!
//! This is the core value-add layer of lanlink. Every message on the
//! stream is framed with:
//! - A 4-byte big-endian message type tag
//! - A 4-byte big-endian payload length
//! - The payload bytes
//!
//! Both header integers use network byte order so heterogeneous peers
//! agree on the layout. A type tag outside the known set decodes as
//! [`MessageType::Invalid`] without breaking the stream.
//!
//! No partial reads, no buffer management in user code.

pub mod chunk;
pub mod codec;
pub mod error;
pub mod framer;

pub use chunk::{chunk_count, split_chunks, Reassembler, DEFAULT_CHUNK_SIZE};
pub use codec::{
    encode_frame, encode_frame_with_header, Frame, FrameConfig, MessageHeader, MessageType,
    DEFAULT_MAX_PAYLOAD, HEADER_SIZE,
};
pub use error::{FrameError, Result};
pub use framer::FrameCodec;
