use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{encode_frame, Frame, FrameConfig, MessageHeader, MessageType, HEADER_SIZE};
use crate::error::FrameError;

/// Turns a continuous byte stream into discrete typed frames, and back.
///
/// Plug into `tokio_util::codec::{FramedRead, FramedWrite}`. Decoding is
/// a resumable two-phase parse: buffer exactly [`HEADER_SIZE`] bytes,
/// decode the header, then buffer exactly `header.length` payload bytes
/// before delivering the frame. `decode` returning `Ok(None)` suspends
/// the parse until more bytes arrive, so arbitrary fragmentation of the
/// underlying stream yields the same frame sequence.
#[derive(Debug)]
pub struct FrameCodec {
    config: FrameConfig,
    state: DecodeState,
}

#[derive(Debug, Clone, Copy)]
enum DecodeState {
    /// Waiting for a complete 8-byte header.
    Header,
    /// Header decoded; waiting for the full payload.
    Payload(MessageHeader),
}

impl FrameCodec {
    /// Create a codec with default configuration.
    pub fn new() -> Self {
        Self::with_config(FrameConfig::default())
    }

    /// Create a codec with explicit configuration.
    pub fn with_config(config: FrameConfig) -> Self {
        Self {
            config,
            state: DecodeState::Header,
        }
    }

    /// Current codec configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        loop {
            match self.state {
                DecodeState::Header => {
                    if src.len() < HEADER_SIZE {
                        return Ok(None); // Need more data
                    }

                    let mut raw = [0u8; HEADER_SIZE];
                    raw.copy_from_slice(&src[..HEADER_SIZE]);
                    src.advance(HEADER_SIZE);
                    let header = MessageHeader::decode(raw);

                    if header.length as usize > self.config.max_payload_size {
                        return Err(FrameError::PayloadTooLarge {
                            size: header.length as usize,
                            max: self.config.max_payload_size,
                        });
                    }

                    src.reserve(header.length as usize);
                    self.state = DecodeState::Payload(header);
                }
                DecodeState::Payload(header) => {
                    if src.len() < header.length as usize {
                        return Ok(None); // Need more data
                    }

                    let payload = src.split_to(header.length as usize).freeze();
                    self.state = DecodeState::Header;

                    let message_type = MessageType::from_wire(header.message_type);
                    if message_type == MessageType::Invalid
                        && header.message_type != MessageType::Invalid.as_wire()
                    {
                        // Out-of-range tag: deliver as Invalid, keep the
                        // stream parsing.
                        tracing::debug!(tag = header.message_type, "unrecognized message type tag");
                    }

                    return Ok(Some(Frame {
                        message_type,
                        payload,
                    }));
                }
            }
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        if frame.payload.len() > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: frame.payload.len(),
                max: self.config.max_payload_size,
            });
        }
        encode_frame(frame.message_type, frame.payload.as_ref(), dst)
    }
}

#[cfg(test)]
mod tests {
    use bytes::{BufMut, Bytes};
    use futures_util::{SinkExt, StreamExt};
    use tokio_util::codec::{FramedRead, FramedWrite};

    use super::*;
    use crate::codec::DEFAULT_MAX_PAYLOAD;

    fn wire_for(frames: &[(MessageType, &[u8])]) -> BytesMut {
        let mut buf = BytesMut::new();
        for (message_type, payload) in frames {
            encode_frame(*message_type, payload, &mut buf).unwrap();
        }
        buf
    }

    fn decode_all(codec: &mut FrameCodec, src: &mut BytesMut) -> Vec<Frame> {
        let mut out = Vec::new();
        while let Some(frame) = codec.decode(src).unwrap() {
            out.push(frame);
        }
        out
    }

    #[test]
    fn decodes_single_frame() {
        let mut wire = wire_for(&[(MessageType::Message, b"hello")]);
        let mut codec = FrameCodec::new();

        let frames = decode_all(&mut codec, &mut wire);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].message_type, MessageType::Message);
        assert_eq!(frames[0].payload.as_ref(), b"hello");
        assert!(wire.is_empty());
    }

    #[test]
    fn decodes_multiple_frames_in_order() {
        let mut wire = wire_for(&[
            (MessageType::Message, b"one"),
            (MessageType::BinaryChunk, b"two"),
            (MessageType::Disconnect, b""),
        ]);
        let mut codec = FrameCodec::new();

        let frames = decode_all(&mut codec, &mut wire);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].payload.as_ref(), b"one");
        assert_eq!(frames[1].payload.as_ref(), b"two");
        assert_eq!(frames[2].message_type, MessageType::Disconnect);
        assert!(frames[2].payload.is_empty());
    }

    #[test]
    fn suspends_on_partial_header() {
        let wire = wire_for(&[(MessageType::Message, b"hello")]);
        let mut codec = FrameCodec::new();

        let mut partial = BytesMut::from(&wire[..3]);
        assert!(codec.decode(&mut partial).unwrap().is_none());
    }

    #[test]
    fn suspends_on_partial_payload() {
        let wire = wire_for(&[(MessageType::Message, b"hello")]);
        let mut codec = FrameCodec::new();

        let mut partial = BytesMut::from(&wire[..HEADER_SIZE + 2]);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        // Resume with the rest of the payload.
        partial.extend_from_slice(&wire[HEADER_SIZE + 2..]);
        let frame = codec.decode(&mut partial).unwrap().unwrap();
        assert_eq!(frame.payload.as_ref(), b"hello");
    }

    #[test]
    fn one_byte_at_a_time_yields_identical_frames() {
        let wire = wire_for(&[
            (MessageType::Message, b"hello"),
            (MessageType::BinaryChunk, b"world!"),
            (MessageType::Disconnect, b""),
        ]);

        let mut whole = wire.clone();
        let mut codec = FrameCodec::new();
        let expected = decode_all(&mut codec, &mut whole);

        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        let mut got = Vec::new();
        for byte in wire.iter() {
            buf.put_u8(*byte);
            got.extend(decode_all(&mut codec, &mut buf));
        }

        assert_eq!(got.len(), expected.len());
        for (a, b) in got.iter().zip(expected.iter()) {
            assert_eq!(a.message_type, b.message_type);
            assert_eq!(a.payload, b.payload);
        }
    }

    #[test]
    fn arbitrary_fragmentation_yields_identical_frames() {
        let wire = wire_for(&[
            (MessageType::Message, b"alpha"),
            (MessageType::Message, b"beta"),
            (MessageType::BinaryChunk, &[0xAB; 300]),
        ]);

        let mut whole = wire.clone();
        let mut codec = FrameCodec::new();
        let expected = decode_all(&mut codec, &mut whole);

        // Split the identical stream at a handful of awkward boundaries.
        for split_size in [1usize, 2, 3, 7, 8, 9, 13, 64] {
            let mut codec = FrameCodec::new();
            let mut buf = BytesMut::new();
            let mut got = Vec::new();
            for fragment in wire.chunks(split_size) {
                buf.extend_from_slice(fragment);
                got.extend(decode_all(&mut codec, &mut buf));
            }

            assert_eq!(got.len(), expected.len(), "split_size={split_size}");
            for (a, b) in got.iter().zip(expected.iter()) {
                assert_eq!(a.message_type, b.message_type);
                assert_eq!(a.payload, b.payload);
            }
        }
    }

    #[test]
    fn unknown_tag_delivered_as_invalid_without_breaking_stream() {
        let mut wire = BytesMut::new();
        let header = MessageHeader::new(99, 3);
        wire.put_slice(&header.encode());
        wire.put_slice(b"???");
        encode_frame(MessageType::Message, b"after", &mut wire).unwrap();

        let mut codec = FrameCodec::new();
        let frames = decode_all(&mut codec, &mut wire);

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].message_type, MessageType::Invalid);
        assert_eq!(frames[0].payload.as_ref(), b"???");
        // The stream keeps parsing past the unknown tag.
        assert_eq!(frames[1].message_type, MessageType::Message);
        assert_eq!(frames[1].payload.as_ref(), b"after");
    }

    #[test]
    fn zero_length_payload_is_legal() {
        let mut wire = wire_for(&[(MessageType::Disconnect, b"")]);
        let mut codec = FrameCodec::new();

        let frame = codec.decode(&mut wire).unwrap().unwrap();
        assert_eq!(frame.message_type, MessageType::Disconnect);
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn oversized_declared_length_rejected() {
        let mut wire = BytesMut::new();
        let header = MessageHeader::new(2, (DEFAULT_MAX_PAYLOAD + 1) as u32);
        wire.put_slice(&header.encode());

        let mut codec = FrameCodec::new();
        let err = codec.decode(&mut wire).unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { .. }));
    }

    #[test]
    fn encoder_rejects_oversized_payload() {
        let config = FrameConfig {
            max_payload_size: 8,
        };
        let mut codec = FrameCodec::with_config(config);
        let mut buf = BytesMut::new();

        let frame = Frame::new(MessageType::Message, Bytes::from_static(b"way too long"));
        let err = codec.encode(frame, &mut buf).unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { .. }));
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn roundtrip_over_duplex_stream() {
        let (client, server) = tokio::io::duplex(64);
        let mut writer = FramedWrite::new(client, FrameCodec::new());
        let mut reader = FramedRead::new(server, FrameCodec::new());

        writer
            .send(Frame::new(MessageType::Message, Bytes::from_static(b"ping")))
            .await
            .unwrap();
        writer
            .send(Frame::new(MessageType::Disconnect, Bytes::new()))
            .await
            .unwrap();

        let first = reader.next().await.unwrap().unwrap();
        assert_eq!(first.message_type, MessageType::Message);
        assert_eq!(first.payload.as_ref(), b"ping");

        let second = reader.next().await.unwrap().unwrap();
        assert_eq!(second.message_type, MessageType::Disconnect);
        assert!(second.payload.is_empty());
    }

    #[tokio::test]
    async fn large_payload_crosses_small_duplex_buffer() {
        // The 64-byte duplex buffer forces heavy fragmentation.
        let payload = Bytes::from(vec![0xC3; 16 * 1024]);
        let (client, server) = tokio::io::duplex(64);
        let mut writer = FramedWrite::new(client, FrameCodec::new());
        let mut reader = FramedRead::new(server, FrameCodec::new());

        let expected = payload.clone();
        let send = tokio::spawn(async move {
            writer
                .send(Frame::new(MessageType::BinaryChunk, payload))
                .await
                .unwrap();
        });

        let frame = reader.next().await.unwrap().unwrap();
        send.await.unwrap();

        assert_eq!(frame.message_type, MessageType::BinaryChunk);
        assert_eq!(frame.payload, expected);
    }
}
