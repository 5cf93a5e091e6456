//! Split large payloads into fixed-size chunks and reassemble them.
//!
//! Large binary transfers are sent as a sequence of `BinaryChunk` frames
//! and rebuilt by concatenating payloads in receipt order.

use bytes::{Bytes, BytesMut};

/// Default chunk size for splitting large payloads: 64 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Number of chunks a payload of `total_len` bytes splits into.
///
/// Plain ceiling division; a `chunk_size` of zero falls back to
/// [`DEFAULT_CHUNK_SIZE`].
pub fn chunk_count(total_len: usize, chunk_size: usize) -> usize {
    let size = effective_size(chunk_size);
    total_len.div_ceil(size)
}

/// Split a payload into fixed-size chunks.
///
/// Every chunk is `chunk_size` bytes except possibly the last. Chunks
/// are zero-copy slices of the input; an empty payload yields no chunks.
pub fn split_chunks(payload: &Bytes, chunk_size: usize) -> Vec<Bytes> {
    let size = effective_size(chunk_size);
    let mut out = Vec::with_capacity(payload.len().div_ceil(size));
    let mut start = 0usize;
    while start < payload.len() {
        let end = (start + size).min(payload.len());
        out.push(payload.slice(start..end));
        start = end;
    }
    out
}

fn effective_size(chunk_size: usize) -> usize {
    if chunk_size == 0 {
        DEFAULT_CHUNK_SIZE
    } else {
        chunk_size
    }
}

/// Reassembles chunks received in order into the original payload.
#[derive(Debug, Default)]
pub struct Reassembler {
    parts: Vec<Bytes>,
    total_len: usize,
}

impl Reassembler {
    /// Create an empty reassembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the next chunk in receipt order.
    pub fn push(&mut self, chunk: Bytes) {
        self.total_len += chunk.len();
        self.parts.push(chunk);
    }

    /// Total bytes accumulated so far.
    pub fn len(&self) -> usize {
        self.total_len
    }

    /// True if no chunks have been received.
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Number of chunks accumulated so far.
    pub fn chunk_count(&self) -> usize {
        self.parts.len()
    }

    /// Concatenate all chunks in receipt order.
    pub fn assemble(self) -> Bytes {
        let mut out = BytesMut::with_capacity(self.total_len);
        for part in self.parts {
            out.extend_from_slice(&part);
        }
        out.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload_of(len: usize) -> Bytes {
        Bytes::from((0..len).map(|i| i as u8).collect::<Vec<u8>>())
    }

    #[test]
    fn split_with_remainder() {
        let payload = payload_of(100);
        let chunks = split_chunks(&payload, 30);
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0].len(), 30);
        assert_eq!(chunks[3].len(), 10);
    }

    #[test]
    fn split_exact_multiple() {
        let payload = payload_of(90);
        let chunks = split_chunks(&payload, 30);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.len() == 30));
    }

    #[test]
    fn split_single_chunk() {
        let payload = payload_of(10);
        let chunks = split_chunks(&payload, 100);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], payload);
    }

    #[test]
    fn split_empty_payload() {
        let chunks = split_chunks(&Bytes::new(), 30);
        assert!(chunks.is_empty());
    }

    #[test]
    fn split_zero_chunk_size_uses_default() {
        let payload = Bytes::from(vec![0u8; DEFAULT_CHUNK_SIZE * 2]);
        let chunks = split_chunks(&payload, 0);
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn count_matches_split() {
        for (total, size) in [(0, 30), (1, 30), (29, 30), (30, 30), (31, 30), (100, 30)] {
            let payload = payload_of(total);
            assert_eq!(
                chunk_count(total, size),
                split_chunks(&payload, size).len(),
                "total={total} size={size}"
            );
        }
    }

    #[test]
    fn count_is_ceiling_division() {
        assert_eq!(chunk_count(100, 30), 4);
        assert_eq!(chunk_count(90, 30), 3);
        assert_eq!(chunk_count(1, 65536), 1);
        assert_eq!(chunk_count(0, 30), 0);
        // 65537 bytes at the default chunk size is one full chunk plus a
        // one-byte remainder.
        assert_eq!(chunk_count(DEFAULT_CHUNK_SIZE + 1, DEFAULT_CHUNK_SIZE), 2);
    }

    #[test]
    fn reassemble_reproduces_original() {
        let payload = payload_of(100);
        let mut reassembler = Reassembler::new();
        for chunk in split_chunks(&payload, 7) {
            reassembler.push(chunk);
        }

        assert_eq!(reassembler.len(), 100);
        assert_eq!(reassembler.assemble(), payload);
    }

    #[test]
    fn reassemble_large_payload() {
        let payload = Bytes::from(
            (0..DEFAULT_CHUNK_SIZE * 3 + 17)
                .map(|i| (i % 251) as u8)
                .collect::<Vec<u8>>(),
        );
        let chunks = split_chunks(&payload, DEFAULT_CHUNK_SIZE);
        assert_eq!(chunks.len(), 4);

        let mut reassembler = Reassembler::new();
        for chunk in chunks {
            reassembler.push(chunk);
        }
        assert_eq!(reassembler.assemble(), payload);
    }

    #[test]
    fn empty_reassembler() {
        let reassembler = Reassembler::new();
        assert!(reassembler.is_empty());
        assert_eq!(reassembler.len(), 0);
        assert!(reassembler.assemble().is_empty());
    }
}
