//! # Stream Codec
//!
//! Reassembles length-prefixed frames from arbitrary byte chunks.
//!
//! ## Design
//!
//! A TCP read returns whatever the kernel has: half a frame, three frames and
//! a fragment, one byte. [`FrameCodec`] buffers fed bytes and yields complete
//! envelopes as they become available. Any error it returns is fatal for the
//! stream - once a length header is corrupt there is no resynchronization
//! point.

use thiserror::Error;

use crate::envelope::Envelope;
use crate::{ENVELOPE_HEADER_SIZE, FRAME_HEADER_SIZE, MAX_FRAME_SIZE};

/// Errors produced while encoding or decoding frames.
///
/// Every variant is fatal for the stream it was observed on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// A frame body larger than the sanity bound.
    #[error("oversized frame: {len} bytes exceeds the {max} byte bound")]
    OversizedFrame {
        /// Declared or actual body length.
        len: usize,
        /// The configured bound.
        max: usize,
    },

    /// A frame body too short to hold an envelope header.
    #[error("malformed frame: body shorter than the envelope header")]
    MalformedFrame,

    /// An unrecognized message kind byte.
    #[error("unknown message kind: {0}")]
    UnknownKind(u8),

    /// A payload that does not decode as its declared kind.
    #[error("malformed {kind} payload")]
    MalformedPayload {
        /// Human-readable kind name.
        kind: &'static str,
    },
}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Incremental decoder over a reliable byte stream.
///
/// Feed it chunks as they arrive, then drain complete envelopes with
/// [`FrameCodec::next_envelope`]. Trailing partial bytes stay buffered for
/// the next chunk.
#[derive(Default)]
pub struct FrameCodec {
    buffer: Vec<u8>,
}

impl FrameCodec {
    /// Creates an empty codec.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(4096),
        }
    }

    /// Appends freshly read bytes to the reassembly buffer.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Returns the number of buffered, not-yet-decoded bytes.
    #[inline]
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Attempts to decode the next complete envelope.
    ///
    /// Returns `Ok(None)` when more bytes are needed.
    ///
    /// # Errors
    ///
    /// Any [`CodecError`] means the stream is corrupt and must be dropped;
    /// the codec's buffer contents are unspecified afterwards.
    pub fn next_envelope(&mut self) -> CodecResult<Option<Envelope>> {
        if self.buffer.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let declared = u32::from_le_bytes([
            self.buffer[0],
            self.buffer[1],
            self.buffer[2],
            self.buffer[3],
        ]) as usize;

        if declared > MAX_FRAME_SIZE {
            return Err(CodecError::OversizedFrame {
                len: declared,
                max: MAX_FRAME_SIZE,
            });
        }
        if declared < ENVELOPE_HEADER_SIZE {
            return Err(CodecError::MalformedFrame);
        }
        if self.buffer.len() < FRAME_HEADER_SIZE + declared {
            return Ok(None);
        }

        let envelope = Envelope::from_body(&self.buffer[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + declared])?;
        self.buffer.drain(..FRAME_HEADER_SIZE + declared);
        Ok(Some(envelope))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{MessageKind, ParticipantId};

    fn sample(kind: MessageKind, sequence: u64, payload: Vec<u8>) -> Envelope {
        Envelope::new(kind, ParticipantId(2), sequence, 12.25, payload)
    }

    #[test]
    fn test_single_frame() {
        let envelope = sample(MessageKind::Join, 1, b"payload".to_vec());
        let frame = envelope.to_frame().unwrap();

        let mut codec = FrameCodec::new();
        codec.feed(&frame);

        assert_eq!(codec.next_envelope().unwrap(), Some(envelope));
        assert_eq!(codec.next_envelope().unwrap(), None);
        assert_eq!(codec.buffered(), 0);
    }

    #[test]
    fn test_concatenated_frames() {
        let first = sample(MessageKind::PlayerState, 1, vec![1; 16]);
        let second = sample(MessageKind::EffectSpawn, 2, vec![2; 8]);

        let mut bytes = first.to_frame().unwrap();
        bytes.extend_from_slice(&second.to_frame().unwrap());

        let mut codec = FrameCodec::new();
        codec.feed(&bytes);

        assert_eq!(codec.next_envelope().unwrap(), Some(first));
        assert_eq!(codec.next_envelope().unwrap(), Some(second));
        assert_eq!(codec.next_envelope().unwrap(), None);
    }

    #[test]
    fn test_arbitrary_chunk_boundaries() {
        let envelopes: Vec<Envelope> = (0..5)
            .map(|i| sample(MessageKind::ProjectileSpawn, i, vec![i as u8; 32]))
            .collect();

        let mut bytes = Vec::new();
        for envelope in &envelopes {
            bytes.extend_from_slice(&envelope.to_frame().unwrap());
        }

        // Feed in every chunk size from single bytes up to jumbo chunks; the
        // decoded stream must be identical each time.
        for chunk_size in [1, 2, 3, 7, 16, 61, 1024] {
            let mut codec = FrameCodec::new();
            let mut decoded = Vec::new();
            for chunk in bytes.chunks(chunk_size) {
                codec.feed(chunk);
                while let Some(envelope) = codec.next_envelope().unwrap() {
                    decoded.push(envelope);
                }
            }
            assert_eq!(decoded, envelopes, "chunk_size {chunk_size}");
        }
    }

    #[test]
    fn test_partial_frame_stays_buffered() {
        let envelope = sample(MessageKind::Leave, 9, vec![0; 64]);
        let frame = envelope.to_frame().unwrap();

        let mut codec = FrameCodec::new();
        codec.feed(&frame[..10]);
        assert_eq!(codec.next_envelope().unwrap(), None);
        assert_eq!(codec.buffered(), 10);

        codec.feed(&frame[10..]);
        assert_eq!(codec.next_envelope().unwrap(), Some(envelope));
    }

    #[test]
    fn test_oversized_header_is_fatal() {
        let mut codec = FrameCodec::new();
        codec.feed(&(u32::MAX).to_le_bytes());
        assert!(matches!(
            codec.next_envelope(),
            Err(CodecError::OversizedFrame { .. })
        ));
    }

    #[test]
    fn test_undersized_header_is_fatal() {
        let mut codec = FrameCodec::new();
        codec.feed(&2u32.to_le_bytes());
        codec.feed(&[0, 0]);
        assert!(matches!(
            codec.next_envelope(),
            Err(CodecError::MalformedFrame)
        ));
    }
}
