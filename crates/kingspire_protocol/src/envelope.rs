//! # Envelope Definitions
//!
//! The typed, sequenced, timestamped message unit exchanged between
//! participants. Every byte on the wire belongs to exactly one envelope.

use crate::codec::CodecError;
use crate::wire::{FrameReader, FrameWriter};
use crate::{ENVELOPE_HEADER_SIZE, FRAME_HEADER_SIZE, MAX_FRAME_SIZE};

/// Stable identifier for one connected player slot.
///
/// Assigned once by the host's session registry from a monotonic counter and
/// never reused within a session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ParticipantId(pub u32);

impl ParticipantId {
    /// Sentinel used by a joiner before the host has assigned it an id.
    pub const UNASSIGNED: Self = Self(0);

    /// Returns true if this id is the pre-assignment sentinel.
    #[inline]
    #[must_use]
    pub const fn is_unassigned(self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Kinds of messages in the protocol.
///
/// This is a closed set: an unknown kind byte on the wire is stream
/// corruption, not a forward-compatibility case.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    /// Joiner -> Host: join request; Host -> Joiners: roster entry.
    Join = 0,
    /// Bidirectional: a participant left (or was evicted / rejected).
    Leave = 1,
    /// Bidirectional: a participant's ready flag changed.
    ReadyState = 2,
    /// Bidirectional: a participant's character selection changed.
    CharacterSelect = 3,
    /// Bidirectional: owner-authoritative avatar state.
    PlayerState = 4,
    /// Bidirectional: a projectile was fired.
    ProjectileSpawn = 5,
    /// Bidirectional: a transient visual effect was spawned.
    EffectSpawn = 6,
    /// Host -> Joiners only: authoritative enemy state.
    EnemyState = 7,
    /// Bidirectional: keep-alive, consumed by the connection layer.
    Heartbeat = 8,
    /// Bidirectional: keep-alive response, consumed by the connection layer.
    HeartbeatAck = 9,
    /// Host -> Joiners: the match is starting.
    GameStart = 10,
}

impl MessageKind {
    /// Decodes a kind byte.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Join),
            1 => Some(Self::Leave),
            2 => Some(Self::ReadyState),
            3 => Some(Self::CharacterSelect),
            4 => Some(Self::PlayerState),
            5 => Some(Self::ProjectileSpawn),
            6 => Some(Self::EffectSpawn),
            7 => Some(Self::EnemyState),
            8 => Some(Self::Heartbeat),
            9 => Some(Self::HeartbeatAck),
            10 => Some(Self::GameStart),
            _ => None,
        }
    }

    /// Returns true for keep-alive traffic that never leaves the connection
    /// layer.
    #[inline]
    #[must_use]
    pub const fn is_keepalive(self) -> bool {
        matches!(self, Self::Heartbeat | Self::HeartbeatAck)
    }
}

/// A typed, sequenced, timestamped message unit.
///
/// `sequence` is a per-sender monotonically increasing counter. Under the
/// reliable ordered transport it is not needed for ordering; receivers use it
/// to discard stale or superseded state snapshots, and must tolerate gaps.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    /// Message kind, selecting the payload encoding.
    pub kind: MessageKind,
    /// Identity of the original sender (not the relaying host).
    pub sender: ParticipantId,
    /// Per-sender monotonic counter.
    pub sequence: u64,
    /// Sender wall-clock seconds at send time.
    pub timestamp: f64,
    /// Kind-specific payload bytes.
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Creates an envelope from already-encoded payload bytes.
    #[must_use]
    pub fn new(
        kind: MessageKind,
        sender: ParticipantId,
        sequence: u64,
        timestamp: f64,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            kind,
            sender,
            sequence,
            timestamp,
            payload,
        }
    }

    /// Encodes this envelope as one length-prefixed frame.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::OversizedFrame`] if the body would exceed the
    /// frame sanity bound.
    pub fn to_frame(&self) -> Result<Vec<u8>, CodecError> {
        let body_len = ENVELOPE_HEADER_SIZE + self.payload.len();
        if body_len > MAX_FRAME_SIZE {
            return Err(CodecError::OversizedFrame {
                len: body_len,
                max: MAX_FRAME_SIZE,
            });
        }

        let mut writer = FrameWriter::new();
        let ok = writer.write_u8(self.kind as u8)
            && writer.write_u32(self.sender.0)
            && writer.write_u64(self.sequence)
            && writer.write_f64(self.timestamp)
            && writer.write_bytes(&self.payload);
        debug_assert!(ok, "frame body length was checked above");
        let body = writer.into_bytes();
        debug_assert_eq!(body.len(), body_len);

        let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + body.len());
        frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
        frame.extend_from_slice(&body);
        Ok(frame)
    }

    /// Decodes an envelope from a complete frame body (length header already
    /// stripped).
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnknownKind`] for an unrecognized kind byte and
    /// [`CodecError::MalformedFrame`] for a body shorter than the envelope
    /// header.
    pub fn from_body(body: &[u8]) -> Result<Self, CodecError> {
        let mut reader = FrameReader::new(body);

        let kind_byte = reader.read_u8().ok_or(CodecError::MalformedFrame)?;
        let kind = MessageKind::from_u8(kind_byte).ok_or(CodecError::UnknownKind(kind_byte))?;
        let sender = ParticipantId(reader.read_u32().ok_or(CodecError::MalformedFrame)?);
        let sequence = reader.read_u64().ok_or(CodecError::MalformedFrame)?;
        let timestamp = reader.read_f64().ok_or(CodecError::MalformedFrame)?;
        let payload = reader.take_rest().to_vec();

        Ok(Self {
            kind,
            sender,
            sequence,
            timestamp,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trip() {
        for byte in 0..=10u8 {
            let kind = MessageKind::from_u8(byte).unwrap();
            assert_eq!(kind as u8, byte);
        }
        assert_eq!(MessageKind::from_u8(11), None);
        assert_eq!(MessageKind::from_u8(255), None);
    }

    #[test]
    fn test_keepalive_kinds() {
        assert!(MessageKind::Heartbeat.is_keepalive());
        assert!(MessageKind::HeartbeatAck.is_keepalive());
        assert!(!MessageKind::PlayerState.is_keepalive());
    }

    #[test]
    fn test_envelope_frame_round_trip() {
        let envelope = Envelope::new(
            MessageKind::PlayerState,
            ParticipantId(3),
            42,
            1_700_000_000.5,
            vec![1, 2, 3, 4],
        );

        let frame = envelope.to_frame().unwrap();
        let body = &frame[FRAME_HEADER_SIZE..];
        let decoded = Envelope::from_body(body).unwrap();

        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let envelope = Envelope::new(
            MessageKind::EffectSpawn,
            ParticipantId(1),
            0,
            0.0,
            vec![0u8; MAX_FRAME_SIZE],
        );
        assert!(matches!(
            envelope.to_frame(),
            Err(CodecError::OversizedFrame { .. })
        ));
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let envelope = Envelope::new(MessageKind::Join, ParticipantId(1), 0, 0.0, Vec::new());
        let frame = envelope.to_frame().unwrap();
        let mut body = frame[FRAME_HEADER_SIZE..].to_vec();
        body[0] = 200;
        assert!(matches!(
            Envelope::from_body(&body),
            Err(CodecError::UnknownKind(200))
        ));
    }
}
