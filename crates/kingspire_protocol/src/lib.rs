//! # KINGSPIRE Protocol - The Spire Wire Format
//!
//! Shared wire types for KINGSPIRE multiplayer: typed envelopes, kind-specific
//! payloads, and length-prefixed framing over a reliable byte stream.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   encode    ┌──────────────────────────┐
//! │  Envelope  │ ──────────> │ [len u32][kind][sender]  │
//! │ kind       │             │ [sequence][timestamp]    │
//! │ sender     │ <────────── │ [payload bytes...]       │
//! │ sequence   │   decode    └──────────────────────────┘
//! │ timestamp  │                        │
//! │ payload    │             arbitrary chunk boundaries
//! └────────────┘             reassembled by FrameCodec
//! ```
//!
//! ## Framing Contract
//!
//! - Every frame is a fixed-width little-endian `u32` length header followed
//!   by exactly that many body bytes.
//! - [`FrameCodec`] accepts arbitrary byte chunks (partial frames, several
//!   frames glued together) and yields complete envelopes, buffering any
//!   trailing partial bytes for the next chunk.
//! - A corrupt length header or an oversized frame is fatal for the stream:
//!   there is no way to resynchronize a corrupted byte stream, so the owning
//!   connection must drop it.
//!
//! The codec never interprets payload bytes beyond the kind byte. Payload
//! semantics live in [`payload`].

pub mod codec;
pub mod envelope;
pub mod math;
pub mod payload;
pub mod wire;

// Re-exports for convenience
pub use codec::{CodecError, CodecResult, FrameCodec};
pub use envelope::{Envelope, MessageKind, ParticipantId};
pub use math::Vec2;
pub use payload::{
    CharacterPayload, EffectId, EffectKind, EffectSpawn, EnemyState, GameStartPayload,
    JoinPayload, LeavePayload, LeaveReason, ParticipantProfile, PlayerState, ProjectileId,
    ProjectileSpawn, ReadyPayload, RoomInfo,
};
pub use wire::{FrameReader, FrameWriter};

/// Upper bound on a frame body, in bytes.
///
/// A length header larger than this is treated as stream corruption, not as a
/// legitimately huge message. 64 KiB is far above anything the protocol
/// produces (the largest real payload is a lobby roster of 4 profiles).
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Size of the length header that precedes every frame body.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Size of the envelope header inside the frame body:
/// kind (1) + sender (4) + sequence (8) + timestamp (8).
pub const ENVELOPE_HEADER_SIZE: usize = 21;
