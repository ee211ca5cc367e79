//! # Payload Definitions
//!
//! Kind-specific payload encodings carried inside envelopes.
//!
//! ## Design
//!
//! Game-state payloads are `Copy` fixed-size structs serialized as direct
//! memory copies. Lobby payloads carry strings and are encoded field by
//! field. Either way a payload decodes from the envelope's payload bytes and
//! nothing else - the codec never looks inside.

use bytemuck::{Pod, Zeroable};

use crate::codec::{CodecError, CodecResult};
use crate::envelope::ParticipantId;
use crate::math::Vec2;
use crate::wire::{FrameReader, FrameWriter};

fn malformed(kind: &'static str) -> CodecError {
    CodecError::MalformedPayload { kind }
}

// ============================================================================
// GAME-STATE PAYLOADS (fixed-size, owner-authoritative)
// ============================================================================

/// Owner-qualified projectile identifier.
///
/// The owner's participant id lives in the high 32 bits and a per-owner
/// counter in the low 32 bits, so ids never collide across senders.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct ProjectileId(pub u64);

impl ProjectileId {
    /// Composes an id from its owner and the owner's local counter.
    #[inline]
    #[must_use]
    pub const fn new(owner: ParticipantId, index: u32) -> Self {
        Self(((owner.0 as u64) << 32) | index as u64)
    }

    /// The owning participant.
    #[inline]
    #[must_use]
    pub const fn owner(self) -> ParticipantId {
        ParticipantId((self.0 >> 32) as u32)
    }

    /// The owner-local counter.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0 as u32
    }
}

/// Owner-qualified effect identifier, packed like [`ProjectileId`].
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct EffectId(pub u64);

impl EffectId {
    /// Composes an id from its owner and the owner's local counter.
    #[inline]
    #[must_use]
    pub const fn new(owner: ParticipantId, index: u32) -> Self {
        Self(((owner.0 as u64) << 32) | index as u64)
    }

    /// The owning participant.
    #[inline]
    #[must_use]
    pub const fn owner(self) -> ParticipantId {
        ParticipantId((self.0 >> 32) as u32)
    }
}

/// Owner-authoritative avatar state.
///
/// Size: 28 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct PlayerState {
    /// World position.
    pub position: Vec2,
    /// Velocity (world units per second).
    pub velocity: Vec2,
    /// Facing angle in radians.
    pub aim: f32,
    /// Active weapon id.
    pub weapon_id: u16,
    /// Current health.
    pub health: u16,
    /// Maximum health.
    pub max_health: u16,
    /// State flags.
    pub flags: u8,
    /// Padding for alignment.
    pub _pad: u8,
}

impl PlayerState {
    /// Size in bytes.
    pub const SIZE: usize = 28;

    /// Flag: avatar is alive.
    pub const FLAG_ALIVE: u8 = 1 << 0;
    /// Flag: avatar is mid-dash.
    pub const FLAG_DASHING: u8 = 1 << 1;

    /// Creates a live, stationary avatar state.
    #[must_use]
    pub const fn new(position: Vec2, health: u16, max_health: u16) -> Self {
        Self {
            position,
            velocity: Vec2::ZERO,
            aim: 0.0,
            weapon_id: 0,
            health,
            max_health,
            flags: Self::FLAG_ALIVE,
            _pad: 0,
        }
    }

    /// Returns true if the alive flag is set.
    #[inline]
    #[must_use]
    pub const fn is_alive(&self) -> bool {
        self.flags & Self::FLAG_ALIVE != 0
    }

    /// Returns true if the dash flag is set.
    #[inline]
    #[must_use]
    pub const fn is_dashing(&self) -> bool {
        self.flags & Self::FLAG_DASHING != 0
    }

    /// Encodes into payload bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut writer = FrameWriter::new();
        let ok = writer.write_pod(self);
        debug_assert!(ok);
        writer.into_bytes()
    }

    /// Decodes from payload bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::MalformedPayload`] on a truncated body.
    pub fn from_bytes(bytes: &[u8]) -> CodecResult<Self> {
        FrameReader::new(bytes)
            .read_pod()
            .ok_or_else(|| malformed("PlayerState"))
    }
}

/// A projectile fired by its owner.
///
/// Size: 32 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ProjectileSpawn {
    /// Owner-qualified projectile id.
    pub projectile_id: ProjectileId,
    /// Spawn position.
    pub origin: Vec2,
    /// Normalized travel direction.
    pub direction: Vec2,
    /// Travel speed (world units per second).
    pub speed: f32,
    /// Weapon that fired it.
    pub weapon_id: u16,
    /// Padding for alignment.
    pub _pad: [u8; 2],
}

impl ProjectileSpawn {
    /// Size in bytes.
    pub const SIZE: usize = 32;

    /// Encodes into payload bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut writer = FrameWriter::new();
        let ok = writer.write_pod(self);
        debug_assert!(ok);
        writer.into_bytes()
    }

    /// Decodes from payload bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::MalformedPayload`] on a truncated body.
    pub fn from_bytes(bytes: &[u8]) -> CodecResult<Self> {
        FrameReader::new(bytes)
            .read_pod()
            .ok_or_else(|| malformed("ProjectileSpawn"))
    }
}

/// Transient visual effect kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum EffectKind {
    /// Explosion at a point. Params: radius, damage.
    Explosion = 0,
    /// Muzzle flash. Params: angle, weapon id.
    MuzzleFlash = 1,
    /// Dash trail. Params: end position x, end position y.
    DashTrail = 2,
    /// Projectile impact.
    Impact = 3,
}

impl EffectKind {
    /// Decodes an effect kind byte.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Explosion),
            1 => Some(Self::MuzzleFlash),
            2 => Some(Self::DashTrail),
            3 => Some(Self::Impact),
            _ => None,
        }
    }
}

/// A transient visual effect spawned by its owner.
///
/// Size: 40 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct EffectSpawn {
    /// Owner-qualified effect id.
    pub effect_id: EffectId,
    /// World position.
    pub position: Vec2,
    /// Kind-specific numeric parameters.
    pub params: [f32; 4],
    /// Effect kind byte (see [`EffectKind`]).
    pub kind: u8,
    /// Padding for alignment.
    pub _pad: [u8; 7],
}

impl EffectSpawn {
    /// Size in bytes.
    pub const SIZE: usize = 40;

    /// Creates an effect of the given kind.
    #[must_use]
    pub fn new(effect_id: EffectId, kind: EffectKind, position: Vec2, params: [f32; 4]) -> Self {
        Self {
            effect_id,
            position,
            params,
            kind: kind as u8,
            _pad: [0; 7],
        }
    }

    /// Returns the decoded effect kind.
    #[inline]
    #[must_use]
    pub const fn effect_kind(&self) -> Option<EffectKind> {
        EffectKind::from_u8(self.kind)
    }

    /// Encodes into payload bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut writer = FrameWriter::new();
        let ok = writer.write_pod(self);
        debug_assert!(ok);
        writer.into_bytes()
    }

    /// Decodes from payload bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::MalformedPayload`] on a truncated body or an
    /// unknown effect kind byte.
    pub fn from_bytes(bytes: &[u8]) -> CodecResult<Self> {
        let spawn: Self = FrameReader::new(bytes)
            .read_pod()
            .ok_or_else(|| malformed("EffectSpawn"))?;
        if spawn.effect_kind().is_none() {
            return Err(malformed("EffectSpawn"));
        }
        Ok(spawn)
    }
}

/// Host-authoritative enemy state.
///
/// `alive = false` is the enemy's removal broadcast; mirrors drop the entry.
///
/// Size: 20 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct EnemyState {
    /// Host-assigned enemy id.
    pub enemy_id: u32,
    /// World position.
    pub position: Vec2,
    /// Current health.
    pub health: u16,
    /// Maximum health.
    pub max_health: u16,
    /// State flags.
    pub flags: u8,
    /// Padding for alignment.
    pub _pad: [u8; 3],
}

impl EnemyState {
    /// Size in bytes.
    pub const SIZE: usize = 20;

    /// Flag: enemy is alive.
    pub const FLAG_ALIVE: u8 = 1 << 0;

    /// Returns true if the alive flag is set.
    #[inline]
    #[must_use]
    pub const fn is_alive(&self) -> bool {
        self.flags & Self::FLAG_ALIVE != 0
    }

    /// Encodes into payload bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut writer = FrameWriter::new();
        let ok = writer.write_pod(self);
        debug_assert!(ok);
        writer.into_bytes()
    }

    /// Decodes from payload bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::MalformedPayload`] on a truncated body.
    pub fn from_bytes(bytes: &[u8]) -> CodecResult<Self> {
        FrameReader::new(bytes)
            .read_pod()
            .ok_or_else(|| malformed("EnemyState"))
    }
}

// ============================================================================
// LOBBY PAYLOADS (variable-size)
// ============================================================================

/// Wire snapshot of one participant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParticipantProfile {
    /// Stable participant id ([`ParticipantId::UNASSIGNED`] in a join
    /// request, assigned in every host-sent profile).
    pub id: ParticipantId,
    /// Display name chosen by the player.
    pub display_name: String,
    /// Selected character, if any yet.
    pub character: Option<String>,
    /// Ready flag.
    pub ready: bool,
    /// True for the room's host.
    pub is_host: bool,
}

impl ParticipantProfile {
    /// Creates the profile a joiner sends before it has an id.
    #[must_use]
    pub fn join_request(display_name: impl Into<String>) -> Self {
        Self {
            id: ParticipantId::UNASSIGNED,
            display_name: display_name.into(),
            character: None,
            ready: false,
            is_host: false,
        }
    }

    fn encode(&self, writer: &mut FrameWriter) -> bool {
        let mut ok = writer.write_u32(self.id.0) && writer.write_str(&self.display_name);
        ok = ok
            && match &self.character {
                Some(character) => writer.write_u8(1) && writer.write_str(character),
                None => writer.write_u8(0),
            };
        ok && writer.write_u8(u8::from(self.ready)) && writer.write_u8(u8::from(self.is_host))
    }

    fn decode(reader: &mut FrameReader<'_>) -> Option<Self> {
        // Field order on the wire: id, name, character, ready, is_host.
        let id = ParticipantId(reader.read_u32()?);
        let display_name = reader.read_str()?;
        let character = if reader.read_u8()? != 0 {
            Some(reader.read_str()?)
        } else {
            None
        };
        let ready = reader.read_u8()? != 0;
        let is_host = reader.read_u8()? != 0;
        Some(Self {
            id,
            display_name,
            character,
            ready,
            is_host,
        })
    }
}

/// Room metadata carried on the assignment roster entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoomInfo {
    /// Host-chosen room id.
    pub room_id: u32,
    /// Maximum participant count.
    pub max_players: u8,
    /// Game mode label.
    pub game_mode: String,
    /// Map label.
    pub map_name: String,
}

impl RoomInfo {
    fn encode(&self, writer: &mut FrameWriter) -> bool {
        writer.write_u32(self.room_id)
            && writer.write_u8(self.max_players)
            && writer.write_str(&self.game_mode)
            && writer.write_str(&self.map_name)
    }

    fn decode(reader: &mut FrameReader<'_>) -> Option<Self> {
        Some(Self {
            room_id: reader.read_u32()?,
            max_players: reader.read_u8()?,
            game_mode: reader.read_str()?,
            map_name: reader.read_str()?,
        })
    }
}

/// Payload of a `Join` envelope.
///
/// A joiner sends a bare request profile. The host answers with one roster
/// entry per participant; exactly one of them has `assigned = true` and
/// carries the room metadata, telling the receiver "this entry is you".
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JoinPayload {
    /// The participant this entry describes.
    pub profile: ParticipantProfile,
    /// True when the entry describes the receiving joiner itself.
    pub assigned: bool,
    /// Room metadata, present only on the assignment entry.
    pub room: Option<RoomInfo>,
}

impl JoinPayload {
    /// Wraps a profile as a plain (non-assignment) roster entry.
    #[must_use]
    pub fn roster_entry(profile: ParticipantProfile) -> Self {
        Self {
            profile,
            assigned: false,
            room: None,
        }
    }

    /// Encodes into payload bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut writer = FrameWriter::new();
        let mut ok = self.profile.encode(&mut writer) && writer.write_u8(u8::from(self.assigned));
        ok = ok
            && match &self.room {
                Some(room) => writer.write_u8(1) && room.encode(&mut writer),
                None => writer.write_u8(0),
            };
        debug_assert!(ok, "lobby payloads are far below the frame bound");
        writer.into_bytes()
    }

    /// Decodes from payload bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::MalformedPayload`] on truncation or bad UTF-8.
    pub fn from_bytes(bytes: &[u8]) -> CodecResult<Self> {
        let mut reader = FrameReader::new(bytes);
        Self::decode(&mut reader).ok_or_else(|| malformed("Join"))
    }

    fn decode(reader: &mut FrameReader<'_>) -> Option<Self> {
        let profile = ParticipantProfile::decode(reader)?;
        let assigned = reader.read_u8()? != 0;
        let room = if reader.read_u8()? != 0 {
            Some(RoomInfo::decode(reader)?)
        } else {
            None
        };
        Some(Self {
            profile,
            assigned,
            room,
        })
    }
}

/// Why a participant left (or never entered) the room.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum LeaveReason {
    /// Voluntary departure.
    Quit = 0,
    /// Evicted after heartbeat timeout.
    TimedOut = 1,
    /// Join rejected: the room was full.
    RoomFull = 2,
    /// The room was torn down.
    RoomClosed = 3,
}

impl LeaveReason {
    /// Decodes a reason byte.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Quit),
            1 => Some(Self::TimedOut),
            2 => Some(Self::RoomFull),
            3 => Some(Self::RoomClosed),
            _ => None,
        }
    }
}

/// Payload of a `Leave` envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LeavePayload {
    /// The departing participant (or the rejected joiner's sentinel id).
    pub id: ParticipantId,
    /// Why they left.
    pub reason: LeaveReason,
}

impl LeavePayload {
    /// Encodes into payload bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut writer = FrameWriter::new();
        let ok = writer.write_u32(self.id.0) && writer.write_u8(self.reason as u8);
        debug_assert!(ok);
        writer.into_bytes()
    }

    /// Decodes from payload bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::MalformedPayload`] on truncation or an unknown
    /// reason byte.
    pub fn from_bytes(bytes: &[u8]) -> CodecResult<Self> {
        let mut reader = FrameReader::new(bytes);
        let id = ParticipantId(reader.read_u32().ok_or_else(|| malformed("Leave"))?);
        let reason_byte = reader.read_u8().ok_or_else(|| malformed("Leave"))?;
        let reason = LeaveReason::from_u8(reason_byte).ok_or_else(|| malformed("Leave"))?;
        Ok(Self { id, reason })
    }
}

/// Payload of a `ReadyState` envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadyPayload {
    /// The new ready flag.
    pub ready: bool,
}

impl ReadyPayload {
    /// Encodes into payload bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        vec![u8::from(self.ready)]
    }

    /// Decodes from payload bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::MalformedPayload`] on an empty body.
    pub fn from_bytes(bytes: &[u8]) -> CodecResult<Self> {
        let mut reader = FrameReader::new(bytes);
        let ready = reader.read_u8().ok_or_else(|| malformed("ReadyState"))? != 0;
        Ok(Self { ready })
    }
}

/// Payload of a `CharacterSelect` envelope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CharacterPayload {
    /// Selected character id.
    pub character: String,
}

impl CharacterPayload {
    /// Encodes into payload bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut writer = FrameWriter::new();
        let ok = writer.write_str(&self.character);
        debug_assert!(ok);
        writer.into_bytes()
    }

    /// Decodes from payload bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::MalformedPayload`] on truncation or bad UTF-8.
    pub fn from_bytes(bytes: &[u8]) -> CodecResult<Self> {
        let mut reader = FrameReader::new(bytes);
        let character = reader.read_str().ok_or_else(|| malformed("CharacterSelect"))?;
        Ok(Self { character })
    }
}

/// Payload of a `GameStart` envelope.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GameStartPayload {
    /// Milliseconds until the simulation begins.
    pub countdown_ms: u32,
}

impl GameStartPayload {
    /// Encodes into payload bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.countdown_ms.to_le_bytes().to_vec()
    }

    /// Decodes from payload bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::MalformedPayload`] on a truncated body.
    pub fn from_bytes(bytes: &[u8]) -> CodecResult<Self> {
        let mut reader = FrameReader::new(bytes);
        let countdown_ms = reader.read_u32().ok_or_else(|| malformed("GameStart"))?;
        Ok(Self { countdown_ms })
    }
}
