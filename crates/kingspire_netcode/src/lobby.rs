//! # Lobby State Machine
//!
//! Pre-game coordination: the room, its participants, character selection,
//! ready flags, and the start handshake.
//!
//! ## Phases
//!
//! ```text
//! OPEN ──(everyone ready + character)──> ALL_READY ──(host)──> STARTING
//!   ▲                                        │                     │
//!   └──(un-ready / leave breaks predicate)───┘      (leave aborts) │
//!   ▲                                                              ▼
//!   └───────────────────(abort)──────────────────────────── IN_GAME
//!
//! any phase ──(host disconnect / teardown)──> CLOSED
//! ```
//!
//! The same machine runs on the host (authoritative) and on every joiner
//! (a read-mostly mirror driven by relayed lobby messages), so both sides
//! take identical transitions from identical inputs.

use kingspire_protocol::{ParticipantId, ParticipantProfile, RoomInfo};

use crate::error::{LobbyError, LobbyResult};

/// Lifecycle phase of a room.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoomPhase {
    /// Accepting joins; participants are selecting and readying.
    Open,
    /// Every participant is ready with a character selected.
    AllReady,
    /// The host has issued the start signal; no further join or character
    /// changes are accepted.
    Starting,
    /// Gameplay is live; room membership still tracks departures.
    InGame,
    /// Torn down. Terminal.
    Closed,
}

/// One connected player slot, pre- or in-game.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Participant {
    /// Stable id assigned by the session registry.
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

impl Participant {
    /// Builds a participant from a wire profile.
    #[must_use]
    pub fn from_profile(profile: ParticipantProfile) -> Self {
        Self {
            id: profile.id,
            display_name: profile.display_name,
            character: profile.character,
            ready: profile.ready,
            is_host: profile.is_host,
        }
    }

    /// Snapshot as a wire profile.
    #[must_use]
    pub fn profile(&self) -> ParticipantProfile {
        ParticipantProfile {
            id: self.id,
            display_name: self.display_name.clone(),
            character: self.character.clone(),
            ready: self.ready,
            is_host: self.is_host,
        }
    }

    /// True when a non-empty character is selected.
    #[must_use]
    pub fn has_character(&self) -> bool {
        self.character.as_deref().is_some_and(|c| !c.is_empty())
    }
}

/// The room: participant roster plus phase.
///
/// Owned by the host process; joiners hold a mirror updated by incoming
/// lobby messages. Participants keep join order.
#[derive(Clone, Debug)]
pub struct Room {
    room_id: u32,
    host_id: ParticipantId,
    max_players: u8,
    phase: RoomPhase,
    participants: Vec<Participant>,
    game_mode: String,
    map_name: String,
}

impl Room {
    /// Creates a hosted room containing only the host participant.
    #[must_use]
    pub fn host(info: RoomInfo, host: Participant) -> Self {
        let host_id = host.id;
        Self {
            room_id: info.room_id,
            host_id,
            max_players: info.max_players,
            phase: RoomPhase::Open,
            participants: vec![host],
            game_mode: info.game_mode,
            map_name: info.map_name,
        }
    }

    /// Creates an empty joiner-side mirror from received room metadata.
    ///
    /// The host id is learned from the roster entry flagged `is_host`.
    #[must_use]
    pub fn mirror(info: &RoomInfo) -> Self {
        Self {
            room_id: info.room_id,
            host_id: ParticipantId::UNASSIGNED,
            max_players: info.max_players,
            phase: RoomPhase::Open,
            participants: Vec::new(),
            game_mode: info.game_mode.clone(),
            map_name: info.map_name.clone(),
        }
    }

    /// The host-chosen room id.
    #[inline]
    #[must_use]
    pub const fn room_id(&self) -> u32 {
        self.room_id
    }

    /// The hosting participant's id.
    #[inline]
    #[must_use]
    pub const fn host_id(&self) -> ParticipantId {
        self.host_id
    }

    /// Maximum participants, host included.
    #[inline]
    #[must_use]
    pub const fn max_players(&self) -> u8 {
        self.max_players
    }

    /// Current phase.
    #[inline]
    #[must_use]
    pub const fn phase(&self) -> RoomPhase {
        self.phase
    }

    /// Participants in join order.
    #[must_use]
    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    /// Looks up a participant.
    #[must_use]
    pub fn participant(&self, id: ParticipantId) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }

    /// True when the roster is at capacity.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.participants.len() >= usize::from(self.max_players)
    }

    /// Wire metadata snapshot.
    #[must_use]
    pub fn info(&self) -> RoomInfo {
        RoomInfo {
            room_id: self.room_id,
            max_players: self.max_players,
            game_mode: self.game_mode.clone(),
            map_name: self.map_name.clone(),
        }
    }

    /// Appends a participant.
    ///
    /// # Errors
    ///
    /// [`LobbyError::RoomFull`] at capacity (the room is untouched),
    /// [`LobbyError::InvalidStateTransition`] once the room has left the
    /// pre-game phases, [`LobbyError::DuplicateParticipant`] on an id
    /// collision.
    pub fn add_participant(&mut self, participant: Participant) -> LobbyResult<()> {
        match self.phase {
            RoomPhase::Open | RoomPhase::AllReady => {}
            phase => {
                return Err(LobbyError::InvalidStateTransition {
                    action: "join",
                    phase,
                })
            }
        }
        if self.is_full() {
            return Err(LobbyError::RoomFull {
                max: self.max_players,
            });
        }
        if self.participant(participant.id).is_some() {
            return Err(LobbyError::DuplicateParticipant(participant.id));
        }

        if participant.is_host {
            self.host_id = participant.id;
        }
        self.participants.push(participant);
        self.reevaluate();
        Ok(())
    }

    /// Removes a participant, returning it.
    ///
    /// A removal during `Starting` aborts the start and returns the room to
    /// `Open` before readiness is re-evaluated.
    pub fn remove_participant(&mut self, id: ParticipantId) -> Option<Participant> {
        let index = self.participants.iter().position(|p| p.id == id)?;
        let removed = self.participants.remove(index);

        if self.phase == RoomPhase::Starting {
            self.phase = RoomPhase::Open;
        }
        self.reevaluate();
        Some(removed)
    }

    /// Sets a participant's ready flag.
    ///
    /// # Errors
    ///
    /// [`LobbyError::InvalidStateTransition`] outside the pre-game phases,
    /// [`LobbyError::UnknownParticipant`] for an id not in the room.
    pub fn set_ready(&mut self, id: ParticipantId, ready: bool) -> LobbyResult<()> {
        match self.phase {
            RoomPhase::Open | RoomPhase::AllReady => {}
            phase => {
                return Err(LobbyError::InvalidStateTransition {
                    action: "change readiness",
                    phase,
                })
            }
        }
        let participant = self
            .participants
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or(LobbyError::UnknownParticipant(id))?;
        participant.ready = ready;
        self.reevaluate();
        Ok(())
    }

    /// Sets a participant's character selection.
    ///
    /// # Errors
    ///
    /// [`LobbyError::InvalidStateTransition`] outside the pre-game phases,
    /// [`LobbyError::UnknownParticipant`] for an id not in the room.
    pub fn set_character(&mut self, id: ParticipantId, character: String) -> LobbyResult<()> {
        match self.phase {
            RoomPhase::Open | RoomPhase::AllReady => {}
            phase => {
                return Err(LobbyError::InvalidStateTransition {
                    action: "select character",
                    phase,
                })
            }
        }
        let participant = self
            .participants
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or(LobbyError::UnknownParticipant(id))?;
        participant.character = Some(character);
        self.reevaluate();
        Ok(())
    }

    /// Host-initiated transition into `Starting`.
    ///
    /// # Errors
    ///
    /// [`LobbyError::InvalidStateTransition`] unless the requester is the
    /// host and the room is `AllReady`.
    pub fn begin_start(&mut self, requester: ParticipantId) -> LobbyResult<()> {
        if requester != self.host_id || self.phase != RoomPhase::AllReady {
            return Err(LobbyError::InvalidStateTransition {
                action: "start the game",
                phase: self.phase,
            });
        }
        self.phase = RoomPhase::Starting;
        Ok(())
    }

    /// Completes a start: `Starting` becomes `InGame`.
    ///
    /// # Errors
    ///
    /// [`LobbyError::InvalidStateTransition`] if the start was aborted (the
    /// room is no longer `Starting`).
    pub fn complete_start(&mut self) -> LobbyResult<()> {
        if self.phase != RoomPhase::Starting {
            return Err(LobbyError::InvalidStateTransition {
                action: "complete the start",
                phase: self.phase,
            });
        }
        self.phase = RoomPhase::InGame;
        Ok(())
    }

    /// Mirror-side transition into `Starting` on receipt of the host's
    /// start signal, tolerant of a mirror that lags behind `AllReady`.
    pub fn mark_starting(&mut self) {
        if matches!(self.phase, RoomPhase::Open | RoomPhase::AllReady) {
            self.phase = RoomPhase::Starting;
        }
    }

    /// Tears the room down. Terminal and idempotent.
    pub fn close(&mut self) {
        self.phase = RoomPhase::Closed;
    }

    /// The readiness predicate: a non-empty roster where every participant
    /// is ready with a non-empty character selection.
    #[must_use]
    pub fn all_ready(&self) -> bool {
        !self.participants.is_empty()
            && self
                .participants
                .iter()
                .all(|p| p.ready && p.has_character())
    }

    /// Automatic `Open` <-> `AllReady` transitions after any mutation.
    fn reevaluate(&mut self) {
        match self.phase {
            RoomPhase::Open if self.all_ready() => self.phase = RoomPhase::AllReady,
            RoomPhase::AllReady if !self.all_ready() => self.phase = RoomPhase::Open,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host_participant() -> Participant {
        Participant {
            id: ParticipantId(1),
            display_name: "Host".to_string(),
            character: None,
            ready: false,
            is_host: true,
        }
    }

    fn joiner(id: u32, name: &str) -> Participant {
        Participant {
            id: ParticipantId(id),
            display_name: name.to_string(),
            character: None,
            ready: false,
            is_host: false,
        }
    }

    fn two_player_room() -> Room {
        let info = RoomInfo {
            room_id: 7,
            max_players: 2,
            game_mode: "Survival".to_string(),
            map_name: "Field-Large".to_string(),
        };
        Room::host(info, host_participant())
    }

    fn ready_up(room: &mut Room, id: ParticipantId, character: &str) {
        room.set_character(id, character.to_string()).unwrap();
        room.set_ready(id, true).unwrap();
    }

    #[test]
    fn test_join_at_capacity_rejected_without_mutation() {
        let mut room = two_player_room();
        room.add_participant(joiner(2, "Kilo")).unwrap();

        let before = room.participants().to_vec();
        let result = room.add_participant(joiner(3, "Marian"));
        assert_eq!(result, Err(LobbyError::RoomFull { max: 2 }));
        assert_eq!(room.participants(), &before[..], "room must be untouched");
        assert_eq!(room.phase(), RoomPhase::Open);
    }

    #[test]
    fn test_all_ready_iff_predicate_holds() {
        let mut room = two_player_room();
        room.add_participant(joiner(2, "Kilo")).unwrap();

        // Ready without a character does not satisfy the predicate.
        room.set_ready(ParticipantId(1), true).unwrap();
        room.set_ready(ParticipantId(2), true).unwrap();
        assert_eq!(room.phase(), RoomPhase::Open);

        room.set_character(ParticipantId(1), "Cecil".to_string())
            .unwrap();
        assert_eq!(room.phase(), RoomPhase::Open);

        room.set_character(ParticipantId(2), "Scarlet".to_string())
            .unwrap();
        assert_eq!(room.phase(), RoomPhase::AllReady);

        // A single un-ready flip returns the room to Open.
        room.set_ready(ParticipantId(2), false).unwrap();
        assert_eq!(room.phase(), RoomPhase::Open);
    }

    #[test]
    fn test_empty_character_does_not_count() {
        let mut room = two_player_room();
        ready_up(&mut room, ParticipantId(1), "Cecil");
        room.add_participant(joiner(2, "Kilo")).unwrap();
        room.set_character(ParticipantId(2), String::new()).unwrap();
        room.set_ready(ParticipantId(2), true).unwrap();
        assert_eq!(room.phase(), RoomPhase::Open);
    }

    #[test]
    fn test_leave_breaks_all_ready() {
        let mut room = two_player_room();
        ready_up(&mut room, ParticipantId(1), "Cecil");
        room.add_participant(joiner(2, "Kilo")).unwrap();
        ready_up(&mut room, ParticipantId(2), "Scarlet");
        assert_eq!(room.phase(), RoomPhase::AllReady);

        // The remaining host is still ready, so the predicate re-fires.
        room.remove_participant(ParticipantId(2)).unwrap();
        assert_eq!(room.phase(), RoomPhase::AllReady);

        room.set_ready(ParticipantId(1), false).unwrap();
        assert_eq!(room.phase(), RoomPhase::Open);
    }

    #[test]
    fn test_start_is_host_only_and_requires_all_ready() {
        let mut room = two_player_room();
        room.add_participant(joiner(2, "Kilo")).unwrap();

        assert!(room.begin_start(ParticipantId(1)).is_err(), "not all ready");

        ready_up(&mut room, ParticipantId(1), "Cecil");
        ready_up(&mut room, ParticipantId(2), "Scarlet");
        assert_eq!(room.phase(), RoomPhase::AllReady);

        assert!(room.begin_start(ParticipantId(2)).is_err(), "joiner cannot start");

        room.begin_start(ParticipantId(1)).unwrap();
        assert_eq!(room.phase(), RoomPhase::Starting);
        room.complete_start().unwrap();
        assert_eq!(room.phase(), RoomPhase::InGame);
    }

    #[test]
    fn test_leave_during_starting_aborts() {
        let mut room = two_player_room();
        ready_up(&mut room, ParticipantId(1), "Cecil");
        room.add_participant(joiner(2, "Kilo")).unwrap();
        ready_up(&mut room, ParticipantId(2), "Scarlet");
        room.begin_start(ParticipantId(1)).unwrap();

        room.remove_participant(ParticipantId(2)).unwrap();
        assert_ne!(room.phase(), RoomPhase::Starting);
        assert!(room.complete_start().is_err(), "aborted start cannot complete");
    }

    #[test]
    fn test_no_changes_once_starting() {
        let mut room = two_player_room();
        ready_up(&mut room, ParticipantId(1), "Cecil");
        room.add_participant(joiner(2, "Kilo")).unwrap();
        ready_up(&mut room, ParticipantId(2), "Scarlet");
        room.begin_start(ParticipantId(1)).unwrap();

        assert!(matches!(
            room.add_participant(joiner(3, "Marian")),
            Err(LobbyError::InvalidStateTransition { .. })
        ));
        assert!(matches!(
            room.set_character(ParticipantId(2), "Trony".to_string()),
            Err(LobbyError::InvalidStateTransition { .. })
        ));
        assert!(matches!(
            room.set_ready(ParticipantId(2), false),
            Err(LobbyError::InvalidStateTransition { .. })
        ));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut room = two_player_room();
        assert_eq!(
            room.add_participant(host_participant()),
            Err(LobbyError::DuplicateParticipant(ParticipantId(1)))
        );
    }

    #[test]
    fn test_unknown_participant_rejected() {
        let mut room = two_player_room();
        assert_eq!(
            room.set_ready(ParticipantId(9), true),
            Err(LobbyError::UnknownParticipant(ParticipantId(9)))
        );
    }

    #[test]
    fn test_mirror_learns_host_from_roster() {
        let info = RoomInfo {
            room_id: 7,
            max_players: 4,
            game_mode: "Survival".to_string(),
            map_name: "Field-Large".to_string(),
        };
        let mut mirror = Room::mirror(&info);
        assert!(mirror.host_id().is_unassigned());

        mirror.add_participant(host_participant()).unwrap();
        mirror.add_participant(joiner(2, "Kilo")).unwrap();
        assert_eq!(mirror.host_id(), ParticipantId(1));
    }

    #[test]
    fn test_close_is_terminal() {
        let mut room = two_player_room();
        room.close();
        assert_eq!(room.phase(), RoomPhase::Closed);
        assert!(matches!(
            room.add_participant(joiner(2, "Kilo")),
            Err(LobbyError::InvalidStateTransition { .. })
        ));
    }
}
