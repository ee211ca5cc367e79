//! # Game Client
//!
//! The joining endpoint: one dialed connection to the host, a read-mostly
//! mirror of the room, and the joiner half of the state synchronizer.
//!
//! A joiner only ever addresses the host; everything it learns about other
//! joiners arrives relayed. If the link to the host dies the session is
//! over - reconnection is a brand-new [`GameClient`] and a fresh join.

use std::net::TcpStream;
use std::time::{Duration, Instant};

use std::sync::Arc;

use tracing::{debug, info, warn};

use kingspire_protocol::{
    CharacterPayload, EffectId, EffectKind, Envelope, GameStartPayload, JoinPayload,
    LeavePayload, LeaveReason, MessageKind, ParticipantId, ParticipantProfile, PlayerState,
    ProjectileId, ReadyPayload, Vec2,
};

use crate::config::JoinConfig;
use crate::connection::{Connection, ConnectionId, DisconnectReason};
use crate::error::{ConnectError, LobbyError, LobbyResult};
use crate::events::{EventChannel, NetSignal, SessionEvent};
use crate::lobby::{Participant, Room, RoomPhase};
use crate::sync::{Synchronizer, WorldView};
use crate::unix_timestamp;

/// Lifecycle of the joining endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientState {
    /// Join request sent, waiting for the host's assignment.
    AwaitingAssignment,
    /// Admitted to the room.
    Active,
    /// The link is gone or the join was rejected. Terminal.
    Disconnected,
}

/// The joining endpoint.
///
/// Drive it from the simulation loop exactly like the host:
/// [`GameClient::update`] is the single mutation point.
pub struct GameClient {
    config: JoinConfig,
    connection: Arc<Connection>,
    signals: EventChannel<NetSignal>,
    state: ClientState,
    local_id: ParticipantId,
    room: Option<Room>,
    sync: Synchronizer,
    /// Roster entries that arrived before our assignment entry.
    early_roster: Vec<ParticipantProfile>,
    start_deadline: Option<Instant>,
    last_publish: Instant,
    events: Vec<SessionEvent>,
}

impl GameClient {
    /// Dials the host and sends the join request.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError`] on invalid configuration or dial failure.
    pub fn connect(config: JoinConfig) -> Result<Self, ConnectError> {
        config.validate()?;

        let stream = TcpStream::connect_timeout(
            &config.server_addr,
            Duration::from_millis(config.connect_timeout_ms),
        )?;
        let signals = EventChannel::unbounded();
        let connection = Connection::spawn(
            ConnectionId(0),
            stream,
            ParticipantId::UNASSIGNED,
            config.heartbeat,
            signals.sender(),
        )?;

        let mut client = Self {
            connection,
            signals,
            state: ClientState::AwaitingAssignment,
            local_id: ParticipantId::UNASSIGNED,
            room: None,
            sync: Synchronizer::new(ParticipantId::UNASSIGNED, ParticipantId::UNASSIGNED),
            early_roster: Vec::new(),
            start_deadline: None,
            last_publish: Instant::now(),
            events: Vec::new(),
            config,
        };

        let request =
            JoinPayload::roster_entry(ParticipantProfile::join_request(&client.config.display_name));
        let envelope = client.outgoing(MessageKind::Join, request.to_bytes());
        if let Err(err) = client.connection.send(&envelope) {
            return Err(ConnectError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                err.to_string(),
            )));
        }

        info!(server = %client.config.server_addr, "join requested");
        Ok(client)
    }

    /// Current lifecycle state.
    #[inline]
    #[must_use]
    pub const fn state(&self) -> ClientState {
        self.state
    }

    /// Our assigned id ([`ParticipantId::UNASSIGNED`] until admitted).
    #[inline]
    #[must_use]
    pub const fn participant_id(&self) -> ParticipantId {
        self.local_id
    }

    /// The room mirror, once admitted.
    #[must_use]
    pub const fn room(&self) -> Option<&Room> {
        self.room.as_ref()
    }

    /// The merged world state, for the render layer's per-tick read.
    #[must_use]
    pub fn world(&self) -> &WorldView {
        self.sync.world()
    }

    /// Smoothed round-trip estimate to the host, in milliseconds.
    #[must_use]
    pub fn rtt_ms(&self) -> u32 {
        self.connection.rtt_ms()
    }

    /// Drains inbound traffic, advances the mirror, publishes this tick's
    /// outbound state, and returns the notifications for the gameplay layer.
    pub fn update(&mut self) -> Vec<SessionEvent> {
        while let Some(signal) = self.signals.try_recv() {
            match signal {
                NetSignal::Frame { envelope, .. } => self.handle_frame(envelope),
                NetSignal::Closed { reason, .. } => self.handle_closed(reason),
            }
        }
        self.advance_start();
        self.publish_tick();

        std::mem::take(&mut self.events)
    }

    // ------------------------------------------------------------------
    // Lobby actions
    // ------------------------------------------------------------------

    /// Sets our ready flag and tells the host.
    ///
    /// # Errors
    ///
    /// Returns [`LobbyError`] if not yet admitted or past the pre-game
    /// phases.
    pub fn set_ready(&mut self, ready: bool) -> LobbyResult<()> {
        let id = self.require_active()?;
        let Some(room) = self.room.as_mut() else {
            return Err(LobbyError::UnknownParticipant(id));
        };
        let before = room.phase();
        room.set_ready(id, ready)?;

        let envelope = self.outgoing(MessageKind::ReadyState, ReadyPayload { ready }.to_bytes());
        let _ = self.connection.send(&envelope);
        self.events
            .push(SessionEvent::ReadinessChanged { id, ready });
        self.note_phase_change(before);
        Ok(())
    }

    /// Sets our character selection and tells the host.
    ///
    /// # Errors
    ///
    /// Returns [`LobbyError`] if not yet admitted or past the pre-game
    /// phases.
    pub fn set_character(&mut self, character: impl Into<String>) -> LobbyResult<()> {
        let id = self.require_active()?;
        let character = character.into();
        let Some(room) = self.room.as_mut() else {
            return Err(LobbyError::UnknownParticipant(id));
        };
        let before = room.phase();
        room.set_character(id, character.clone())?;

        let envelope = self.outgoing(
            MessageKind::CharacterSelect,
            CharacterPayload {
                character: character.clone(),
            }
            .to_bytes(),
        );
        let _ = self.connection.send(&envelope);
        self.events
            .push(SessionEvent::CharacterChanged { id, character });
        self.note_phase_change(before);
        Ok(())
    }

    /// Leaves the room and closes the link.
    pub fn disconnect(&mut self) {
        if self.state == ClientState::Disconnected {
            return;
        }
        let payload = LeavePayload {
            id: self.local_id,
            reason: LeaveReason::Quit,
        };
        let envelope = self.outgoing(MessageKind::Leave, payload.to_bytes());
        let _ = self.connection.send(&envelope);
        self.connection.close();
        self.state = ClientState::Disconnected;
        if let Some(room) = self.room.as_mut() {
            room.close();
        }
        info!("left session");
    }

    // ------------------------------------------------------------------
    // Local gameplay reports
    // ------------------------------------------------------------------

    /// Submits our avatar's current state for the next tick.
    pub fn report_local_player_state(&mut self, state: PlayerState) {
        self.sync.report_local_player_state(state);
    }

    /// Submits a locally fired projectile.
    pub fn report_projectile_spawned(
        &mut self,
        origin: Vec2,
        direction: Vec2,
        speed: f32,
        weapon_id: u16,
    ) -> ProjectileId {
        self.sync
            .report_projectile_spawned(origin, direction, speed, weapon_id, Instant::now())
    }

    /// Submits a locally spawned effect.
    pub fn report_effect_spawned(
        &mut self,
        kind: EffectKind,
        position: Vec2,
        params: [f32; 4],
    ) -> EffectId {
        self.sync
            .report_effect_spawned(kind, position, params, Instant::now())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn require_active(&self) -> LobbyResult<ParticipantId> {
        if self.state == ClientState::Active {
            Ok(self.local_id)
        } else {
            Err(LobbyError::InvalidStateTransition {
                action: "use the lobby",
                phase: self
                    .room
                    .as_ref()
                    .map_or(RoomPhase::Closed, Room::phase),
            })
        }
    }

    fn outgoing(&mut self, kind: MessageKind, payload: Vec<u8>) -> Envelope {
        Envelope::new(
            kind,
            self.local_id,
            self.sync.next_sequence(),
            unix_timestamp(),
            payload,
        )
    }

    fn note_phase_change(&mut self, before: RoomPhase) {
        let after = self.room.as_ref().map_or(before, Room::phase);
        if after != before {
            self.events.push(SessionEvent::PhaseChanged(after));
        }
    }

    fn handle_frame(&mut self, envelope: Envelope) {
        match envelope.kind {
            MessageKind::Join => self.handle_join(&envelope),
            MessageKind::Leave => self.handle_leave(&envelope),
            MessageKind::ReadyState => match ReadyPayload::from_bytes(&envelope.payload) {
                Ok(payload) => self.apply_ready(envelope.sender, payload.ready),
                Err(err) => self.die_of_corruption(&err),
            },
            MessageKind::CharacterSelect => {
                match CharacterPayload::from_bytes(&envelope.payload) {
                    Ok(payload) => self.apply_character(envelope.sender, payload.character),
                    Err(err) => self.die_of_corruption(&err),
                }
            }
            MessageKind::GameStart => match GameStartPayload::from_bytes(&envelope.payload) {
                Ok(payload) => self.apply_game_start(envelope.sender, payload.countdown_ms),
                Err(err) => self.die_of_corruption(&err),
            },
            MessageKind::PlayerState
            | MessageKind::ProjectileSpawn
            | MessageKind::EffectSpawn
            | MessageKind::EnemyState => match self.sync.apply(&envelope, Instant::now()) {
                Ok(_) => {}
                Err(err) => self.die_of_corruption(&err),
            },
            MessageKind::Heartbeat | MessageKind::HeartbeatAck => {
                // Consumed by the connection layer; nothing reaches here.
            }
        }
    }

    fn handle_join(&mut self, envelope: &Envelope) {
        let payload = match JoinPayload::from_bytes(&envelope.payload) {
            Ok(payload) => payload,
            Err(err) => {
                self.die_of_corruption(&err);
                return;
            }
        };

        if self.state == ClientState::AwaitingAssignment {
            if payload.assigned {
                self.adopt_assignment(payload);
            } else {
                // Roster entry raced ahead of our assignment; hold it.
                self.early_roster.push(payload.profile);
            }
            return;
        }

        // A participant joined after us.
        let Some(room) = self.room.as_mut() else {
            return;
        };
        let before = room.phase();
        let participant = Participant::from_profile(payload.profile);
        match room.add_participant(participant.clone()) {
            Ok(()) => {
                self.events.push(SessionEvent::ParticipantJoined(participant));
                self.note_phase_change(before);
            }
            Err(err) => debug!(%err, "mirror rejected roster entry"),
        }
    }

    fn adopt_assignment(&mut self, payload: JoinPayload) {
        let Some(info) = payload.room else {
            warn!("assignment entry without room metadata");
            return;
        };

        self.local_id = payload.profile.id;
        self.connection.set_local_id(self.local_id);
        self.sync.set_local_id(self.local_id);
        self.state = ClientState::Active;

        let mut room = Room::mirror(&info);
        let own = Participant::from_profile(payload.profile);
        let mut roster = std::mem::take(&mut self.early_roster);
        roster.push(own.profile());
        for profile in roster {
            let participant = Participant::from_profile(profile);
            if participant.id != self.local_id {
                self.events
                    .push(SessionEvent::ParticipantJoined(participant.clone()));
            }
            if let Err(err) = room.add_participant(participant) {
                debug!(%err, "mirror rejected roster entry");
            }
        }
        self.sync.set_host_id(room.host_id());
        self.room = Some(room);

        info!(id = %self.local_id, room = info.room_id, "join accepted");
        self.events.push(SessionEvent::JoinAccepted {
            id: self.local_id,
            room: info,
        });
    }

    fn handle_leave(&mut self, envelope: &Envelope) {
        let payload = match LeavePayload::from_bytes(&envelope.payload) {
            Ok(payload) => payload,
            Err(err) => {
                self.die_of_corruption(&err);
                return;
            }
        };

        // A leave naming us (or the unassigned sentinel before admission)
        // ends our session: rejection, eviction, or room teardown.
        if payload.id == self.local_id || payload.id.is_unassigned() {
            match payload.reason {
                LeaveReason::RoomFull => {
                    info!("join rejected: room full");
                    self.events.push(SessionEvent::JoinRejected {
                        reason: payload.reason,
                    });
                }
                LeaveReason::RoomClosed => {
                    info!("room closed by host");
                    self.events.push(SessionEvent::RoomClosed);
                }
                _ => {
                    self.events.push(SessionEvent::ParticipantLeft {
                        id: payload.id,
                        reason: payload.reason,
                    });
                }
            }
            self.connection.close();
            self.state = ClientState::Disconnected;
            if let Some(room) = self.room.as_mut() {
                room.close();
            }
            return;
        }

        // The host announcing its own departure closes the room.
        if self
            .room
            .as_ref()
            .is_some_and(|room| payload.id == room.host_id())
        {
            info!("host left, room closed");
            self.events.push(SessionEvent::RoomClosed);
            self.connection.close();
            self.state = ClientState::Disconnected;
            if let Some(room) = self.room.as_mut() {
                room.close();
            }
            return;
        }

        let Some(room) = self.room.as_mut() else {
            return;
        };
        let before = room.phase();
        if room.remove_participant(payload.id).is_some() {
            self.sync.remove_participant(payload.id);
            self.events.push(SessionEvent::ParticipantLeft {
                id: payload.id,
                reason: payload.reason,
            });
            self.note_phase_change(before);
        }
    }

    fn apply_ready(&mut self, sender: ParticipantId, ready: bool) {
        let Some(room) = self.room.as_mut() else {
            return;
        };
        let before = room.phase();
        match room.set_ready(sender, ready) {
            Ok(()) => {
                self.events
                    .push(SessionEvent::ReadinessChanged { id: sender, ready });
                self.note_phase_change(before);
            }
            Err(err) => debug!(%sender, %err, "mirror rejected ready change"),
        }
    }

    fn apply_character(&mut self, sender: ParticipantId, character: String) {
        let Some(room) = self.room.as_mut() else {
            return;
        };
        let before = room.phase();
        match room.set_character(sender, character.clone()) {
            Ok(()) => {
                self.events
                    .push(SessionEvent::CharacterChanged { id: sender, character });
                self.note_phase_change(before);
            }
            Err(err) => debug!(%sender, %err, "mirror rejected character change"),
        }
    }

    fn apply_game_start(&mut self, sender: ParticipantId, countdown_ms: u32) {
        let Some(room) = self.room.as_mut() else {
            return;
        };
        if sender != room.host_id() {
            warn!(%sender, "protocol violation: non-host start dropped");
            return;
        }
        room.mark_starting();
        if room.phase() == RoomPhase::Starting {
            self.start_deadline =
                Some(Instant::now() + Duration::from_millis(u64::from(countdown_ms)));
            self.events.push(SessionEvent::PhaseChanged(RoomPhase::Starting));
        }
    }

    fn handle_closed(&mut self, reason: DisconnectReason) {
        if self.state == ClientState::Disconnected {
            return;
        }
        self.state = ClientState::Disconnected;
        if let Some(room) = self.room.as_mut() {
            room.close();
        }
        info!(?reason, "link to host lost");
        self.events.push(SessionEvent::ConnectionLost { reason });
    }

    fn die_of_corruption(&mut self, err: &kingspire_protocol::CodecError) {
        // A payload that does not decode as its kind means the stream can no
        // longer be trusted.
        warn!(%err, "corrupt payload from host, dropping link");
        self.connection.close();
        self.handle_closed(DisconnectReason::ProtocolCorruption);
    }

    fn advance_start(&mut self) {
        let Some(deadline) = self.start_deadline else {
            return;
        };
        let Some(room) = self.room.as_mut() else {
            self.start_deadline = None;
            return;
        };
        if room.phase() != RoomPhase::Starting {
            // The start was aborted by a departure.
            self.start_deadline = None;
            return;
        }
        if Instant::now() >= deadline {
            self.start_deadline = None;
            if room.complete_start().is_ok() {
                self.events.push(SessionEvent::GameStarted);
                self.events.push(SessionEvent::PhaseChanged(RoomPhase::InGame));
                info!("match live");
            }
        }
    }

    fn publish_tick(&mut self) {
        if self.state != ClientState::Active {
            return;
        }
        if self.room.as_ref().map_or(true, |r| r.phase() != RoomPhase::InGame) {
            return;
        }
        let now = Instant::now();
        if now.duration_since(self.last_publish) < self.config.tick_interval() {
            return;
        }
        self.last_publish = now;

        // Star topology: everything goes to the host, which relays.
        for envelope in self.sync.publish(unix_timestamp(), now) {
            let _ = self.connection.send(&envelope);
        }
        self.sync.sweep(
            now,
            Duration::from_millis(self.config.projectile_lifetime_ms),
            Duration::from_millis(self.config.effect_lifetime_ms),
        );
    }
}

impl Drop for GameClient {
    fn drop(&mut self) {
        if self.state != ClientState::Disconnected {
            self.disconnect();
        }
    }
}
