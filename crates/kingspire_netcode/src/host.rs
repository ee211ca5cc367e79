//! # Game Host
//!
//! The hosting endpoint: accept loop, session registry, authoritative room,
//! and the relay hub of the star topology.
//!
//! ## Relay Rule
//!
//! Joiners only ever address the host. Every joiner-originated envelope the
//! host applies is re-broadcast verbatim (original sender preserved) to the
//! other joiners. Joiner-to-joiner traffic therefore costs one extra hop,
//! and only the host's death ends the session.

use std::collections::HashMap;
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use tracing::{debug, info, warn};

use kingspire_protocol::{
    CharacterPayload, EffectId, EffectKind, EnemyState, Envelope, GameStartPayload, JoinPayload,
    LeavePayload, LeaveReason, MessageKind, ParticipantId, PlayerState, ProjectileId,
    ReadyPayload, Vec2,
};

use crate::config::HostConfig;
use crate::connection::{Connection, ConnectionId, DisconnectReason, Listener};
use crate::error::{ConnectError, LobbyError, LobbyResult};
use crate::events::{EventChannel, NetSignal, SessionEvent};
use crate::lobby::{Participant, Room, RoomPhase};
use crate::session::{SessionRegistry, HOST_PARTICIPANT_ID};
use crate::sync::{Synchronizer, WorldView};
use crate::unix_timestamp;

/// The hosting endpoint.
///
/// Drive it from the simulation loop: [`GameHost::update`] drains inbound
/// traffic, advances the lobby, publishes the tick's outbound state, and
/// returns the notifications owed to the gameplay layer. That drain is the
/// only place shared state mutates.
pub struct GameHost {
    config: HostConfig,
    listener: Listener,
    accepted_rx: Receiver<TcpStream>,
    signals: EventChannel<NetSignal>,
    registry: SessionRegistry,
    room: Room,
    sync: Synchronizer,
    /// Accepted streams that have not sent their join yet.
    pending: HashMap<ConnectionId, Arc<Connection>>,
    /// Registered connection -> participant mapping.
    links: HashMap<ConnectionId, ParticipantId>,
    next_conn_id: u32,
    last_publish: Instant,
    start_deadline: Option<Instant>,
    events: Vec<SessionEvent>,
    closed: bool,
}

impl GameHost {
    /// Validates the configuration, binds the listen port, and opens the
    /// room with the host as its first participant.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError`] on invalid configuration or bind failure.
    pub fn bind(config: HostConfig) -> Result<Self, ConnectError> {
        config.validate()?;

        let (accepted_tx, accepted_rx) = crossbeam_channel::unbounded();
        let listener = Listener::bind(config.listen_addr, accepted_tx)?;
        let signals = EventChannel::unbounded();

        let host_participant = Participant {
            id: HOST_PARTICIPANT_ID,
            display_name: config.display_name.clone(),
            character: None,
            ready: false,
            is_host: true,
        };
        let room = Room::host(
            kingspire_protocol::RoomInfo {
                room_id: config.room_id,
                max_players: config.max_players,
                game_mode: config.game_mode.clone(),
                map_name: config.map_name.clone(),
            },
            host_participant,
        );

        info!(room_id = config.room_id, addr = %listener.local_addr(), "room open");
        Ok(Self {
            config,
            listener,
            accepted_rx,
            signals,
            registry: SessionRegistry::new(),
            room,
            sync: Synchronizer::new(HOST_PARTICIPANT_ID, HOST_PARTICIPANT_ID),
            pending: HashMap::new(),
            links: HashMap::new(),
            next_conn_id: 1,
            last_publish: Instant::now(),
            start_deadline: None,
            events: Vec::new(),
            closed: false,
        })
    }

    /// The actual listen address (resolves port 0).
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    /// The host's own participant id.
    #[must_use]
    pub const fn participant_id(&self) -> ParticipantId {
        HOST_PARTICIPANT_ID
    }

    /// The authoritative room.
    #[must_use]
    pub const fn room(&self) -> &Room {
        &self.room
    }

    /// The merged world state, for the render layer's per-tick read.
    #[must_use]
    pub fn world(&self) -> &WorldView {
        self.sync.world()
    }

    /// Drains inbound traffic, advances the lobby and the start countdown,
    /// publishes this tick's outbound state, and returns the notifications
    /// for the gameplay layer.
    pub fn update(&mut self) -> Vec<SessionEvent> {
        if self.closed {
            return std::mem::take(&mut self.events);
        }

        self.accept_streams();
        while let Some(signal) = self.signals.try_recv() {
            match signal {
                NetSignal::Frame { conn, envelope } => self.handle_frame(conn, envelope),
                NetSignal::Closed { conn, reason } => self.handle_closed(conn, reason),
            }
        }
        self.advance_start();
        self.publish_tick();

        std::mem::take(&mut self.events)
    }

    // ------------------------------------------------------------------
    // Host lobby actions
    // ------------------------------------------------------------------

    /// Sets the host's ready flag and announces it.
    ///
    /// # Errors
    ///
    /// Returns [`LobbyError`] if the room is past the pre-game phases.
    pub fn set_ready(&mut self, ready: bool) -> LobbyResult<()> {
        let before = self.room.phase();
        self.room.set_ready(HOST_PARTICIPANT_ID, ready)?;
        let envelope =
            self.lobby_envelope(MessageKind::ReadyState, ReadyPayload { ready }.to_bytes());
        self.registry.broadcast(&envelope, None);
        self.events.push(SessionEvent::ReadinessChanged {
            id: HOST_PARTICIPANT_ID,
            ready,
        });
        self.note_phase_change(before);
        Ok(())
    }

    /// Sets the host's character selection and announces it.
    ///
    /// # Errors
    ///
    /// Returns [`LobbyError`] if the room is past the pre-game phases.
    pub fn set_character(&mut self, character: impl Into<String>) -> LobbyResult<()> {
        let character = character.into();
        let before = self.room.phase();
        self.room
            .set_character(HOST_PARTICIPANT_ID, character.clone())?;
        let envelope = self.lobby_envelope(
            MessageKind::CharacterSelect,
            CharacterPayload {
                character: character.clone(),
            }
            .to_bytes(),
        );
        self.registry.broadcast(&envelope, None);
        self.events.push(SessionEvent::CharacterChanged {
            id: HOST_PARTICIPANT_ID,
            character,
        });
        self.note_phase_change(before);
        Ok(())
    }

    /// Issues the start signal: the room enters `Starting`, joiners are
    /// notified, and the match goes live once the countdown elapses
    /// (next [`GameHost::update`] for a zero countdown).
    ///
    /// # Errors
    ///
    /// Returns [`LobbyError::InvalidStateTransition`] unless every
    /// participant is ready with a character selected.
    pub fn start_game(&mut self, countdown_ms: u32) -> LobbyResult<()> {
        self.room.begin_start(HOST_PARTICIPANT_ID)?;
        // Broadcast before flipping further local state so joiners observe
        // the same transition order.
        let envelope = self.lobby_envelope(
            MessageKind::GameStart,
            GameStartPayload { countdown_ms }.to_bytes(),
        );
        self.registry.broadcast(&envelope, None);
        self.start_deadline = Some(Instant::now() + Duration::from_millis(u64::from(countdown_ms)));
        self.events.push(SessionEvent::PhaseChanged(RoomPhase::Starting));
        info!(countdown_ms, "game start issued");
        Ok(())
    }

    /// Tears the room down: every participant is notified, then all
    /// connections are released. Idempotent.
    pub fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let envelope = self.lobby_envelope(
            MessageKind::Leave,
            LeavePayload {
                id: HOST_PARTICIPANT_ID,
                reason: LeaveReason::RoomClosed,
            }
            .to_bytes(),
        );
        self.registry.broadcast(&envelope, None);

        for (_, connection) in self.registry.drain() {
            connection.close();
        }
        for (_, connection) in self.pending.drain() {
            connection.close();
        }
        self.links.clear();
        self.listener.close();
        self.room.close();
        self.events.push(SessionEvent::PhaseChanged(RoomPhase::Closed));
        self.events.push(SessionEvent::RoomClosed);
        info!("room closed");
    }

    // ------------------------------------------------------------------
    // Local gameplay reports
    // ------------------------------------------------------------------

    /// Submits the host avatar's current state for the next tick.
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

    /// Submits authoritative enemy state. Host authority only exists here.
    pub fn report_enemy_state(&mut self, state: EnemyState) {
        self.sync.report_enemy_state(state, Instant::now());
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn lobby_envelope(&mut self, kind: MessageKind, payload: Vec<u8>) -> Envelope {
        Envelope::new(
            kind,
            HOST_PARTICIPANT_ID,
            self.sync.next_sequence(),
            unix_timestamp(),
            payload,
        )
    }

    fn note_phase_change(&mut self, before: RoomPhase) {
        let after = self.room.phase();
        if after != before {
            self.events.push(SessionEvent::PhaseChanged(after));
        }
    }

    fn accept_streams(&mut self) {
        while let Ok(stream) = self.accepted_rx.try_recv() {
            let id = ConnectionId(self.next_conn_id);
            self.next_conn_id += 1;
            match Connection::spawn(
                id,
                stream,
                HOST_PARTICIPANT_ID,
                self.config.heartbeat,
                self.signals.sender(),
            ) {
                Ok(connection) => {
                    self.pending.insert(id, connection);
                }
                Err(err) => warn!(%err, "failed to wrap accepted stream"),
            }
        }
    }

    fn handle_frame(&mut self, conn: ConnectionId, envelope: Envelope) {
        if let Some(&participant_id) = self.links.get(&conn) {
            self.handle_participant_frame(conn, participant_id, envelope);
        } else if self.pending.contains_key(&conn) {
            self.handle_pending_frame(conn, &envelope);
        }
        // Frames from already-departed connections are stale; drop them.
    }

    /// Pre-join connections may only send a join request.
    fn handle_pending_frame(&mut self, conn: ConnectionId, envelope: &Envelope) {
        if envelope.kind != MessageKind::Join {
            warn!(%conn, kind = ?envelope.kind, "traffic before join, dropping connection");
            self.drop_pending(conn);
            return;
        }
        match JoinPayload::from_bytes(&envelope.payload) {
            Ok(payload) => self.admit(conn, payload.profile.display_name),
            Err(err) => {
                warn!(%conn, %err, "malformed join, dropping connection");
                self.drop_pending(conn);
            }
        }
    }

    fn drop_pending(&mut self, conn: ConnectionId) {
        if let Some(connection) = self.pending.remove(&conn) {
            connection.close();
        }
    }

    fn admit(&mut self, conn: ConnectionId, display_name: String) {
        let Some(connection) = self.pending.remove(&conn) else {
            return;
        };

        let id = self.registry.register(Arc::clone(&connection));
        let participant = Participant {
            id,
            display_name,
            character: None,
            ready: false,
            is_host: false,
        };

        let before = self.room.phase();
        match self.room.add_participant(participant.clone()) {
            Ok(()) => {
                self.links.insert(conn, id);

                // Roster sync to the new joiner, assignment entry first so
                // it can build its mirror before other entries arrive.
                let assignment = JoinPayload {
                    profile: participant.profile(),
                    assigned: true,
                    room: Some(self.room.info()),
                };
                let envelope =
                    self.lobby_envelope(MessageKind::Join, assignment.to_bytes());
                let _ = connection.send(&envelope);

                let others: Vec<JoinPayload> = self
                    .room
                    .participants()
                    .iter()
                    .filter(|p| p.id != id)
                    .map(|p| JoinPayload::roster_entry(p.profile()))
                    .collect();
                for entry in others {
                    let envelope = self.lobby_envelope(MessageKind::Join, entry.to_bytes());
                    let _ = connection.send(&envelope);
                }

                // Announce the newcomer to everyone else.
                let announce = JoinPayload::roster_entry(participant.profile());
                let envelope = self.lobby_envelope(MessageKind::Join, announce.to_bytes());
                self.registry.broadcast(&envelope, Some(id));

                info!(%id, name = %participant.display_name, "participant joined");
                self.events.push(SessionEvent::ParticipantJoined(participant));
                self.note_phase_change(before);
            }
            Err(err) => {
                // Rejections are surfaced to the requester only; the
                // session continues untouched.
                self.registry.unregister(id);
                let reason = match err {
                    LobbyError::RoomFull { .. } => LeaveReason::RoomFull,
                    _ => LeaveReason::RoomClosed,
                };
                let rejection = LeavePayload {
                    id: ParticipantId::UNASSIGNED,
                    reason,
                };
                let envelope = self.lobby_envelope(MessageKind::Leave, rejection.to_bytes());
                let _ = connection.send(&envelope);
                connection.close();
                info!(%err, "join rejected");
            }
        }
    }

    fn handle_participant_frame(
        &mut self,
        conn: ConnectionId,
        participant_id: ParticipantId,
        envelope: Envelope,
    ) {
        if envelope.sender != participant_id {
            warn!(
                %conn,
                claimed = %envelope.sender,
                actual = %participant_id,
                "protocol violation: sender id spoof dropped"
            );
            return;
        }

        match envelope.kind {
            MessageKind::Join => {
                warn!(%participant_id, "protocol violation: duplicate join dropped");
            }
            MessageKind::Leave => {
                self.depart(conn, participant_id, LeaveReason::Quit);
            }
            MessageKind::ReadyState => match ReadyPayload::from_bytes(&envelope.payload) {
                Ok(payload) => {
                    let before = self.room.phase();
                    match self.room.set_ready(participant_id, payload.ready) {
                        Ok(()) => {
                            self.registry.broadcast(&envelope, Some(participant_id));
                            self.events.push(SessionEvent::ReadinessChanged {
                                id: participant_id,
                                ready: payload.ready,
                            });
                            self.note_phase_change(before);
                        }
                        Err(err) => debug!(%participant_id, %err, "ready change rejected"),
                    }
                }
                Err(_) => self.depart(conn, participant_id, LeaveReason::Quit),
            },
            MessageKind::CharacterSelect => {
                match CharacterPayload::from_bytes(&envelope.payload) {
                    Ok(payload) => {
                        let before = self.room.phase();
                        match self
                            .room
                            .set_character(participant_id, payload.character.clone())
                        {
                            Ok(()) => {
                                self.registry.broadcast(&envelope, Some(participant_id));
                                self.events.push(SessionEvent::CharacterChanged {
                                    id: participant_id,
                                    character: payload.character,
                                });
                                self.note_phase_change(before);
                            }
                            Err(err) => {
                                debug!(%participant_id, %err, "character change rejected");
                            }
                        }
                    }
                    Err(_) => self.depart(conn, participant_id, LeaveReason::Quit),
                }
            }
            MessageKind::PlayerState
            | MessageKind::ProjectileSpawn
            | MessageKind::EffectSpawn
            | MessageKind::EnemyState => {
                match self.sync.apply(&envelope, Instant::now()) {
                    Ok(outcome) if outcome != crate::sync::ApplyOutcome::AuthorityRejected => {
                        // Star relay: forward to the other joiners with the
                        // original sender preserved.
                        self.registry.broadcast(&envelope, Some(participant_id));
                    }
                    Ok(_) => {
                        // Authority violations are logged and dropped, never
                        // relayed; the connection stays up.
                    }
                    Err(err) => {
                        warn!(%participant_id, %err, "corrupt payload, evicting");
                        self.depart(conn, participant_id, LeaveReason::Quit);
                    }
                }
            }
            MessageKind::GameStart => {
                warn!(%participant_id, "protocol violation: non-host start dropped");
            }
            MessageKind::Heartbeat | MessageKind::HeartbeatAck => {
                // Consumed by the connection layer; nothing reaches here.
            }
        }
    }

    fn handle_closed(&mut self, conn: ConnectionId, reason: DisconnectReason) {
        if self.pending.remove(&conn).is_some() {
            debug!(%conn, ?reason, "pre-join connection dropped");
            return;
        }
        let Some(&participant_id) = self.links.get(&conn) else {
            return;
        };
        let leave_reason = match reason {
            DisconnectReason::TimedOut => LeaveReason::TimedOut,
            _ => LeaveReason::Quit,
        };
        self.depart(conn, participant_id, leave_reason);
    }

    /// Removes a participant everywhere and tells the survivors. Exactly one
    /// departure notification per participant: the link entry is the guard.
    fn depart(&mut self, conn: ConnectionId, participant_id: ParticipantId, reason: LeaveReason) {
        if self.links.remove(&conn).is_none() {
            return;
        }
        if let Some(connection) = self.registry.unregister(participant_id) {
            connection.close();
        }

        let before = self.room.phase();
        if let Some(participant) = self.room.remove_participant(participant_id) {
            self.sync.remove_participant(participant_id);

            let payload = LeavePayload {
                id: participant_id,
                reason,
            };
            let envelope = self.lobby_envelope(MessageKind::Leave, payload.to_bytes());
            self.registry.broadcast(&envelope, None);

            info!(%participant_id, name = %participant.display_name, ?reason, "participant left");
            self.events.push(SessionEvent::ParticipantLeft {
                id: participant_id,
                reason,
            });
            self.note_phase_change(before);
        }
    }

    fn advance_start(&mut self) {
        if self.room.phase() != RoomPhase::Starting {
            self.start_deadline = None;
            return;
        }
        let Some(deadline) = self.start_deadline else {
            return;
        };
        if Instant::now() >= deadline && self.room.complete_start().is_ok() {
            self.start_deadline = None;
            self.events.push(SessionEvent::GameStarted);
            self.events.push(SessionEvent::PhaseChanged(RoomPhase::InGame));
            info!("match live");
        }
    }

    fn publish_tick(&mut self) {
        if self.room.phase() != RoomPhase::InGame {
            return;
        }
        let now = Instant::now();
        if now.duration_since(self.last_publish) < self.config.tick_interval() {
            return;
        }
        self.last_publish = now;

        for envelope in self.sync.publish(unix_timestamp(), now) {
            self.registry.broadcast(&envelope, None);
        }
        self.sync.sweep(
            now,
            Duration::from_millis(self.config.projectile_lifetime_ms),
            Duration::from_millis(self.config.effect_lifetime_ms),
        );
    }
}

impl Drop for GameHost {
    fn drop(&mut self) {
        self.shutdown();
    }
}
