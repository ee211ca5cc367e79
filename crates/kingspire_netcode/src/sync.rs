//! # State Synchronizer
//!
//! The authoritative merge of local and remote game events into the world
//! state view, and the outbound publication of locally-authoritative
//! changes.
//!
//! ## Authority
//!
//! Entity ownership is static, so there is never a conflict to resolve
//! between two senders claiming the same entity:
//!
//! - Own avatar: locally authoritative, never overwritten by the network
//! - Other avatars: mirrored verbatim, stale sequences discarded
//! - Projectiles and effects: idempotent creations, never merged
//! - Enemies: host-authoritative; anything else is a protocol violation
//!
//! No interpolation happens here. The render layer may smooth mirrored
//! transforms; this view stores last-known authoritative state only.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::warn;

use kingspire_protocol::{
    CodecResult, EffectId, EffectKind, EffectSpawn, EnemyState, Envelope, MessageKind,
    ParticipantId, PlayerState, ProjectileId, ProjectileSpawn, Vec2,
};

/// A mirrored avatar with its replication bookkeeping.
#[derive(Clone, Copy, Debug)]
pub struct PlayerMirror {
    /// Last applied state.
    pub state: PlayerState,
    /// Sequence number of the last applied update.
    pub sequence: u64,
    /// When the last update was applied.
    pub updated_at: Instant,
}

/// A mirrored projectile.
#[derive(Clone, Copy, Debug)]
pub struct ProjectileMirror {
    /// The spawn record.
    pub spawn: ProjectileSpawn,
    /// When it was applied.
    pub spawned_at: Instant,
}

/// A mirrored transient effect.
#[derive(Clone, Copy, Debug)]
pub struct EffectMirror {
    /// The spawn record.
    pub spawn: EffectSpawn,
    /// When it was applied.
    pub spawned_at: Instant,
}

/// A mirrored enemy.
#[derive(Clone, Copy, Debug)]
pub struct EnemyMirror {
    /// Last applied state.
    pub state: EnemyState,
    /// When the last update was applied.
    pub updated_at: Instant,
}

/// The merged picture of world state: entity id to last-known authoritative
/// state plus receipt bookkeeping.
///
/// The render layer reads this as a per-tick snapshot; only the simulation
/// tick mutates it.
#[derive(Default)]
pub struct WorldView {
    players: HashMap<ParticipantId, PlayerMirror>,
    projectiles: HashMap<ProjectileId, ProjectileMirror>,
    effects: HashMap<EffectId, EffectMirror>,
    enemies: HashMap<u32, EnemyMirror>,
}

impl WorldView {
    /// All avatars, own and mirrored.
    #[must_use]
    pub fn players(&self) -> &HashMap<ParticipantId, PlayerMirror> {
        &self.players
    }

    /// One avatar.
    #[must_use]
    pub fn player(&self, id: ParticipantId) -> Option<&PlayerMirror> {
        self.players.get(&id)
    }

    /// All live projectiles.
    #[must_use]
    pub fn projectiles(&self) -> &HashMap<ProjectileId, ProjectileMirror> {
        &self.projectiles
    }

    /// All live effects.
    #[must_use]
    pub fn effects(&self) -> &HashMap<EffectId, EffectMirror> {
        &self.effects
    }

    /// All known enemies.
    #[must_use]
    pub fn enemies(&self) -> &HashMap<u32, EnemyMirror> {
        &self.enemies
    }
}

/// What the synchronizer did with an inbound envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The state was applied to the view.
    Applied,
    /// Discarded: superseded by an already-applied sequence.
    Stale,
    /// Discarded: a spawn for an id that already exists (idempotent create).
    Duplicate,
    /// Discarded and logged: the sender has no authority over this entity.
    AuthorityRejected,
    /// Not a synchronizer concern (lobby or keepalive traffic).
    Ignored,
}

/// The merge engine for one endpoint.
pub struct Synchronizer {
    local_id: ParticipantId,
    host_id: ParticipantId,
    view: WorldView,
    outbound_sequence: u64,
    local_player: Option<PlayerState>,
    pending_projectiles: Vec<ProjectileSpawn>,
    pending_effects: Vec<EffectSpawn>,
    pending_enemies: Vec<EnemyState>,
    next_projectile_index: u32,
    next_effect_index: u32,
    violations: u64,
}

impl Synchronizer {
    /// Creates a synchronizer for the given local identity.
    #[must_use]
    pub fn new(local_id: ParticipantId, host_id: ParticipantId) -> Self {
        Self {
            local_id,
            host_id,
            view: WorldView::default(),
            outbound_sequence: 0,
            local_player: None,
            pending_projectiles: Vec::new(),
            pending_effects: Vec::new(),
            pending_enemies: Vec::new(),
            next_projectile_index: 0,
            next_effect_index: 0,
            violations: 0,
        }
    }

    /// The local participant id.
    #[inline]
    #[must_use]
    pub const fn local_id(&self) -> ParticipantId {
        self.local_id
    }

    /// Adopts the id the host assigned us (joiner side).
    pub fn set_local_id(&mut self, id: ParticipantId) {
        self.local_id = id;
    }

    /// Records which participant holds enemy authority (joiner side).
    pub fn set_host_id(&mut self, id: ParticipantId) {
        self.host_id = id;
    }

    /// Read-only snapshot of the merged world state.
    #[must_use]
    pub fn world(&self) -> &WorldView {
        &self.view
    }

    /// Protocol violations observed so far.
    #[must_use]
    pub const fn violation_count(&self) -> u64 {
        self.violations
    }

    /// Next per-sender sequence number. Also used by the lobby layer so the
    /// sender's counter stays monotonic across every kind it emits.
    pub fn next_sequence(&mut self) -> u64 {
        self.outbound_sequence += 1;
        self.outbound_sequence
    }

    /// Applies one inbound envelope to the view.
    ///
    /// # Errors
    ///
    /// Propagates payload decode failures; the owning connection treats
    /// those as stream corruption.
    pub fn apply(&mut self, envelope: &Envelope, now: Instant) -> CodecResult<ApplyOutcome> {
        match envelope.kind {
            MessageKind::PlayerState => {
                if envelope.sender == self.local_id {
                    // Own avatar is locally authoritative.
                    return Ok(ApplyOutcome::Ignored);
                }
                let state = PlayerState::from_bytes(&envelope.payload)?;
                Ok(self.apply_player_state(envelope.sender, envelope.sequence, state, now))
            }
            MessageKind::ProjectileSpawn => {
                let spawn = ProjectileSpawn::from_bytes(&envelope.payload)?;
                Ok(self.apply_projectile(spawn, now))
            }
            MessageKind::EffectSpawn => {
                let spawn = EffectSpawn::from_bytes(&envelope.payload)?;
                Ok(self.apply_effect(spawn, now))
            }
            MessageKind::EnemyState => {
                let state = EnemyState::from_bytes(&envelope.payload)?;
                if envelope.sender != self.host_id {
                    self.violations += 1;
                    warn!(
                        sender = %envelope.sender,
                        enemy = state.enemy_id,
                        "protocol violation: non-host enemy state dropped"
                    );
                    return Ok(ApplyOutcome::AuthorityRejected);
                }
                Ok(self.apply_enemy(state, now))
            }
            _ => Ok(ApplyOutcome::Ignored),
        }
    }

    fn apply_player_state(
        &mut self,
        sender: ParticipantId,
        sequence: u64,
        state: PlayerState,
        now: Instant,
    ) -> ApplyOutcome {
        if let Some(existing) = self.view.players.get(&sender) {
            if sequence < existing.sequence {
                return ApplyOutcome::Stale;
            }
        }
        self.view.players.insert(
            sender,
            PlayerMirror {
                state,
                sequence,
                updated_at: now,
            },
        );
        ApplyOutcome::Applied
    }

    fn apply_projectile(&mut self, spawn: ProjectileSpawn, now: Instant) -> ApplyOutcome {
        if self.view.projectiles.contains_key(&spawn.projectile_id) {
            // Idempotent creation: a replayed spawn is a no-op, not an
            // overwrite.
            return ApplyOutcome::Duplicate;
        }
        self.view.projectiles.insert(
            spawn.projectile_id,
            ProjectileMirror {
                spawn,
                spawned_at: now,
            },
        );
        ApplyOutcome::Applied
    }

    fn apply_effect(&mut self, spawn: EffectSpawn, now: Instant) -> ApplyOutcome {
        if self.view.effects.contains_key(&spawn.effect_id) {
            return ApplyOutcome::Duplicate;
        }
        self.view.effects.insert(
            spawn.effect_id,
            EffectMirror {
                spawn,
                spawned_at: now,
            },
        );
        ApplyOutcome::Applied
    }

    fn apply_enemy(&mut self, state: EnemyState, now: Instant) -> ApplyOutcome {
        if state.is_alive() {
            self.view.enemies.insert(
                state.enemy_id,
                EnemyMirror {
                    state,
                    updated_at: now,
                },
            );
        } else {
            self.view.enemies.remove(&state.enemy_id);
        }
        ApplyOutcome::Applied
    }

    /// Records the local avatar's current state for the next publication.
    pub fn report_local_player_state(&mut self, state: PlayerState) {
        self.local_player = Some(state);
    }

    /// Records a locally fired projectile, assigning its id.
    pub fn report_projectile_spawned(
        &mut self,
        origin: Vec2,
        direction: Vec2,
        speed: f32,
        weapon_id: u16,
        now: Instant,
    ) -> ProjectileId {
        let id = ProjectileId::new(self.local_id, self.next_projectile_index);
        self.next_projectile_index += 1;

        let spawn = ProjectileSpawn {
            projectile_id: id,
            origin,
            direction,
            speed,
            weapon_id,
            _pad: [0; 2],
        };
        self.view.projectiles.insert(
            id,
            ProjectileMirror {
                spawn,
                spawned_at: now,
            },
        );
        self.pending_projectiles.push(spawn);
        id
    }

    /// Records a locally spawned effect, assigning its id.
    pub fn report_effect_spawned(
        &mut self,
        kind: EffectKind,
        position: Vec2,
        params: [f32; 4],
        now: Instant,
    ) -> EffectId {
        let id = EffectId::new(self.local_id, self.next_effect_index);
        self.next_effect_index += 1;

        let spawn = EffectSpawn::new(id, kind, position, params);
        self.view.effects.insert(
            id,
            EffectMirror {
                spawn,
                spawned_at: now,
            },
        );
        self.pending_effects.push(spawn);
        id
    }

    /// Records authoritative enemy state for the next publication.
    ///
    /// Host only: on any other endpoint this is a local programming error
    /// and the state is dropped.
    pub fn report_enemy_state(&mut self, state: EnemyState, now: Instant) {
        if self.local_id != self.host_id {
            warn!("non-host endpoint tried to publish enemy state");
            return;
        }
        self.apply_enemy(state, now);
        self.pending_enemies.push(state);
    }

    /// Serializes everything locally authored since the last tick.
    ///
    /// Returns the envelopes to hand to the connection layer: the current
    /// avatar state plus queued projectile, effect, and (host) enemy
    /// messages, each stamped with a fresh per-sender sequence.
    pub fn publish(&mut self, timestamp: f64, now: Instant) -> Vec<Envelope> {
        let mut out = Vec::new();

        if let Some(state) = self.local_player {
            let sequence = self.next_sequence();
            // The view carries our own avatar too, keyed by our id.
            self.view.players.insert(
                self.local_id,
                PlayerMirror {
                    state,
                    sequence,
                    updated_at: now,
                },
            );
            out.push(Envelope::new(
                MessageKind::PlayerState,
                self.local_id,
                sequence,
                timestamp,
                state.to_bytes(),
            ));
        }

        for spawn in std::mem::take(&mut self.pending_projectiles) {
            let sequence = self.next_sequence();
            out.push(Envelope::new(
                MessageKind::ProjectileSpawn,
                self.local_id,
                sequence,
                timestamp,
                spawn.to_bytes(),
            ));
        }

        for spawn in std::mem::take(&mut self.pending_effects) {
            let sequence = self.next_sequence();
            out.push(Envelope::new(
                MessageKind::EffectSpawn,
                self.local_id,
                sequence,
                timestamp,
                spawn.to_bytes(),
            ));
        }

        for state in std::mem::take(&mut self.pending_enemies) {
            let sequence = self.next_sequence();
            out.push(Envelope::new(
                MessageKind::EnemyState,
                self.local_id,
                sequence,
                timestamp,
                state.to_bytes(),
            ));
        }

        out
    }

    /// Drops a departed participant's avatar and everything it owned.
    pub fn remove_participant(&mut self, id: ParticipantId) {
        self.view.players.remove(&id);
        self.view
            .projectiles
            .retain(|projectile_id, _| projectile_id.owner() != id);
        self.view.effects.retain(|effect_id, _| effect_id.owner() != id);
    }

    /// Sweeps mirrored entities past their lifetime.
    pub fn sweep(&mut self, now: Instant, projectile_lifetime: Duration, effect_lifetime: Duration) {
        self.view
            .projectiles
            .retain(|_, mirror| now.duration_since(mirror.spawned_at) < projectile_lifetime);
        self.view
            .effects
            .retain(|_, mirror| now.duration_since(mirror.spawned_at) < effect_lifetime);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCAL: ParticipantId = ParticipantId(2);
    const HOST: ParticipantId = ParticipantId(1);
    const OTHER: ParticipantId = ParticipantId(3);

    fn sync() -> Synchronizer {
        Synchronizer::new(LOCAL, HOST)
    }

    fn player_envelope(sender: ParticipantId, sequence: u64, x: f32) -> Envelope {
        let state = PlayerState::new(Vec2::new(x, 0.0), 100, 100);
        Envelope::new(
            MessageKind::PlayerState,
            sender,
            sequence,
            0.0,
            state.to_bytes(),
        )
    }

    fn enemy_envelope(sender: ParticipantId, enemy_id: u32) -> Envelope {
        let state = EnemyState {
            enemy_id,
            position: Vec2::new(1.0, 2.0),
            health: 10,
            max_health: 10,
            flags: EnemyState::FLAG_ALIVE,
            _pad: [0; 3],
        };
        Envelope::new(MessageKind::EnemyState, sender, 1, 0.0, state.to_bytes())
    }

    #[test]
    fn test_highest_sequence_wins_in_either_order() {
        let now = Instant::now();

        // Low then high.
        let mut forward = sync();
        assert_eq!(
            forward.apply(&player_envelope(OTHER, 3, 30.0), now).unwrap(),
            ApplyOutcome::Applied
        );
        assert_eq!(
            forward.apply(&player_envelope(OTHER, 5, 50.0), now).unwrap(),
            ApplyOutcome::Applied
        );

        // High then low.
        let mut reversed = sync();
        assert_eq!(
            reversed.apply(&player_envelope(OTHER, 5, 50.0), now).unwrap(),
            ApplyOutcome::Applied
        );
        assert_eq!(
            reversed.apply(&player_envelope(OTHER, 3, 30.0), now).unwrap(),
            ApplyOutcome::Stale
        );

        for synchronizer in [&forward, &reversed] {
            let mirror = synchronizer.world().player(OTHER).unwrap();
            assert_eq!(mirror.sequence, 5);
            assert!((mirror.state.position.x - 50.0).abs() < f32::EPSILON);
        }
    }

    #[test]
    fn test_equal_sequence_applies() {
        let now = Instant::now();
        let mut synchronizer = sync();
        synchronizer
            .apply(&player_envelope(OTHER, 4, 10.0), now)
            .unwrap();
        assert_eq!(
            synchronizer
                .apply(&player_envelope(OTHER, 4, 20.0), now)
                .unwrap(),
            ApplyOutcome::Applied
        );
    }

    #[test]
    fn test_own_avatar_never_overwritten() {
        let now = Instant::now();
        let mut synchronizer = sync();
        synchronizer.report_local_player_state(PlayerState::new(Vec2::new(1.0, 1.0), 100, 100));
        let _ = synchronizer.publish(0.0, now);

        assert_eq!(
            synchronizer
                .apply(&player_envelope(LOCAL, 99, 500.0), now)
                .unwrap(),
            ApplyOutcome::Ignored
        );
        let mirror = synchronizer.world().player(LOCAL).unwrap();
        assert!((mirror.state.position.x - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_projectile_creation_is_idempotent() {
        let now = Instant::now();
        let mut synchronizer = sync();

        let first = ProjectileSpawn {
            projectile_id: ProjectileId::new(OTHER, 1),
            origin: Vec2::new(5.0, 5.0),
            direction: Vec2::X,
            speed: 100.0,
            weapon_id: 1,
            _pad: [0; 2],
        };
        let mut replay = first;
        replay.origin = Vec2::new(999.0, 999.0);

        let envelope = |spawn: &ProjectileSpawn, seq| {
            Envelope::new(
                MessageKind::ProjectileSpawn,
                OTHER,
                seq,
                0.0,
                spawn.to_bytes(),
            )
        };

        assert_eq!(
            synchronizer.apply(&envelope(&first, 1), now).unwrap(),
            ApplyOutcome::Applied
        );
        assert_eq!(
            synchronizer.apply(&envelope(&replay, 2), now).unwrap(),
            ApplyOutcome::Duplicate
        );

        let mirror = &synchronizer.world().projectiles()[&first.projectile_id];
        assert!((mirror.spawn.origin.x - 5.0).abs() < f32::EPSILON, "no overwrite");
    }

    #[test]
    fn test_non_host_enemy_state_never_applied() {
        let now = Instant::now();

        // In every ordering relative to legitimate host traffic.
        let mut synchronizer = sync();
        assert_eq!(
            synchronizer.apply(&enemy_envelope(OTHER, 7), now).unwrap(),
            ApplyOutcome::AuthorityRejected
        );
        assert!(synchronizer.world().enemies().is_empty());

        assert_eq!(
            synchronizer.apply(&enemy_envelope(HOST, 7), now).unwrap(),
            ApplyOutcome::Applied
        );
        assert_eq!(
            synchronizer.apply(&enemy_envelope(OTHER, 7), now).unwrap(),
            ApplyOutcome::AuthorityRejected
        );

        assert_eq!(synchronizer.world().enemies().len(), 1);
        assert_eq!(synchronizer.violation_count(), 2);
    }

    #[test]
    fn test_dead_enemy_removed() {
        let now = Instant::now();
        let mut synchronizer = sync();
        synchronizer.apply(&enemy_envelope(HOST, 4), now).unwrap();
        assert_eq!(synchronizer.world().enemies().len(), 1);

        let dead = EnemyState {
            enemy_id: 4,
            position: Vec2::ZERO,
            health: 0,
            max_health: 10,
            flags: 0,
            _pad: [0; 3],
        };
        let envelope = Envelope::new(MessageKind::EnemyState, HOST, 2, 0.0, dead.to_bytes());
        synchronizer.apply(&envelope, now).unwrap();
        assert!(synchronizer.world().enemies().is_empty());
    }

    #[test]
    fn test_publish_drains_with_monotonic_sequences() {
        let now = Instant::now();
        let mut synchronizer = sync();

        synchronizer.report_local_player_state(PlayerState::new(Vec2::ZERO, 100, 100));
        synchronizer.report_projectile_spawned(Vec2::ZERO, Vec2::X, 50.0, 1, now);
        synchronizer.report_effect_spawned(EffectKind::MuzzleFlash, Vec2::ZERO, [0.0; 4], now);

        let first_batch = synchronizer.publish(1.0, now);
        assert_eq!(first_batch.len(), 3);
        let sequences: Vec<u64> = first_batch.iter().map(|e| e.sequence).collect();
        let mut sorted = sequences.clone();
        sorted.sort_unstable();
        assert_eq!(sequences, sorted, "sequences must be monotonic");
        assert!(first_batch.iter().all(|e| e.sender == LOCAL));

        // Spawns drained; avatar state publishes every tick.
        let second_batch = synchronizer.publish(2.0, now);
        assert_eq!(second_batch.len(), 1);
        assert_eq!(second_batch[0].kind, MessageKind::PlayerState);
        assert!(second_batch[0].sequence > sequences[sequences.len() - 1]);
    }

    #[test]
    fn test_remove_participant_drops_owned_entities() {
        let now = Instant::now();
        let mut synchronizer = sync();

        synchronizer
            .apply(&player_envelope(OTHER, 1, 10.0), now)
            .unwrap();
        let spawn = ProjectileSpawn {
            projectile_id: ProjectileId::new(OTHER, 1),
            origin: Vec2::ZERO,
            direction: Vec2::X,
            speed: 10.0,
            weapon_id: 1,
            _pad: [0; 2],
        };
        synchronizer
            .apply(&Envelope::new(
                MessageKind::ProjectileSpawn,
                OTHER,
                2,
                0.0,
                spawn.to_bytes(),
            ), now)
            .unwrap();

        synchronizer.remove_participant(OTHER);
        assert!(synchronizer.world().player(OTHER).is_none());
        assert!(synchronizer.world().projectiles().is_empty());
    }

    #[test]
    fn test_sweep_expires_old_entities() {
        let now = Instant::now();
        let mut synchronizer = sync();
        synchronizer.report_projectile_spawned(Vec2::ZERO, Vec2::X, 50.0, 1, now);
        synchronizer.report_effect_spawned(EffectKind::Impact, Vec2::ZERO, [0.0; 4], now);

        let later = now + Duration::from_secs(10);
        synchronizer.sweep(later, Duration::from_secs(5), Duration::from_secs(2));
        assert!(synchronizer.world().projectiles().is_empty());
        assert!(synchronizer.world().effects().is_empty());
    }
}
