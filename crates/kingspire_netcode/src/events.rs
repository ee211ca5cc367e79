//! # Session Events
//!
//! The notification surface delivered to the gameplay layer, and the internal
//! signal channel that carries decoded traffic from reader threads into the
//! simulation tick.

use kingspire_protocol::{Envelope, LeaveReason, ParticipantId, RoomInfo};

use crate::connection::{ConnectionId, DisconnectReason};
use crate::lobby::{Participant, RoomPhase};

/// A notification delivered to the gameplay layer by
/// [`GameHost::update`](crate::GameHost::update) or
/// [`GameClient::update`](crate::GameClient::update).
#[derive(Clone, Debug)]
pub enum SessionEvent {
    /// (Joiner only) The host accepted our join and assigned us an id.
    JoinAccepted {
        /// Our assigned participant id.
        id: ParticipantId,
        /// Room metadata from the host.
        room: RoomInfo,
    },

    /// (Joiner only) The host rejected our join.
    JoinRejected {
        /// Why the join was rejected.
        reason: LeaveReason,
    },

    /// A participant entered the room.
    ParticipantJoined(Participant),

    /// A participant left the room.
    ParticipantLeft {
        /// Who left.
        id: ParticipantId,
        /// Why they left.
        reason: LeaveReason,
    },

    /// A participant's ready flag changed.
    ReadinessChanged {
        /// Whose flag changed.
        id: ParticipantId,
        /// The new value.
        ready: bool,
    },

    /// A participant's character selection changed.
    CharacterChanged {
        /// Whose selection changed.
        id: ParticipantId,
        /// The selected character.
        character: String,
    },

    /// The room moved to a new phase.
    PhaseChanged(RoomPhase),

    /// The match is live; gameplay state is now owned by the synchronizer.
    GameStarted,

    /// (Joiner only) The link to the host died. Delivered exactly once.
    ConnectionLost {
        /// What killed the link.
        reason: DisconnectReason,
    },

    /// The room was torn down.
    RoomClosed,
}

/// Internal signal from a connection's reader thread.
#[derive(Debug)]
pub(crate) enum NetSignal {
    /// A decoded non-keepalive envelope arrived.
    Frame {
        /// Which connection it arrived on.
        conn: ConnectionId,
        /// The decoded envelope.
        envelope: Envelope,
    },
    /// The connection is dead. Emitted exactly once per connection.
    Closed {
        /// Which connection died.
        conn: ConnectionId,
        /// Why it died.
        reason: DisconnectReason,
    },
}

/// Channel for signals between connection threads and the simulation tick.
///
/// Uses crossbeam for lock-free communication.
pub(crate) struct EventChannel<T> {
    sender: crossbeam_channel::Sender<T>,
    receiver: crossbeam_channel::Receiver<T>,
}

impl<T> EventChannel<T> {
    /// Creates a new unbounded event channel.
    pub(crate) fn unbounded() -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self { sender, receiver }
    }

    /// Tries to receive an event (non-blocking).
    pub(crate) fn try_recv(&self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    /// Gets a clone of the sender for another thread.
    pub(crate) fn sender(&self) -> crossbeam_channel::Sender<T> {
        self.sender.clone()
    }
}
