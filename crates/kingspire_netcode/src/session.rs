//! # Session Registry
//!
//! Host-side tracking of live connections and participant id assignment.
//!
//! ## Design
//!
//! All mutation goes through one lock, so id assignment is serialized: two
//! simultaneous accepts can never receive the same id, and ids are never
//! reused within a session.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use kingspire_protocol::{Envelope, ParticipantId};

use crate::connection::Connection;

/// The host's own participant id. Joiner ids start after it.
pub const HOST_PARTICIPANT_ID: ParticipantId = ParticipantId(1);

struct Inner {
    next_id: u32,
    members: BTreeMap<ParticipantId, Arc<Connection>>,
}

/// The live set of joiner connections, keyed by participant id.
///
/// The host itself has no entry here: it owns the registry.
pub struct SessionRegistry {
    inner: Mutex<Inner>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_id: HOST_PARTICIPANT_ID.0 + 1,
                members: BTreeMap::new(),
            }),
        }
    }

    /// Admits a connection, assigning it a fresh participant id.
    pub fn register(&self, connection: Arc<Connection>) -> ParticipantId {
        let mut inner = self.inner.lock();
        let id = ParticipantId(inner.next_id);
        inner.next_id += 1;
        inner.members.insert(id, connection);
        debug!(%id, "participant registered");
        id
    }

    /// Removes a participant, returning its connection for teardown.
    pub fn unregister(&self, id: ParticipantId) -> Option<Arc<Connection>> {
        let removed = self.inner.lock().members.remove(&id);
        if removed.is_some() {
            debug!(%id, "participant unregistered");
        }
        removed
    }

    /// Looks up a participant's connection.
    #[must_use]
    pub fn connection(&self, id: ParticipantId) -> Option<Arc<Connection>> {
        self.inner.lock().members.get(&id).cloned()
    }

    /// Number of registered joiners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().members.len()
    }

    /// Returns true when no joiners are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().members.is_empty()
    }

    /// Sends an envelope to every registered joiner except `excluding`.
    ///
    /// Send failures are not surfaced here: a failed connection kills itself
    /// and the owner observes its single `Closed` signal.
    pub fn broadcast(&self, envelope: &Envelope, excluding: Option<ParticipantId>) {
        // Snapshot under the lock, send outside it: a slow peer must not
        // stall registry mutation.
        let targets: Vec<(ParticipantId, Arc<Connection>)> = {
            let inner = self.inner.lock();
            inner
                .members
                .iter()
                .filter(|(id, _)| Some(**id) != excluding)
                .map(|(id, conn)| (*id, Arc::clone(conn)))
                .collect()
        };

        for (id, connection) in targets {
            if let Err(err) = connection.send(envelope) {
                debug!(%id, %err, "broadcast send failed");
            }
        }
    }

    /// Sends an envelope to one participant.
    ///
    /// Returns false if the participant is unknown or the send failed.
    pub fn send_to(&self, id: ParticipantId, envelope: &Envelope) -> bool {
        match self.connection(id) {
            Some(connection) => connection.send(envelope).is_ok(),
            None => false,
        }
    }

    /// Visits every registered joiner.
    pub fn for_each_participant(&self, mut visit: impl FnMut(ParticipantId, &Arc<Connection>)) {
        let targets: Vec<(ParticipantId, Arc<Connection>)> = {
            let inner = self.inner.lock();
            inner
                .members
                .iter()
                .map(|(id, conn)| (*id, Arc::clone(conn)))
                .collect()
        };
        for (id, connection) in &targets {
            visit(*id, connection);
        }
    }

    /// Removes and returns every connection, emptying the registry.
    pub fn drain(&self) -> Vec<(ParticipantId, Arc<Connection>)> {
        let mut inner = self.inner.lock();
        let members = std::mem::take(&mut inner.members);
        members.into_iter().collect()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
