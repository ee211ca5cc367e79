//! # KINGSPIRE Netcode
//!
//! The multiplayer session core: connection lifecycle, lobby coordination,
//! and per-tick reconciliation of world state across 2-4 participants.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        GAME HOST                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐      │
//! │  │ Listener     │  │ Session      │  │ Lobby        │      │
//! │  │ (accept)     │──│ Registry     │──│ State Machine│      │
//! │  └──────────────┘  └──────────────┘  └──────────────┘      │
//! │         │                 │                 │               │
//! │  reader thread per connection feeds one signal channel      │
//! │         │                 │                 │               │
//! │              ┌────────────▼──────────┐                     │
//! │              │   Synchronizer        │  single-threaded    │
//! │              │   (WorldStateView)    │  tick drain         │
//! │              └───────────────────────┘                     │
//! └─────────────────────────────────────────────────────────────┘
//!          ▲                ▲                 ▲
//!          │ TCP            │ TCP             │ TCP
//!      ┌───┴────┐      ┌────┴───┐        ┌────┴───┐
//!      │ JOINER │      │ JOINER │        │ JOINER │   (star relay:
//!      └────────┘      └────────┘        └────────┘    joiners never
//!                                                      address each other)
//! ```
//!
//! ## Authority Model
//!
//! - Each player's own avatar is locally authoritative: the owner computes
//!   and broadcasts it, everyone else mirrors it verbatim.
//! - Enemies are host-authoritative always. A non-host sending enemy state
//!   is a protocol violation: logged, dropped, never applied.
//! - The host relays all joiner traffic; only the host's death ends the
//!   session.
//!
//! ## Threading
//!
//! One reader thread and one keepalive thread per connection. Decoded
//! envelopes flow through a channel into [`GameHost::update`] /
//! [`GameClient::update`], which is the only place shared world state
//! mutates. Sending is safe from any thread.

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod host;
pub mod lobby;
pub mod session;
pub mod sync;
pub mod tick;

// Re-exports for convenience
pub use client::{ClientState, GameClient};
pub use config::{HeartbeatConfig, HostConfig, JoinConfig};
pub use connection::{
    Connection, ConnectionId, DisconnectReason, Listener, LinkStatsSnapshot, SendError,
};
pub use error::{ConfigError, ConnectError, LobbyError, LobbyResult};
pub use events::SessionEvent;
pub use host::GameHost;
pub use lobby::{Participant, Room, RoomPhase};
pub use session::{SessionRegistry, HOST_PARTICIPANT_ID};
pub use sync::{ApplyOutcome, Synchronizer, WorldView};
pub use tick::TickLoop;

/// Default port for hosted sessions.
pub const DEFAULT_PORT: u16 = 7777;

/// Default outbound publication rate (ticks per second).
pub const DEFAULT_TICK_RATE: u32 = 60;

/// Hard cap on room size. The session core is built for small rooms.
pub const MAX_ROOM_PLAYERS: u8 = 4;

/// Seconds since the unix epoch, as stamped on outgoing envelopes.
pub(crate) fn unix_timestamp() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or(0.0)
}
