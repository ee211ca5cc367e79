//! # Endpoint Configuration
//!
//! Construction-time parameters for hosts and joiners. Nothing here is
//! hard-coded into the session core; everything arrives through these
//! structs, optionally loaded from a TOML file at startup.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::{DEFAULT_PORT, DEFAULT_TICK_RATE, MAX_ROOM_PLAYERS};

/// Liveness detection parameters.
///
/// A connection sends a heartbeat after `interval_ms` without outbound
/// traffic, and declares its peer dead after `timeout_ms` without inbound
/// traffic of any kind. This bounds detection latency without flooding the
/// link.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Quiet time before a heartbeat is sent, in milliseconds.
    pub interval_ms: u64,
    /// Inbound silence before the peer is declared dead, in milliseconds.
    pub timeout_ms: u64,
}

impl HeartbeatConfig {
    /// Heartbeat interval as a [`Duration`].
    #[inline]
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Liveness timeout as a [`Duration`].
    #[inline]
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_ms == 0 {
            return Err(ConfigError::Invalid {
                reason: "heartbeat interval_ms must be positive".to_string(),
            });
        }
        if self.timeout_ms <= self.interval_ms {
            return Err(ConfigError::Invalid {
                reason: format!(
                    "heartbeat timeout_ms ({}) must exceed interval_ms ({})",
                    self.timeout_ms, self.interval_ms
                ),
            });
        }
        Ok(())
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1_000,
            timeout_ms: 5_000,
        }
    }
}

/// Configuration for the hosting endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Address to listen on.
    pub listen_addr: SocketAddr,
    /// The host player's display name.
    pub display_name: String,
    /// Maximum participants, host included.
    pub max_players: u8,
    /// Host-chosen room id, echoed to joiners.
    pub room_id: u32,
    /// Game mode label shown in the lobby.
    pub game_mode: String,
    /// Map label shown in the lobby.
    pub map_name: String,
    /// Outbound publication rate in ticks per second.
    pub tick_rate: u32,
    /// Liveness parameters applied to every accepted connection.
    pub heartbeat: HeartbeatConfig,
    /// Mirrored projectiles older than this are swept, in milliseconds.
    pub projectile_lifetime_ms: u64,
    /// Mirrored effects older than this are swept, in milliseconds.
    pub effect_lifetime_ms: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            display_name: "Host".to_string(),
            max_players: MAX_ROOM_PLAYERS,
            room_id: 1,
            game_mode: "Survival".to_string(),
            map_name: "Field-Large".to_string(),
            tick_rate: DEFAULT_TICK_RATE,
            heartbeat: HeartbeatConfig::default(),
            projectile_lifetime_ms: 5_000,
            effect_lifetime_ms: 2_000,
        }
    }
}

impl HostConfig {
    /// Loads and validates a host configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on read, parse, or validation failure.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration for self-consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] with the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_players < 2 || self.max_players > MAX_ROOM_PLAYERS {
            return Err(ConfigError::Invalid {
                reason: format!(
                    "max_players must be between 2 and {MAX_ROOM_PLAYERS}, got {}",
                    self.max_players
                ),
            });
        }
        if self.tick_rate == 0 {
            return Err(ConfigError::Invalid {
                reason: "tick_rate must be positive".to_string(),
            });
        }
        if self.display_name.is_empty() {
            return Err(ConfigError::Invalid {
                reason: "display_name must not be empty".to_string(),
            });
        }
        self.heartbeat.validate()
    }

    /// Publication interval derived from the tick rate.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.tick_rate.max(1)))
    }
}

/// Configuration for a joining endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinConfig {
    /// The host to dial.
    pub server_addr: SocketAddr,
    /// This player's display name.
    pub display_name: String,
    /// Dial timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Outbound publication rate in ticks per second.
    pub tick_rate: u32,
    /// Liveness parameters for the host link.
    pub heartbeat: HeartbeatConfig,
    /// Mirrored projectiles older than this are swept, in milliseconds.
    pub projectile_lifetime_ms: u64,
    /// Mirrored effects older than this are swept, in milliseconds.
    pub effect_lifetime_ms: u64,
}

impl Default for JoinConfig {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            display_name: "Player".to_string(),
            connect_timeout_ms: 5_000,
            tick_rate: DEFAULT_TICK_RATE,
            heartbeat: HeartbeatConfig::default(),
            projectile_lifetime_ms: 5_000,
            effect_lifetime_ms: 2_000,
        }
    }
}

impl JoinConfig {
    /// Loads and validates a join configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on read, parse, or validation failure.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration for self-consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] with the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.display_name.is_empty() {
            return Err(ConfigError::Invalid {
                reason: "display_name must not be empty".to_string(),
            });
        }
        if self.tick_rate == 0 {
            return Err(ConfigError::Invalid {
                reason: "tick_rate must be positive".to_string(),
            });
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                reason: "connect_timeout_ms must be positive".to_string(),
            });
        }
        self.heartbeat.validate()
    }

    /// Publication interval derived from the tick rate.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.tick_rate.max(1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(HostConfig::default().validate().is_ok());
        assert!(JoinConfig::default().validate().is_ok());
    }

    #[test]
    fn test_heartbeat_bounds() {
        let degenerate = HeartbeatConfig {
            interval_ms: 1_000,
            timeout_ms: 500,
        };
        assert!(degenerate.validate().is_err());

        let zero = HeartbeatConfig {
            interval_ms: 0,
            timeout_ms: 5_000,
        };
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_max_players_bounds() {
        let mut config = HostConfig::default();
        config.max_players = 1;
        assert!(config.validate().is_err());
        config.max_players = MAX_ROOM_PLAYERS + 1;
        assert!(config.validate().is_err());
        config.max_players = 2;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = HostConfig::default();
        let text = toml::to_string(&config).unwrap();
        let parsed: HostConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.max_players, config.max_players);
        assert_eq!(parsed.listen_addr, config.listen_addr);
        assert_eq!(parsed.heartbeat, config.heartbeat);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let parsed: JoinConfig = toml::from_str("display_name = \"Scarlet\"").unwrap();
        assert_eq!(parsed.display_name, "Scarlet");
        assert_eq!(parsed.heartbeat, HeartbeatConfig::default());
        assert_eq!(parsed.tick_rate, DEFAULT_TICK_RATE);
    }
}
