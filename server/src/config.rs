//! Server and game configuration
//!
//! Values come from an optional TOML file with `[server]` and `[game]`
//! tables. Every field has a default, so an empty file (or no file at all)
//! yields a working configuration. Command-line flags are applied on top by
//! the binary.

use crate::error::ServerError;
use serde::{Deserialize, Serialize};
use shared::{DEFAULT_RANGE_HIGH, DEFAULT_RANGE_LOW};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub game: GameConfig,
}

/// Network-facing settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Maximum number of concurrent websocket connections
    pub max_connections: usize,
    /// How often disconnected sessions and idle rooms are swept, in milliseconds
    pub sweep_interval_ms: u64,
    pub log_level: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            max_connections: 1000,
            sweep_interval_ms: 1000,
            log_level: "info".to_string(),
        }
    }
}

/// Rules of the game and per-room limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GameConfig {
    pub round_duration_secs: u64,
    pub range_low: i64,
    pub range_high: i64,
    /// Every `widen_every` rounds the upper bound grows by `widen_step`
    pub widen_every: u32,
    pub widen_step: i64,
    pub hints_enabled: bool,

    pub base_points: u64,
    pub max_time_bonus: u64,
    pub streak_step_points: u64,
    pub streak_max_steps: u32,

    pub max_rooms: usize,
    pub max_players_limit: usize,
    pub guess_cooldown_ms: u64,
    /// 0 means unlimited
    pub max_guesses_per_round: u32,
    pub max_chat_per_minute: usize,
    pub history_len: usize,

    pub reconnect_grace_secs: u64,
    pub room_idle_timeout_secs: u64,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            round_duration_secs: 30,
            range_low: DEFAULT_RANGE_LOW,
            range_high: DEFAULT_RANGE_HIGH,
            widen_every: 5,
            widen_step: 50,
            hints_enabled: true,
            base_points: 100,
            max_time_bonus: 50,
            streak_step_points: 10,
            streak_max_steps: 5,
            max_rooms: 100,
            max_players_limit: 50,
            guess_cooldown_ms: 500,
            max_guesses_per_round: 10,
            max_chat_per_minute: 10,
            history_len: 10,
            reconnect_grace_secs: 60,
            room_idle_timeout_secs: 600,
        }
    }
}

impl GameConfig {
    pub fn round_duration(&self) -> Duration {
        Duration::from_secs(self.round_duration_secs)
    }

    pub fn reconnect_grace(&self) -> Duration {
        Duration::from_secs(self.reconnect_grace_secs)
    }

    pub fn room_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.room_idle_timeout_secs)
    }

    /// Inclusive range used for the given round number.
    pub fn range_for_round(&self, round_number: u32) -> (i64, i64) {
        if self.widen_every == 0 || self.widen_step <= 0 {
            return (self.range_low, self.range_high);
        }
        let steps = (round_number.saturating_sub(1) / self.widen_every) as i64;
        (
            self.range_low,
            self.range_high.saturating_add(steps.saturating_mul(self.widen_step)),
        )
    }

    pub fn validate(&self) -> Result<(), ServerError> {
        if self.round_duration_secs == 0 {
            return Err(ServerError::Config(
                "round_duration_secs must be positive".to_string(),
            ));
        }
        if self.range_low > self.range_high {
            return Err(ServerError::Config(format!(
                "range_low ({}) exceeds range_high ({})",
                self.range_low, self.range_high
            )));
        }
        if self.max_players_limit == 0 {
            return Err(ServerError::Config(
                "max_players_limit must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Config {
    /// Reads a TOML file. Missing tables and fields fall back to defaults.
    pub fn load(path: &Path) -> Result<Self, ServerError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ServerError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ServerError> {
        let config: Config =
            toml::from_str(text).map_err(|e| ServerError::Config(e.to_string()))?;
        config.game.validate()?;
        Ok(config)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
