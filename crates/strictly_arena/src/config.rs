//! Arena configuration.
//!
//! Every knob has a serde default, so an empty TOML file (or no file at all)
//! yields the stock tuning: 5 minute energy regen, a level tolerance of 2,
//! 30 second fairness window, 10 queue actions per minute and 5 minute
//! queue expiry.

use chrono::TimeDelta;
use derive_getters::Getters;
use derive_more::{Display, Error};
use derive_setters::Setters;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, instrument};

/// Environment variable naming the config file used by the binary.
pub const CONFIG_ENV_VAR: &str = "STRICTLY_ARENA_CONFIG";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Getters, Setters, Serialize, Deserialize)]
#[setters(prefix = "with_")]
pub struct ArenaConfig {
    /// Energy regeneration and cost.
    #[serde(default)]
    energy: EnergyConfig,

    /// Queue scoring, rate limiting and expiry.
    #[serde(default)]
    matchmaking: MatchmakingConfig,
}

impl ArenaConfig {
    /// Loads configuration from a TOML file.
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        debug!("Loading config from file");
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::new(format!("Failed to read config file: {}", e)))?;

        let config = Self::from_toml(&content)?;
        info!("Config loaded successfully");
        Ok(config)
    }

    /// Parses configuration from a TOML string and validates it.
    #[instrument(skip(content))]
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)
            .map_err(|e| ConfigError::new(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes the configuration back to TOML.
    #[instrument(skip(self))]
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self)
            .map_err(|e| ConfigError::new(format!("Failed to serialize config: {}", e)))
    }

    /// Rejects values that would make the arithmetic meaningless.
    #[instrument(skip(self))]
    pub fn validate(&self) -> Result<(), ConfigError> {
        let energy = &self.energy;
        if energy.max_energy <= 0 {
            return Err(ConfigError::new("energy.max_energy must be positive"));
        }
        if energy.regen_interval_secs == 0 {
            return Err(ConfigError::new("energy.regen_interval_secs must be positive"));
        }
        if energy.cost_per_game <= 0 || energy.cost_per_game > energy.max_energy {
            return Err(ConfigError::new(
                "energy.cost_per_game must be in 1..=max_energy",
            ));
        }

        let mm = &self.matchmaking;
        if mm.level_tolerance == 0 {
            return Err(ConfigError::new("matchmaking.level_tolerance must be positive"));
        }
        if mm.max_wait_ms == 0 {
            return Err(ConfigError::new("matchmaking.max_wait_ms must be positive"));
        }
        if mm.rate_limit_actions == 0 || mm.rate_limit_window_secs == 0 {
            return Err(ConfigError::new("matchmaking rate limit must be positive"));
        }
        if mm.expiry_ms == 0 {
            return Err(ConfigError::new("matchmaking.expiry_ms must be positive"));
        }
        Ok(())
    }
}

/// Energy resource tuning.
#[derive(Debug, Clone, PartialEq, Eq, Getters, Setters, Serialize, Deserialize)]
#[setters(prefix = "with_")]
pub struct EnergyConfig {
    /// Capacity used when the caller does not supply one.
    #[serde(default = "default_max_energy")]
    max_energy: i64,

    /// Seconds per regenerated unit.
    #[serde(default = "default_regen_interval_secs")]
    regen_interval_secs: u64,

    /// Units consumed per game.
    #[serde(default = "default_cost_per_game")]
    cost_per_game: i64,
}

impl EnergyConfig {
    /// Regen interval as a time delta.
    pub fn regen_interval(&self) -> TimeDelta {
        i64::try_from(self.regen_interval_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX)
    }
}

impl Default for EnergyConfig {
    fn default() -> Self {
        Self {
            max_energy: default_max_energy(),
            regen_interval_secs: default_regen_interval_secs(),
            cost_per_game: default_cost_per_game(),
        }
    }
}

/// Matchmaking queue tuning.
#[derive(Debug, Clone, PartialEq, Eq, Getters, Setters, Serialize, Deserialize)]
#[setters(prefix = "with_")]
pub struct MatchmakingConfig {
    /// Largest accepted level gap before the fairness relaxation.
    #[serde(default = "default_level_tolerance")]
    level_tolerance: u32,

    /// Wait after which the requester's tolerance doubles.
    #[serde(default = "default_max_wait_ms")]
    max_wait_ms: u64,

    /// Enroll/withdraw actions allowed per identity per window.
    #[serde(default = "default_rate_limit_actions")]
    rate_limit_actions: usize,

    /// Rolling rate limit window.
    #[serde(default = "default_rate_limit_window_secs")]
    rate_limit_window_secs: u64,

    /// Age after which a queue entry is swept.
    #[serde(default = "default_expiry_ms")]
    expiry_ms: u64,
}

impl MatchmakingConfig {
    /// Fairness window as a time delta.
    pub fn max_wait(&self) -> TimeDelta {
        millis(self.max_wait_ms)
    }

    /// Rate limit window as a time delta.
    pub fn rate_limit_window(&self) -> TimeDelta {
        millis(self.rate_limit_window_secs.saturating_mul(1000))
    }

    /// Queue expiry as a time delta.
    pub fn expiry(&self) -> TimeDelta {
        millis(self.expiry_ms)
    }
}

impl Default for MatchmakingConfig {
    fn default() -> Self {
        Self {
            level_tolerance: default_level_tolerance(),
            max_wait_ms: default_max_wait_ms(),
            rate_limit_actions: default_rate_limit_actions(),
            rate_limit_window_secs: default_rate_limit_window_secs(),
            expiry_ms: default_expiry_ms(),
        }
    }
}

fn millis(ms: u64) -> TimeDelta {
    i64::try_from(ms)
        .ok()
        .and_then(TimeDelta::try_milliseconds)
        .unwrap_or(TimeDelta::MAX)
}

fn default_max_energy() -> i64 {
    5
}

fn default_regen_interval_secs() -> u64 {
    300
}

fn default_cost_per_game() -> i64 {
    1
}

fn default_level_tolerance() -> u32 {
    2
}

fn default_max_wait_ms() -> u64 {
    30_000
}

fn default_rate_limit_actions() -> usize {
    10
}

fn default_rate_limit_window_secs() -> u64 {
    60
}

fn default_expiry_ms() -> u64 {
    300_000
}

/// Configuration error.
#[derive(Debug, Clone, Display, Error)]
#[display("Config error: {} at {}:{}", message, file, line)]
pub struct ConfigError {
    /// Error message.
    pub message: String,
    /// Line number where error occurred.
    pub line: u32,
    /// Source file where error occurred.
    pub file: &'static str,
}

impl ConfigError {
    /// Creates a new configuration error.
    #[track_caller]
    pub fn new(message: impl Into<String>) -> Self {
        let loc = std::panic::Location::caller();
        Self {
            message: message.into(),
            line: loc.line(),
            file: loc.file(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = ArenaConfig::from_toml("").unwrap();
        assert_eq!(config, ArenaConfig::default());
        assert_eq!(*config.energy().cost_per_game(), 1);
        assert_eq!(config.energy().regen_interval(), TimeDelta::minutes(5));
        assert_eq!(config.matchmaking().max_wait(), TimeDelta::seconds(30));
        assert_eq!(config.matchmaking().expiry(), TimeDelta::minutes(5));
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config = ArenaConfig::from_toml(
            r#"
            [matchmaking]
            level_tolerance = 4
            "#,
        )
        .unwrap();
        assert_eq!(*config.matchmaking().level_tolerance(), 4);
        assert_eq!(*config.matchmaking().max_wait_ms(), 30_000);
        assert_eq!(*config.energy().max_energy(), 5);
    }

    #[test]
    fn test_zero_tolerance_rejected() {
        let err = ArenaConfig::from_toml("[matchmaking]\nlevel_tolerance = 0\n").unwrap_err();
        assert!(err.message.contains("level_tolerance"));
    }

    #[test]
    fn test_cost_above_capacity_rejected() {
        let config = ArenaConfig::default().with_energy(
            EnergyConfig::default()
                .with_max_energy(3)
                .with_cost_per_game(4),
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_round_trips_through_toml() {
        let config = ArenaConfig::default()
            .with_matchmaking(MatchmakingConfig::default().with_rate_limit_actions(3));
        let text = config.to_toml().unwrap();
        assert_eq!(ArenaConfig::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn test_malformed_toml_reports_location() {
        let err = ArenaConfig::from_toml("[energy\n").unwrap_err();
        assert!(err.message.starts_with("Failed to parse config"));
        assert!(err.file.ends_with("config.rs"));
    }
}
