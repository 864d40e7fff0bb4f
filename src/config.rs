use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Sentinel for a disabled cooldown in configuration files
pub const COOLDOWN_DISABLED: i64 = -1;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Cooldown durations in seconds. `-1` disables a cooldown entirely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CooldownConfig {
    pub join_secs: i64,
    /// Per-world override of `join_secs`
    pub join_per_world: HashMap<String, i64>,
    pub leave_secs: i64,
    pub post_dispatch_secs: i64,
    /// Participants holding this permission skip every cooldown
    pub bypass_permission: String,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            join_secs: 5,
            join_per_world: HashMap::new(),
            leave_secs: 3,
            post_dispatch_secs: 60,
            bypass_permission: "rtpqueue.bypass.cooldown".to_string(),
        }
    }
}

impl CooldownConfig {
    /// Convert a configured value; `None` means disabled
    pub fn to_duration(secs: i64) -> Option<Duration> {
        if secs < 0 {
            None
        } else {
            Some(Duration::from_secs(secs as u64))
        }
    }

    /// Join cooldown for a world, honouring per-world overrides
    pub fn join_for(&self, world: Option<&str>) -> Option<Duration> {
        let secs = world
            .and_then(|w| self.join_per_world.get(w).copied())
            .unwrap_or(self.join_secs);
        Self::to_duration(secs)
    }
}

/// Location search limits and cache sizing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Attempts made inline on a cache miss before falling back to a background search
    pub sync_attempts: u32,
    /// Candidates sampled per background pace tick
    pub candidates_per_tick: u32,
    /// Wall-clock limit for one background search
    pub timeout_ms: u64,
    /// Maximum cached locations per world
    pub cache_cap: usize,
    /// Start a cache top-up for every zone at startup and reload
    pub warm_on_start: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            sync_attempts: 3,
            candidates_per_tick: 4,
            timeout_ms: 10_000,
            cache_cap: 5,
            warm_on_start: true,
        }
    }
}

impl SearchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Dispatch core configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Participants per group
    pub required_size: usize,
    /// Countdown length in seconds (0 skips the countdown)
    pub countdown_secs: u32,
    /// Cancel the whole session when any participant departs
    pub cancel_on_any_departure: bool,
    /// World used when a join names none
    pub default_world: Option<String>,
    /// Query claim integrations before dispatch
    pub claim_check: bool,
    /// Use the world spawn when no safe location is found
    pub fallback_to_spawn: bool,
    pub cancel_on_move: bool,
    pub cancel_on_damage: bool,
    pub cancel_on_chat: bool,
    pub cooldowns: CooldownConfig,
    pub search: SearchConfig,
    /// Length of one host tick
    pub tick_millis: u64,
    /// Interval of the offline and cooldown sweep
    pub maintenance_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            required_size: 2,
            countdown_secs: 5,
            cancel_on_any_departure: false,
            default_world: None,
            claim_check: true,
            fallback_to_spawn: false,
            cancel_on_move: true,
            cancel_on_damage: true,
            cancel_on_chat: true,
            cooldowns: CooldownConfig::default(),
            search: SearchConfig::default(),
            tick_millis: 50,
            maintenance_secs: 30,
        }
    }
}

impl DispatchConfig {
    /// Load config from `RTPQ_CONFIG` (JSON) and environment overrides, or use defaults
    pub fn load_or_default() -> Self {
        let mut config = match std::env::var("RTPQ_CONFIG") {
            Ok(path) => match Self::from_file(&path) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Could not load '{}': {}, using defaults", path, e);
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        };

        if let Some(size) = env_parse::<usize>("RTPQ_REQUIRED_SIZE") {
            if size >= 2 {
                config.required_size = size;
            } else {
                tracing::warn!("RTPQ_REQUIRED_SIZE must be >= 2, using default");
            }
        }

        if let Some(secs) = env_parse::<u32>("RTPQ_COUNTDOWN_SECS") {
            config.countdown_secs = secs;
        }

        if let Ok(world) = std::env::var("RTPQ_DEFAULT_WORLD") {
            config.default_world = Some(world);
        }

        if let Some(cap) = env_parse::<usize>("RTPQ_CACHE_CAP") {
            config.search.cache_cap = cap;
        }

        if let Some(millis) = env_parse::<u64>("RTPQ_TICK_MILLIS") {
            if millis > 0 {
                config.tick_millis = millis;
            } else {
                tracing::warn!("RTPQ_TICK_MILLIS must be > 0, using default");
            }
        }

        config
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.required_size < 2 {
            return Err(ConfigError::Invalid(
                "required_size must be at least 2".to_string(),
            ));
        }
        if self.tick_millis == 0 {
            return Err(ConfigError::Invalid("tick_millis cannot be 0".to_string()));
        }
        if self.search.candidates_per_tick == 0 {
            return Err(ConfigError::Invalid(
                "search.candidates_per_tick must be at least 1".to_string(),
            ));
        }
        if self.maintenance_secs == 0 {
            return Err(ConfigError::Invalid(
                "maintenance_secs cannot be 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_millis)
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Invalid {} '{}', using default", key, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DispatchConfig::default();
        assert_eq!(config.required_size, 2);
        assert_eq!(config.countdown_secs, 5);
        assert_eq!(config.search.sync_attempts, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_or_default() {
        let config = DispatchConfig::load_or_default();
        assert!(config.required_size >= 2);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = DispatchConfig::from_json(
            r#"{ "required_size": 4, "cooldowns": { "join_secs": -1 } }"#,
        )
        .unwrap();
        assert_eq!(config.required_size, 4);
        assert_eq!(config.countdown_secs, 5);
        assert_eq!(config.cooldowns.join_secs, COOLDOWN_DISABLED);
        assert_eq!(config.cooldowns.leave_secs, 3);
    }

    #[test]
    fn test_invalid_required_size() {
        let result = DispatchConfig::from_json(r#"{ "required_size": 1 }"#);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_join_cooldown_per_world() {
        let mut cooldowns = CooldownConfig::default();
        cooldowns.join_secs = 10;
        cooldowns.join_per_world.insert("arena".to_string(), -1);
        cooldowns.join_per_world.insert("nether".to_string(), 30);

        assert_eq!(cooldowns.join_for(None), Some(Duration::from_secs(10)));
        assert_eq!(cooldowns.join_for(Some("arena")), None);
        assert_eq!(cooldowns.join_for(Some("nether")), Some(Duration::from_secs(30)));
        assert_eq!(cooldowns.join_for(Some("other")), Some(Duration::from_secs(10)));
    }
}
