//! Watcher configuration
//!
//! Every field has a default, so an empty TOML file is a valid configuration.

use crate::error::WatcherError;
use crate::platform;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Watcher service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Delay for collecting raw events before coalescing them (default: 75ms)
    #[serde(default = "default_coalesce_delay_ms")]
    pub coalesce_delay_ms: u64,

    /// Delay before restarting a watcher after a backend error (default: 800ms)
    #[serde(default = "default_restart_delay_ms")]
    pub restart_delay_ms: u64,

    /// Number of automatic restarts per request before giving up (default: 5)
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,

    /// Downstream throttling
    #[serde(default)]
    pub throttle: ThrottleConfig,

    /// Polling interval used when no native backend is available (default: 5s)
    #[serde(default = "default_fallback_polling_interval_ms")]
    pub fallback_polling_interval_ms: u64,

    /// Check that every requested path is an existing directory (default: true)
    #[serde(default = "default_true")]
    pub validate_paths: bool,

    /// Log every event at trace level (default: false)
    #[serde(default)]
    pub verbose: bool,

    /// Excludes always passed to the backend
    #[serde(default = "platform::predefined_excludes")]
    pub predefined_excludes: Vec<String>,
}

/// Bounds on events forwarded downstream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Events delivered per turn (default: 500)
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,

    /// Rest between turns (default: 200ms)
    #[serde(default = "default_throttle_delay_ms")]
    pub delay_ms: u64,

    /// Events kept in memory while throttled (default: 30000)
    #[serde(default = "default_max_buffered")]
    pub max_buffered: usize,
}

impl ThrottleConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: default_max_chunk_size(),
            delay_ms: default_throttle_delay_ms(),
            max_buffered: default_max_buffered(),
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            coalesce_delay_ms: default_coalesce_delay_ms(),
            restart_delay_ms: default_restart_delay_ms(),
            max_restarts: default_max_restarts(),
            throttle: ThrottleConfig::default(),
            fallback_polling_interval_ms: default_fallback_polling_interval_ms(),
            validate_paths: true,
            verbose: false,
            predefined_excludes: platform::predefined_excludes(),
        }
    }
}

impl WatcherConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: WatcherConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), WatcherError> {
        if self.coalesce_delay_ms == 0 {
            return Err(WatcherError::Config("coalesce_delay_ms must be > 0".into()));
        }
        if self.restart_delay_ms == 0 {
            return Err(WatcherError::Config("restart_delay_ms must be > 0".into()));
        }
        if self.fallback_polling_interval_ms == 0 {
            return Err(WatcherError::Config(
                "fallback_polling_interval_ms must be > 0".into(),
            ));
        }
        if self.throttle.delay_ms == 0 {
            return Err(WatcherError::Config("throttle.delay_ms must be > 0".into()));
        }
        if self.throttle.max_chunk_size == 0 {
            return Err(WatcherError::Config("throttle.max_chunk_size must be >= 1".into()));
        }
        if self.throttle.max_buffered < self.throttle.max_chunk_size {
            return Err(WatcherError::Config(
                "throttle.max_buffered must be >= throttle.max_chunk_size".into(),
            ));
        }
        Ok(())
    }

    pub fn coalesce_delay(&self) -> Duration {
        Duration::from_millis(self.coalesce_delay_ms)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    pub fn fallback_polling_interval(&self) -> Duration {
        Duration::from_millis(self.fallback_polling_interval_ms)
    }
}

fn default_coalesce_delay_ms() -> u64 {
    75
}

fn default_restart_delay_ms() -> u64 {
    800
}

fn default_max_restarts() -> u32 {
    5
}

fn default_fallback_polling_interval_ms() -> u64 {
    5000
}

fn default_max_chunk_size() -> usize {
    500
}

fn default_throttle_delay_ms() -> u64 {
    200
}

fn default_max_buffered() -> usize {
    30000
}

fn default_true() -> bool {
    true
}
