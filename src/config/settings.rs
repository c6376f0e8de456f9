//! Settings loading and defaults.
//!
//! Components never read ambient configuration; the host loads a
//! [`Settings`] value once and injects the relevant pieces (store handle,
//! policies) into each component.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use crate::backfill::{FetchPolicy, GapPolicy};

/// Main application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseSettings,
    /// Backfill configuration
    #[serde(default)]
    pub backfill: BackfillSettings,
    /// Live stream configuration
    #[serde(default)]
    pub stream: StreamSettings,
}

impl Settings {
    /// Load settings from `config/{RUN_MODE}` (TOML, optional) with
    /// `INGEST__`-prefixed environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        Config::builder()
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(Environment::with_prefix("INGEST").separator("__"))
            .build()?
            .try_deserialize()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: DatabaseSettings::default(),
            backfill: BackfillSettings::default(),
            stream: StreamSettings::default(),
        }
    }
}

/// Database connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite database file path
    #[serde(default = "default_db_path")]
    pub path: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Busy timeout in seconds
    #[serde(default = "default_busy_timeout_secs")]
    pub busy_timeout_secs: u64,
}

fn default_db_path() -> String {
    "data/ingest.db".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_busy_timeout_secs() -> u64 {
    30
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            max_connections: default_max_connections(),
            busy_timeout_secs: default_busy_timeout_secs(),
        }
    }
}

/// Backfill configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillSettings {
    /// Historical floor for the backward phase, UTC epoch ms
    /// (default 2017-01-01T00:00:00Z)
    #[serde(default = "default_origin_ms")]
    pub origin_ms: i64,
    /// Range-fetch policy
    #[serde(default)]
    pub fetch: FetchPolicy,
    /// Gap detection policy
    #[serde(default)]
    pub gaps: GapPolicy,
    /// Pause between series in a multi-series run, seconds
    #[serde(default = "default_series_pause_secs")]
    pub series_pause_secs: u64,
}

fn default_origin_ms() -> i64 {
    // 2017-01-01T00:00:00Z
    1_483_228_800_000
}

fn default_series_pause_secs() -> u64 {
    2
}

impl Default for BackfillSettings {
    fn default() -> Self {
        Self {
            origin_ms: default_origin_ms(),
            fetch: FetchPolicy::default(),
            gaps: GapPolicy::default(),
            series_pause_secs: default_series_pause_secs(),
        }
    }
}

/// Live stream configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSettings {
    /// Order book levels to persist per side
    #[serde(default = "default_orderbook_depth")]
    pub orderbook_depth: usize,
    /// Pause before resuming a subscription after an error, seconds
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    /// Candle event broadcast buffer size
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    /// Stream order book snapshots
    #[serde(default = "default_true")]
    pub enable_orderbook: bool,
    /// Stream individual trades (high volume)
    #[serde(default)]
    pub enable_trades: bool,
    /// Reconnection storm limiting
    #[serde(default)]
    pub reconnect: ReconnectSettings,
}

fn default_orderbook_depth() -> usize {
    10
}

fn default_retry_delay_secs() -> u64 {
    5
}

fn default_event_buffer() -> usize {
    256
}

fn default_true() -> bool {
    true
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            orderbook_depth: default_orderbook_depth(),
            retry_delay_secs: default_retry_delay_secs(),
            event_buffer: default_event_buffer(),
            enable_orderbook: true,
            enable_trades: false,
            reconnect: ReconnectSettings::default(),
        }
    }
}

/// Reconnection rate limit settings for live streams.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectSettings {
    /// Reconnection attempts allowed per window
    #[serde(default = "default_reconnect_attempts")]
    pub max_attempts: u32,
    /// Window size in seconds
    #[serde(default = "default_reconnect_window_secs")]
    pub window_secs: u64,
    /// Optional custom wait when the quota is exhausted, seconds
    #[serde(default)]
    pub cooldown_secs: Option<u64>,
}

fn default_reconnect_attempts() -> u32 {
    5
}

fn default_reconnect_window_secs() -> u64 {
    60
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_reconnect_attempts(),
            window_secs: default_reconnect_window_secs(),
            cooldown_secs: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.database.max_connections, 5);
        assert_eq!(settings.backfill.origin_ms, 1_483_228_800_000);
        assert_eq!(settings.backfill.fetch.page_limit, 1000);
        assert_eq!(settings.stream.orderbook_depth, 10);
        assert!(settings.stream.enable_orderbook);
        assert!(!settings.stream.enable_trades);
    }
}
