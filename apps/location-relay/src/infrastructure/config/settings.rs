//! Relay Configuration Settings
//!
//! Configuration types for the location relay, loaded from environment
//! variables. Every knob has a default; only the credential tables are
//! required.

use std::time::Duration;

/// HTTP server settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// API server port (ingestion, stream, health, metrics).
    pub http_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { http_port: 8085 }
    }
}

/// Stream endpoint settings.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Heartbeat frame interval.
    pub heartbeat_interval: Duration,
    /// Per-subscriber event channel capacity.
    pub channel_capacity: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(15),
            channel_capacity: 256,
        }
    }
}

/// Batching scheduler settings.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Flush interval for groups with no configured frequency (seconds).
    pub default_frequency_secs: u64,
    /// Lower clamp for configured flush intervals (seconds).
    pub min_frequency_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            default_frequency_secs: 30,
            min_frequency_secs: 1,
        }
    }
}

/// Complete relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// HTTP server settings.
    pub server: ServerSettings,
    /// Stream endpoint settings.
    pub stream: StreamSettings,
    /// Batching scheduler settings.
    pub scheduler: SchedulerSettings,
}

impl RelayConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a configured value is present but malformed in
    /// a way the defaults cannot paper over (a zero minimum frequency).
    pub fn from_env() -> Result<Self, ConfigError> {
        let server = ServerSettings {
            http_port: parse_env_u16("RELAY_HTTP_PORT", ServerSettings::default().http_port),
        };

        let stream = StreamSettings {
            heartbeat_interval: parse_env_duration_secs(
                "RELAY_HEARTBEAT_INTERVAL_SECS",
                StreamSettings::default().heartbeat_interval,
            ),
            channel_capacity: parse_env_usize(
                "RELAY_STREAM_CHANNEL_CAPACITY",
                StreamSettings::default().channel_capacity,
            ),
        };

        let scheduler = SchedulerSettings {
            default_frequency_secs: parse_env_u64(
                "RELAY_DEFAULT_FREQUENCY_SECS",
                SchedulerSettings::default().default_frequency_secs,
            ),
            min_frequency_secs: parse_env_u64(
                "RELAY_MIN_FREQUENCY_SECS",
                SchedulerSettings::default().min_frequency_secs,
            ),
        };

        if scheduler.min_frequency_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "RELAY_MIN_FREQUENCY_SECS".to_string(),
            ));
        }

        Ok(Self {
            server,
            stream,
            scheduler,
        })
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            stream: StreamSettings::default(),
            scheduler: SchedulerSettings::default(),
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has an unusable value.
    #[error("environment variable {0} has an invalid value")]
    InvalidValue(String),
}

fn parse_env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}
