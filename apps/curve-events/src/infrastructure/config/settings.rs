//! Client Configuration Settings
//!
//! Configuration types for the event stream client, loaded from environment
//! variables or built in code.

use std::path::PathBuf;
use std::time::Duration;

use crate::infrastructure::stream::reconnect::DEFAULT_RECONNECT_ATTEMPTS;

/// Stream connection settings.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Idle time before the client pings the server.
    pub heartbeat_interval: Duration,
    /// How long a ping may go unanswered before the connection counts as lost.
    pub heartbeat_timeout: Duration,
    /// Delay before the first reconnection attempt of an outage.
    pub reconnect_delay_initial: Duration,
    /// Cap on the delay between reconnection attempts.
    pub reconnect_delay_max: Duration,
    /// Growth factor of the reconnection delay.
    pub reconnect_delay_multiplier: f64,
    /// Reconnection attempts per outage before giving up.
    pub reconnect_attempts: u32,
    /// How long a blocking request waits for its acknowledgment.
    pub subscribe_timeout: Duration,
    /// Capacity of the event queue.
    pub queue_capacity: usize,
    /// Interval between last-id file flushes.
    pub last_id_flush_interval: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(60),
            reconnect_delay_initial: Duration::from_millis(500),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            reconnect_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            subscribe_timeout: Duration::from_secs(30),
            queue_capacity: 10_000,
            last_id_flush_interval: Duration::from_secs(120),
        }
    }
}

/// Complete client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Event endpoint (`ws://` or `wss://`).
    pub url: String,
    /// Extra headers sent with the WebSocket handshake.
    pub headers: Vec<(String, String)>,
    /// Last-id file used when `connect` does not name one.
    pub last_id_file: Option<PathBuf>,
    /// Stream settings.
    pub stream: StreamSettings,
}

impl ClientConfig {
    /// Configuration for `url` with default settings.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            last_id_file: None,
            stream: StreamSettings::default(),
        }
    }

    /// Add a handshake header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Replace the stream settings.
    #[must_use]
    pub fn with_stream_settings(mut self, stream: StreamSettings) -> Self {
        self.stream = stream;
        self
    }

    /// Read the configuration from `CURVE_EVENTS_*` variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `CURVE_EVENTS_URL` is missing, empty, or not a
    /// WebSocket URL.
    pub fn from_env() -> Result<Self, ConfigError> {
        let url = std::env::var("CURVE_EVENTS_URL")
            .map_err(|_| ConfigError::MissingEnvVar("CURVE_EVENTS_URL".to_string()))?;

        if url.is_empty() {
            return Err(ConfigError::EmptyValue("CURVE_EVENTS_URL".to_string()));
        }

        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(ConfigError::InvalidUrl(url));
        }

        let defaults = StreamSettings::default();
        let stream = StreamSettings {
            heartbeat_interval: parse_env_duration_secs(
                "CURVE_EVENTS_HEARTBEAT_INTERVAL_SECS",
                defaults.heartbeat_interval,
            ),
            heartbeat_timeout: parse_env_duration_secs(
                "CURVE_EVENTS_HEARTBEAT_TIMEOUT_SECS",
                defaults.heartbeat_timeout,
            ),
            reconnect_delay_initial: parse_env_duration_millis(
                "CURVE_EVENTS_RECONNECT_DELAY_INITIAL_MS",
                defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: parse_env_duration_secs(
                "CURVE_EVENTS_RECONNECT_DELAY_MAX_SECS",
                defaults.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: defaults.reconnect_delay_multiplier,
            reconnect_attempts: parse_env_u32(
                "CURVE_EVENTS_RECONNECT_ATTEMPTS",
                defaults.reconnect_attempts,
            ),
            subscribe_timeout: parse_env_duration_secs(
                "CURVE_EVENTS_SUBSCRIBE_TIMEOUT_SECS",
                defaults.subscribe_timeout,
            ),
            queue_capacity: parse_env_usize("CURVE_EVENTS_QUEUE_CAPACITY", defaults.queue_capacity)
                .max(1),
            last_id_flush_interval: parse_env_duration_secs(
                "CURVE_EVENTS_LAST_ID_FLUSH_SECS",
                defaults.last_id_flush_interval,
            ),
        };

        let last_id_file = std::env::var("CURVE_EVENTS_LAST_ID_FILE")
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        Ok(Self {
            url,
            headers: Vec::new(),
            last_id_file,
            stream,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required variable is not set.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// A required variable is set but empty.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Endpoint is not a WebSocket URL.
    #[error("not a ws:// or wss:// URL: {0}")]
    InvalidUrl(String),
}

fn parse_env_u32(key: &str, default: u32) -> u32 {
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

fn parse_env_duration_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_settings_defaults() {
        let settings = StreamSettings::default();
        assert_eq!(settings.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(settings.heartbeat_timeout, Duration::from_secs(60));
        assert_eq!(settings.reconnect_delay_initial, Duration::from_millis(500));
        assert_eq!(settings.reconnect_delay_max, Duration::from_secs(30));
        assert_eq!(settings.reconnect_attempts, 5);
        assert_eq!(settings.subscribe_timeout, Duration::from_secs(30));
        assert_eq!(settings.last_id_flush_interval, Duration::from_secs(120));
        assert!((settings.reconnect_delay_multiplier - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn builder_adds_headers() {
        let config = ClientConfig::new("wss://events.example.com/stream")
            .with_header("Authorization", "Bearer t");
        assert_eq!(config.headers.len(), 1);
        assert_eq!(config.headers[0].0, "Authorization");
        assert!(config.last_id_file.is_none());
    }

    #[test]
    fn parse_helpers_use_default_when_unset() {
        assert_eq!(parse_env_u32("CURVE_EVENTS_TEST_UNSET_U32", 7), 7);
        assert_eq!(
            parse_env_duration_secs("CURVE_EVENTS_TEST_UNSET_SECS", Duration::from_secs(3)),
            Duration::from_secs(3)
        );
        assert_eq!(
            parse_env_duration_millis("CURVE_EVENTS_TEST_UNSET_MS", Duration::from_millis(9)),
            Duration::from_millis(9)
        );
    }
}
