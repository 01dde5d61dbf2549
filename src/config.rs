//! Session configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`), each with a default that matches the
//! broker's stock settings.

use std::time::Duration;

use url::Url;

use crate::domain::endpoint;
use crate::error::SessionError;

/// Default page origin the messaging endpoint is derived from.
pub const DEFAULT_ORIGIN: &str = "http://localhost:8080";

/// Default messaging endpoint path.
pub const DEFAULT_ENDPOINT_PATH: &str = "/ws";

/// Top-level session configuration.
///
/// Loaded once at startup via [`SessionConfig::from_env`], or built with
/// [`SessionConfig::default`] and adjusted field by field.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Origin of the hosting page (e.g. `https://app.example.com`).
    pub origin: String,

    /// Path suffix identifying the messaging endpoint.
    pub endpoint_path: String,

    /// Symmetric heartbeat interval offered to the broker. Zero disables
    /// heartbeats in both directions.
    pub heartbeat: Duration,

    /// Base delay of the linear reconnection backoff.
    pub reconnect_base: Duration,

    /// Ceiling of the reconnection backoff.
    pub reconnect_max: Duration,

    /// Deadline for receiving CONNECTED after the socket opens.
    pub connect_timeout: Duration,

    /// Capacity of the lifecycle event broadcast channel.
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            origin: DEFAULT_ORIGIN.to_string(),
            endpoint_path: DEFAULT_ENDPOINT_PATH.to_string(),
            heartbeat: Duration::from_millis(20_000),
            reconnect_base: Duration::from_millis(3_000),
            reconnect_max: Duration::from_millis(30_000),
            connect_timeout: Duration::from_millis(10_000),
            event_capacity: 256,
        }
    }
}

impl SessionConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to the [`Default`] values when a variable is not set or
    /// does not parse. Calls `dotenvy::dotenv().ok()` to optionally load a
    /// `.env` file.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidEndpoint`] if `SESSION_ORIGIN` is set
    /// but is not an absolute `http`/`https`/`ws`/`wss` URL.
    pub fn from_env() -> Result<Self, SessionError> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        let origin = std::env::var("SESSION_ORIGIN").unwrap_or(defaults.origin);
        let endpoint_path =
            std::env::var("SESSION_ENDPOINT_PATH").unwrap_or(defaults.endpoint_path);

        let config = Self {
            origin,
            endpoint_path,
            heartbeat: parse_env_ms("SESSION_HEARTBEAT_MS", defaults.heartbeat),
            reconnect_base: parse_env_ms("SESSION_RECONNECT_BASE_MS", defaults.reconnect_base),
            reconnect_max: parse_env_ms("SESSION_RECONNECT_MAX_MS", defaults.reconnect_max),
            connect_timeout: parse_env_ms("SESSION_CONNECT_TIMEOUT_MS", defaults.connect_timeout),
            event_capacity: parse_env("SESSION_EVENT_CAPACITY", defaults.event_capacity),
        };

        // Reject a bad origin now rather than on the first connect attempt.
        config.endpoint_url()?;
        Ok(config)
    }

    /// Returns the WebSocket URL of the messaging endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidEndpoint`] if the origin scheme has
    /// no WebSocket counterpart or the origin has no host.
    pub fn endpoint_url(&self) -> Result<Url, SessionError> {
        endpoint::derive_endpoint(&self.origin, &self.endpoint_path)
    }
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parses an environment variable holding milliseconds.
fn parse_env_ms(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
