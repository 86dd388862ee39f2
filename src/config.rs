//! Application configuration
//!
//! Centralized configuration management with environment variable support
//! and sensible defaults.

use crate::error::ChatError;
use std::env;
use std::time::Duration;

/// Relay endpoint used when `RELAY_URL` is not set
pub const DEFAULT_RELAY_URL: &str = "http://192.168.1.4:3000";

/// Upper bound for a single reconnect delay
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Relay connection configuration
    pub relay: RelayConfig,
    /// Reconnect configuration (opt-in)
    pub reconnect: ReconnectPolicy,
    /// Bind address for the development relay
    pub relay_bind: String,
}

/// Relay connection configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Relay base URL (http, https, ws or wss)
    pub url: String,
    /// Engine.IO endpoint path
    pub path: String,
    /// Socket.IO namespace to join
    pub namespace: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_RELAY_URL.to_string(),
            path: "/socket.io/".to_string(),
            namespace: "/".to_string(),
        }
    }
}

/// Reconnect policy applied when a connection drops without `disconnect()`
///
/// Disabled by default: the client makes exactly one connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Whether reconnecting is enabled at all
    pub enabled: bool,
    /// Maximum number of consecutive attempts before giving up
    pub max_attempts: u32,
    /// Delay before the first attempt; doubled on every further attempt
    pub base_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the given attempt (1-based), or `None` once attempts are exhausted
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if !self.enabled || attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let factor = 2u32.saturating_pow(attempt - 1);
        Some(
            self.base_delay
                .saturating_mul(factor)
                .min(MAX_RECONNECT_DELAY),
        )
    }
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let relay_defaults = RelayConfig::default();
        let reconnect_defaults = ReconnectPolicy::default();
        Self {
            relay: RelayConfig {
                url: env::var("RELAY_URL").unwrap_or(relay_defaults.url),
                path: env::var("RELAY_PATH").unwrap_or(relay_defaults.path),
                namespace: env::var("RELAY_NAMESPACE").unwrap_or(relay_defaults.namespace),
            },
            reconnect: ReconnectPolicy {
                enabled: env::var("RECONNECT_ENABLED")
                    .ok()
                    .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                    .unwrap_or(reconnect_defaults.enabled),
                max_attempts: env::var("RECONNECT_MAX_ATTEMPTS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(reconnect_defaults.max_attempts),
                base_delay: env::var("RECONNECT_BASE_DELAY_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .map(Duration::from_millis)
                    .unwrap_or(reconnect_defaults.base_delay),
            },
            relay_bind: env::var("RELAY_BIND").unwrap_or_else(|_| "127.0.0.1:3000".to_string()),
        }
    }

    /// Check that the relay settings can be turned into a WebSocket URL
    pub fn validate(&self) -> Result<(), ChatError> {
        self.relay.websocket_url().map(|_| ())
    }
}

impl RelayConfig {
    /// Build a relay config pointing at the given base URL with default path and namespace
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Full Engine.IO WebSocket URL, e.g. `ws://host:3000/socket.io/?EIO=4&transport=websocket`
    ///
    /// # Returns
    /// * `Ok(String)` - `ws://` for `http`/`ws` relays, `wss://` for `https`/`wss`
    /// * `Err(ChatError::InvalidConfig)` - Unknown scheme, missing host or a
    ///   namespace without a leading `/`
    pub fn websocket_url(&self) -> Result<String, ChatError> {
        let (scheme, rest) = self
            .url
            .split_once("://")
            .ok_or_else(|| ChatError::InvalidConfig(format!("missing scheme in {}", self.url)))?;

        let ws_scheme = match scheme.to_ascii_lowercase().as_str() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(ChatError::InvalidConfig(format!(
                    "unsupported scheme: {}",
                    other
                )))
            }
        };

        let host = rest.trim_end_matches('/');
        if host.is_empty() {
            return Err(ChatError::InvalidConfig("relay host is empty".to_string()));
        }

        if !self.namespace.starts_with('/') {
            return Err(ChatError::InvalidConfig(format!(
                "namespace must start with '/': {}",
                self.namespace
            )));
        }

        let path = self.path.trim_matches('/');
        Ok(format!(
            "{}://{}/{}/?EIO=4&transport=websocket",
            ws_scheme, host, path
        ))
    }
}
