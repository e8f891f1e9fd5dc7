//! Relay Configuration Settings
//!
//! Configuration types for the relay, loaded from environment variables.
//! Numeric values that fail to parse fall back to their defaults.

use std::time::Duration;

use crate::infrastructure::upstream::{DEFAULT_BINANCE_STREAM_URL, DEFAULT_TRADIER_STREAM_URL};

/// Upstream venue endpoints and credentials.
#[derive(Clone)]
pub struct VenueSettings {
    /// Binance stream base URL (symbol path is appended).
    pub binance_stream_url: String,
    /// Full Tradier stream URL.
    pub tradier_stream_url: String,
    tradier_session_id: Option<String>,
}

impl VenueSettings {
    /// Create venue settings.
    #[must_use]
    pub const fn new(
        binance_stream_url: String,
        tradier_stream_url: String,
        tradier_session_id: Option<String>,
    ) -> Self {
        Self {
            binance_stream_url,
            tradier_stream_url,
            tradier_session_id,
        }
    }

    /// Get the Tradier session id, if configured.
    #[must_use]
    pub fn tradier_session_id(&self) -> Option<&str> {
        self.tradier_session_id.as_deref()
    }
}

impl Default for VenueSettings {
    fn default() -> Self {
        Self {
            binance_stream_url: DEFAULT_BINANCE_STREAM_URL.to_string(),
            tradier_stream_url: format!("wss://{DEFAULT_TRADIER_STREAM_URL}"),
            tradier_session_id: None,
        }
    }
}

impl std::fmt::Debug for VenueSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VenueSettings")
            .field("binance_stream_url", &self.binance_stream_url)
            .field("tradier_stream_url", &self.tradier_stream_url)
            .field(
                "tradier_session_id",
                &self.tradier_session_id.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// Upstream connection settings.
#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Jitter fraction applied to each delay (0 = none).
    pub reconnect_jitter: f64,
    /// Maximum reconnection attempts before a stream completes (0 = unlimited).
    pub max_reconnect_attempts: u32,
    /// Idle window before a silent connection is recycled (`None` = disabled).
    pub idle_timeout: Option<Duration>,
    /// Broadcast buffer per shared stream.
    pub stream_capacity: usize,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            reconnect_delay_initial: Duration::from_secs(1),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            reconnect_jitter: 0.0,
            max_reconnect_attempts: 0, // Unlimited
            idle_timeout: Some(Duration::from_secs(600)),
            stream_capacity: 1024,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Downstream WebSocket port.
    pub ws_port: u16,
    /// Prometheus metrics port (0 = disabled).
    pub metrics_port: u16,
    /// Outbound queue depth per downstream session.
    pub session_queue: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            ws_port: 8080,
            metrics_port: 9090,
            session_queue: 1024,
        }
    }
}

/// Complete relay configuration.
#[derive(Debug, Clone, Default)]
pub struct RelayConfig {
    /// Server port settings.
    pub server: ServerSettings,
    /// Upstream connection settings.
    pub upstream: UpstreamSettings,
    /// Venue endpoints and credentials.
    pub venues: VenueSettings,
}

impl RelayConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `TRADIER_SESSION_ID` is set but empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if `TRADIER_SESSION_ID` is set but empty.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let tradier_session_id = match lookup("TRADIER_SESSION_ID") {
            Some(value) if value.trim().is_empty() => {
                return Err(ConfigError::EmptyValue("TRADIER_SESSION_ID".to_string()));
            }
            other => other,
        };

        let server_defaults = ServerSettings::default();
        let server = ServerSettings {
            ws_port: parse_or(&lookup, "RELAY_WS_PORT", server_defaults.ws_port),
            metrics_port: parse_or(&lookup, "RELAY_METRICS_PORT", server_defaults.metrics_port),
            session_queue: parse_or(&lookup, "RELAY_SESSION_QUEUE", server_defaults.session_queue)
                .max(1),
        };

        let upstream_defaults = UpstreamSettings::default();
        let idle_secs = parse_or(&lookup, "RELAY_IDLE_TIMEOUT_SECS", 600_u64);
        let upstream = UpstreamSettings {
            reconnect_delay_initial: Duration::from_millis(parse_or(
                &lookup,
                "RELAY_RECONNECT_DELAY_INITIAL_MS",
                1000_u64,
            )),
            reconnect_delay_max: Duration::from_secs(parse_or(
                &lookup,
                "RELAY_RECONNECT_DELAY_MAX_SECS",
                30_u64,
            )),
            reconnect_delay_multiplier: parse_or(
                &lookup,
                "RELAY_RECONNECT_DELAY_MULTIPLIER",
                upstream_defaults.reconnect_delay_multiplier,
            ),
            reconnect_jitter: parse_or(
                &lookup,
                "RELAY_RECONNECT_JITTER",
                upstream_defaults.reconnect_jitter,
            ),
            max_reconnect_attempts: parse_or(
                &lookup,
                "RELAY_MAX_RECONNECT_ATTEMPTS",
                upstream_defaults.max_reconnect_attempts,
            ),
            idle_timeout: (idle_secs > 0).then(|| Duration::from_secs(idle_secs)),
            stream_capacity: parse_or(
                &lookup,
                "RELAY_STREAM_CAPACITY",
                upstream_defaults.stream_capacity,
            )
            .max(1),
        };

        let binance_stream_url = lookup("BINANCE_STREAM_URL")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BINANCE_STREAM_URL.to_string());

        let tradier_stream_url = lookup("TRADIER_STREAM_WSS")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| {
                let host = lookup("TRADIER_STREAM_URL")
                    .filter(|v| !v.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_TRADIER_STREAM_URL.to_string());
                format!("wss://{host}")
            });

        Ok(Self {
            server,
            upstream,
            venues: VenueSettings::new(binance_stream_url, tradier_stream_url, tradier_session_id),
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
