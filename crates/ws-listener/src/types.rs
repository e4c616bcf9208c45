//! Public configuration and error types for the ws-listener crate.

use std::time::Duration;

use tokio_tungstenite::tungstenite;

/// Environment variable holding the event server endpoint.
pub const ENDPOINT_ENV: &str = "WS_URL";
/// Endpoint used when [`ENDPOINT_ENV`] is unset or empty.
pub const DEFAULT_ENDPOINT: &str = "ws://127.0.0.1:5000";
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_USER_AGENT: &str = "Solana-Client";
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Configuration for a [`ConnectionManager`](crate::ConnectionManager).
#[derive(Debug, Clone, PartialEq)]
pub struct ListenerConfig {
    /// `ws://` or `wss://` endpoint of the event server.
    pub url: String,
    /// Upper bound on TCP connect + TLS + WebSocket upgrade.
    pub handshake_timeout: Duration,
    /// Value of the `User-Agent` header sent with the upgrade request.
    pub user_agent: String,
    /// Period between liveness probes. A probe left unanswered for one
    /// full period marks the connection dead.
    pub heartbeat_interval: Duration,
    /// Upper bound on a single outbound write. A peer that stops reading
    /// long enough to hit it is treated as gone.
    pub write_timeout: Duration,
    pub reconnect: ReconnectConfig,
}

impl ListenerConfig {
    /// Create a config for `url` with every other field at its default.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            reconnect: ReconnectConfig::default(),
        }
    }

    /// Read the endpoint from `WS_URL`, falling back to [`DEFAULT_ENDPOINT`].
    pub fn from_env() -> Self {
        let url = std::env::var(ENDPOINT_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        Self::new(url)
    }

    /// Parse and check the endpoint. Only `ws` and `wss` schemes are accepted.
    pub fn endpoint(&self) -> Result<url::Url, Error> {
        let parsed = url::Url::parse(&self.url)
            .map_err(|e| Error::InvalidEndpoint(format!("{}: {e}", self.url)))?;
        match parsed.scheme() {
            "ws" | "wss" => Ok(parsed),
            other => Err(Error::InvalidEndpoint(format!(
                "{}: unsupported scheme {other:?}",
                self.url
            ))),
        }
    }
}

impl ListenerConfig {
    /// Reject settings the event loop cannot run with.
    pub fn validate(&self) -> Result<(), Error> {
        self.endpoint()?;
        if self.heartbeat_interval.is_zero() {
            return Err(Error::InvalidConfig("heartbeat interval must be non-zero".into()));
        }
        if self.handshake_timeout.is_zero() {
            return Err(Error::InvalidConfig("handshake timeout must be non-zero".into()));
        }
        if self.write_timeout.is_zero() {
            return Err(Error::InvalidConfig("write timeout must be non-zero".into()));
        }
        if self.reconnect.max_delay < self.reconnect.base_delay {
            return Err(Error::InvalidConfig(format!(
                "max delay {:?} is shorter than base delay {:?}",
                self.reconnect.max_delay, self.reconnect.base_delay
            )));
        }
        Ok(())
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_ENDPOINT)
    }
}

/// Bounded exponential backoff settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before the first retry; doubled on each further retry.
    pub base_delay: Duration,
    /// Cap applied to the doubled delay.
    pub max_delay: Duration,
    /// Consecutive failures tolerated before giving up.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Errors returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("WebSocket error: {0}")]
    WebSocket(Box<tungstenite::Error>),

    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("write timed out after {0:?}")]
    WriteTimeout(Duration),

    #[error("not connected")]
    NotConnected,

    #[error("invalid message: {0}")]
    Decode(serde_json::Error),

    #[error("failed to encode message: {0}")]
    Encode(serde_json::Error),

    #[error("connection manager has shut down")]
    ManagerGone,
}

impl From<tungstenite::Error> for Error {
    fn from(e: tungstenite::Error) -> Self {
        Error::WebSocket(Box::new(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ListenerConfig::default();
        assert_eq!(config.url, "ws://127.0.0.1:5000");
        assert_eq!(config.handshake_timeout, Duration::from_secs(10));
        assert_eq!(config.user_agent, "Solana-Client");
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.write_timeout, Duration::from_secs(10));
        assert_eq!(config.reconnect.base_delay, Duration::from_millis(1000));
        assert_eq!(config.reconnect.max_delay, Duration::from_millis(30000));
        assert_eq!(config.reconnect.max_attempts, 5);
    }

    #[test]
    fn endpoint_accepts_ws_and_wss() {
        assert!(ListenerConfig::new("ws://localhost:5000").endpoint().is_ok());
        assert!(ListenerConfig::new("wss://events.example.com/feed").endpoint().is_ok());
    }

    #[test]
    fn endpoint_rejects_other_schemes() {
        let err = ListenerConfig::new("http://localhost:5000")
            .endpoint()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidEndpoint(_)));
        assert!(err.to_string().contains("unsupported scheme"));
    }

    #[test]
    fn validate_rejects_unusable_timings() {
        assert!(ListenerConfig::default().validate().is_ok());

        let config = ListenerConfig {
            heartbeat_interval: Duration::ZERO,
            ..ListenerConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let config = ListenerConfig {
            write_timeout: Duration::ZERO,
            ..ListenerConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let mut config = ListenerConfig::new(DEFAULT_ENDPOINT);
        config.reconnect.max_delay = Duration::from_millis(10);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn endpoint_rejects_garbage() {
        let err = ListenerConfig::new("not a url").endpoint().unwrap_err();
        assert!(matches!(err, Error::InvalidEndpoint(_)));
    }
}
