use std::time::Duration;

use clap::Args;
use ws_listener::{ListenerConfig, ReconnectConfig};

use crate::error::{ListenerError, ListenerResult};

pub(crate) const DEFAULT_WEBHOOK_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Args)]
pub struct ListenerArgs {
    /// Event server endpoint (ws:// or wss://)
    #[arg(long, env = ws_listener::ENDPOINT_ENV, default_value = ws_listener::DEFAULT_ENDPOINT)]
    pub url: String,
    /// Upper bound on the connect and upgrade handshake
    #[arg(long, env = "WS_HANDSHAKE_TIMEOUT_SECS", default_value_t = 10)]
    pub handshake_timeout_secs: u64,
    /// Period between liveness probes; one unanswered period drops the connection
    #[arg(long, env = "WS_HEARTBEAT_INTERVAL_SECS", default_value_t = 30)]
    pub heartbeat_interval_secs: u64,
    /// Upper bound on a single outbound write before the connection is dropped
    #[arg(long, env = "WS_WRITE_TIMEOUT_SECS", default_value_t = 10)]
    pub write_timeout_secs: u64,
    /// Consecutive reconnect attempts before giving up
    #[arg(long, env = "WS_MAX_ATTEMPTS", default_value_t = ws_listener::DEFAULT_MAX_ATTEMPTS)]
    pub max_attempts: u32,
    /// Delay before the first reconnect, doubled on each further attempt
    #[arg(long, env = "WS_BASE_DELAY_MS", default_value_t = 1000)]
    pub base_delay_ms: u64,
    /// Cap on the reconnect delay
    #[arg(long, env = "WS_MAX_DELAY_MS", default_value_t = 30_000)]
    pub max_delay_ms: u64,
    /// User-Agent header sent with the upgrade request
    #[arg(long, env = "WS_USER_AGENT", default_value = ws_listener::DEFAULT_USER_AGENT)]
    pub user_agent: String,
    /// POST a notification here on every signal (log only when unset)
    #[arg(long, env = "SIGNAL_WEBHOOK_URL")]
    pub webhook_url: Option<String>,
    /// Request timeout for the webhook
    #[arg(long, env = "SIGNAL_WEBHOOK_TIMEOUT_SECS", default_value_t = DEFAULT_WEBHOOK_TIMEOUT_SECS)]
    pub webhook_timeout_secs: u64,
}

impl ListenerArgs {
    /// Build and validate the connection settings.
    pub fn listener_config(&self) -> ListenerResult<ListenerConfig> {
        let url = self.url.trim();
        if url.is_empty() {
            return Err(ListenerError::Config("endpoint url is empty".into()));
        }

        let config = ListenerConfig {
            url: url.to_string(),
            handshake_timeout: Duration::from_secs(self.handshake_timeout_secs),
            user_agent: self.user_agent.clone(),
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
            write_timeout: Duration::from_secs(self.write_timeout_secs),
            reconnect: ReconnectConfig {
                base_delay: Duration::from_millis(self.base_delay_ms),
                max_delay: Duration::from_millis(self.max_delay_ms),
                max_attempts: self.max_attempts,
            },
        };
        config
            .validate()
            .map_err(|e| ListenerError::Config(e.to_string()))?;
        Ok(config)
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: ListenerArgs,
    }

    fn parse(argv: &[&str]) -> ListenerArgs {
        let mut full = vec!["listener"];
        full.extend_from_slice(argv);
        TestCli::try_parse_from(full).unwrap().args
    }

    #[test]
    fn flags_override_defaults() {
        let args = parse(&[
            "--url",
            "wss://events.example.com/feed",
            "--heartbeat-interval-secs",
            "5",
            "--write-timeout-secs",
            "3",
            "--max-attempts",
            "2",
            "--base-delay-ms",
            "250",
            "--max-delay-ms",
            "2000",
            "--user-agent",
            "custom-agent",
        ]);
        let config = args.listener_config().unwrap();
        assert_eq!(config.url, "wss://events.example.com/feed");
        assert_eq!(config.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(config.write_timeout, Duration::from_secs(3));
        assert_eq!(config.user_agent, "custom-agent");
        assert_eq!(
            config.reconnect,
            ReconnectConfig {
                base_delay: Duration::from_millis(250),
                max_delay: Duration::from_secs(2),
                max_attempts: 2,
            }
        );
    }

    #[test]
    fn rejects_non_websocket_url() {
        let args = parse(&["--url", "http://127.0.0.1:5000"]);
        let err = args.listener_config().unwrap_err();
        assert!(matches!(err, ListenerError::Config(_)));
    }

    #[test]
    fn rejects_blank_url() {
        let args = parse(&["--url", "  "]);
        assert!(matches!(
            args.listener_config(),
            Err(ListenerError::Config(_))
        ));
    }

    #[test]
    fn rejects_zero_heartbeat() {
        let args = parse(&["--url", "ws://127.0.0.1:5000", "--heartbeat-interval-secs", "0"]);
        assert!(matches!(
            args.listener_config(),
            Err(ListenerError::Config(_))
        ));
    }

    #[test]
    fn webhook_is_optional() {
        let args = parse(&["--url", "ws://127.0.0.1:5000", "--webhook-timeout-secs", "3"]);
        assert!(args.webhook_url.is_none());
        assert_eq!(args.webhook_timeout(), Duration::from_secs(3));
    }
}
