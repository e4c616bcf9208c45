//! Downstream work triggered by each acknowledged signal.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use serde::Serialize;

use crate::error::{ListenerError, ListenerResult};

const SIGNAL_EVENT: &str = "signal-received";

#[async_trait]
pub trait SignalHandler: Send + Sync {
    fn name(&self) -> &str;

    /// Run once per `signal-received` event. Errors are logged by the caller.
    async fn on_signal(&self, received_at: DateTime<Utc>) -> ListenerResult<()>;
}

/// Logs the signal and does nothing else.
pub struct LogHandler;

#[async_trait]
impl SignalHandler for LogHandler {
    fn name(&self) -> &str {
        "log"
    }

    async fn on_signal(&self, received_at: DateTime<Utc>) -> ListenerResult<()> {
        tracing::info!(
            received_at = %received_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            "Signal handled"
        );
        Ok(())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SignalNotification<'a> {
    event: &'a str,
    received_at: String,
}

/// POSTs a JSON notification to a fixed URL.
pub struct WebhookHandler {
    client: Client,
    url: String,
}

impl WebhookHandler {
    pub fn new(url: String, timeout: Duration) -> ListenerResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ListenerError::Webhook(format!("http client: {e}")))?;
        tracing::info!(url = %url, "Webhook handler initialized");
        Ok(Self { client, url })
    }
}

#[async_trait]
impl SignalHandler for WebhookHandler {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn on_signal(&self, received_at: DateTime<Utc>) -> ListenerResult<()> {
        let body = SignalNotification {
            event: SIGNAL_EVENT,
            received_at: received_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        };
        let response = self.client.post(&self.url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ListenerError::Webhook(format!("{status}: {text}")));
        }
        tracing::debug!(status = %status, "Webhook delivered");
        Ok(())
    }
}
