//! Notification channels for alert transitions.

use async_trait::async_trait;
use quarry_protocol::defaults::WEBHOOK_RETRY_ATTEMPTS;
use quarry_protocol::types::Alert;
use quarry_protocol::QuarryError;
use std::time::Duration;
use tracing::{error, info, warn};

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &str;
    async fn notify(&self, alert: &Alert) -> Result<(), QuarryError>;
}

/// Writes alert transitions to the process log.
pub struct LogChannel;

#[async_trait]
impl NotificationChannel for LogChannel {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, alert: &Alert) -> Result<(), QuarryError> {
        match alert.severity {
            quarry_protocol::types::AlertSeverity::Critical => error!(
                rule = %alert.rule_id,
                state = alert.state.as_str(),
                "{}",
                alert.message
            ),
            quarry_protocol::types::AlertSeverity::Warning => warn!(
                rule = %alert.rule_id,
                state = alert.state.as_str(),
                "{}",
                alert.message
            ),
            quarry_protocol::types::AlertSeverity::Info => info!(
                rule = %alert.rule_id,
                state = alert.state.as_str(),
                "{}",
                alert.message
            ),
        }
        Ok(())
    }
}

/// POSTs the alert as JSON, retrying with exponential backoff.
pub struct WebhookChannel {
    url: String,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(url: String) -> Self {
        Self {
            url,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn notify(&self, alert: &Alert) -> Result<(), QuarryError> {
        let mut backoff = Duration::from_millis(500);
        let mut last_error = String::new();

        for attempt in 1..=WEBHOOK_RETRY_ATTEMPTS {
            match self.client.post(&self.url).json(alert).send().await {
                Ok(response) if response.status().is_success() => return Ok(()),
                Ok(response) => {
                    last_error = format!("webhook returned {}", response.status());
                }
                Err(e) => {
                    last_error = e.to_string();
                }
            }
            if attempt < WEBHOOK_RETRY_ATTEMPTS {
                warn!(url = %self.url, attempt, "webhook delivery failed, retrying");
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
        }
        Err(QuarryError::Transport(format!(
            "webhook {} failed after {WEBHOOK_RETRY_ATTEMPTS} attempts: {last_error}",
            self.url
        )))
    }
}
