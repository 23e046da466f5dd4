//! Notification channels
//!
//! [`LogNotifier`] writes the final report to the log; [`WebhookNotifier`]
//! POSTs it as JSON to an HTTP endpoint.

use crate::executor::{Notifier, NotifyError};
use crate::pipeline::{NotificationPayload, StatusColor};
use async_trait::async_trait;
use std::time::Duration;

/// Writes reports to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl LogNotifier {
    /// Creates a log notifier
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, payload: &NotificationPayload) -> Result<(), NotifyError> {
        let recipients = payload.recipients.join(", ");
        match payload.color {
            StatusColor::Green => tracing::info!(
                color = %payload.color,
                recipients = %recipients,
                "{}", payload.subject
            ),
            StatusColor::Yellow | StatusColor::Red => tracing::warn!(
                color = %payload.color,
                recipients = %recipients,
                "{}", payload.subject
            ),
        }
        for stage in &payload.stages {
            tracing::info!(
                stage = %stage.name,
                ordinal = stage.ordinal,
                outcome = %stage.outcome,
                duration_ms = stage.duration_ms,
                "Stage summary"
            );
        }
        Ok(())
    }
}

/// POSTs reports as JSON
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl WebhookNotifier {
    /// Creates a notifier for `url` with a per-request timeout
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::Channel`] if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::Channel(e.to_string()))?;
        Ok(Self {
            url: url.into(),
            timeout,
            client,
        })
    }

    /// Target URL
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, payload: &NotificationPayload) -> Result<(), NotifyError> {
        tracing::debug!(url = %self.url, status = %payload.status, "Sending webhook notification");

        let response = self
            .client
            .post(&self.url)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    NotifyError::Timeout(self.timeout)
                } else {
                    NotifyError::Channel(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}
