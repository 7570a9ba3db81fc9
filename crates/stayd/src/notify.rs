//! Notification sinks for the daily stay-time message

use crate::error::StayError;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str) -> Result<(), StayError>;
}

/// Logs the message instead of sending it. Used when no endpoint is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, message: &str) -> Result<(), StayError> {
        info!(target: "stayd", "notification (no endpoint configured): {}", message);
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    to: &'a str,
    text: &'a str,
}

/// Posts `{"to": recipient, "text": message}` as JSON to a webhook.
pub struct WebhookNotifier {
    http_client: reqwest::Client,
    endpoint: String,
    recipient: String,
    access_token: Option<String>,
}

impl WebhookNotifier {
    pub fn new(
        endpoint: impl Into<String>,
        recipient: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, StayError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StayError::Notification(format!("http client: {e}")))?;
        Ok(Self {
            http_client,
            endpoint: endpoint.into(),
            recipient: recipient.into(),
            access_token: None,
        })
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, message: &str) -> Result<(), StayError> {
        let payload = WebhookPayload {
            to: &self.recipient,
            text: message,
        };
        let mut request = self.http_client.post(&self.endpoint).json(&payload);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                StayError::Notification(format!("{} timed out", self.endpoint))
            } else {
                StayError::Notification(format!("{}: {e}", self.endpoint))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StayError::Notification(format!(
                "{} returned {}: {}",
                self.endpoint,
                status,
                body.trim()
            )));
        }
        debug!(target: "stayd", "webhook accepted notification ({})", status);
        Ok(())
    }
}
