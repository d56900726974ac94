//! Alerting
//!
//! Fatal synchronization failures are handed to every configured sink. The
//! log sink is always installed; a webhook sink posts the alert as JSON.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

use crate::engine::release::download::USER_AGENT;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub subject: String,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            message: message.into(),
            occurred_at: Utc::now(),
        }
    }
}

#[derive(Error, Debug)]
pub enum AlertError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Webhook answered {0}")]
    Rejected(reqwest::StatusCode),
}

#[async_trait]
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, alert: &Alert) -> Result<(), AlertError>;
}

/// Writes alerts to the log at error level
#[derive(Debug, Default)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, alert: &Alert) -> Result<(), AlertError> {
        error!(subject = %alert.subject, "ALERT: {}", alert.message);
        Ok(())
    }
}

pub struct WebhookAlertSink {
    url: String,
    client: reqwest::Client,
}

impl WebhookAlertSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, AlertError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self { url: url.into(), client })
    }
}

#[async_trait]
impl AlertSink for WebhookAlertSink {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, alert: &Alert) -> Result<(), AlertError> {
        let response = self.client.post(&self.url).json(alert).send().await?;
        if !response.status().is_success() {
            return Err(AlertError::Rejected(response.status()));
        }
        Ok(())
    }
}

/// Fans an alert out to every sink; a failing sink does not stop the others.
#[derive(Clone, Default)]
pub struct Alerter {
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl Alerter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log sink plus a webhook sink when `webhook_url` is set
    pub fn from_webhook(webhook_url: Option<&str>, timeout: Duration) -> Result<Self, AlertError> {
        let mut alerter = Self::new().with_sink(Arc::new(LogAlertSink));
        if let Some(url) = webhook_url {
            alerter = alerter.with_sink(Arc::new(WebhookAlertSink::new(url, timeout)?));
        }
        Ok(alerter)
    }

    pub fn with_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn sink_names(&self) -> Vec<&str> {
        self.sinks.iter().map(|s| s.name()).collect()
    }

    pub async fn raise(&self, alert: Alert) {
        for sink in &self.sinks {
            if let Err(e) = sink.send(&alert).await {
                warn!("Alert sink {} failed: {}", sink.name(), e);
            }
        }
    }
}
