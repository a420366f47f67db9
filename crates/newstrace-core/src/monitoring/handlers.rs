//! Alert delivery handlers
//!
//! Handlers receive triggered alerts from the collector. Failures are
//! reported back as errors and isolated by the dispatch loop; one broken
//! handler never blocks the others.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reqwest::Client;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::models::{Alert, Severity};

/// Receives triggered alerts
#[async_trait]
pub trait AlertHandler: Send + Sync {
    /// Name used in dispatch diagnostics
    fn name(&self) -> &str;

    /// Deliver one alert
    async fn handle(&self, alert: &Alert) -> Result<()>;
}

/// Emits alerts into the process log
pub struct TracingAlertHandler;

#[async_trait]
impl AlertHandler for TracingAlertHandler {
    fn name(&self) -> &str {
        "tracing"
    }

    async fn handle(&self, alert: &Alert) -> Result<()> {
        match alert.severity {
            Severity::Critical => error!(
                rule = %alert.rule_name,
                value = alert.value,
                threshold = alert.threshold,
                "ALERT: {}",
                alert.message
            ),
            _ => warn!(
                rule = %alert.rule_name,
                value = alert.value,
                threshold = alert.threshold,
                "ALERT: {}",
                alert.message
            ),
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    rule_name: &'a str,
    severity: Severity,
    message: &'a str,
    value: f64,
    threshold: f64,
    triggered_at: DateTime<Utc>,
    resolved: bool,
}

/// Posts alerts to an HTTP endpoint as JSON
pub struct WebhookAlertHandler {
    client: Client,
    url: String,
}

impl WebhookAlertHandler {
    /// Create a handler posting to `url`
    pub fn new(url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl AlertHandler for WebhookAlertHandler {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn handle(&self, alert: &Alert) -> Result<()> {
        let payload = WebhookPayload {
            rule_name: &alert.rule_name,
            severity: alert.severity,
            message: &alert.message,
            value: alert.value,
            threshold: alert.threshold,
            triggered_at: alert.triggered_at,
            resolved: alert.resolved,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Http(format!(
                "webhook returned {status}: {body}"
            )));
        }

        info!(rule = %alert.rule_name, url = %self.url, "Webhook alert sent");
        Ok(())
    }
}

/// Collects alerts in memory for tests and embedding
#[derive(Default)]
pub struct MemoryAlertHandler {
    alerts: Mutex<Vec<Alert>>,
}

impl MemoryAlertHandler {
    /// Create an empty collecting handler
    pub fn new() -> Self {
        Self::default()
    }

    /// Alerts received so far
    pub fn received(&self) -> Vec<Alert> {
        self.alerts.lock().clone()
    }
}

#[async_trait]
impl AlertHandler for MemoryAlertHandler {
    fn name(&self) -> &str {
        "memory"
    }

    async fn handle(&self, alert: &Alert) -> Result<()> {
        self.alerts.lock().push(alert.clone());
        Ok(())
    }
}
