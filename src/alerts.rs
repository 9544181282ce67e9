//! Best-effort external alerts.
//!
//! Crash alerts go to the hub chat and a Slack incoming webhook; lifecycle
//! notices go to the hub chat only. Delivery never fails the caller: every
//! error is logged at `warn` and dropped.

use std::time::Duration;

use serde_json::json;
use tracing::{error, info, warn};

use crate::config::AlertsConfig;
use crate::{AppError, Result};

/// Per-request timeout for alert delivery.
pub const ALERT_TIMEOUT: Duration = Duration::from_secs(5);

/// Text of a crash alert.
#[must_use]
pub fn crash_message(count: u32, exit_code: i32) -> String {
    format!(
        "Relay crashed {count} times (exit code {exit_code}). Manual intervention may be needed."
    )
}

/// Text of a lifecycle notice.
#[must_use]
pub fn lifecycle_message(event: &str, detail: &str) -> String {
    if detail.is_empty() {
        format!("[relay] {event}")
    } else {
        format!("[relay] {event} \u{2014} {detail}")
    }
}

/// Sends alerts to the configured endpoints.
#[derive(Debug, Clone)]
pub struct Alerter {
    config: AlertsConfig,
    http: reqwest::Client,
}

impl Alerter {
    /// Build an alerter for the configured endpoints.
    #[must_use]
    pub fn new(config: AlertsConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(ALERT_TIMEOUT)
            .build()
            .unwrap_or_else(|err| {
                warn!(%err, "falling back to default alert client");
                reqwest::Client::new()
            });
        Self { config, http }
    }

    /// Report repeated crashes. Never fails.
    pub async fn notify_crash(&self, count: u32, exit_code: i32) {
        let msg = crash_message(count, exit_code);
        error!("CRASH ALERT: {msg}");

        if let Err(err) = self.send_chat(&msg).await {
            warn!(%err, "chat alert failed (hub may be down)");
        }
        if let Err(err) = self
            .send_slack(&format!(":rotating_light: *Relay crash alert*: {msg}"))
            .await
        {
            warn!(%err, "slack alert failed");
        }
    }

    /// Post a lifecycle notice to the hub chat. Never fails.
    pub async fn notify_lifecycle(&self, event: &str, detail: &str) {
        let msg = lifecycle_message(event, detail);
        info!(%msg, "lifecycle notice");
        if let Err(err) = self.send_chat(&msg).await {
            warn!(%err, "lifecycle notice failed (hub may be down)");
        }
    }

    async fn send_chat(&self, message: &str) -> Result<()> {
        let Some(hub) = &self.config.hub_url else {
            return Ok(());
        };
        let url = format!("{}/api/chat", hub.trim_end_matches('/'));
        self.http
            .post(&url)
            .json(&json!({ "content": message, "role": "assistant" }))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|err| AppError::Alert(format!("hub chat {url}: {err}")))?;
        Ok(())
    }

    async fn send_slack(&self, message: &str) -> Result<()> {
        let Some(webhook) = &self.config.slack_webhook_url else {
            return Ok(());
        };
        self.http
            .post(webhook)
            .json(&json!({ "text": message }))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|err| AppError::Alert(format!("slack webhook: {err}")))?;
        Ok(())
    }
}
