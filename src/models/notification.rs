//! Notification records produced by the external poller.
//!
//! The cache file is a JSON array of loosely-shaped objects tagged with a
//! `type`. Only the fields that participate in deduplication and wake
//! formatting are typed; everything else is preserved in `extra`.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Prefix of reminders that only exist to force a periodic cache check.
pub const SLEEP_TIMEOUT_PREFIX: &str = "Sleep timeout";

/// A chat message inside a `message` batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    /// Source timestamp; doubles as the dedup key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
    /// Message body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// A message reference inside a per-channel aggregate.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChannelMessage {
    /// Source timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<Value>,
}

/// Per-channel unread aggregate (Slack and similar sources).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChannelSummary {
    /// Channel identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Unread count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unread: Option<i64>,
    /// Individual unread messages, when the source lists them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<ChannelMessage>,
}

/// One element of the notification cache.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NotificationRecord {
    /// Record type: `message`, `reminder`, `email`, `github`, `system`, …
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Producing collector (`slack`, `github`, …).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Reminder identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    /// Free-form message (reminders, system records).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Free-form content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Aggregate count reported by the source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<i64>,
    /// Chat messages in a batch.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<ChatMessage>,
    /// Per-channel aggregates.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub channels: Vec<ChannelSummary>,
    /// Source-specific fields not used by the relay.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn key_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

impl NotificationRecord {
    /// A synthetic record raised by the relay itself.
    #[must_use]
    pub fn system(message: impl Into<String>) -> Self {
        Self {
            kind: Some("system".into()),
            message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Record type, or `unknown`.
    #[must_use]
    pub fn kind(&self) -> &str {
        self.kind.as_deref().unwrap_or("unknown")
    }

    /// Whether this is a sleep-timeout reminder that must not wake the agent.
    #[must_use]
    pub fn is_sleep_timeout_reminder(&self) -> bool {
        self.kind.as_deref() == Some("reminder")
            && self
                .message
                .as_deref()
                .is_some_and(|msg| msg.starts_with(SLEEP_TIMEOUT_PREFIX))
    }

    /// Stable keys identifying this record's content for deduplication.
    ///
    /// Message timestamps, reminder ids, and per-channel message timestamps
    /// (or `source-channel-unread` when a channel lists no messages). A
    /// record yielding none of these falls back to `type-source-count`.
    #[must_use]
    pub fn dedup_keys(&self) -> BTreeSet<String> {
        let mut keys: BTreeSet<String> = self
            .messages
            .iter()
            .filter_map(|msg| msg.timestamp.as_ref())
            .filter(|ts| !is_blank(ts))
            .map(key_text)
            .collect();

        if self.kind.as_deref() == Some("reminder") {
            let id = self.id.as_ref().map_or_else(|| "none".to_owned(), key_text);
            keys.insert(format!("reminder-{id}"));
        }

        let source = self.source.as_deref().unwrap_or_default();
        for channel in &self.channels {
            if channel.messages.is_empty() {
                keys.insert(format!(
                    "{source}-{}-{}",
                    channel.id.as_deref().unwrap_or_default(),
                    channel.unread.unwrap_or(0)
                ));
            } else {
                keys.extend(
                    channel
                        .messages
                        .iter()
                        .filter_map(|msg| msg.ts.as_ref())
                        .filter(|ts| !is_blank(ts))
                        .map(|ts| format!("{source}-{}", key_text(ts))),
                );
            }
        }

        if keys.is_empty() {
            if let Some(kind) = self.kind.as_deref() {
                keys.insert(format!("{kind}-{source}-{}", self.count.unwrap_or(0)));
            }
        }

        keys
    }
}
