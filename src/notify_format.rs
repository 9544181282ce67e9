//! Wake-message formatting.

use crate::models::notification::NotificationRecord;

/// Separator between formatted notification groups.
pub const GROUP_SEPARATOR: &str = "\n\n---\n\n";

/// Formatting family of a notification record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    /// Chat or Slack message batch.
    Message,
    /// Scheduled reminder.
    Reminder,
    /// Anything else (`email`, `github`, `system`, …).
    Other,
}

impl NotificationKind {
    /// Family of `record`, from its `type` tag.
    #[must_use]
    pub fn of(record: &NotificationRecord) -> Self {
        match record.kind() {
            "message" => Self::Message,
            "reminder" => Self::Reminder,
            _ => Self::Other,
        }
    }
}

fn format_message(record: &NotificationRecord) -> String {
    if record.source.as_deref() == Some("slack") {
        let channels = record
            .channels
            .iter()
            .map(|ch| ch.name.as_deref().or(ch.id.as_deref()).unwrap_or("?"))
            .collect::<Vec<_>>()
            .join(", ");
        return format!(
            "New Slack message(s) ({}) in: {channels}. Check your Slack DMs.",
            record.count.unwrap_or(0)
        );
    }
    if record.messages.is_empty() {
        return "New chat message (check unread to view)".to_owned();
    }
    record
        .messages
        .iter()
        .map(|msg| msg.content.as_deref().unwrap_or_default())
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_reminder(record: &NotificationRecord) -> String {
    let id = match &record.id {
        Some(serde_json::Value::String(id)) => id.clone(),
        Some(other) => other.to_string(),
        None => "?".to_owned(),
    };
    format!(
        "\u{23f0} REMINDER (ID {id}):\n\n{}",
        record.message.as_deref().unwrap_or("(no message)")
    )
}

fn format_other(record: &NotificationRecord) -> String {
    let body = record
        .message
        .clone()
        .or_else(|| record.content.clone())
        .unwrap_or_else(|| serde_json::to_string(record).unwrap_or_default());
    format!("[{}] {body}", record.kind())
}

/// Render one record.
#[must_use]
pub fn format_record(record: &NotificationRecord) -> String {
    match NotificationKind::of(record) {
        NotificationKind::Message => format_message(record),
        NotificationKind::Reminder => format_reminder(record),
        NotificationKind::Other => format_other(record),
    }
}

/// Render a wake batch.
///
/// Records are grouped by `type` in order of first appearance; every
/// record becomes one part and parts are joined by [`GROUP_SEPARATOR`].
#[must_use]
pub fn format_notifications(records: &[NotificationRecord]) -> String {
    let mut groups: Vec<(&str, Vec<&NotificationRecord>)> = Vec::new();
    for record in records {
        match groups.iter_mut().find(|(kind, _)| *kind == record.kind()) {
            Some((_, members)) => members.push(record),
            None => groups.push((record.kind(), vec![record])),
        }
    }

    groups
        .iter()
        .flat_map(|(_, members)| members.iter().map(|record| format_record(record)))
        .collect::<Vec<_>>()
        .join(GROUP_SEPARATOR)
}
