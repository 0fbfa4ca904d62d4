use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::push_event::PushEvent;

/// Category of a dashboard notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Application,
    Message,
    Interview,
    Expiry,
    System,
    Job,
}

impl NotificationKind {
    /// Map the free-form `type` of a `notification.sent` payload.
    ///
    /// Unknown values fall back to [`NotificationKind::System`].
    pub fn from_type_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "application" | "job_application" | "new_application" => Self::Application,
            "message" | "new_message" => Self::Message,
            "interview" | "interview_scheduled" => Self::Interview,
            "expiry" | "job_expiry" | "expired" | "expiring" => Self::Expiry,
            "job" | "job_status" | "job_update" => Self::Job,
            _ => Self::System,
        }
    }
}

/// A notification shown in the dashboard feed.
///
/// Serialized with camelCase keys; this is the record format of the shared
/// snapshot every tab of a profile reads and writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Server event id, or a content hash when the server sent none
    pub id: String,

    #[serde(rename = "type")]
    pub kind: NotificationKind,

    pub title: String,

    pub description: String,

    /// Server timestamp if the payload carried one, otherwise receipt time
    pub timestamp: DateTime<Utc>,

    pub is_unread: bool,

    /// Event payload as received
    #[serde(default)]
    pub raw_payload: JsonValue,
}

impl Notification {
    /// Build an unread notification from an inbound event.
    pub fn from_event(event: &PushEvent, received_at: DateTime<Utc>) -> Self {
        let body = event.body();
        Self {
            id: event.dedupe_key(),
            kind: event.notification_kind(),
            title: body
                .title
                .clone()
                .unwrap_or_else(|| event.default_title().to_string()),
            description: body.message.clone(),
            timestamp: body.timestamp.unwrap_or(received_at),
            is_unread: true,
            raw_payload: body.raw.clone(),
        }
    }
}
