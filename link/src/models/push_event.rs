use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};

use crate::error::{LinkError, Result};

use super::notification::NotificationKind;

/// Application event names on the private user channel, without the
/// leading dot some broadcasters prepend.
pub mod names {
    pub const APPLICATION_RECEIVED: &str = "job.application.received";
    pub const JOB_STATUS_CHANGED: &str = "job.status.changed";
    pub const NOTIFICATION_SENT: &str = "notification.sent";
    pub const MESSAGE_SENT: &str = "message.sent";

    /// Every event the notification feed listens to.
    pub const FEED_EVENTS: [&str; 4] = [
        APPLICATION_RECEIVED,
        JOB_STATUS_CHANGED,
        NOTIFICATION_SENT,
        MESSAGE_SENT,
    ];
}

/// Strip the single leading dot upstream senders sometimes add.
///
/// `.message.sent` and `message.sent` name the same logical event.
pub fn normalize_event_name(name: &str) -> &str {
    name.strip_prefix('.').unwrap_or(name)
}

/// Fields common to every application event.
#[derive(Debug, Clone, PartialEq)]
pub struct EventBody {
    /// Server-issued id of the event or of the record it announces
    pub event_id: Option<String>,

    pub title: Option<String>,

    /// Human-readable message (empty when only a title was sent)
    pub message: String,

    pub timestamp: Option<DateTime<Utc>>,

    /// Payload as received, after string decoding
    pub raw: JsonValue,
}

/// Decoded event from the private user channel.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    /// A candidate applied to one of the employer's jobs
    ApplicationReceived {
        body: EventBody,
        job_id: Option<String>,
        applicant_name: Option<String>,
    },

    /// A job posting changed state (published, expired, closed, ...)
    JobStatusChanged {
        body: EventBody,
        job_id: Option<String>,
        status: Option<String>,
    },

    /// Generic server notification with its own category
    NotificationSent {
        body: EventBody,
        kind: NotificationKind,
    },

    /// A direct message arrived in a conversation
    MessageSent {
        body: EventBody,
        conversation_id: Option<String>,
        sender_name: Option<String>,
    },
}

impl PushEvent {
    /// Decode an event from its wire name and payload.
    ///
    /// Returns `Ok(None)` for event names this client does not handle and
    /// `Err(SerializationError)` when a handled event carries neither a
    /// title nor a message.
    pub fn decode(event_name: &str, payload: &JsonValue) -> Result<Option<Self>> {
        let name = normalize_event_name(event_name);
        if !names::FEED_EVENTS.contains(&name) {
            return Ok(None);
        }

        let payload = match payload {
            JsonValue::String(encoded) => {
                serde_json::from_str(encoded).unwrap_or_else(|_| payload.clone())
            },
            other => other.clone(),
        };
        let fields = Fields::new(&payload);

        let title = fields.string(&["title", "subject"]);
        let message = fields.string(&["message", "body", "description", "content", "text"]);
        if title.is_none() && message.is_none() {
            return Err(LinkError::SerializationError(format!(
                "Event '{}' carries neither title nor message",
                name
            )));
        }

        let body = EventBody {
            event_id: fields.string(&["event_id", "notification_id", "id"]),
            title,
            message: message.unwrap_or_default(),
            timestamp: fields.timestamp(&["timestamp", "created_at", "sent_at"]),
            raw: payload.clone(),
        };

        let event = match name {
            names::APPLICATION_RECEIVED => PushEvent::ApplicationReceived {
                job_id: fields.string(&["job_id", "jobId"]),
                applicant_name: fields.string(&["applicant_name", "candidate_name", "applicantName"]),
                body,
            },
            names::JOB_STATUS_CHANGED => PushEvent::JobStatusChanged {
                job_id: fields.string(&["job_id", "jobId"]),
                status: fields.string(&["status", "new_status"]),
                body,
            },
            names::NOTIFICATION_SENT => PushEvent::NotificationSent {
                kind: fields
                    .string(&["type", "notification_type", "category"])
                    .map(|t| NotificationKind::from_type_str(&t))
                    .unwrap_or(NotificationKind::System),
                body,
            },
            _ => PushEvent::MessageSent {
                conversation_id: fields.string(&["conversation_id", "conversationId"]),
                sender_name: fields.string(&["sender_name", "senderName", "from"]),
                body,
            },
        };

        Ok(Some(event))
    }

    /// Canonical (dot-less) event name.
    pub fn event_name(&self) -> &'static str {
        match self {
            PushEvent::ApplicationReceived { .. } => names::APPLICATION_RECEIVED,
            PushEvent::JobStatusChanged { .. } => names::JOB_STATUS_CHANGED,
            PushEvent::NotificationSent { .. } => names::NOTIFICATION_SENT,
            PushEvent::MessageSent { .. } => names::MESSAGE_SENT,
        }
    }

    pub fn body(&self) -> &EventBody {
        match self {
            PushEvent::ApplicationReceived { body, .. }
            | PushEvent::JobStatusChanged { body, .. }
            | PushEvent::NotificationSent { body, .. }
            | PushEvent::MessageSent { body, .. } => body,
        }
    }

    /// Server-issued id, if any.
    pub fn event_id(&self) -> Option<&str> {
        self.body().event_id.as_deref()
    }

    pub fn notification_kind(&self) -> NotificationKind {
        match self {
            PushEvent::ApplicationReceived { .. } => NotificationKind::Application,
            PushEvent::JobStatusChanged { .. } => NotificationKind::Job,
            PushEvent::NotificationSent { kind, .. } => *kind,
            PushEvent::MessageSent { .. } => NotificationKind::Message,
        }
    }

    /// Title used when the payload did not carry one.
    pub fn default_title(&self) -> &'static str {
        match self {
            PushEvent::ApplicationReceived { .. } => "New application received",
            PushEvent::JobStatusChanged { .. } => "Job status updated",
            PushEvent::NotificationSent { .. } => "Notification",
            PushEvent::MessageSent { .. } => "New message",
        }
    }

    /// Stable identity of this logical event.
    ///
    /// `<event name>:<server id>` when the server sent an id, otherwise
    /// `<event name>:sha256:<hash of the payload>`. A replay of the same
    /// event after reconnect yields the same key.
    pub fn dedupe_key(&self) -> String {
        match self.event_id() {
            Some(id) => format!("{}:{}", self.event_name(), id),
            None => {
                let mut hasher = Sha256::new();
                hasher.update(self.event_name().as_bytes());
                hasher.update(b"\n");
                hasher.update(self.body().raw.to_string().as_bytes());
                let digest = format!("{:x}", hasher.finalize());
                format!("{}:sha256:{}", self.event_name(), &digest[..32])
            },
        }
    }
}

/// Field lookup over a payload and its nested `data` / `message` objects.
struct Fields<'a> {
    scopes: Vec<&'a serde_json::Map<String, JsonValue>>,
}

impl<'a> Fields<'a> {
    fn new(payload: &'a JsonValue) -> Self {
        let mut scopes = Vec::new();
        if let Some(root) = payload.as_object() {
            scopes.push(root);
            if let Some(data) = root.get("data").and_then(JsonValue::as_object) {
                scopes.push(data);
                if let Some(message) = data.get("message").and_then(JsonValue::as_object) {
                    scopes.push(message);
                }
            }
            if let Some(message) = root.get("message").and_then(JsonValue::as_object) {
                scopes.push(message);
            }
        }
        Self { scopes }
    }

    /// First non-empty string or number under any of `keys`, scope by scope.
    fn string(&self, keys: &[&str]) -> Option<String> {
        self.scopes.iter().find_map(|scope| {
            keys.iter().find_map(|key| match scope.get(*key) {
                Some(JsonValue::String(s)) if !s.trim().is_empty() => Some(s.clone()),
                Some(JsonValue::Number(n)) => Some(n.to_string()),
                _ => None,
            })
        })
    }

    fn timestamp(&self, keys: &[&str]) -> Option<DateTime<Utc>> {
        self.string(keys).and_then(|raw| {
            DateTime::parse_from_rfc3339(&raw)
                .map(|ts| ts.with_timezone(&Utc))
                .ok()
        })
    }
}
