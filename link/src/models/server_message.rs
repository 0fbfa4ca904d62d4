use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Pusher protocol event names sent by the server.
pub mod events {
    pub const CONNECTION_ESTABLISHED: &str = "pusher:connection_established";
    pub const ERROR: &str = "pusher:error";
    pub const PING: &str = "pusher:ping";
    pub const PONG: &str = "pusher:pong";
    pub const SUBSCRIPTION_SUCCEEDED: &str = "pusher_internal:subscription_succeeded";
    pub const SUBSCRIPTION_ERROR: &str = "pusher_internal:subscription_error";
}

/// Server-to-client frame (Pusher protocol v7).
///
/// Channel events carry `channel`; protocol events do not. `data` is
/// usually a JSON document encoded as a string, but some servers send the
/// object directly, so both are accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerMessage {
    /// Event name, protocol (`pusher:*`) or application (`.message.sent`)
    pub event: String,

    /// Wire channel name (e.g. `private-user.42`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,

    /// Raw event data
    #[serde(default)]
    pub data: JsonValue,
}

impl ServerMessage {
    /// Event data with one level of string encoding removed.
    pub fn payload(&self) -> JsonValue {
        match &self.data {
            JsonValue::String(encoded) => {
                serde_json::from_str(encoded).unwrap_or_else(|_| self.data.clone())
            },
            other => other.clone(),
        }
    }

    /// Whether this is a `pusher:*` / `pusher_internal:*` protocol frame.
    pub fn is_protocol_event(&self) -> bool {
        self.event.starts_with("pusher:") || self.event.starts_with("pusher_internal:")
    }
}

/// Payload of `pusher:connection_established`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionEstablished {
    /// Socket id used for channel authorization
    pub socket_id: String,

    /// Server-suggested inactivity interval in seconds before pinging
    #[serde(default)]
    pub activity_timeout: Option<u64>,
}

/// Payload of `pusher:error` and `pusher_internal:subscription_error`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolError {
    #[serde(default)]
    pub message: Option<String>,

    /// Pusher error code (4000-4299) for `pusher:error`
    #[serde(default)]
    pub code: Option<u16>,

    /// HTTP-like status for subscription errors
    #[serde(default)]
    pub status: Option<u16>,

    #[serde(default, rename = "type")]
    pub error_type: Option<String>,
}

impl ProtocolError {
    /// Human-readable message, falling back to the error type or code.
    pub fn describe(&self) -> String {
        if let Some(message) = &self.message {
            return message.clone();
        }
        if let Some(error_type) = &self.error_type {
            return error_type.clone();
        }
        match self.code.or(self.status) {
            Some(code) => format!("error code {}", code),
            None => "unknown error".to_string(),
        }
    }
}
