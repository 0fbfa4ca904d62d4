use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

/// Pusher protocol event names used by the client.
pub mod events {
    pub const SUBSCRIBE: &str = "pusher:subscribe";
    pub const UNSUBSCRIBE: &str = "pusher:unsubscribe";
    pub const PING: &str = "pusher:ping";
    pub const PONG: &str = "pusher:pong";
}

/// Client-to-server frame (Pusher protocol v7).
///
/// Every frame is a JSON object `{"event": ..., "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientMessage {
    /// Protocol event name (`pusher:subscribe`, `pusher:ping`, ...)
    pub event: String,

    /// Event payload
    pub data: JsonValue,
}

impl ClientMessage {
    /// Subscribe to a channel using the signature returned by the
    /// channel-authorization endpoint.
    pub fn subscribe(wire_channel: &str, auth: &str) -> Self {
        Self {
            event: events::SUBSCRIBE.to_string(),
            data: json!({ "channel": wire_channel, "auth": auth }),
        }
    }

    /// Release a channel subscription.
    pub fn unsubscribe(wire_channel: &str) -> Self {
        Self {
            event: events::UNSUBSCRIBE.to_string(),
            data: json!({ "channel": wire_channel }),
        }
    }

    /// Client-initiated keepalive.
    pub fn ping() -> Self {
        Self {
            event: events::PING.to_string(),
            data: json!({}),
        }
    }

    /// Reply to a server `pusher:ping`.
    pub fn pong() -> Self {
        Self {
            event: events::PONG.to_string(),
            data: json!({}),
        }
    }
}
