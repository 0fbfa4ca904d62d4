use serde::{Deserialize, Serialize};

/// Response of `POST /broadcasting/auth` for a private channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelAuthResponse {
    /// `<app key>:<signature>` to put in `pusher:subscribe`
    pub auth: String,

    /// Only present for presence channels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_data: Option<String>,
}
