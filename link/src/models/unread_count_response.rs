use serde::{Deserialize, Serialize};

/// Response of `GET /conversations/unread-count`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadCountResponse {
    pub success: bool,

    /// Total unread direct messages across all conversations
    #[serde(default)]
    pub count: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl UnreadCountResponse {
    /// Count clamped to zero; `None` when the server reported failure.
    pub fn unread(&self) -> Option<u64> {
        if self.success {
            Some(self.count.max(0) as u64)
        } else {
            None
        }
    }
}
