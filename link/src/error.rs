//! Error types for jobdesk-link.
//!
//! Connection- and subscription-level failures never reach UI callers as
//! errors; they surface as [`ConnectionState`](crate::ConnectionState) and
//! through [`EventHandlers`](crate::EventHandlers). The variants here are what
//! fallible operations (REST fetches, storage, configuration, transport
//! handshakes) return.

use thiserror::Error;

/// Result type used throughout jobdesk-link.
pub type Result<T> = std::result::Result<T, LinkError>;

/// Errors produced by the sync engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// The credential was rejected (HTTP 401/403, Pusher code 4009, channel
    /// authorization refused). Never retried automatically.
    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    /// Transient transport failure (DNS, TCP, TLS, dropped socket).
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Persisted state could not be read or written.
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// A REST fetch (unread count, notification settings) failed.
    #[error("Fetch of {endpoint} failed: {message}")]
    FetchError { endpoint: String, message: String },

    #[error("Timeout: {0}")]
    TimeoutError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Protocol-level WebSocket failure (bad frame, unexpected close, Pusher error).
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    #[error("Server error ({status_code}): {message}")]
    ServerError { status_code: u16, message: String },

    /// The operation was abandoned because the owning connection went away.
    #[error("Operation cancelled")]
    Cancelled,
}

impl LinkError {
    pub(crate) fn fetch(endpoint: &str, message: impl Into<String>) -> Self {
        Self::FetchError {
            endpoint: endpoint.to_string(),
            message: message.into(),
        }
    }

    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NetworkError(_) | Self::TimeoutError(_) | Self::WebSocketError(_)
        ) || matches!(self, Self::ServerError { status_code, .. } if *status_code >= 500)
    }
}

impl From<reqwest::Error> for LinkError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LinkError::TimeoutError(err.to_string())
        } else if err.is_decode() {
            LinkError::SerializationError(err.to_string())
        } else {
            LinkError::NetworkError(err.to_string())
        }
    }
}

impl From<serde_json::Error> for LinkError {
    fn from(err: serde_json::Error) -> Self {
        LinkError::SerializationError(err.to_string())
    }
}

impl From<std::io::Error> for LinkError {
    fn from(err: std::io::Error) -> Self {
        LinkError::PersistenceError(err.to_string())
    }
}

impl From<toml::de::Error> for LinkError {
    fn from(err: toml::de::Error) -> Self {
        LinkError::ConfigurationError(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for LinkError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::Io(e) => LinkError::NetworkError(e.to_string()),
            WsError::ConnectionClosed | WsError::AlreadyClosed => {
                LinkError::NetworkError("WebSocket connection closed".to_string())
            },
            other => LinkError::WebSocketError(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(LinkError::NetworkError("reset".into()).is_transient());
        assert!(LinkError::TimeoutError("10s".into()).is_transient());
        assert!(LinkError::ServerError {
            status_code: 503,
            message: "unavailable".into()
        }
        .is_transient());

        assert!(!LinkError::AuthenticationError("bad token".into()).is_transient());
        assert!(!LinkError::ServerError {
            status_code: 422,
            message: "invalid".into()
        }
        .is_transient());
        assert!(!LinkError::fetch("unread-count", "boom").is_transient());
    }

    #[test]
    fn test_fetch_error_display() {
        let err = LinkError::fetch("conversations/unread-count", "success=false");
        assert_eq!(
            err.to_string(),
            "Fetch of conversations/unread-count failed: success=false"
        );
    }
}
