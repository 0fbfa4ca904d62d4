use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::{auth::Credential, error::Result};

/// Pusher error code for a rejected credential.
pub const UNAUTHORIZED_CODE: u16 = 4009;

/// Frame received on an open push stream, already classified.
///
/// Channel names are logical (`user.42`), never wire names.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Application event on a subscribed channel
    Event {
        channel: String,
        event: String,
        data: JsonValue,
    },
    Subscribed {
        channel: String,
    },
    SubscriptionFailed {
        channel: String,
        status: Option<u16>,
        message: String,
    },
    /// Server keepalive; answer with a pong
    Ping,
    Pong,
    /// `pusher:error` received after the handshake
    Error {
        code: Option<u16>,
        message: String,
    },
    /// The server closed the socket
    Closed {
        code: Option<u16>,
        reason: String,
    },
}

/// What to do after the server reported an error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseAction {
    /// 4000-4099: do not reconnect
    Fatal,
    /// 4100-4199: reconnect after backoff
    Backoff,
    /// 4200-4299: reconnect right away
    Immediate,
}

impl CloseAction {
    /// Classify a Pusher error/close code. Codes outside 4000-4299 carry no
    /// instruction.
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            4000..=4099 => Some(CloseAction::Fatal),
            4100..=4199 => Some(CloseAction::Backoff),
            4200..=4299 => Some(CloseAction::Immediate),
            _ => None,
        }
    }
}

/// Opens push streams for a credential.
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Open a socket and complete the protocol handshake.
    ///
    /// Fails with `AuthenticationError` when the credential is rejected and
    /// with `ServerError { status_code }` carrying the Pusher code when the
    /// server refuses the connection.
    async fn open(&self, credential: &Credential) -> Result<Box<dyn PushStream>>;
}

/// One live push connection.
#[async_trait]
pub trait PushStream: Send {
    /// Socket id assigned by the handshake.
    fn socket_id(&self) -> &str;

    /// Physically subscribe to a logical channel (authorizing it first when
    /// private).
    async fn subscribe(&mut self, channel: &str) -> Result<()>;

    async fn unsubscribe(&mut self, channel: &str) -> Result<()>;

    /// Client keepalive.
    async fn ping(&mut self) -> Result<()>;

    /// Reply to a server keepalive.
    async fn pong(&mut self) -> Result<()>;

    /// Next classified frame. `None` once the stream ended.
    ///
    /// Must be cancel-safe: it is polled inside `select!`.
    async fn next_frame(&mut self) -> Option<Result<Inbound>>;

    /// Close the socket. Errors are swallowed.
    async fn close(&mut self);
}
