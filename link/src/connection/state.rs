use std::fmt;

/// Why a connection ended up in [`ConnectionState::Errored`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The credential was rejected. Never retried automatically.
    Unauthorized,
    /// The endpoint could not be reached within the reconnect budget.
    Unreachable,
    /// The server reported a fatal protocol error (Pusher 4000-4099).
    Protocol,
}

/// Terminal failure details exposed to the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl ConnectionFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for ConnectionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            FailureKind::Unauthorized => "unauthorized",
            FailureKind::Unreachable => "unreachable",
            FailureKind::Protocol => "protocol error",
        };
        write!(f, "{}: {}", kind, self.message)
    }
}

/// Observable lifecycle of the push connection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No credential, or the connection was torn down.
    #[default]
    Disconnected,

    /// Opening the socket (attempt 0 is the first try, higher values are
    /// reconnects).
    Connecting { attempt: u32 },

    /// Handshake completed.
    Connected { socket_id: String },

    /// Gave up. Requires `reconnect()` or a new credential.
    Errored(ConnectionFailure),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected { .. })
    }

    pub fn is_errored(&self) -> bool {
        matches!(self, ConnectionState::Errored(_))
    }

    pub fn socket_id(&self) -> Option<&str> {
        match self {
            ConnectionState::Connected { socket_id } => Some(socket_id),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&ConnectionFailure> {
        match self {
            ConnectionState::Errored(failure) => Some(failure),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting { attempt: 0 } => write!(f, "connecting"),
            ConnectionState::Connecting { attempt } => {
                write!(f, "connecting (attempt {})", attempt)
            },
            ConnectionState::Connected { socket_id } => write!(f, "connected ({})", socket_id),
            ConnectionState::Errored(failure) => write!(f, "errored ({})", failure),
        }
    }
}
