//! Timeout configuration for jobdesk-link operations.
//!
//! Centralizes the timeouts used by REST fetches, the WebSocket handshake and
//! the keepalive loop of the push connection.

use std::time::Duration;

/// Timeout configuration for jobdesk-link operations.
///
/// # Examples
///
/// ```rust
/// use jobdesk_link::LinkTimeouts;
/// use std::time::Duration;
///
/// // Defaults are tuned for a hosted Pusher-compatible endpoint
/// let timeouts = LinkTimeouts::default();
///
/// // Tighter values for a local development stack
/// let timeouts = LinkTimeouts::builder()
///     .connection_timeout(Duration::from_secs(2))
///     .keepalive_interval_secs(15)
///     .build();
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkTimeouts {
    /// Timeout for establishing the WebSocket (TCP + TLS + upgrade).
    /// Default: 10 seconds
    pub connection_timeout: Duration,

    /// Timeout for the Pusher handshake (`pusher:connection_established`).
    /// Default: 5 seconds
    pub auth_timeout: Duration,

    /// Timeout for each REST request (unread count, settings, channel auth).
    /// Default: 30 seconds
    pub request_timeout: Duration,

    /// Inbound silence after which a `pusher:ping` is sent.
    /// Set to 0 to disable keepalive pings.
    /// Default: 60 seconds
    pub keepalive_interval: Duration,

    /// Maximum wait for any frame after a keepalive ping before the
    /// connection is considered dead and reconnected.
    /// Set to 0 to disable pong timeout checking.
    /// Default: 30 seconds
    pub pong_timeout: Duration,

    /// How long a new connection waits for the previous one to finish its
    /// teardown before aborting it.
    /// Default: 2 seconds
    pub teardown_grace: Duration,
}

impl Default for LinkTimeouts {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(10),
            auth_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            keepalive_interval: Duration::from_secs(60),
            pong_timeout: Duration::from_secs(30),
            teardown_grace: Duration::from_secs(2),
        }
    }
}

impl LinkTimeouts {
    /// Create a new builder for custom timeout configuration.
    pub fn builder() -> LinkTimeoutsBuilder {
        LinkTimeoutsBuilder::new()
    }

    /// Short timeouts suitable for localhost and tests.
    pub fn fast() -> Self {
        Self {
            connection_timeout: Duration::from_secs(2),
            auth_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_secs(5),
            keepalive_interval: Duration::from_secs(15),
            pong_timeout: Duration::from_secs(5),
            teardown_grace: Duration::from_millis(500),
        }
    }

    /// Long timeouts for high-latency or unreliable networks.
    pub fn relaxed() -> Self {
        Self {
            connection_timeout: Duration::from_secs(30),
            auth_timeout: Duration::from_secs(15),
            request_timeout: Duration::from_secs(60),
            keepalive_interval: Duration::from_secs(120),
            pong_timeout: Duration::from_secs(30),
            teardown_grace: Duration::from_secs(5),
        }
    }

    /// Check if a duration represents "no timeout" (zero or very large).
    pub fn is_no_timeout(duration: Duration) -> bool {
        duration.is_zero() || duration > Duration::from_secs(86400 * 365)
    }
}

/// Builder for creating custom [`LinkTimeouts`] configurations.
#[derive(Debug, Clone)]
pub struct LinkTimeoutsBuilder {
    timeouts: LinkTimeouts,
}

impl LinkTimeoutsBuilder {
    fn new() -> Self {
        Self {
            timeouts: LinkTimeouts::default(),
        }
    }

    /// Set the WebSocket connection timeout.
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.connection_timeout = timeout;
        self
    }

    /// Set the WebSocket connection timeout in seconds.
    pub fn connection_timeout_secs(self, secs: u64) -> Self {
        self.connection_timeout(Duration::from_secs(secs))
    }

    /// Set the handshake timeout.
    pub fn auth_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.auth_timeout = timeout;
        self
    }

    /// Set the REST request timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.request_timeout = timeout;
        self
    }

    /// Set the REST request timeout in seconds.
    pub fn request_timeout_secs(self, secs: u64) -> Self {
        self.request_timeout(Duration::from_secs(secs))
    }

    /// Set the keepalive ping interval. Set to 0 to disable.
    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.timeouts.keepalive_interval = interval;
        self
    }

    /// Set the keepalive ping interval in seconds. Set to 0 to disable.
    pub fn keepalive_interval_secs(self, secs: u64) -> Self {
        self.keepalive_interval(Duration::from_secs(secs))
    }

    /// Set the pong timeout. Set to 0 to disable.
    pub fn pong_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.pong_timeout = timeout;
        self
    }

    /// Set the teardown grace period for a replaced connection.
    pub fn teardown_grace(mut self, grace: Duration) -> Self {
        self.timeouts.teardown_grace = grace;
        self
    }

    /// Build the timeout configuration.
    pub fn build(self) -> LinkTimeouts {
        self.timeouts
    }
}
