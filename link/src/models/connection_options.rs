use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection-level options for the push connection.
///
/// These options control reconnection behavior after a transient failure.
/// Authentication failures are never retried regardless of these settings.
///
/// # Example
///
/// ```rust
/// use jobdesk_link::ConnectionOptions;
///
/// let options = ConnectionOptions::default()
///     .with_auto_reconnect(true)
///     .with_reconnect_delay_ms(2000)
///     .with_max_reconnect_attempts(Some(5));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionOptions {
    /// Enable automatic reconnection on connection loss
    /// Default: true
    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,

    /// Initial delay in milliseconds between reconnection attempts
    /// Default: 1000ms (1 second)
    /// Uses exponential backoff up to max_reconnect_delay_ms
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Maximum delay between reconnection attempts (for exponential backoff)
    /// Default: 30000ms (30 seconds)
    #[serde(default = "default_max_reconnect_delay_ms")]
    pub max_reconnect_delay_ms: u64,

    /// Maximum number of consecutive reconnection attempts before the
    /// connection gives up and enters the errored state.
    /// Default: Some(10). None retries forever.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: Option<u32>,

    /// A session must stay open this long before the attempt counter is
    /// reset. Shorter sessions count as failed attempts.
    /// Default: 10000ms (10 seconds)
    #[serde(default = "default_stable_session_ms")]
    pub stable_session_ms: u64,
}

fn default_auto_reconnect() -> bool {
    true
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

fn default_max_reconnect_delay_ms() -> u64 {
    30000
}

fn default_max_reconnect_attempts() -> Option<u32> {
    Some(10)
}

fn default_stable_session_ms() -> u64 {
    10_000
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            auto_reconnect: default_auto_reconnect(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_delay_ms: default_max_reconnect_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            stable_session_ms: default_stable_session_ms(),
        }
    }
}

impl ConnectionOptions {
    /// Create new connection options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether to automatically reconnect on connection loss
    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    /// Set the initial delay between reconnection attempts (in milliseconds)
    pub fn with_reconnect_delay_ms(mut self, delay_ms: u64) -> Self {
        self.reconnect_delay_ms = delay_ms;
        self
    }

    /// Set the maximum delay between reconnection attempts (in milliseconds)
    pub fn with_max_reconnect_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_reconnect_delay_ms = max_delay_ms;
        self
    }

    /// Set the maximum number of reconnection attempts
    /// Pass None for infinite retries, Some(0) to give up on the first failure.
    /// `EngineConfig` maps a TOML value of 0 to None.
    pub fn with_max_reconnect_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_reconnect_attempts = max_attempts;
        self
    }

    /// Set how long a session must stay open to reset the attempt counter
    pub fn with_stable_session_ms(mut self, stable_ms: u64) -> Self {
        self.stable_session_ms = stable_ms;
        self
    }

    pub fn stable_session(&self) -> Duration {
        Duration::from_millis(self.stable_session_ms)
    }

    /// Backoff delay before reconnection attempt number `attempt` (1-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let delay = self
            .reconnect_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent));
        Duration::from_millis(std::cmp::min(delay, self.max_reconnect_delay_ms))
    }

    /// Whether another attempt is allowed after `attempts` consecutive failures.
    pub fn allows_attempt(&self, attempt: u32) -> bool {
        self.auto_reconnect && self.max_reconnect_attempts.map_or(true, |max| attempt <= max)
    }
}
