//! Push connection management.
//!
//! This module contains:
//! - [`manager`]: the per-tab [`ConnectionManager`] and its background task
//! - [`state`]: observable [`ConnectionState`]
//! - [`transport`]: the [`PushTransport`] / [`PushStream`] seam
//! - [`websocket`]: the Pusher v7 implementation over `tokio-tungstenite`

pub mod manager;
pub mod state;
pub mod transport;
pub mod websocket;

pub use manager::ConnectionManager;
pub use state::{ConnectionFailure, ConnectionState, FailureKind};
pub use transport::{CloseAction, Inbound, PushStream, PushTransport};
pub use websocket::PusherTransport;

/// Buffer size of the per-consumer event channels.
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// A duration far enough in the future (~100 years) to act as "never" for
/// deadline calculations without overflowing `Instant::now() + dur`.
pub(crate) const FAR_FUTURE: std::time::Duration =
    std::time::Duration::from_secs(100 * 365 * 24 * 3600);
