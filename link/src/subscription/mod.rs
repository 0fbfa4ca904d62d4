//! Listener multiplexing over the shared push connection.
//!
//! - [`registry`]: per-channel listener sets owned by the connection task
//! - [`handle`]: caller-side handle that unsubscribes on drop

pub mod handle;
pub mod registry;

pub use handle::SubscriptionHandle;
pub use registry::{ChannelInfo, ChannelStatus, ChannelSubscriptionRegistry, ListenerId, Registration};
