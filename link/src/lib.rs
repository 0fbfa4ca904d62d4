//! # jobdesk-link
//!
//! Real-time notification and unread-message sync engine of the Jobdesk
//! employer dashboard.
//!
//! One [`RealtimeEngine`] runs per tab. It owns a single Pusher v7 push
//! connection for the current [`Credential`], multiplexes the notification
//! feed and the unread-message badge over one private channel subscription,
//! and keeps the persisted feed and the unread counter consistent with a
//! server that may deliver events out of order or replay them.
//!
//! ## Features
//!
//! - **One connection per credential**: switching or clearing the
//!   credential tears the previous connection down before a new one opens
//! - **Channel multiplexing**: any number of listeners share one physical
//!   subscription per channel
//! - **Bounded reconnect**: exponential backoff, Pusher error-code handling,
//!   keepalive pings with pong deadlines
//! - **Cross-tab sync**: profile storage change stream plus an in-process
//!   credential signal
//!
//! ## Example
//!
//! ```rust,no_run
//! use jobdesk_link::{CredentialStore, CrossTabSync, EngineConfig, SignalBus};
//! use std::{path::Path, sync::Arc};
//!
//! # async fn example() -> jobdesk_link::Result<()> {
//! let config = EngineConfig::load(Path::new("jobdesk.toml"))?;
//! let tab = config.open_profile()?.open_tab();
//!
//! let engine = Arc::new(config.engine_builder()?.storage(tab.clone()).build()?);
//! let credentials = CredentialStore::with_key(
//!     tab,
//!     SignalBus::new(),
//!     config.resolved_storage().credential_key,
//! );
//!
//! let _sync = CrossTabSync::spawn(Arc::clone(&engine), credentials.clone());
//! engine.apply_credential(credentials.load()).await?;
//!
//! for notification in engine.notifications().snapshot() {
//!     println!("{}: {}", notification.title, notification.description);
//! }
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod client;
pub mod config;
pub mod connection;
pub mod credentials;
pub mod engine;
pub mod error;
pub mod event_handlers;
pub mod models;
pub mod notifications;
pub mod storage;
pub mod subscription;
pub mod sync;
pub mod timeouts;
pub mod unread;

pub use auth::Credential;
pub use client::{DashboardApi, JobdeskClient, JobdeskClientBuilder};
pub use config::EngineConfig;
pub use connection::{
    ConnectionFailure, ConnectionManager, ConnectionState, FailureKind, PushStream,
    PushTransport, PusherTransport,
};
pub use credentials::CredentialStore;
pub use engine::{RealtimeEngine, RealtimeEngineBuilder};
pub use error::{LinkError, Result};
pub use event_handlers::{ConnectionError, DisconnectReason, EventHandlers};
pub use models::{
    ConnectionOptions, Notification, NotificationKind, NotificationSettings, PushEvent,
};
pub use notifications::NotificationStateStore;
pub use storage::{
    FileBackend, MemoryBackend, ProfileStorage, StorageBackend, StorageChange, TabStorage,
};
pub use subscription::{ChannelSubscriptionRegistry, SubscriptionHandle};
pub use sync::{CrossTabSync, SignalBus};
pub use timeouts::{LinkTimeouts, LinkTimeoutsBuilder};
pub use unread::{ActiveConversationMarker, RefreshTicket, UnreadMessageCounter};
