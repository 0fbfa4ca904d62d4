//! Per-tab sync engine.
//!
//! [`RealtimeEngine`] wires one [`ConnectionManager`] to the two consumers of
//! the private user channel:
//!
//! - the notification feed, which ingests every feed event into the
//!   [`NotificationStateStore`];
//! - the message badge, which counts `message.sent` events on the
//!   [`UnreadMessageCounter`].
//!
//! Both consumers share the single physical channel subscription. Each runs
//! as a background task owning its [`SubscriptionHandle`]s, so stopping a
//! consumer is dropping its task.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::{
    auth::Credential,
    client::DashboardApi,
    connection::{ConnectionManager, ConnectionState, PushTransport, DEFAULT_EVENT_CHANNEL_CAPACITY},
    error::{LinkError, Result},
    event_handlers::EventHandlers,
    models::{event_names, ConnectionOptions, NotificationSettings, PushEvent},
    notifications::{NotificationStateStore, DEFAULT_MAX_ENTRIES, DEFAULT_NOTIFICATIONS_KEY},
    storage::TabStorage,
    subscription::SubscriptionHandle,
    timeouts::LinkTimeouts,
    unread::{ActiveConversationMarker, UnreadMessageCounter},
};

/// Consumer tasks of one credential.
struct Consumers {
    credential: Credential,
    tasks: Vec<JoinHandle<()>>,
}

impl Consumers {
    fn stop(self) {
        log::debug!(
            "[jobdesk-link] Stopping {} consumer(s) for user {}",
            self.tasks.len(),
            self.credential.user_id
        );
        for task in self.tasks {
            task.abort();
        }
    }
}

/// Sync engine of one tab.
///
/// # Examples
///
/// ```rust,no_run
/// use jobdesk_link::{
///     Credential, JobdeskClient, ProfileStorage, PusherTransport, RealtimeEngine,
///     LinkTimeouts,
/// };
/// use std::sync::Arc;
///
/// # async fn example() -> jobdesk_link::Result<()> {
/// let api = Arc::new(
///     JobdeskClient::builder()
///         .base_url("https://api.jobdesk.example/api")
///         .build()?,
/// );
/// let transport = Arc::new(PusherTransport::new(
///     "wss://ws.jobdesk.example",
///     "app-key",
///     api.clone(),
///     LinkTimeouts::default(),
/// )?);
///
/// let engine = RealtimeEngine::builder()
///     .api(api)
///     .transport(transport)
///     .storage(ProfileStorage::in_memory().open_tab())
///     .build()?;
///
/// engine.apply_credential(Some(Credential::new("token", "42"))).await?;
/// let mut unread = engine.counter().watch();
/// unread.changed().await.ok();
/// println!("unread messages: {}", *unread.borrow());
/// # Ok(())
/// # }
/// ```
pub struct RealtimeEngine {
    api: Arc<dyn DashboardApi>,
    storage: TabStorage,
    connection: ConnectionManager,
    notifications: Arc<NotificationStateStore>,
    counter: Arc<UnreadMessageCounter>,
    active_conversation: ActiveConversationMarker,
    consumers: Mutex<Option<Consumers>>,
    // Serializes credential transitions across their awaits.
    lifecycle: tokio::sync::Mutex<()>,
}

impl RealtimeEngine {
    pub fn builder() -> RealtimeEngineBuilder {
        RealtimeEngineBuilder::new()
    }

    pub fn storage(&self) -> &TabStorage {
        &self.storage
    }

    pub fn notifications(&self) -> &NotificationStateStore {
        &self.notifications
    }

    pub fn counter(&self) -> &UnreadMessageCounter {
        &self.counter
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn active_conversation(&self) -> &ActiveConversationMarker {
        &self.active_conversation
    }

    /// Credential the consumers currently run for.
    pub fn credential(&self) -> Option<Credential> {
        self.consumers.lock().as_ref().map(|c| c.credential.clone())
    }

    /// Switch the engine to `credential` (login) or to no credential
    /// (logout).
    ///
    /// Login connects, resets the counter, starts both consumers and
    /// refreshes the counter from the server. Applying the current
    /// credential again only retries an errored connection and refreshes
    /// the counter. Logout stops the consumers, disconnects and resets the
    /// counter.
    ///
    /// The returned error is the counter refresh failure, if any; the
    /// engine is switched either way.
    pub async fn apply_credential(&self, credential: Option<Credential>) -> Result<()> {
        let _guard = self.lifecycle.lock().await;

        let credential = match credential {
            Some(credential) if credential.is_usable() => credential,
            Some(_) => {
                log::warn!("[jobdesk-link] Ignoring unusable credential; logging out");
                self.logout();
                return Err(LinkError::AuthenticationError(
                    "Credential has no token or user id".to_string(),
                ));
            },
            None => {
                self.logout();
                return Ok(());
            },
        };

        if self.credential().as_ref() == Some(&credential) {
            self.connection.connect(credential);
            return self.refresh_unread_count().await.map(|_| ());
        }

        if let Some(previous) = self.consumers.lock().take() {
            previous.stop();
        }
        self.counter.reset();
        self.connection.connect(credential.clone());

        let tasks = match self.start_consumers(&credential).await {
            Ok(tasks) => tasks,
            Err(e) => {
                log::warn!("[jobdesk-link] Failed to start consumers: {}", e);
                self.connection.disconnect();
                return Err(e);
            },
        };
        *self.consumers.lock() = Some(Consumers {
            credential: credential.clone(),
            tasks,
        });
        log::info!(
            "[jobdesk-link] Engine active for user {}",
            credential.user_id
        );

        self.refresh_unread_count().await.map(|_| ())
    }

    fn logout(&self) {
        if let Some(consumers) = self.consumers.lock().take() {
            log::info!(
                "[jobdesk-link] Logging out user {}",
                consumers.credential.user_id
            );
            consumers.stop();
        }
        self.connection.disconnect();
        self.counter.reset();
        self.active_conversation.clear();
    }

    async fn start_consumers(&self, credential: &Credential) -> Result<Vec<JoinHandle<()>>> {
        let channel = credential.private_channel();
        let mut tasks = Vec::with_capacity(2);

        let settings = match self.api.fetch_notification_settings(credential).await {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!(
                    "[jobdesk-link] Failed to fetch notification settings, keeping alerts on: {}",
                    e
                );
                NotificationSettings::default()
            },
        };

        if settings.real_time_alerts {
            let (tx, rx) = mpsc::channel(DEFAULT_EVENT_CHANNEL_CAPACITY);
            let mut handles = Vec::with_capacity(event_names::FEED_EVENTS.len());
            for event in event_names::FEED_EVENTS {
                handles.push(self.connection.subscribe(&channel, event, tx.clone()).await?);
            }
            drop(tx);
            tasks.push(tokio::spawn(run_feed(
                Arc::clone(&self.notifications),
                handles,
                rx,
            )));
        } else {
            log::info!("[jobdesk-link] Real-time alerts disabled; feed not subscribed");
        }

        let (tx, rx) = mpsc::channel(DEFAULT_EVENT_CHANNEL_CAPACITY);
        let handle = self
            .connection
            .subscribe(&channel, event_names::MESSAGE_SENT, tx)
            .await?;
        tasks.push(tokio::spawn(run_badge(
            Arc::clone(&self.counter),
            self.active_conversation.clone(),
            handle,
            rx,
        )));

        Ok(tasks)
    }

    /// Fetch the authoritative unread count and apply it.
    ///
    /// A result that arrives after a newer refresh (or after a credential
    /// change) is discarded. On failure the counter keeps its last value
    /// and the error is returned.
    pub async fn refresh_unread_count(&self) -> Result<u64> {
        let Some(credential) = self.credential() else {
            return Err(LinkError::AuthenticationError(
                "No credential to refresh the unread count with".to_string(),
            ));
        };

        let ticket = self.counter.begin_refresh();
        match self.api.fetch_unread_count(&credential).await {
            Ok(count) => {
                self.counter.apply_refresh(ticket, count);
                Ok(self.counter.get())
            },
            Err(e) => {
                log::warn!(
                    "[jobdesk-link] Unread count refresh failed, keeping {}: {}",
                    self.counter.get(),
                    e
                );
                Err(e)
            },
        }
    }

    /// Reload the feed from the shared snapshot.
    pub fn hydrate_notifications(&self) -> usize {
        self.notifications.hydrate()
    }

    pub fn open_conversation(&self, conversation_id: impl Into<String>) {
        self.active_conversation.set(conversation_id);
    }

    pub fn close_conversation(&self) {
        self.active_conversation.clear();
    }

    /// Messages were read locally.
    pub fn mark_messages_read(&self, n: u64) {
        self.counter.decrement(n);
    }

    /// Stop everything. The engine can be reused by applying a credential.
    pub fn shutdown(&self) {
        self.logout();
        log::debug!("[jobdesk-link] Engine shut down");
    }
}

impl Drop for RealtimeEngine {
    fn drop(&mut self) {
        if let Some(consumers) = self.consumers.get_mut().take() {
            consumers.stop();
        }
    }
}

async fn run_feed(
    store: Arc<NotificationStateStore>,
    handles: Vec<SubscriptionHandle>,
    mut rx: mpsc::Receiver<PushEvent>,
) {
    let _handles = handles;
    while let Some(event) = rx.recv().await {
        if let Some(notification) = store.ingest(&event) {
            log::debug!(
                "[jobdesk-link] Feed: {} ({:?})",
                notification.id,
                notification.kind
            );
        }
    }
    log::debug!("[jobdesk-link] Feed consumer ended");
}

async fn run_badge(
    counter: Arc<UnreadMessageCounter>,
    active: ActiveConversationMarker,
    handle: SubscriptionHandle,
    mut rx: mpsc::Receiver<PushEvent>,
) {
    let _handle = handle;
    while let Some(event) = rx.recv().await {
        counter.on_message_event(&event, &active);
    }
    log::debug!("[jobdesk-link] Badge consumer ended");
}

/// Builder for [`RealtimeEngine`].
#[derive(Default)]
pub struct RealtimeEngineBuilder {
    api: Option<Arc<dyn DashboardApi>>,
    transport: Option<Arc<dyn PushTransport>>,
    storage: Option<TabStorage>,
    options: ConnectionOptions,
    timeouts: LinkTimeouts,
    handlers: EventHandlers,
    max_entries: Option<usize>,
    notifications_key: Option<String>,
}

impl RealtimeEngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn api(mut self, api: Arc<dyn DashboardApi>) -> Self {
        self.api = Some(api);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn PushTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn storage(mut self, storage: TabStorage) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn options(mut self, options: ConnectionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn timeouts(mut self, timeouts: LinkTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn event_handlers(mut self, handlers: EventHandlers) -> Self {
        self.handlers = handlers;
        self
    }

    /// Number of notifications kept.
    pub fn max_notifications(mut self, max_entries: usize) -> Self {
        self.max_entries = Some(max_entries);
        self
    }

    pub fn notifications_key(mut self, key: impl Into<String>) -> Self {
        self.notifications_key = Some(key.into());
        self
    }

    /// Build the engine and hydrate the feed from storage.
    pub fn build(self) -> Result<RealtimeEngine> {
        let api = self
            .api
            .ok_or_else(|| LinkError::ConfigurationError("api is required".into()))?;
        let transport = self
            .transport
            .ok_or_else(|| LinkError::ConfigurationError("transport is required".into()))?;
        let storage = self
            .storage
            .ok_or_else(|| LinkError::ConfigurationError("storage is required".into()))?;

        let notifications = NotificationStateStore::with_options(
            storage.clone(),
            self.notifications_key
                .unwrap_or_else(|| DEFAULT_NOTIFICATIONS_KEY.to_string()),
            self.max_entries.unwrap_or(DEFAULT_MAX_ENTRIES),
        );
        notifications.hydrate();

        Ok(RealtimeEngine {
            api,
            storage,
            connection: ConnectionManager::new(transport, self.options, self.timeouts, self.handlers),
            notifications: Arc::new(notifications),
            counter: Arc::new(UnreadMessageCounter::new()),
            active_conversation: ActiveConversationMarker::new(),
            consumers: Mutex::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
        })
    }
}
