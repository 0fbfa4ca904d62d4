//! Notification feed state.
//!
//! [`NotificationStateStore`] keeps the feed most-recent-first in arrival
//! order and writes the whole list back to profile storage after every
//! mutation, so other tabs can re-hydrate from the same snapshot.

use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashSet;
use tokio::sync::watch;

use crate::{
    models::{Notification, PushEvent},
    storage::TabStorage,
};

/// Default storage key of the notification snapshot.
pub const DEFAULT_NOTIFICATIONS_KEY: &str = "employer_notifications";

/// Default number of entries kept.
pub const DEFAULT_MAX_ENTRIES: usize = 100;

/// Ordered, persisted collection of [`Notification`]s.
pub struct NotificationStateStore {
    storage: TabStorage,
    key: String,
    max_entries: usize,
    entries: RwLock<Vec<Notification>>,
    unread_tx: watch::Sender<usize>,
}

impl NotificationStateStore {
    pub fn new(storage: TabStorage) -> Self {
        Self::with_options(storage, DEFAULT_NOTIFICATIONS_KEY, DEFAULT_MAX_ENTRIES)
    }

    /// `max_entries` is clamped to at least one.
    pub fn with_options(storage: TabStorage, key: impl Into<String>, max_entries: usize) -> Self {
        let (unread_tx, _) = watch::channel(0);
        Self {
            storage,
            key: key.into(),
            max_entries: max_entries.max(1),
            entries: RwLock::new(Vec::new()),
            unread_tx,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Replace the in-memory list with the persisted snapshot.
    ///
    /// A missing snapshot yields an empty store; a corrupt one is discarded
    /// with a warning. Returns the number of entries loaded.
    pub fn hydrate(&self) -> usize {
        let loaded = match self.storage.get(&self.key) {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<Notification>>(&raw) {
                Ok(list) => list,
                Err(e) => {
                    log::warn!(
                        "[jobdesk-link] Discarding corrupt notification snapshot '{}': {}",
                        self.key,
                        e
                    );
                    Vec::new()
                },
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                log::warn!(
                    "[jobdesk-link] Failed to read notification snapshot '{}': {}",
                    self.key,
                    e
                );
                Vec::new()
            },
        };

        let mut seen = HashSet::new();
        let mut list: Vec<Notification> = loaded
            .into_iter()
            .filter(|n| seen.insert(n.id.clone()))
            .collect();
        list.truncate(self.max_entries);

        let count = list.len();
        *self.entries.write() = list;
        self.publish_unread();
        log::debug!("[jobdesk-link] Hydrated {} notification(s)", count);
        count
    }

    /// Prepend a notification for `event`.
    ///
    /// Returns `None` when a notification with the same id is already
    /// present (replay after reconnect).
    pub fn ingest(&self, event: &PushEvent) -> Option<Notification> {
        let notification = Notification::from_event(event, Utc::now());
        {
            let mut entries = self.entries.write();
            if entries.iter().any(|n| n.id == notification.id) {
                log::debug!(
                    "[jobdesk-link] Ignoring duplicate notification {}",
                    notification.id
                );
                return None;
            }
            entries.insert(0, notification.clone());
            entries.truncate(self.max_entries);
            self.persist(&entries);
        }
        self.publish_unread();
        Some(notification)
    }

    /// Mark one notification read. Returns whether anything changed.
    pub fn mark_as_read(&self, id: &str) -> bool {
        {
            let mut entries = self.entries.write();
            let Some(notification) = entries.iter_mut().find(|n| n.id == id && n.is_unread) else {
                return false;
            };
            notification.is_unread = false;
            self.persist(&entries);
        }
        self.publish_unread();
        true
    }

    /// Mark every notification read. Returns how many changed.
    pub fn mark_all_as_read(&self) -> usize {
        let changed = {
            let mut entries = self.entries.write();
            let mut changed = 0;
            for notification in entries.iter_mut().filter(|n| n.is_unread) {
                notification.is_unread = false;
                changed += 1;
            }
            if changed > 0 {
                self.persist(&entries);
            }
            changed
        };
        if changed > 0 {
            self.publish_unread();
        }
        changed
    }

    pub fn clear(&self) {
        {
            let mut entries = self.entries.write();
            entries.clear();
            self.persist(&entries);
        }
        self.publish_unread();
    }

    /// Number of unread entries, computed on demand.
    pub fn derived_unread_count(&self) -> usize {
        self.entries.read().iter().filter(|n| n.is_unread).count()
    }

    /// Observe the derived unread count.
    pub fn watch_unread(&self) -> watch::Receiver<usize> {
        self.unread_tx.subscribe()
    }

    /// Entries most-recent-first.
    pub fn snapshot(&self) -> Vec<Notification> {
        self.entries.read().clone()
    }

    pub fn get(&self, id: &str) -> Option<Notification> {
        self.entries.read().iter().find(|n| n.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn persist(&self, entries: &[Notification]) {
        let result = serde_json::to_string(entries)
            .map_err(crate::LinkError::from)
            .and_then(|json| self.storage.set(&self.key, &json));
        if let Err(e) = result {
            log::warn!(
                "[jobdesk-link] Failed to persist notifications '{}': {}",
                self.key,
                e
            );
        }
    }

    fn publish_unread(&self) {
        let unread = self.derived_unread_count();
        self.unread_tx.send_if_modified(|current| {
            if *current == unread {
                return false;
            }
            *current = unread;
            true
        });
    }
}
