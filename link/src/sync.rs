//! Cross-tab propagation of credential changes and cache invalidation.
//!
//! Two signals drive a tab's engine:
//!
//! - the profile storage change stream, which reports writes made by
//!   *other* tabs (login/logout elsewhere, another tab's feed changes);
//! - the in-process [`SignalBus`], fired by [`CredentialStore`] in the tab
//!   that made the change, since storage changes never reach their origin.

use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::{credentials::CredentialStore, engine::RealtimeEngine};

const SIGNAL_CHANNEL_CAPACITY: usize = 16;

/// In-process "credential changed" signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialSignal {
    /// Storage key of the credential that changed.
    pub key: String,
}

/// Broadcast bus for [`CredentialSignal`]s within one tab.
#[derive(Clone)]
pub struct SignalBus {
    tx: broadcast::Sender<CredentialSignal>,
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(SIGNAL_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn credential_changed(&self, key: &str) {
        let _ = self.tx.send(CredentialSignal {
            key: key.to_string(),
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CredentialSignal> {
        self.tx.subscribe()
    }
}

/// Background task applying both signals to a [`RealtimeEngine`].
///
/// - credential key changed: re-read the credential, reconnect or
///   disconnect, then re-hydrate the feed and refresh the counter;
/// - notification snapshot changed (or unknown change after lag):
///   re-hydrate the feed.
///
/// The task stops on [`CrossTabSync::stop`] or when the handle is dropped.
pub struct CrossTabSync {
    task: JoinHandle<()>,
}

impl CrossTabSync {
    pub fn spawn(engine: Arc<RealtimeEngine>, credentials: CredentialStore) -> Self {
        let mut storage_changes = engine.storage().changes();
        let mut signals = credentials.signals().subscribe();

        let task = tokio::spawn(async move {
            let notifications_key = engine.notifications().key().to_string();
            loop {
                let credential_changed = tokio::select! {
                    change = storage_changes.next() => match change {
                        Some(change) => {
                            log::debug!(
                                "[jobdesk-link] Storage change from tab {:?}: {:?}",
                                change.origin,
                                change.key
                            );
                            if change.affects(credentials.key()) {
                                true
                            } else {
                                if change.affects(&notifications_key) {
                                    engine.hydrate_notifications();
                                }
                                continue;
                            }
                        },
                        None => break,
                    },
                    signal = signals.recv() => match signal {
                        Ok(signal) if signal.key == credentials.key() => true,
                        Ok(_) => continue,
                        Err(broadcast::error::RecvError::Lagged(_)) => true,
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                };

                if credential_changed {
                    let credential = credentials.load();
                    log::info!(
                        "[jobdesk-link] Credential changed (logged in: {})",
                        credential.is_some()
                    );
                    if let Err(e) = engine.apply_credential(credential).await {
                        log::warn!("[jobdesk-link] Failed to apply credential: {}", e);
                    }
                    engine.hydrate_notifications();
                }
            }
            log::debug!("[jobdesk-link] Cross-tab sync stopped");
        });

        Self { task }
    }

    /// Stop reacting to both signals. Dropping the handle does the same.
    pub fn stop(self) {
        self.task.abort();
        log::debug!("[jobdesk-link] Cross-tab sync stop requested");
    }
}

impl Drop for CrossTabSync {
    fn drop(&mut self) {
        self.task.abort();
    }
}
