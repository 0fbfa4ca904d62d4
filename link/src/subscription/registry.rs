//! Listener bookkeeping for the single physical connection.
//!
//! The registry is owned by the connection task and never touches the
//! network itself: it tells the task when a channel must be physically
//! subscribed or released, and fans decoded events out to listeners.

use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use tokio::sync::mpsc;

use crate::models::{normalize_event_name, PushEvent};

/// Identifier of one registered listener.
pub type ListenerId = u64;

/// Physical subscription state of a channel on the current connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelStatus {
    /// Registered while offline, or reset by a reconnect.
    Pending,
    /// `pusher:subscribe` sent, no confirmation yet.
    Requested,
    Subscribed,
    /// Server refused the subscription.
    Failed,
}

impl ChannelStatus {
    fn is_physical(self) -> bool {
        matches!(self, ChannelStatus::Requested | ChannelStatus::Subscribed)
    }
}

/// Snapshot of one channel for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub channel: String,
    pub status: ChannelStatus,
    /// Normalized event name of every listener, in registration order
    pub events: Vec<String>,
}

impl ChannelInfo {
    pub fn listener_count(&self) -> usize {
        self.events.len()
    }
}

/// Result of [`ChannelSubscriptionRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub id: ListenerId,
    /// First listener on the channel: the caller must subscribe physically
    /// (once connected).
    pub opens_channel: bool,
}

struct ListenerEntry {
    id: ListenerId,
    event: String,
    tx: mpsc::Sender<PushEvent>,
}

struct ChannelEntry {
    listeners: Vec<ListenerEntry>,
    status: ChannelStatus,
}

/// Multiplexes logical listeners onto one physical subscription per channel.
#[derive(Default)]
pub struct ChannelSubscriptionRegistry {
    channels: BTreeMap<String, ChannelEntry>,
    next_id: ListenerId,
}

impl ChannelSubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener for `event` on `channel`.
    pub fn register(
        &mut self,
        channel: &str,
        event: &str,
        tx: mpsc::Sender<PushEvent>,
    ) -> Registration {
        self.next_id += 1;
        let id = self.next_id;

        let opens_channel = !self.channels.contains_key(channel);
        let entry = self
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| ChannelEntry {
                listeners: Vec::new(),
                status: ChannelStatus::Pending,
            });
        entry.listeners.push(ListenerEntry {
            id,
            event: normalize_event_name(event).to_string(),
            tx,
        });

        log::debug!(
            "[jobdesk-link] Listener {} registered for '{}' on '{}' ({} on channel)",
            id,
            normalize_event_name(event),
            channel,
            entry.listeners.len()
        );

        Registration { id, opens_channel }
    }

    /// Remove one listener.
    ///
    /// Returns the channel name when that was its last listener and the
    /// channel is physically subscribed, i.e. the caller must send an
    /// unsubscribe. Unknown ids are ignored.
    pub fn unregister(&mut self, id: ListenerId) -> Option<String> {
        let channel = self
            .channels
            .iter()
            .find(|(_, entry)| entry.listeners.iter().any(|l| l.id == id))
            .map(|(name, _)| name.clone())?;

        let entry = self.channels.get_mut(&channel)?;
        entry.listeners.retain(|l| l.id != id);
        log::debug!("[jobdesk-link] Listener {} removed from '{}'", id, channel);
        self.release_if_empty(&channel)
    }

    fn release_if_empty(&mut self, channel: &str) -> Option<String> {
        let empty = self
            .channels
            .get(channel)
            .is_some_and(|entry| entry.listeners.is_empty());
        if !empty {
            return None;
        }
        let entry = self.channels.remove(channel)?;
        log::debug!("[jobdesk-link] Channel '{}' has no listeners left", channel);
        entry.status.is_physical().then(|| channel.to_string())
    }

    /// Decode an inbound event once and deliver it to every listener of the
    /// matching event on `channel`, in registration order.
    ///
    /// Never waits on a listener: a listener whose buffer is full misses
    /// this event, the others still get it. Listeners whose receiver is gone
    /// are pruned. Returns the channel when pruning released it.
    pub fn dispatch(
        &mut self,
        channel: &str,
        event_name: &str,
        data: &JsonValue,
    ) -> Option<String> {
        let name = normalize_event_name(event_name);
        let entry = self.channels.get(channel)?;
        if !entry.listeners.iter().any(|l| l.event == name) {
            log::debug!("[jobdesk-link] No listener for '{}' on '{}'", name, channel);
            return None;
        }

        let event = match PushEvent::decode(name, data) {
            Ok(Some(event)) => event,
            Ok(None) => return None,
            Err(e) => {
                log::warn!("[jobdesk-link] Dropping '{}' on '{}': {}", name, channel, e);
                return None;
            },
        };

        let mut closed = Vec::new();
        for listener in entry.listeners.iter().filter(|l| l.event == name) {
            match listener.tx.try_send(event.clone()) {
                Ok(()) => {},
                Err(mpsc::error::TrySendError::Full(_)) => {
                    log::warn!(
                        "[jobdesk-link] Listener {} is full; dropping '{}' on '{}'",
                        listener.id,
                        name,
                        channel
                    );
                },
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    log::debug!("[jobdesk-link] Listener {} receiver dropped", listener.id);
                    closed.push(listener.id);
                },
            }
        }

        if closed.is_empty() {
            return None;
        }
        if let Some(entry) = self.channels.get_mut(channel) {
            entry.listeners.retain(|l| !closed.contains(&l.id));
        }
        self.release_if_empty(channel)
    }

    pub fn status(&self, channel: &str) -> Option<ChannelStatus> {
        self.channels.get(channel).map(|entry| entry.status)
    }

    fn set_status(&mut self, channel: &str, status: ChannelStatus) {
        if let Some(entry) = self.channels.get_mut(channel) {
            entry.status = status;
        }
    }

    pub fn mark_requested(&mut self, channel: &str) {
        self.set_status(channel, ChannelStatus::Requested);
    }

    pub fn mark_subscribed(&mut self, channel: &str) {
        self.set_status(channel, ChannelStatus::Subscribed);
    }

    pub fn mark_failed(&mut self, channel: &str) {
        self.set_status(channel, ChannelStatus::Failed);
    }

    /// Forget physical state after the socket went away.
    pub fn reset_status(&mut self) {
        for entry in self.channels.values_mut() {
            entry.status = ChannelStatus::Pending;
        }
    }

    /// Channels that still need a physical subscribe.
    pub fn pending_channels(&self) -> Vec<String> {
        self.channels
            .iter()
            .filter(|(_, entry)| entry.status == ChannelStatus::Pending)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Drop every listener. Returns the physically subscribed channels.
    pub fn release_all(&mut self) -> Vec<String> {
        let channels = std::mem::take(&mut self.channels);
        channels
            .into_iter()
            .filter(|(_, entry)| entry.status.is_physical())
            .map(|(name, _)| name)
            .collect()
    }

    pub fn channels(&self) -> Vec<ChannelInfo> {
        self.channels
            .iter()
            .map(|(name, entry)| ChannelInfo {
                channel: name.clone(),
                status: entry.status,
                events: entry.listeners.iter().map(|l| l.event.clone()).collect(),
            })
            .collect()
    }

    pub fn listener_count(&self) -> usize {
        self.channels.values().map(|entry| entry.listeners.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
