//! Unread direct-message counter.
//!
//! The server count fetched over REST is authoritative; realtime
//! `message.sent` events are optimistic increments on top of it until the
//! next refresh replaces the value.

use parking_lot::{Mutex, RwLock};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::watch;

use crate::models::PushEvent;

/// Number of message ids remembered for duplicate suppression.
pub const RECENT_MESSAGE_WINDOW: usize = 256;

/// Conversation currently open in the UI, shared between the message
/// provider (writer) and counter reconciliation (reader).
#[derive(Debug, Clone, Default)]
pub struct ActiveConversationMarker {
    inner: Arc<RwLock<Option<String>>>,
}

impl ActiveConversationMarker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, conversation_id: impl Into<String>) {
        *self.inner.write() = Some(conversation_id.into());
    }

    pub fn clear(&self) {
        *self.inner.write() = None;
    }

    pub fn get(&self) -> Option<String> {
        self.inner.read().clone()
    }

    pub fn is_active(&self, conversation_id: &str) -> bool {
        self.inner.read().as_deref() == Some(conversation_id)
    }
}

/// Ticket of one authoritative refresh, see
/// [`UnreadMessageCounter::begin_refresh`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RefreshTicket(u64);

#[derive(Default)]
struct Bookkeeping {
    next_ticket: u64,
    last_applied: u64,
    recent_ids: VecDeque<String>,
    recent_set: HashSet<String>,
}

impl Bookkeeping {
    /// Remember `id`; `false` if it was already seen.
    fn remember(&mut self, id: &str) -> bool {
        if self.recent_set.contains(id) {
            return false;
        }
        self.recent_ids.push_back(id.to_string());
        self.recent_set.insert(id.to_string());
        while self.recent_ids.len() > RECENT_MESSAGE_WINDOW {
            if let Some(evicted) = self.recent_ids.pop_front() {
                self.recent_set.remove(&evicted);
            }
        }
        true
    }
}

/// Non-negative unread count, observable through a `watch` channel.
pub struct UnreadMessageCounter {
    value: watch::Sender<u64>,
    book: Mutex<Bookkeeping>,
}

impl Default for UnreadMessageCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl UnreadMessageCounter {
    pub fn new() -> Self {
        let (value, _) = watch::channel(0);
        Self {
            value,
            book: Mutex::new(Bookkeeping::default()),
        }
    }

    pub fn get(&self) -> u64 {
        *self.value.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<u64> {
        self.value.subscribe()
    }

    fn store(&self, n: u64) {
        self.value.send_if_modified(|current| {
            if *current == n {
                return false;
            }
            *current = n;
            true
        });
    }

    /// Replace the value with a freshly fetched server count.
    pub fn set_authoritative(&self, n: u64) {
        log::debug!("[jobdesk-link] Unread count set to {}", n);
        self.store(n);
    }

    pub fn increment(&self) {
        self.value.send_modify(|current| *current = current.saturating_add(1));
    }

    /// Subtract `n`, never going below zero.
    pub fn decrement(&self, n: u64) {
        if n == 0 {
            return;
        }
        self.value.send_modify(|current| *current = current.saturating_sub(n));
    }

    /// Back to zero and forget refresh and dedupe history (credential change).
    pub fn reset(&self) {
        {
            let mut book = self.book.lock();
            book.last_applied = book.next_ticket;
            book.recent_ids.clear();
            book.recent_set.clear();
        }
        self.store(0);
    }

    /// Start an authoritative refresh.
    pub fn begin_refresh(&self) -> RefreshTicket {
        let mut book = self.book.lock();
        book.next_ticket += 1;
        RefreshTicket(book.next_ticket)
    }

    /// Apply the result of the refresh started with `ticket`.
    ///
    /// Rejected (returns `false`) when a newer refresh was already applied
    /// or a reset happened since the ticket was issued.
    pub fn apply_refresh(&self, ticket: RefreshTicket, n: u64) -> bool {
        {
            let mut book = self.book.lock();
            if ticket.0 <= book.last_applied {
                log::debug!(
                    "[jobdesk-link] Dropping stale unread refresh #{} (last applied #{})",
                    ticket.0,
                    book.last_applied
                );
                return false;
            }
            book.last_applied = ticket.0;
        }
        self.set_authoritative(n);
        true
    }

    /// Count an inbound `message.sent` event.
    ///
    /// Ignored for other events, for the conversation currently open, and
    /// for server ids already counted within the recent window. Returns
    /// whether the counter was incremented.
    pub fn on_message_event(&self, event: &PushEvent, active: &ActiveConversationMarker) -> bool {
        let PushEvent::MessageSent {
            conversation_id, ..
        } = event
        else {
            return false;
        };

        if let Some(conversation_id) = conversation_id {
            if active.is_active(conversation_id) {
                log::debug!(
                    "[jobdesk-link] Message in active conversation {} not counted",
                    conversation_id
                );
                return false;
            }
        }

        if let Some(id) = event.event_id() {
            if !self.book.lock().remember(id) {
                log::debug!("[jobdesk-link] Message {} already counted", id);
                return false;
            }
        }

        self.increment();
        true
    }
}
