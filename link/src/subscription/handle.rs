use std::fmt;
use tokio::sync::mpsc;

use crate::connection::manager::ConnCmd;

use super::registry::ListenerId;

/// Registration of one listener on the shared connection.
///
/// Dropping the handle unsubscribes the listener. Neither path can fail:
/// once the connection is gone there is nothing left to release.
pub struct SubscriptionHandle {
    id: ListenerId,
    channel: String,
    event: String,
    cmd_tx: mpsc::UnboundedSender<ConnCmd>,
    released: bool,
}

impl SubscriptionHandle {
    pub(crate) fn new(
        id: ListenerId,
        channel: String,
        event: String,
        cmd_tx: mpsc::UnboundedSender<ConnCmd>,
    ) -> Self {
        Self {
            id,
            channel,
            event,
            cmd_tx,
            released: false,
        }
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Logical channel name (`user.<id>`).
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Normalized event name.
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Remove this listener. The physical channel is released with its last
    /// listener.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let _ = self.cmd_tx.send(ConnCmd::Unsubscribe { id: self.id });
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("channel", &self.channel)
            .field("event", &self.event)
            .finish()
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.release();
    }
}
