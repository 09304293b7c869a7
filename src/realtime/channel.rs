use std::{fmt, sync::Weak};

use tokio::sync::broadcast;

use super::{ChangeEvent, ChangeHub};

/// Lifecycle of a [`RealtimeChannel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Receiving notifications.
    Subscribed,
    /// No longer receiving, still registered with the hub.
    Unsubscribed,
    /// Removed from the hub.
    Released,
}

/// Handle to one open channel on a [`ChangeHub`].
///
/// Dropping the handle unsubscribes and releases it.
pub struct RealtimeChannel {
    name: String,
    id: u64,
    hub: Weak<ChangeHub>,
    receiver: Option<broadcast::Receiver<ChangeEvent>>,
    state: ChannelState,
}

impl RealtimeChannel {
    pub(super) fn new(
        name: String,
        id: u64,
        hub: Weak<ChangeHub>,
        receiver: broadcast::Receiver<ChangeEvent>,
    ) -> Self {
        Self {
            name,
            id,
            hub,
            receiver: Some(receiver),
            state: ChannelState::Subscribed,
        }
    }

    /// Channel name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Move the notification receiver out so a listener task can own it.
    pub fn take_receiver(&mut self) -> Option<broadcast::Receiver<ChangeEvent>> {
        self.receiver.take()
    }

    /// Stop receiving notifications. Receivers observe the channel as closed.
    pub fn unsubscribe(&mut self) {
        if self.state != ChannelState::Subscribed {
            return;
        }
        if let Some(hub) = self.hub.upgrade() {
            hub.leave(&self.name, self.id);
        }
        self.receiver = None;
        self.state = ChannelState::Unsubscribed;
    }

    /// Remove the channel from the hub, unsubscribing first if needed.
    pub fn release(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        if self.state == ChannelState::Released {
            return;
        }
        self.unsubscribe();
        if let Some(hub) = self.hub.upgrade() {
            hub.remove(&self.name, self.id);
        }
        self.state = ChannelState::Released;
    }
}

impl fmt::Debug for RealtimeChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeChannel")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Drop for RealtimeChannel {
    fn drop(&mut self) {
        self.teardown();
    }
}
