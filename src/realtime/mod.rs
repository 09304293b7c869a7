//! Change-notification channels scoped by table and group id.
//!
//! The [`ChangeHub`] mirrors the managed backend's realtime API: callers open a
//! named channel with row filters, receive [`ChangeEvent`]s for matching
//! writes, then unsubscribe and release the channel, in that order.

mod channel;

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::dao::models::{MESSAGES_TABLE, PARTICIPANTS_TABLE, VOTES_TABLE};

pub use self::channel::{ChannelState, RealtimeChannel};

/// Tables whose writes are pushed to group channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchedTable {
    /// `group_participants`.
    Participants,
    /// `group_messages`.
    Messages,
    /// `group_votes`.
    Votes,
}

impl WatchedTable {
    /// Every table a group view depends on.
    pub const ALL: [WatchedTable; 3] = [
        WatchedTable::Participants,
        WatchedTable::Messages,
        WatchedTable::Votes,
    ];

    /// Backend table name.
    pub fn table_name(self) -> &'static str {
        match self {
            WatchedTable::Participants => PARTICIPANTS_TABLE,
            WatchedTable::Messages => MESSAGES_TABLE,
            WatchedTable::Votes => VOTES_TABLE,
        }
    }
}

impl fmt::Display for WatchedTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}

/// Kind of write that produced a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    /// A new row.
    Insert,
    /// An existing row was overwritten.
    Update,
    /// A row was removed.
    Delete,
}

/// Descriptor of one write on a watched table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Table the write landed in.
    pub table: WatchedTable,
    /// What kind of write it was.
    pub kind: ChangeKind,
    /// Group the row belongs to.
    pub group_id: Uuid,
    /// Affected row as the backend reported it; subscribers may ignore it.
    pub record: Value,
}

impl ChangeEvent {
    /// Build an event for `record` written to `table`.
    pub fn new(table: WatchedTable, kind: ChangeKind, group_id: Uuid, record: Value) -> Self {
        Self {
            table,
            kind,
            group_id,
            record,
        }
    }
}

/// Server-side row filter: `table` rows where `group_id = X`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RowFilter {
    /// Table to watch.
    pub table: WatchedTable,
    /// Only rows of this group pass.
    pub group_id: Uuid,
}

impl RowFilter {
    fn matches(&self, event: &ChangeEvent) -> bool {
        self.table == event.table && self.group_id == event.group_id
    }
}

/// Name and filters of a channel to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSpec {
    /// Channel identifier; reusing a name replaces the earlier channel.
    pub name: String,
    /// At least one filter is required.
    pub filters: Vec<RowFilter>,
}

impl ChannelSpec {
    /// Channel watching every table of a group view.
    ///
    /// The name depends only on the group id so that remounting a view reuses
    /// the same identifier instead of accumulating channels.
    pub fn group_sync(group_id: Uuid) -> Self {
        Self {
            name: group_channel_name(group_id),
            filters: WatchedTable::ALL
                .into_iter()
                .map(|table| RowFilter { table, group_id })
                .collect(),
        }
    }
}

/// Stable channel name for a group view.
pub fn group_channel_name(group_id: Uuid) -> String {
    format!("group-sync:{group_id}")
}

/// Failures while opening a channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RealtimeError {
    /// The channel name was empty.
    #[error("channel name must not be empty")]
    EmptyName,
    /// The named channel had no filters.
    #[error("channel `{0}` has no row filters")]
    NoFilters(String),
}

struct ChannelEntry {
    id: u64,
    filters: Vec<RowFilter>,
    sender: Option<broadcast::Sender<ChangeEvent>>,
}

impl ChannelEntry {
    fn is_joined(&self) -> bool {
        self.sender.is_some()
    }
}

/// In-process realtime hub delivering change notifications to named channels.
pub struct ChangeHub {
    channels: DashMap<String, ChannelEntry>,
    next_id: AtomicU64,
    capacity: usize,
}

impl ChangeHub {
    /// Create a hub whose channels buffer up to `capacity` notifications.
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            channels: DashMap::new(),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
        })
    }

    /// Open (or replace) the channel described by `spec`.
    ///
    /// A live channel with the same name is closed first; its receivers observe
    /// the channel as closed.
    pub fn subscribe(self: &Arc<Self>, spec: ChannelSpec) -> Result<RealtimeChannel, RealtimeError> {
        if spec.name.is_empty() {
            return Err(RealtimeError::EmptyName);
        }
        if spec.filters.is_empty() {
            return Err(RealtimeError::NoFilters(spec.name));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = broadcast::channel(self.capacity);
        let entry = ChannelEntry {
            id,
            filters: spec.filters,
            sender: Some(sender),
        };

        if let Some(previous) = self.channels.insert(spec.name.clone(), entry) {
            debug!(
                channel = %spec.name,
                previous_id = previous.id,
                "replaced live channel with the same name"
            );
        }
        debug!(channel = %spec.name, id, "channel subscribed");

        Ok(RealtimeChannel::new(spec.name, id, Arc::downgrade(self), receiver))
    }

    /// Deliver `event` to every joined channel whose filters match it.
    ///
    /// Returns the number of channels the event was handed to.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        let mut delivered = 0;
        for entry in self.channels.iter() {
            let Some(sender) = entry.sender.as_ref() else {
                continue;
            };
            if entry.filters.iter().any(|filter| filter.matches(&event))
                && sender.send(event.clone()).is_ok()
            {
                delivered += 1;
            }
        }
        delivered
    }

    /// Channels currently receiving notifications.
    pub fn active_subscriptions(&self) -> usize {
        self.channels.iter().filter(|entry| entry.is_joined()).count()
    }

    /// Channels registered with the hub, subscribed or not.
    pub fn allocated_channels(&self) -> usize {
        self.channels.len()
    }

    /// Whether a channel named `name` is currently receiving notifications.
    pub fn is_subscribed(&self, name: &str) -> bool {
        self.channels
            .get(name)
            .is_some_and(|entry| entry.is_joined())
    }

    /// Stop delivery to the channel `name` if it is still the instance `id`.
    fn leave(&self, name: &str, id: u64) -> bool {
        match self.channels.get_mut(name) {
            Some(mut entry) if entry.id == id => {
                entry.sender = None;
                debug!(channel = %name, id, "channel unsubscribed");
                true
            }
            _ => false,
        }
    }

    /// Remove the channel `name` if it is still the instance `id`.
    fn remove(&self, name: &str, id: u64) -> bool {
        let removed = self
            .channels
            .remove_if(name, |_, entry| entry.id == id)
            .is_some();
        if removed {
            debug!(channel = %name, id, "channel released");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn vote_event(group_id: Uuid) -> ChangeEvent {
        ChangeEvent::new(
            WatchedTable::Votes,
            ChangeKind::Insert,
            group_id,
            json!({ "group_id": group_id }),
        )
    }

    #[tokio::test]
    async fn publish_reaches_only_matching_channels() {
        let hub = ChangeHub::new(8);
        let watched = Uuid::new_v4();
        let other = Uuid::new_v4();

        let mut channel = hub.subscribe(ChannelSpec::group_sync(watched)).unwrap();
        let mut receiver = channel.take_receiver().unwrap();

        assert_eq!(hub.publish(vote_event(other)), 0);
        assert_eq!(hub.publish(vote_event(watched)), 1);

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.group_id, watched);
        assert_eq!(event.table, WatchedTable::Votes);
    }

    #[test]
    fn invalid_specs_are_rejected() {
        let hub = ChangeHub::new(8);
        let err = hub
            .subscribe(ChannelSpec {
                name: String::new(),
                filters: vec![],
            })
            .unwrap_err();
        assert_eq!(err, RealtimeError::EmptyName);

        let err = hub
            .subscribe(ChannelSpec {
                name: "empty".into(),
                filters: vec![],
            })
            .unwrap_err();
        assert_eq!(err, RealtimeError::NoFilters("empty".into()));
    }

    #[test]
    fn channel_debug_shows_name_and_state() {
        let hub = ChangeHub::new(8);
        let group_id = Uuid::new_v4();
        let channel = hub.subscribe(ChannelSpec::group_sync(group_id)).unwrap();

        let rendered = format!("{channel:?}");
        assert!(rendered.contains(&group_channel_name(group_id)));
        assert!(rendered.contains("Subscribed"));
    }

    #[tokio::test]
    async fn resubscribing_a_name_replaces_the_previous_channel() {
        let hub = ChangeHub::new(8);
        let group_id = Uuid::new_v4();

        let mut first = hub.subscribe(ChannelSpec::group_sync(group_id)).unwrap();
        let mut first_rx = first.take_receiver().unwrap();
        let second = hub.subscribe(ChannelSpec::group_sync(group_id)).unwrap();

        assert_eq!(hub.active_subscriptions(), 1);
        assert_eq!(hub.allocated_channels(), 1);
        assert!(matches!(
            first_rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));

        // tearing down the stale handle must not touch its replacement
        first.release();
        assert!(hub.is_subscribed(&group_channel_name(group_id)));

        second.release();
        assert_eq!(hub.allocated_channels(), 0);
    }

    #[test]
    fn unsubscribe_precedes_release() {
        let hub = ChangeHub::new(8);
        let mut channel = hub
            .subscribe(ChannelSpec::group_sync(Uuid::new_v4()))
            .unwrap();

        channel.unsubscribe();
        assert_eq!(channel.state(), ChannelState::Unsubscribed);
        assert_eq!(hub.active_subscriptions(), 0);
        assert_eq!(hub.allocated_channels(), 1);

        channel.release();
        assert_eq!(hub.allocated_channels(), 0);
    }

    #[test]
    fn dropping_a_channel_tears_it_down() {
        let hub = ChangeHub::new(8);
        {
            let _channel = hub
                .subscribe(ChannelSpec::group_sync(Uuid::new_v4()))
                .unwrap();
            assert_eq!(hub.active_subscriptions(), 1);
        }
        assert_eq!(hub.allocated_channels(), 0);
    }
}
