//! Realtime synchronisation of group views.
//!
//! Each mounted group owns exactly one change-notification channel named after
//! the group id. Every notification triggers a full refetch of the group's
//! participants, messages and votes; the refreshed [`GroupView`] replaces the
//! previous one wholesale and is published on a `watch` channel.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::{
    sync::{broadcast, broadcast::error::RecvError, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    clock::SharedClock,
    dao::backend::GroupBackend,
    error::ServiceError,
    realtime::{ChangeEvent, ChangeHub, ChannelSpec, RealtimeChannel},
    state::{GroupView, VoteTally, window_start},
};

/// Live synchronisation state of one group.
pub struct GroupSync {
    group_id: Uuid,
    backend: Arc<dyn GroupBackend>,
    clock: SharedClock,
    vote_window: Duration,
    view: watch::Sender<Arc<GroupView>>,
    cancelled: watch::Sender<bool>,
    fetch_seq: AtomicU64,
}

impl GroupSync {
    fn new(
        group_id: Uuid,
        backend: Arc<dyn GroupBackend>,
        clock: SharedClock,
        vote_window: Duration,
    ) -> Self {
        let (view, _) = watch::channel(Arc::new(GroupView::empty(group_id)));
        let (cancelled, _) = watch::channel(false);
        Self {
            group_id,
            backend,
            clock,
            vote_window,
            view,
            cancelled,
            fetch_seq: AtomicU64::new(0),
        }
    }

    /// Group this sync follows.
    pub fn group_id(&self) -> Uuid {
        self.group_id
    }

    /// Latest applied view.
    pub fn snapshot(&self) -> Arc<GroupView> {
        self.view.borrow().clone()
    }

    /// Observe every view replacement.
    pub fn watch(&self) -> watch::Receiver<Arc<GroupView>> {
        self.view.subscribe()
    }

    /// Tally of the latest view for `viewer`, evaluated against the current time.
    pub fn tally(&self, viewer: Option<Uuid>) -> VoteTally {
        self.snapshot()
            .tally(viewer, self.clock.now_utc(), self.vote_window)
    }

    /// Whether the owning mount was torn down.
    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    /// Refetch every table of the group and replace the view.
    ///
    /// Results are dropped when the sync was cancelled meanwhile, or when a
    /// fetch started later has already been applied.
    pub async fn resync(&self) -> Result<Arc<GroupView>, ServiceError> {
        if self.is_cancelled() {
            return Err(ServiceError::Cancelled);
        }

        let seq = self.fetch_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let now = self.clock.now_utc();
        let since = window_start(now, self.vote_window);
        let group_id = self.group_id;

        let (group, participants, messages, votes) = futures::try_join!(
            self.backend.fetch_group(group_id),
            self.backend.fetch_participants(group_id),
            self.backend.fetch_messages(group_id),
            self.backend.fetch_votes(group_id, since),
        )?;

        if self.is_cancelled() {
            debug!(%group_id, seq, "discarding fetch for a torn down group view");
            return Err(ServiceError::Cancelled);
        }

        let fresh = Arc::new(GroupView::from_rows(
            group_id,
            group,
            participants,
            messages,
            votes,
            seq,
            now,
        ));
        let applied = self.view.send_if_modified(|current| {
            if current.revision < seq {
                *current = fresh.clone();
                true
            } else {
                false
            }
        });
        if !applied {
            debug!(%group_id, seq, "discarding out-of-order fetch");
        }

        Ok(self.snapshot())
    }

    fn cancel(&self) {
        self.cancelled.send_replace(true);
    }

    fn cancel_watcher(&self) -> watch::Receiver<bool> {
        self.cancelled.subscribe()
    }
}

/// Refetch on every notification until the sync is cancelled or the channel closes.
async fn listen(
    sync: Arc<GroupSync>,
    mut receiver: broadcast::Receiver<ChangeEvent>,
    mut cancelled: watch::Receiver<bool>,
) {
    let group_id = sync.group_id();
    loop {
        tokio::select! {
            _ = cancelled.changed() => break,
            received = receiver.recv() => match received {
                Ok(event) => {
                    debug!(%group_id, table = %event.table, kind = ?event.kind, "change notification");
                    refresh(&sync).await;
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(%group_id, skipped, "lagged behind change notifications");
                    refresh(&sync).await;
                }
                Err(RecvError::Closed) => {
                    if !sync.is_cancelled() {
                        warn!(%group_id, "realtime channel closed; view stays stale until a manual resync");
                    }
                    break;
                }
            }
        }
    }
}

async fn refresh(sync: &GroupSync) {
    match sync.resync().await {
        Ok(_) | Err(ServiceError::Cancelled) => {}
        Err(err) => warn!(group_id = %sync.group_id(), error = %err, "group resync failed"),
    }
}

struct SyncEntry {
    sync: Arc<GroupSync>,
    channel: RealtimeChannel,
    listener: JoinHandle<()>,
    mounts: usize,
}

/// Registry guaranteeing at most one live sync (and channel) per group id.
pub struct GroupSyncRegistry {
    backend: Arc<dyn GroupBackend>,
    hub: Arc<ChangeHub>,
    clock: SharedClock,
    vote_window: Duration,
    entries: Mutex<HashMap<Uuid, SyncEntry>>,
}

impl GroupSyncRegistry {
    /// Create an empty registry.
    pub fn new(
        backend: Arc<dyn GroupBackend>,
        hub: Arc<ChangeHub>,
        clock: SharedClock,
        vote_window: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            backend,
            hub,
            clock,
            vote_window,
            entries: Mutex::new(HashMap::new()),
        })
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<Uuid, SyncEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Mount a view of `group_id`, reusing the live sync when the group is already mounted.
    ///
    /// The first mount subscribes the group's channel and performs the initial
    /// fetch; a failed initial fetch unmounts again and is returned as an error.
    pub async fn mount(self: &Arc<Self>, group_id: Uuid) -> Result<GroupSyncHandle, ServiceError> {
        let sync = {
            let mut entries = self.entries();
            match entries.get_mut(&group_id) {
                Some(entry) => {
                    entry.mounts += 1;
                    debug!(%group_id, mounts = entry.mounts, "reusing mounted group view");
                    entry.sync.clone()
                }
                None => {
                    let sync = Arc::new(GroupSync::new(
                        group_id,
                        self.backend.clone(),
                        self.clock.clone(),
                        self.vote_window,
                    ));
                    let mut channel = self.hub.subscribe(ChannelSpec::group_sync(group_id))?;
                    let listener = match channel.take_receiver() {
                        Some(receiver) => {
                            tokio::spawn(listen(sync.clone(), receiver, sync.cancel_watcher()))
                        }
                        None => tokio::spawn(async {}),
                    };
                    entries.insert(
                        group_id,
                        SyncEntry {
                            sync: sync.clone(),
                            channel,
                            listener,
                            mounts: 1,
                        },
                    );
                    info!(%group_id, "group view mounted");
                    sync
                }
            }
        };

        let handle = GroupSyncHandle {
            registry: self.clone(),
            sync,
            active: true,
        };
        if handle.sync.snapshot().revision == 0 {
            handle.sync.resync().await?;
        }
        Ok(handle)
    }

    /// Refetch `group_id`, mounting it for the duration of the fetch when nobody watches it.
    pub async fn resync(self: &Arc<Self>, group_id: Uuid) -> Result<Arc<GroupView>, ServiceError> {
        let mounted = self.entries().get(&group_id).map(|entry| entry.sync.clone());
        match mounted {
            Some(sync) => sync.resync().await,
            None => {
                let handle = self.mount(group_id).await?;
                Ok(handle.snapshot())
            }
        }
    }

    /// Latest view of `group_id` if it is mounted.
    pub fn snapshot(&self, group_id: Uuid) -> Option<Arc<GroupView>> {
        self.entries()
            .get(&group_id)
            .map(|entry| entry.sync.snapshot())
    }

    /// Number of groups currently mounted.
    pub fn mounted_groups(&self) -> usize {
        self.entries().len()
    }

    /// Number of live mounts of `group_id`.
    pub fn mount_count(&self, group_id: Uuid) -> usize {
        self.entries()
            .get(&group_id)
            .map_or(0, |entry| entry.mounts)
    }

    /// Drop one mount; the last one cancels the listener, then unsubscribes and releases the channel.
    fn release(&self, group_id: Uuid) {
        let removed = {
            let mut entries = self.entries();
            let Some(entry) = entries.get_mut(&group_id) else {
                return;
            };
            entry.mounts = entry.mounts.saturating_sub(1);
            if entry.mounts > 0 {
                return;
            }
            entries.remove(&group_id)
        };

        if let Some(SyncEntry {
            sync,
            mut channel,
            listener,
            ..
        }) = removed
        {
            sync.cancel();
            listener.abort();
            channel.unsubscribe();
            channel.release();
            info!(%group_id, "group view unmounted");
        }
    }
}

/// One mount of a group view. Dropping it unmounts.
#[must_use = "dropping the handle unmounts the group view"]
pub struct GroupSyncHandle {
    registry: Arc<GroupSyncRegistry>,
    sync: Arc<GroupSync>,
    active: bool,
}

impl GroupSyncHandle {
    /// Group this handle mounts.
    pub fn group_id(&self) -> Uuid {
        self.sync.group_id()
    }

    /// Latest applied view.
    pub fn snapshot(&self) -> Arc<GroupView> {
        self.sync.snapshot()
    }

    /// Observe every view replacement.
    pub fn watch(&self) -> watch::Receiver<Arc<GroupView>> {
        self.sync.watch()
    }

    /// Tally of the latest view for `viewer`.
    pub fn tally(&self, viewer: Option<Uuid>) -> VoteTally {
        self.sync.tally(viewer)
    }

    /// Refetch the group now.
    pub async fn resync(&self) -> Result<Arc<GroupView>, ServiceError> {
        self.sync.resync().await
    }

    /// Unmount this view.
    pub fn unmount(mut self) {
        self.deactivate();
    }

    /// Follow `group_id` instead: the current group is unmounted before the new one is mounted.
    pub async fn switch_group(mut self, group_id: Uuid) -> Result<GroupSyncHandle, ServiceError> {
        let registry = self.registry.clone();
        self.deactivate();
        registry.mount(group_id).await
    }

    fn deactivate(&mut self) {
        if std::mem::replace(&mut self.active, false) {
            self.registry.release(self.sync.group_id());
        }
    }
}

impl Drop for GroupSyncHandle {
    fn drop(&mut self) {
        self.deactivate();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use futures::future::BoxFuture;
    use serde_json::{Value, json};
    use time::OffsetDateTime;
    use tokio::sync::Notify;

    use super::*;
    use crate::{
        clock::ManualClock,
        dao::{
            backend::BackendResult,
            memory::MemoryBackend,
            models::{
                GroupEntity, GroupStatus, MessageEntity, ParticipantEntity, ParticipantStatus,
                VoteEntity,
            },
        },
        realtime::{ChangeKind, WatchedTable, group_channel_name},
    };

    struct Fixture {
        hub: Arc<ChangeHub>,
        backend: MemoryBackend,
        registry: Arc<GroupSyncRegistry>,
        group_id: Uuid,
    }

    async fn fixture() -> Fixture {
        let hub = ChangeHub::new(16);
        // writes are not auto-published so tests control notifications
        let backend = MemoryBackend::new(None);
        let group_id = Uuid::new_v4();
        backend
            .insert_group(GroupEntity {
                id: group_id,
                status: GroupStatus::Waiting,
                max_participants: 5,
                current_participants: 0,
                bar_name: None,
                meeting_time: None,
            })
            .await;
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let registry = GroupSyncRegistry::new(
            Arc::new(backend.clone()),
            hub.clone(),
            clock,
            Duration::from_secs(3_600),
        );
        Fixture {
            hub,
            backend,
            registry,
            group_id,
        }
    }

    async fn add_member(backend: &MemoryBackend, group_id: Uuid) -> Uuid {
        let user_id = Uuid::new_v4();
        backend
            .upsert_participant(ParticipantEntity {
                group_id,
                user_id,
                status: ParticipantStatus::Confirmed,
                joined_at: OffsetDateTime::UNIX_EPOCH,
            })
            .await
            .unwrap();
        user_id
    }

    fn participants_changed(group_id: Uuid) -> ChangeEvent {
        ChangeEvent::new(
            WatchedTable::Participants,
            ChangeKind::Insert,
            group_id,
            json!({}),
        )
    }

    #[tokio::test]
    async fn mount_fetches_immediately_and_opens_one_channel() {
        let f = fixture().await;
        add_member(&f.backend, f.group_id).await;

        let handle = f.registry.mount(f.group_id).await.unwrap();
        assert_eq!(handle.snapshot().participants.len(), 1);
        assert_eq!(handle.snapshot().revision, 1);
        assert!(f.hub.is_subscribed(&group_channel_name(f.group_id)));
        assert_eq!(f.hub.active_subscriptions(), 1);
    }

    #[tokio::test]
    async fn second_mount_reuses_the_channel() {
        let f = fixture().await;
        let first = f.registry.mount(f.group_id).await.unwrap();
        let second = f.registry.mount(f.group_id).await.unwrap();

        assert_eq!(f.registry.mount_count(f.group_id), 2);
        assert_eq!(f.hub.allocated_channels(), 1);

        first.unmount();
        assert_eq!(f.hub.active_subscriptions(), 1);
        second.unmount();
        assert_eq!(f.hub.active_subscriptions(), 0);
        assert_eq!(f.hub.allocated_channels(), 0);
        assert_eq!(f.registry.mounted_groups(), 0);
    }

    #[tokio::test]
    async fn notification_triggers_a_full_refetch() {
        let f = fixture().await;
        let handle = f.registry.mount(f.group_id).await.unwrap();
        let mut views = handle.watch();
        views.borrow_and_update();

        add_member(&f.backend, f.group_id).await;
        assert_eq!(f.hub.publish(participants_changed(f.group_id)), 1);

        views.changed().await.unwrap();
        assert_eq!(views.borrow().participants.len(), 1);
    }

    #[tokio::test]
    async fn switching_groups_tears_down_the_previous_channel() {
        let f = fixture().await;
        let other = Uuid::new_v4();
        let handle = f.registry.mount(f.group_id).await.unwrap();

        let handle = handle.switch_group(other).await.unwrap();
        assert_eq!(handle.group_id(), other);
        assert!(!f.hub.is_subscribed(&group_channel_name(f.group_id)));
        assert!(f.hub.is_subscribed(&group_channel_name(other)));
        assert_eq!(f.hub.allocated_channels(), 1);
    }

    #[tokio::test]
    async fn failed_initial_fetch_unmounts() {
        let f = fixture().await;
        f.backend.set_unavailable(true);

        let err = f.registry.mount(f.group_id).await.err().unwrap();
        assert!(matches!(err, ServiceError::Backend(_)));
        assert_eq!(f.registry.mounted_groups(), 0);
        assert_eq!(f.hub.allocated_channels(), 0);
    }

    #[tokio::test]
    async fn resync_after_unmount_is_cancelled() {
        let f = fixture().await;
        let handle = f.registry.mount(f.group_id).await.unwrap();
        let sync = handle.sync.clone();
        handle.unmount();

        assert!(matches!(sync.resync().await, Err(ServiceError::Cancelled)));
    }

    #[tokio::test]
    async fn resync_of_an_unmounted_group_leaves_nothing_behind() {
        let f = fixture().await;
        add_member(&f.backend, f.group_id).await;

        let view = f.registry.resync(f.group_id).await.unwrap();
        assert_eq!(view.participants.len(), 1);
        assert_eq!(f.registry.mounted_groups(), 0);
        assert_eq!(f.hub.allocated_channels(), 0);
    }

    /// Holds back the first participants fetch until released, after it has
    /// already read its rows.
    struct HeldFirstFetch {
        inner: MemoryBackend,
        release: Arc<Notify>,
        calls: Arc<AtomicUsize>,
    }

    impl GroupBackend for HeldFirstFetch {
        fn fetch_group(&self, group_id: Uuid) -> BoxFuture<'static, BackendResult<Option<GroupEntity>>> {
            self.inner.fetch_group(group_id)
        }

        fn fetch_participants(
            &self,
            group_id: Uuid,
        ) -> BoxFuture<'static, BackendResult<Vec<ParticipantEntity>>> {
            let first = self.calls.fetch_add(1, Ordering::SeqCst) == 0;
            let rows = self.inner.fetch_participants(group_id);
            let release = self.release.clone();
            Box::pin(async move {
                let rows = rows.await?;
                if first {
                    release.notified().await;
                }
                Ok(rows)
            })
        }

        fn fetch_messages(&self, group_id: Uuid) -> BoxFuture<'static, BackendResult<Vec<MessageEntity>>> {
            self.inner.fetch_messages(group_id)
        }

        fn fetch_votes(
            &self,
            group_id: Uuid,
            since: OffsetDateTime,
        ) -> BoxFuture<'static, BackendResult<Vec<VoteEntity>>> {
            self.inner.fetch_votes(group_id, since)
        }

        fn insert_vote(&self, vote: VoteEntity) -> BoxFuture<'static, BackendResult<()>> {
            self.inner.insert_vote(vote)
        }

        fn insert_message(&self, message: MessageEntity) -> BoxFuture<'static, BackendResult<()>> {
            self.inner.insert_message(message)
        }

        fn upsert_participant(
            &self,
            participant: ParticipantEntity,
        ) -> BoxFuture<'static, BackendResult<()>> {
            self.inner.upsert_participant(participant)
        }

        fn call_procedure(&self, name: &str, args: Value) -> BoxFuture<'static, BackendResult<Value>> {
            self.inner.call_procedure(name, args)
        }

        fn health_check(&self) -> BoxFuture<'static, BackendResult<()>> {
            self.inner.health_check()
        }
    }

    #[tokio::test]
    async fn late_finishing_older_fetch_is_discarded() {
        let f = fixture().await;
        add_member(&f.backend, f.group_id).await;

        let release = Arc::new(Notify::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let backend = HeldFirstFetch {
            inner: f.backend.clone(),
            release: release.clone(),
            calls: calls.clone(),
        };
        let sync = Arc::new(GroupSync::new(
            f.group_id,
            Arc::new(backend),
            Arc::new(ManualClock::new(1_700_000_000_000)),
            Duration::from_secs(3_600),
        ));

        let slow = tokio::spawn({
            let sync = sync.clone();
            async move { sync.resync().await }
        });
        while calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        // the held fetch already read one member; the next one sees two
        add_member(&f.backend, f.group_id).await;
        let fresh = sync.resync().await.unwrap();
        assert_eq!(fresh.revision, 2);
        assert_eq!(fresh.participants.len(), 2);

        let mut updates = sync.watch();
        updates.borrow_and_update();

        release.notify_one();
        let stale = slow.await.unwrap().unwrap();
        assert_eq!(stale.revision, 2);
        assert_eq!(stale.participants.len(), 2);
        assert_eq!(sync.snapshot().revision, 2);
        assert_eq!(sync.snapshot().participants.len(), 2);
        assert!(!updates.has_changed().unwrap());
    }
}
