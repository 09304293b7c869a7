//! In-process backend holding group tables in memory.
//!
//! Writes publish change notifications to an attached [`ChangeHub`], the same
//! way the managed backend pushes them to its realtime clients.

use std::{
    collections::HashMap,
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use futures::future::BoxFuture;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Value, json};
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::realtime::{ChangeEvent, ChangeHub, ChangeKind, WatchedTable};

use super::{
    backend::{BackendError, BackendResult, GroupBackend},
    models::{
        FORCE_CONFIRM_PROCEDURE, GroupEntity, GroupStatus, MessageEntity, ParticipantEntity,
        VoteEntity,
    },
};

/// Handler for a remote procedure registered on the memory backend.
pub type ProcedureHandler = Arc<dyn Fn(Value) -> BackendResult<Value> + Send + Sync>;

#[derive(Default)]
struct Tables {
    groups: HashMap<Uuid, GroupEntity>,
    participants: HashMap<Uuid, IndexMap<Uuid, ParticipantEntity>>,
    messages: HashMap<Uuid, Vec<MessageEntity>>,
    votes: HashMap<Uuid, IndexMap<Uuid, VoteEntity>>,
}

struct Inner {
    tables: RwLock<Tables>,
    procedures: std::sync::RwLock<HashMap<String, ProcedureHandler>>,
    hub: Option<Arc<ChangeHub>>,
    unavailable: AtomicBool,
    participant_fetches: AtomicUsize,
}

/// Backend implementation used by tests and by the self-contained server mode.
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<Inner>,
}

impl MemoryBackend {
    /// Create an empty backend, publishing writes to `hub` when given.
    pub fn new(hub: Option<Arc<ChangeHub>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                tables: RwLock::new(Tables::default()),
                procedures: std::sync::RwLock::new(HashMap::new()),
                hub,
                unavailable: AtomicBool::new(false),
                participant_fetches: AtomicUsize::new(0),
            }),
        }
    }

    /// Insert or replace a group row.
    pub async fn insert_group(&self, group: GroupEntity) {
        let mut tables = self.inner.tables.write().await;
        tables.groups.insert(group.id, group);
    }

    /// Register `handler` for the remote procedure `name`.
    pub fn register_procedure<F>(&self, name: &str, handler: F)
    where
        F: Fn(Value) -> BackendResult<Value> + Send + Sync + 'static,
    {
        if let Ok(mut procedures) = self.inner.procedures.write() {
            procedures.insert(name.to_string(), Arc::new(handler));
        }
    }

    /// Make every call fail as if the backend were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of participant queries served so far.
    pub fn participant_fetches(&self) -> usize {
        self.inner.participant_fetches.load(Ordering::SeqCst)
    }
}

impl Inner {
    fn ensure_available(&self) -> BackendResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BackendError::unavailable(
                "memory backend switched off".into(),
                io::Error::new(io::ErrorKind::NotConnected, "backend offline"),
            ));
        }
        Ok(())
    }

    fn notify(&self, table: WatchedTable, kind: ChangeKind, group_id: Uuid, row: &impl Serialize) {
        if let Some(hub) = &self.hub {
            let record = serde_json::to_value(row).unwrap_or(Value::Null);
            hub.publish(ChangeEvent::new(table, kind, group_id, record));
        }
    }

    async fn force_confirm(&self, args: &Value) -> BackendResult<Value> {
        let group_id = args
            .get("p_group_id")
            .and_then(Value::as_str)
            .and_then(|raw| Uuid::parse_str(raw).ok())
            .ok_or_else(|| BackendError::rejected("22023", "p_group_id must be a uuid"))?;

        let mut tables = self.tables.write().await;
        let Some(group) = tables.groups.get_mut(&group_id) else {
            return Err(BackendError::rejected("P0002", format!("group {group_id} not found")));
        };
        if matches!(group.status, GroupStatus::Cancelled | GroupStatus::Completed) {
            return Err(BackendError::rejected(
                "P0001",
                format!("group {group_id} can no longer be confirmed"),
            ));
        }
        group.status = GroupStatus::Confirmed;
        Ok(json!({ "confirmed": true }))
    }
}

impl GroupBackend for MemoryBackend {
    fn fetch_group(&self, group_id: Uuid) -> BoxFuture<'static, BackendResult<Option<GroupEntity>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.ensure_available()?;
            let tables = inner.tables.read().await;
            Ok(tables.groups.get(&group_id).cloned())
        })
    }

    fn fetch_participants(
        &self,
        group_id: Uuid,
    ) -> BoxFuture<'static, BackendResult<Vec<ParticipantEntity>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.ensure_available()?;
            inner.participant_fetches.fetch_add(1, Ordering::SeqCst);
            let tables = inner.tables.read().await;
            Ok(tables
                .participants
                .get(&group_id)
                .map(|rows| rows.values().cloned().collect())
                .unwrap_or_default())
        })
    }

    fn fetch_messages(
        &self,
        group_id: Uuid,
    ) -> BoxFuture<'static, BackendResult<Vec<MessageEntity>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.ensure_available()?;
            let tables = inner.tables.read().await;
            Ok(tables.messages.get(&group_id).cloned().unwrap_or_default())
        })
    }

    fn fetch_votes(
        &self,
        group_id: Uuid,
        since: OffsetDateTime,
    ) -> BoxFuture<'static, BackendResult<Vec<VoteEntity>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.ensure_available()?;
            let tables = inner.tables.read().await;
            Ok(tables
                .votes
                .get(&group_id)
                .map(|rows| {
                    rows.values()
                        .filter(|vote| vote.voted_at >= since)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default())
        })
    }

    fn insert_vote(&self, vote: VoteEntity) -> BoxFuture<'static, BackendResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.ensure_available()?;
            let kind = {
                let mut tables = inner.tables.write().await;
                let rows = tables.votes.entry(vote.group_id).or_default();
                match rows.insert(vote.user_id, vote.clone()) {
                    Some(_) => ChangeKind::Update,
                    None => ChangeKind::Insert,
                }
            };
            inner.notify(WatchedTable::Votes, kind, vote.group_id, &vote);
            Ok(())
        })
    }

    fn insert_message(&self, message: MessageEntity) -> BoxFuture<'static, BackendResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.ensure_available()?;
            {
                let mut tables = inner.tables.write().await;
                tables
                    .messages
                    .entry(message.group_id)
                    .or_default()
                    .push(message.clone());
            }
            inner.notify(
                WatchedTable::Messages,
                ChangeKind::Insert,
                message.group_id,
                &message,
            );
            Ok(())
        })
    }

    fn upsert_participant(
        &self,
        participant: ParticipantEntity,
    ) -> BoxFuture<'static, BackendResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.ensure_available()?;
            let kind = {
                let mut guard = inner.tables.write().await;
                let tables = &mut *guard;
                let rows = tables.participants.entry(participant.group_id).or_default();
                let kind = match rows.insert(participant.user_id, participant.clone()) {
                    Some(_) => ChangeKind::Update,
                    None => ChangeKind::Insert,
                };
                let confirmed = rows.values().filter(|row| row.is_confirmed()).count() as u32;
                if let Some(group) = tables.groups.get_mut(&participant.group_id) {
                    group.current_participants = confirmed;
                    if group.status == GroupStatus::Waiting && confirmed >= group.max_participants
                    {
                        group.status = GroupStatus::Full;
                    }
                }
                kind
            };
            inner.notify(
                WatchedTable::Participants,
                kind,
                participant.group_id,
                &participant,
            );
            Ok(())
        })
    }

    fn call_procedure(&self, name: &str, args: Value) -> BoxFuture<'static, BackendResult<Value>> {
        let inner = self.inner.clone();
        let name = name.to_string();
        Box::pin(async move {
            inner.ensure_available()?;
            if name == FORCE_CONFIRM_PROCEDURE {
                return inner.force_confirm(&args).await;
            }

            let handler = inner
                .procedures
                .read()
                .ok()
                .and_then(|procedures| procedures.get(&name).cloned());
            match handler {
                Some(handler) => handler(args),
                None => Err(BackendError::rejected(
                    "PGRST202",
                    format!("could not find the function {name}"),
                )),
            }
        })
    }

    fn health_check(&self) -> BoxFuture<'static, BackendResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move { inner.ensure_available() })
    }

    fn publishes_changes(&self) -> bool {
        self.inner.hub.is_some()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::realtime::ChannelSpec;

    fn group(id: Uuid) -> GroupEntity {
        GroupEntity {
            id,
            status: GroupStatus::Waiting,
            max_participants: 2,
            current_participants: 0,
            bar_name: None,
            meeting_time: None,
        }
    }

    fn participant(group_id: Uuid) -> ParticipantEntity {
        ParticipantEntity {
            group_id,
            user_id: Uuid::new_v4(),
            status: crate::dao::models::ParticipantStatus::Confirmed,
            joined_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[tokio::test]
    async fn participants_update_group_size_and_publish() {
        let hub = ChangeHub::new(8);
        let backend = MemoryBackend::new(Some(hub.clone()));
        let group_id = Uuid::new_v4();
        backend.insert_group(group(group_id)).await;

        let mut channel = hub.subscribe(ChannelSpec::group_sync(group_id)).unwrap();
        let mut receiver = channel.take_receiver().unwrap();

        backend.upsert_participant(participant(group_id)).await.unwrap();
        backend.upsert_participant(participant(group_id)).await.unwrap();

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.table, WatchedTable::Participants);
        assert_eq!(event.kind, ChangeKind::Insert);

        let stored = backend.fetch_group(group_id).await.unwrap().unwrap();
        assert_eq!(stored.current_participants, 2);
        assert_eq!(stored.status, GroupStatus::Full);
    }

    #[tokio::test]
    async fn revoting_replaces_the_previous_vote() {
        let backend = MemoryBackend::new(None);
        let group_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let first = OffsetDateTime::UNIX_EPOCH + Duration::from_secs(10);
        let second = first + Duration::from_secs(3_600);

        for voted_at in [first, second] {
            backend
                .insert_vote(VoteEntity {
                    group_id,
                    user_id,
                    voted_at,
                })
                .await
                .unwrap();
        }

        let votes = backend
            .fetch_votes(group_id, OffsetDateTime::UNIX_EPOCH)
            .await
            .unwrap();
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].voted_at, second);

        let recent = backend.fetch_votes(group_id, second).await.unwrap();
        assert_eq!(recent.len(), 1);
    }

    #[tokio::test]
    async fn unknown_procedures_are_rejected_with_a_code() {
        let backend = MemoryBackend::new(None);
        let err = backend
            .call_procedure("does_not_exist", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Rejected { ref code, .. } if code == "PGRST202"));

        backend.register_procedure("echo", |args| Ok(args));
        let value = backend.call_procedure("echo", json!({"a": 1})).await.unwrap();
        assert_eq!(value, json!({"a": 1}));
    }

    #[tokio::test]
    async fn switched_off_backend_reports_unavailable() {
        let backend = MemoryBackend::new(None);
        backend.set_unavailable(true);
        assert!(matches!(
            backend.health_check().await,
            Err(BackendError::Unavailable { .. })
        ));
        backend.set_unavailable(false);
        assert!(backend.health_check().await.is_ok());
    }
}
