use std::sync::Arc;

use futures::future::{self, BoxFuture};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::guard::RequestThrottler;

use super::{
    backend::{BackendError, BackendResult, GroupBackend},
    models::{
        GROUPS_TABLE, GroupEntity, MESSAGES_TABLE, MessageEntity, PARTICIPANTS_TABLE,
        ParticipantEntity, VOTES_TABLE, VoteEntity,
    },
};

/// Backend decorator consulting the request throttler before every outbound call.
///
/// Keys are `table:<name>` for table access and `rpc:<name>` for procedures.
pub struct ThrottledBackend {
    inner: Arc<dyn GroupBackend>,
    throttler: Arc<RequestThrottler>,
}

impl ThrottledBackend {
    /// Wrap `inner`, counting calls against `throttler`.
    pub fn new(inner: Arc<dyn GroupBackend>, throttler: Arc<RequestThrottler>) -> Self {
        Self { inner, throttler }
    }

    fn admit<T: Send + 'static>(
        &self,
        key: String,
        call: impl FnOnce(&dyn GroupBackend) -> BoxFuture<'static, BackendResult<T>>,
    ) -> BoxFuture<'static, BackendResult<T>> {
        if self.throttler.can_make_request(&key) {
            call(self.inner.as_ref())
        } else {
            Box::pin(future::ready(Err(BackendError::Throttled { key })))
        }
    }
}

fn table_key(table: &str) -> String {
    format!("table:{table}")
}

impl GroupBackend for ThrottledBackend {
    fn fetch_group(&self, group_id: Uuid) -> BoxFuture<'static, BackendResult<Option<GroupEntity>>> {
        self.admit(table_key(GROUPS_TABLE), |inner| inner.fetch_group(group_id))
    }

    fn fetch_participants(
        &self,
        group_id: Uuid,
    ) -> BoxFuture<'static, BackendResult<Vec<ParticipantEntity>>> {
        self.admit(table_key(PARTICIPANTS_TABLE), |inner| {
            inner.fetch_participants(group_id)
        })
    }

    fn fetch_messages(
        &self,
        group_id: Uuid,
    ) -> BoxFuture<'static, BackendResult<Vec<MessageEntity>>> {
        self.admit(table_key(MESSAGES_TABLE), |inner| inner.fetch_messages(group_id))
    }

    fn fetch_votes(
        &self,
        group_id: Uuid,
        since: OffsetDateTime,
    ) -> BoxFuture<'static, BackendResult<Vec<VoteEntity>>> {
        self.admit(table_key(VOTES_TABLE), |inner| {
            inner.fetch_votes(group_id, since)
        })
    }

    fn insert_vote(&self, vote: VoteEntity) -> BoxFuture<'static, BackendResult<()>> {
        self.admit(table_key(VOTES_TABLE), |inner| inner.insert_vote(vote))
    }

    fn insert_message(&self, message: MessageEntity) -> BoxFuture<'static, BackendResult<()>> {
        self.admit(table_key(MESSAGES_TABLE), |inner| {
            inner.insert_message(message)
        })
    }

    fn upsert_participant(
        &self,
        participant: ParticipantEntity,
    ) -> BoxFuture<'static, BackendResult<()>> {
        self.admit(table_key(PARTICIPANTS_TABLE), |inner| {
            inner.upsert_participant(participant)
        })
    }

    fn call_procedure(&self, name: &str, args: Value) -> BoxFuture<'static, BackendResult<Value>> {
        self.admit(format!("rpc:{name}"), |inner| inner.call_procedure(name, args))
    }

    fn health_check(&self) -> BoxFuture<'static, BackendResult<()>> {
        // health pings are not user-driven volume
        self.inner.health_check()
    }

    fn publishes_changes(&self) -> bool {
        self.inner.publishes_changes()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        clock::ManualClock,
        dao::memory::MemoryBackend,
        guard::ThrottleConfig,
    };

    #[tokio::test]
    async fn open_breaker_short_circuits_calls() {
        let clock = Arc::new(ManualClock::new(0));
        let throttler = Arc::new(RequestThrottler::new(
            ThrottleConfig {
                max_requests: 2,
                window: Duration::from_secs(60),
                block_duration: Duration::from_secs(30),
            },
            clock,
        ));
        let backend = ThrottledBackend::new(Arc::new(MemoryBackend::new(None)), throttler.clone());
        let group_id = Uuid::new_v4();

        assert!(backend.fetch_messages(group_id).await.is_ok());
        assert!(backend.fetch_messages(group_id).await.is_ok());
        let err = backend.fetch_messages(group_id).await.unwrap_err();
        assert!(matches!(err, BackendError::Throttled { ref key } if key == "table:group_messages"));

        // other tables keep their own budget
        assert!(backend.fetch_participants(group_id).await.is_ok());
        assert!(throttler.status("table:group_messages").blocked);
    }
}
