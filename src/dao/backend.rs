use std::error::Error;

use futures::future::BoxFuture;
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use super::models::{GroupEntity, MessageEntity, ParticipantEntity, VoteEntity};

/// Result alias for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Error raised by backend implementations regardless of the transport.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The backend answered with a structured failure.
    #[error("backend rejected request ({code}): {message}")]
    Rejected {
        /// Backend error code, e.g. `PGRST202`.
        code: String,
        /// Backend error message.
        message: String,
    },
    /// The backend could not be reached or answered garbage.
    #[error("backend unavailable: {message}")]
    Unavailable {
        /// Summary of the transport failure.
        message: String,
        /// Underlying transport error.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// The local request breaker refused the call before it was sent.
    #[error("request budget exhausted for `{key}`")]
    Throttled {
        /// Throttler key whose breaker is open.
        key: String,
    },
}

impl BackendError {
    /// Construct a structured rejection.
    pub fn rejected(code: impl Into<String>, message: impl Into<String>) -> Self {
        BackendError::Rejected {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Construct an unavailable error from any transport failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        BackendError::Unavailable {
            message,
            source: Box::new(source),
        }
    }
}

/// Abstraction over the managed backend's tables and remote procedures.
///
/// Queries return empty collections (or `None`) when nothing matches; absence
/// of data is never an error.
pub trait GroupBackend: Send + Sync {
    /// The group row, if it exists.
    fn fetch_group(&self, group_id: Uuid) -> BoxFuture<'static, BackendResult<Option<GroupEntity>>>;
    /// Every membership row of `group_id`, in join order.
    fn fetch_participants(
        &self,
        group_id: Uuid,
    ) -> BoxFuture<'static, BackendResult<Vec<ParticipantEntity>>>;
    /// Every message of `group_id`, oldest first.
    fn fetch_messages(&self, group_id: Uuid)
    -> BoxFuture<'static, BackendResult<Vec<MessageEntity>>>;
    /// Votes for `group_id` cast at or after `since`.
    fn fetch_votes(
        &self,
        group_id: Uuid,
        since: OffsetDateTime,
    ) -> BoxFuture<'static, BackendResult<Vec<VoteEntity>>>;
    /// Record a vote; a repeat vote by the same user overwrites the earlier one.
    fn insert_vote(&self, vote: VoteEntity) -> BoxFuture<'static, BackendResult<()>>;
    /// Append a chat message.
    fn insert_message(&self, message: MessageEntity) -> BoxFuture<'static, BackendResult<()>>;
    /// Insert or update a membership keyed by `(group_id, user_id)`.
    fn upsert_participant(
        &self,
        participant: ParticipantEntity,
    ) -> BoxFuture<'static, BackendResult<()>>;
    /// Invoke a named remote procedure with JSON arguments.
    fn call_procedure(&self, name: &str, args: Value) -> BoxFuture<'static, BackendResult<Value>>;
    /// Cheap round trip proving the backend answers.
    fn health_check(&self) -> BoxFuture<'static, BackendResult<()>>;
    /// Whether this backend pushes change notifications for its own writes.
    fn publishes_changes(&self) -> bool {
        false
    }
}
