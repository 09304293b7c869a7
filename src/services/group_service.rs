//! Group views, membership and chat.

use serde_json::{Value, json};
use tracing::info;
use uuid::Uuid;

use crate::{
    dao::models::{GroupStatus, MessageEntity, ParticipantEntity, ParticipantStatus},
    dto::{
        groups::{GroupViewResponse, MessageSummary, ParticipantSummary},
        validation::validate_message_content,
    },
    error::ServiceError,
    realtime::{ChangeKind, WatchedTable},
    services::{
        event_bus::{EVENT_MESSAGE_SENT, EVENT_PARTICIPANT_JOINED, EVENT_PARTICIPANT_LEFT},
        group_sync::GroupSyncHandle,
        guard_service::{
            ACTION_JOIN_GROUP, ACTION_MANUAL_RESYNC, ACTION_SEND_MESSAGE, enforce_rate_limit,
            ensure_writable,
        },
    },
    state::{GroupView, SharedState},
};

/// Current view of `group_id`, mounting and fetching it when nobody watches it yet.
pub async fn get_group_view(
    state: &SharedState,
    group_id: Uuid,
    viewer: Option<Uuid>,
) -> Result<GroupViewResponse, ServiceError> {
    let view = state.syncs().mount(group_id).await?;
    let snapshot = view.snapshot();
    if snapshot.group.is_none() {
        return Err(ServiceError::NotFound(format!("group {group_id} not found")));
    }
    Ok(GroupViewResponse::new(&snapshot, view.tally(viewer)))
}

/// Refetch `group_id` on request of `requester` (or anonymously, keyed by the group).
pub async fn resync_group(
    state: &SharedState,
    group_id: Uuid,
    requester: Option<Uuid>,
) -> Result<GroupViewResponse, ServiceError> {
    let limits = &state.config().rate_limits.manual_resync;
    match requester {
        Some(user_id) => enforce_rate_limit(state, ACTION_MANUAL_RESYNC, user_id, limits)?,
        None => enforce_rate_limit(state, ACTION_MANUAL_RESYNC, group_id, limits)?,
    }

    let view = state.syncs().resync(group_id).await?;
    let tally = view.tally(
        requester,
        state.clock().now_utc(),
        state.config().vote_window,
    );
    info!(%group_id, revision = view.revision, "manual resync");
    Ok(GroupViewResponse::new(&view, tally))
}

/// Add `user_id` to `group_id` as a confirmed participant.
pub async fn join_group(
    state: &SharedState,
    group_id: Uuid,
    user_id: Uuid,
) -> Result<ParticipantSummary, ServiceError> {
    enforce_rate_limit(
        state,
        ACTION_JOIN_GROUP,
        user_id,
        &state.config().rate_limits.join_group,
    )?;
    ensure_writable(state)?;

    let (view, current) = fresh_view(state, group_id).await?;
    let status = current
        .group
        .as_ref()
        .map(|group| group.status)
        .ok_or_else(|| ServiceError::NotFound(format!("group {group_id} not found")))?;
    if current.is_confirmed_member(user_id) {
        return Err(ServiceError::Conflict(format!(
            "user {user_id} already belongs to group {group_id}"
        )));
    }
    if status != GroupStatus::Waiting {
        return Err(ServiceError::InvalidState(format!(
            "group {group_id} is not accepting participants"
        )));
    }

    let kind = if current.participants.contains_key(&user_id) {
        ChangeKind::Update
    } else {
        ChangeKind::Insert
    };
    let participant = ParticipantEntity {
        group_id,
        user_id,
        status: ParticipantStatus::Confirmed,
        joined_at: state.clock().now_utc(),
    };
    write_participant(state, &view, participant.clone(), kind).await?;
    info!(%group_id, %user_id, "participant joined");
    state.bus().emit(
        EVENT_PARTICIPANT_JOINED,
        json!({ "group_id": group_id, "user_id": user_id }),
    );

    Ok(ParticipantSummary::from(&participant))
}

/// Mark `user_id` as having left `group_id`.
///
/// Votes already cast stay on record; the quorum shrinks with the group.
pub async fn leave_group(
    state: &SharedState,
    group_id: Uuid,
    user_id: Uuid,
) -> Result<ParticipantSummary, ServiceError> {
    ensure_writable(state)?;

    let (view, current) = fresh_view(state, group_id).await?;
    let Some(existing) = current.participants.get(&user_id) else {
        return Err(ServiceError::NotFound(format!(
            "user {user_id} is not part of group {group_id}"
        )));
    };
    if existing.status == ParticipantStatus::Left {
        return Err(ServiceError::Conflict(format!(
            "user {user_id} already left group {group_id}"
        )));
    }

    let participant = ParticipantEntity {
        status: ParticipantStatus::Left,
        ..existing.clone()
    };
    write_participant(state, &view, participant.clone(), ChangeKind::Update).await?;
    info!(%group_id, %user_id, "participant left");
    state.bus().emit(
        EVENT_PARTICIPANT_LEFT,
        json!({ "group_id": group_id, "user_id": user_id }),
    );

    Ok(ParticipantSummary::from(&participant))
}

/// Post `content` to the chat of `group_id` on behalf of `user_id`.
pub async fn send_message(
    state: &SharedState,
    group_id: Uuid,
    user_id: Uuid,
    content: String,
) -> Result<MessageSummary, ServiceError> {
    enforce_rate_limit(
        state,
        ACTION_SEND_MESSAGE,
        user_id,
        &state.config().rate_limits.send_message,
    )?;
    ensure_writable(state)?;
    validate_message_content(&content).map_err(|err| {
        ServiceError::InvalidInput(
            err.message
                .map(|message| message.into_owned())
                .unwrap_or_else(|| err.code.into_owned()),
        )
    })?;

    let (view, current) = fresh_view(state, group_id).await?;
    if current.group.is_none() {
        return Err(ServiceError::NotFound(format!("group {group_id} not found")));
    }
    if !current.is_confirmed_member(user_id) {
        return Err(ServiceError::InvalidState(
            "only confirmed participants can post messages".into(),
        ));
    }

    let message = MessageEntity {
        id: Uuid::new_v4(),
        group_id,
        user_id,
        content,
        created_at: state.clock().now_utc(),
    };
    state.backend().insert_message(message.clone()).await?;
    state.publish_own_write(
        WatchedTable::Messages,
        ChangeKind::Insert,
        group_id,
        serde_json::to_value(&message).unwrap_or(Value::Null),
    );
    view.resync().await?;
    state.bus().emit(
        EVENT_MESSAGE_SENT,
        json!({ "group_id": group_id, "message_id": message.id }),
    );

    Ok(MessageSummary::from(&message))
}

async fn fresh_view(
    state: &SharedState,
    group_id: Uuid,
) -> Result<(GroupSyncHandle, std::sync::Arc<GroupView>), ServiceError> {
    let view = state.syncs().mount(group_id).await?;
    let current = view.resync().await?;
    Ok((view, current))
}

async fn write_participant(
    state: &SharedState,
    view: &GroupSyncHandle,
    participant: ParticipantEntity,
    kind: ChangeKind,
) -> Result<(), ServiceError> {
    let group_id = participant.group_id;
    let record = serde_json::to_value(&participant).unwrap_or(Value::Null);
    state.backend().upsert_participant(participant).await?;
    state.publish_own_write(WatchedTable::Participants, kind, group_id, record);
    view.resync().await?;
    Ok(())
}
