//! Force-confirm voting: confirmed participants vote to confirm their group
//! before it is full, and the last vote of a unanimous quorum triggers the
//! confirmation procedure.

use serde_json::{Value, json};
use tracing::info;
use uuid::Uuid;

use crate::{
    dao::models::{FORCE_CONFIRM_PROCEDURE, GroupStatus, VoteEntity},
    dto::groups::{TallyResponse, VoteResponse},
    error::ServiceError,
    realtime::{ChangeKind, WatchedTable},
    services::{
        event_bus::EVENT_GROUP_FORCE_CONFIRMED,
        guard_service::{ACTION_FORCE_CONFIRM_VOTE, enforce_rate_limit, ensure_writable},
    },
    state::SharedState,
};

/// Current tally of `group_id`, personalised for `viewer`.
pub async fn get_tally(
    state: &SharedState,
    group_id: Uuid,
    viewer: Option<Uuid>,
) -> Result<TallyResponse, ServiceError> {
    let view = state.syncs().mount(group_id).await?;
    Ok(view.tally(viewer).into())
}

/// Cast `user_id`'s force-confirm vote in `group_id`.
///
/// When the vote completes the quorum the group is confirmed through the
/// backend procedure and the confirmation is announced on the event bus.
pub async fn cast_vote(
    state: &SharedState,
    group_id: Uuid,
    user_id: Uuid,
) -> Result<VoteResponse, ServiceError> {
    enforce_rate_limit(
        state,
        ACTION_FORCE_CONFIRM_VOTE,
        user_id,
        &state.config().rate_limits.force_confirm_vote,
    )?;
    ensure_writable(state)?;

    let view = state.syncs().mount(group_id).await?;
    let current = view.resync().await?;
    let group = current
        .group
        .as_ref()
        .ok_or_else(|| ServiceError::NotFound(format!("group {group_id} not found")))?;
    if !matches!(group.status, GroupStatus::Waiting | GroupStatus::Full) {
        return Err(ServiceError::InvalidState(format!(
            "group {group_id} can no longer be force confirmed"
        )));
    }
    if !current.is_confirmed_member(user_id) {
        return Err(ServiceError::InvalidState(
            "only confirmed participants can vote".into(),
        ));
    }
    if view.tally(Some(user_id)).has_voted {
        return Err(ServiceError::Conflict(
            "vote already cast in the current window".into(),
        ));
    }

    let vote = VoteEntity {
        group_id,
        user_id,
        voted_at: state.clock().now_utc(),
    };
    state.backend().insert_vote(vote.clone()).await?;
    state.publish_own_write(
        WatchedTable::Votes,
        ChangeKind::Insert,
        group_id,
        serde_json::to_value(&vote).unwrap_or(Value::Null),
    );

    view.resync().await?;
    let tally = view.tally(Some(user_id));
    info!(
        %group_id,
        %user_id,
        votes = tally.votes_count,
        required = tally.required,
        "force-confirm vote cast"
    );

    if !tally.can_confirm {
        return Ok(VoteResponse {
            tally: tally.into(),
            force_confirmed: false,
        });
    }

    state
        .backend()
        .call_procedure(FORCE_CONFIRM_PROCEDURE, json!({ "p_group_id": group_id }))
        .await?;
    info!(%group_id, votes = tally.votes_count, "group force confirmed");
    // the groups table is not part of the realtime filter
    view.resync().await?;
    state.bus().emit(
        EVENT_GROUP_FORCE_CONFIRMED,
        json!({ "group_id": group_id, "votes_count": tally.votes_count }),
    );

    Ok(VoteResponse {
        tally: tally.into(),
        force_confirmed: true,
    })
}
