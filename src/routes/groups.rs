use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
};
use axum_valid::Valid;
use uuid::Uuid;

use crate::{
    dto::groups::{
        CastVoteRequest, GroupViewResponse, JoinGroupRequest, MessageSummary, ParticipantSummary,
        SendMessageRequest, TallyResponse, ViewerQuery, VoteResponse,
    },
    error::AppError,
    services::{group_service, voting},
    state::SharedState,
};

#[utoipa::path(
    get,
    path = "/groups/{id}",
    tag = "groups",
    params(
        ("id" = Uuid, Path, description = "Identifier of the group"),
        ViewerQuery
    ),
    responses(
        (status = 200, description = "Current group view", body = GroupViewResponse),
        (status = 404, description = "Group not found"),
        (status = 503, description = "Backend unavailable")
    )
)]
/// Return the current view of a group, with the vote tally seen by `user_id`.
pub async fn get_group(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ViewerQuery>,
) -> Result<Json<GroupViewResponse>, AppError> {
    let view = group_service::get_group_view(&state, id, query.user_id).await?;
    Ok(Json(view))
}

#[utoipa::path(
    post,
    path = "/groups/{id}/resync",
    tag = "groups",
    params(
        ("id" = Uuid, Path, description = "Identifier of the group"),
        ViewerQuery
    ),
    responses(
        (status = 200, description = "Freshly refetched group view", body = GroupViewResponse),
        (status = 429, description = "Too many manual resyncs"),
        (status = 503, description = "Backend unavailable")
    )
)]
/// Refetch a group immediately, replacing the cached view.
pub async fn resync_group(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ViewerQuery>,
) -> Result<Json<GroupViewResponse>, AppError> {
    let view = group_service::resync_group(&state, id, query.user_id).await?;
    Ok(Json(view))
}

#[utoipa::path(
    get,
    path = "/groups/{id}/votes",
    tag = "votes",
    params(
        ("id" = Uuid, Path, description = "Identifier of the group"),
        ViewerQuery
    ),
    responses((status = 200, description = "Force-confirm tally", body = TallyResponse))
)]
/// Return the force-confirm tally of a group.
pub async fn get_votes(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ViewerQuery>,
) -> Result<Json<TallyResponse>, AppError> {
    let tally = voting::get_tally(&state, id, query.user_id).await?;
    Ok(Json(tally))
}

#[utoipa::path(
    post,
    path = "/groups/{id}/votes",
    tag = "votes",
    params(("id" = Uuid, Path, description = "Identifier of the group")),
    request_body = CastVoteRequest,
    responses(
        (status = 200, description = "Vote recorded", body = VoteResponse),
        (status = 409, description = "Already voted, not a participant, or group closed"),
        (status = 429, description = "Too many votes")
    )
)]
/// Cast a force-confirm vote; the last vote of a unanimous group confirms it.
pub async fn cast_vote(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<CastVoteRequest>>,
) -> Result<Json<VoteResponse>, AppError> {
    let outcome = voting::cast_vote(&state, id, payload.user_id).await?;
    Ok(Json(outcome))
}

#[utoipa::path(
    post,
    path = "/groups/{id}/messages",
    tag = "groups",
    params(("id" = Uuid, Path, description = "Identifier of the group")),
    request_body = SendMessageRequest,
    responses(
        (status = 201, description = "Message posted", body = MessageSummary),
        (status = 400, description = "Invalid message"),
        (status = 429, description = "Too many messages")
    )
)]
/// Post a chat message to a group.
pub async fn send_message(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<SendMessageRequest>>,
) -> Result<(StatusCode, Json<MessageSummary>), AppError> {
    let message =
        group_service::send_message(&state, id, payload.user_id, payload.content).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

#[utoipa::path(
    post,
    path = "/groups/{id}/participants",
    tag = "groups",
    params(("id" = Uuid, Path, description = "Identifier of the group")),
    request_body = JoinGroupRequest,
    responses(
        (status = 201, description = "Joined the group", body = ParticipantSummary),
        (status = 409, description = "Already a member or group closed"),
        (status = 429, description = "Too many join attempts")
    )
)]
/// Join a group as a confirmed participant.
pub async fn join_group(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<JoinGroupRequest>>,
) -> Result<(StatusCode, Json<ParticipantSummary>), AppError> {
    let participant = group_service::join_group(&state, id, payload.user_id).await?;
    Ok((StatusCode::CREATED, Json(participant)))
}

#[utoipa::path(
    delete,
    path = "/groups/{id}/participants/{user_id}",
    tag = "groups",
    params(
        ("id" = Uuid, Path, description = "Identifier of the group"),
        ("user_id" = Uuid, Path, description = "Participant leaving the group")
    ),
    responses(
        (status = 200, description = "Participant marked as left", body = ParticipantSummary),
        (status = 404, description = "Not a participant")
    )
)]
/// Leave a group.
pub async fn leave_group(
    State(state): State<SharedState>,
    Path((id, user_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ParticipantSummary>, AppError> {
    let participant = group_service::leave_group(&state, id, user_id).await?;
    Ok(Json(participant))
}

/// Configure the group routes subtree.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/groups/{id}", get(get_group))
        .route("/groups/{id}/resync", post(resync_group))
        .route("/groups/{id}/votes", get(get_votes).post(cast_vote))
        .route("/groups/{id}/messages", post(send_message))
        .route("/groups/{id}/participants", post(join_group))
        .route("/groups/{id}/participants/{user_id}", delete(leave_group))
}
