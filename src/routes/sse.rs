use std::convert::Infallible;

use axum::{
    Router,
    extract::{Path, Query, State},
    response::sse::{Event, Sse},
    routing::get,
};
use futures::Stream;
use tracing::info;
use uuid::Uuid;

use crate::{
    dto::groups::ViewerQuery, error::AppError, services::sse_service, state::SharedState,
};

#[utoipa::path(
    get,
    path = "/sse/admin",
    tag = "sse",
    responses((status = 200, description = "Event bus stream for dashboards", content_type = "text/event-stream", body = String))
)]
/// Stream every event bus signal to dashboards.
pub async fn admin_stream(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (handshake, receiver) = sse_service::subscribe_admin(&state);
    info!("New admin SSE connection");
    sse_service::to_sse_stream(handshake, receiver)
}

#[utoipa::path(
    get,
    path = "/groups/{id}/stream",
    tag = "sse",
    params(
        ("id" = Uuid, Path, description = "Identifier of the group to follow"),
        ViewerQuery
    ),
    responses(
        (status = 200, description = "Stream of group view snapshots", content_type = "text/event-stream", body = String),
        (status = 503, description = "Initial fetch failed")
    )
)]
/// Mount the group and push a fresh view after every change.
pub async fn group_stream(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ViewerQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let stream = sse_service::group_stream(&state, id, query.user_id).await?;
    info!(group_id = %id, "New group SSE connection");
    Ok(stream)
}

/// Configure the SSE endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/sse/admin", get(admin_stream))
        .route("/groups/{id}/stream", get(group_stream))
}
