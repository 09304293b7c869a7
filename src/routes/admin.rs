use axum::{Json, Router, extract::State, routing::post};
use axum_valid::Valid;

use crate::{
    dto::admin::{RecalculateHealthScoresRequest, RecalculateHealthScoresResponse},
    error::AppError,
    services::admin_service,
    state::SharedState,
};

#[utoipa::path(
    post,
    path = "/admin/health-scores/recalculate",
    tag = "admin",
    request_body = RecalculateHealthScoresRequest,
    responses(
        (status = 200, description = "Batch finished; dashboards were signalled", body = RecalculateHealthScoresResponse),
        (status = 400, description = "Empty or oversized batch"),
        (status = 503, description = "Backend unavailable")
    )
)]
/// Recompute health scores for a batch of users.
pub async fn recalculate_health_scores(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<RecalculateHealthScoresRequest>>,
) -> Result<Json<RecalculateHealthScoresResponse>, AppError> {
    let report = admin_service::recalculate_health_scores(&state, payload.user_ids).await?;
    Ok(Json(report))
}

/// Configure the admin routes subtree.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route(
        "/admin/health-scores/recalculate",
        post(recalculate_health_scores),
    )
}
