use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{delete, get},
};

use crate::{
    dto::guards::{ActionResponse, ThrottleStatusResponse},
    services::guard_service,
    state::SharedState,
};

#[utoipa::path(
    get,
    path = "/guards/throttle/{key}",
    tag = "guards",
    params(("key" = String, Path, description = "Throttler key, e.g. `table:group_votes`")),
    responses((status = 200, description = "Circuit breaker state", body = ThrottleStatusResponse))
)]
/// Inspect the request budget of one backend endpoint.
pub async fn throttle_status(
    State(state): State<SharedState>,
    Path(key): Path<String>,
) -> Json<ThrottleStatusResponse> {
    Json(guard_service::throttle_status(&state, key))
}

#[utoipa::path(
    delete,
    path = "/guards/throttle/{key}",
    tag = "guards",
    params(("key" = String, Path, description = "Throttler key to reset")),
    responses((status = 200, description = "Budget reset", body = ActionResponse))
)]
/// Close the circuit breaker of one backend endpoint.
pub async fn reset_throttle(
    State(state): State<SharedState>,
    Path(key): Path<String>,
) -> Json<ActionResponse> {
    Json(guard_service::reset_throttle(&state, &key))
}

#[utoipa::path(
    delete,
    path = "/guards/rate-limit/{key}",
    tag = "guards",
    params(("key" = String, Path, description = "Rate limiter key, e.g. `send_message:<user id>`")),
    responses((status = 200, description = "Attempts forgotten", body = ActionResponse))
)]
/// Forget the attempts recorded for one action key.
pub async fn reset_rate_limit(
    State(state): State<SharedState>,
    Path(key): Path<String>,
) -> Json<ActionResponse> {
    Json(guard_service::reset_rate_limit(&state, &key))
}

/// Configure the guard routes subtree.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route(
            "/guards/throttle/{key}",
            get(throttle_status).delete(reset_throttle),
        )
        .route("/guards/rate-limit/{key}", delete(reset_rate_limit))
}
