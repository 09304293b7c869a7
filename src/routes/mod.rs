use axum::Router;

use crate::state::SharedState;

/// Admin routes.
pub mod admin;
/// Swagger UI.
pub mod docs;
/// Group routes.
pub mod groups;
/// Guard inspection routes.
pub mod guards;
/// Health check route.
pub mod health;
/// SSE routes.
pub mod sse;

/// Compose all route trees, wiring in shared state and documentation routes.
pub fn router(state: SharedState) -> Router<()> {
    let api_router = health::router()
        .merge(sse::router())
        .merge(groups::router())
        .merge(guards::router())
        .merge(admin::router());

    let docs_router = docs::router(state.clone());

    api_router.merge(docs_router).with_state(state)
}
