use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Ping the backend and report whether the service runs degraded.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let mounted = state.syncs().mounted_groups();
    let channels = state.hub().active_subscriptions();

    if let Err(err) = state.backend().health_check().await {
        warn!(error = %err, "backend health check failed");
        return HealthResponse::degraded(mounted, channels);
    }

    if state.is_degraded() {
        HealthResponse::degraded(mounted, channels)
    } else {
        HealthResponse::ok(mounted, channels)
    }
}
