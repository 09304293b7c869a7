use serde::Serialize;
use utoipa::ToSchema;

/// Health payload returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// Groups with a live realtime channel.
    pub mounted_groups: usize,
    /// Realtime channels currently receiving notifications.
    pub active_channels: usize,
}

impl HealthResponse {
    /// The backend answers its health checks.
    pub fn ok(mounted_groups: usize, active_channels: usize) -> Self {
        Self {
            status: "ok".to_string(),
            mounted_groups,
            active_channels,
        }
    }

    /// The backend is failing its health checks.
    pub fn degraded(mounted_groups: usize, active_channels: usize) -> Self {
        Self {
            status: "degraded".to_string(),
            mounted_groups,
            active_channels,
        }
    }
}
