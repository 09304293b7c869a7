use serde::Serialize;
use utoipa::ToSchema;

use crate::guard::ThrottleStatus;

/// Circuit breaker state of one throttler key.
#[derive(Debug, Serialize, ToSchema)]
pub struct ThrottleStatusResponse {
    /// Throttler key, e.g. `table:group_votes`.
    pub key: String,
    /// Calls counted in the current window.
    pub count: u32,
    /// Whether the breaker is open.
    pub blocked: bool,
    /// Milliseconds until the breaker closes again; zero when not blocked.
    pub remaining_ms: u64,
}

impl ThrottleStatusResponse {
    /// Render `status` for `key`.
    pub fn new(key: String, status: ThrottleStatus) -> Self {
        Self {
            key,
            count: status.count,
            blocked: status.blocked,
            remaining_ms: u64::try_from(status.remaining_time.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// Generic action acknowledgement used by guard endpoints.
#[derive(Debug, Serialize, ToSchema)]
pub struct ActionResponse {
    /// Human readable outcome.
    pub message: String,
}
