//! Local policy gates shared by the group services and the guard endpoints.

use std::fmt::Display;

use tracing::info;

use crate::{
    dto::guards::{ActionResponse, ThrottleStatusResponse},
    error::ServiceError,
    guard::{RateLimitConfig, action_key},
    state::SharedState,
};

/// Rate limiter action for force-confirm votes.
pub const ACTION_FORCE_CONFIRM_VOTE: &str = "force_confirm_vote";
/// Rate limiter action for chat messages.
pub const ACTION_SEND_MESSAGE: &str = "send_message";
/// Rate limiter action for joining a group.
pub const ACTION_JOIN_GROUP: &str = "join_group";
/// Rate limiter action for manual resyncs.
pub const ACTION_MANUAL_RESYNC: &str = "manual_resync";

/// Count one attempt of `action` by `actor`, failing when the pair is blocked.
pub fn enforce_rate_limit(
    state: &SharedState,
    action: &str,
    actor: impl Display,
    config: &RateLimitConfig,
) -> Result<(), ServiceError> {
    let key = action_key(action, actor);
    let limiter = state.rate_limiter();
    if !limiter.is_rate_limited(&key, config) {
        return Ok(());
    }
    let retry_after = limiter.retry_after(&key).unwrap_or(config.block_duration);
    Err(ServiceError::RateLimited { retry_after })
}

/// Refuse writes while the backend fails its health checks.
pub fn ensure_writable(state: &SharedState) -> Result<(), ServiceError> {
    if state.is_degraded() {
        return Err(ServiceError::Degraded);
    }
    Ok(())
}

/// Report the circuit breaker state of `key`.
pub fn throttle_status(state: &SharedState, key: String) -> ThrottleStatusResponse {
    let status = state.throttler().status(&key);
    ThrottleStatusResponse::new(key, status)
}

/// Close the circuit breaker of `key` and forget its budget.
pub fn reset_throttle(state: &SharedState, key: &str) -> ActionResponse {
    state.throttler().reset(key);
    info!(key, "throttler key reset");
    ActionResponse {
        message: format!("throttle budget for `{key}` reset"),
    }
}

/// Forget every attempt recorded for the rate limiter key `key`.
pub fn reset_rate_limit(state: &SharedState, key: &str) -> ActionResponse {
    state.rate_limiter().reset(key);
    info!(key, "rate limiter key reset");
    ActionResponse {
        message: format!("rate limit for `{key}` reset"),
    }
}
