//! Local policy guards: the user-action rate limiter and the outbound request throttler.

/// Per-action rate limiter.
pub mod rate_limiter;
/// Background eviction tasks.
pub mod sweeper;
/// Outbound request breaker.
pub mod throttler;

pub use self::rate_limiter::{RateLimitConfig, RateLimiter, action_key};
pub use self::throttler::{RequestThrottler, ThrottleConfig, ThrottleStatus};
