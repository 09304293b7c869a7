//! Sliding-window limiter with a block period for user-triggered actions.

use std::time::Duration;

use dashmap::{DashMap, mapref::entry::Entry};
use tracing::{debug, warn};

use crate::clock::SharedClock;

/// Entries untouched for longer than this are dropped by [`RateLimiter::sweep`].
pub const DEFAULT_SWEEP_HORIZON: Duration = Duration::from_secs(60 * 60);

/// Limits applied to a single action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Attempts allowed inside one window.
    pub max_attempts: u32,
    /// Length of the counting window.
    pub window: Duration,
    /// How long a key stays blocked once it exceeded `max_attempts`.
    pub block_duration: Duration,
}

impl RateLimitConfig {
    /// Build a config from millisecond values, the unit used by the config file.
    pub const fn from_millis(max_attempts: u32, window_ms: u64, block_duration_ms: u64) -> Self {
        Self {
            max_attempts,
            window: Duration::from_millis(window_ms),
            block_duration: Duration::from_millis(block_duration_ms),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct RateLimitState {
    attempts: u32,
    window_start: u64,
    blocked_until: Option<u64>,
}

impl RateLimitState {
    fn fresh(now: u64) -> Self {
        Self {
            attempts: 1,
            window_start: now,
            blocked_until: None,
        }
    }

    fn last_relevant_instant(&self) -> u64 {
        self.blocked_until
            .map_or(self.window_start, |until| until.max(self.window_start))
    }
}

/// Build the composite key used for a given action performed by a given actor.
pub fn action_key(action: &str, actor: impl std::fmt::Display) -> String {
    format!("{action}:{actor}")
}

/// Process-wide limiter keyed by action/actor composites.
pub struct RateLimiter {
    entries: DashMap<String, RateLimitState>,
    clock: SharedClock,
    horizon: Duration,
}

impl RateLimiter {
    /// Create a limiter reading time from `clock` and sweeping entries older than `horizon`.
    pub fn new(clock: SharedClock, horizon: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            horizon,
        }
    }

    /// Record an attempt for `key` and report whether the caller must be refused.
    pub fn is_rate_limited(&self, key: &str, config: &RateLimitConfig) -> bool {
        let now = self.clock.now_ms();
        let window_ms = config.window.as_millis() as u64;

        // the shard stays locked from lookup to update
        let mut entry = match self.entries.entry(key.to_string()) {
            Entry::Occupied(entry) => entry.into_ref(),
            Entry::Vacant(slot) => {
                slot.insert(RateLimitState::fresh(now));
                return false;
            }
        };

        if let Some(until) = entry.blocked_until {
            if now < until {
                return true;
            }
            debug!(key, "rate limit block expired; starting a fresh window");
            *entry = RateLimitState::fresh(now);
            return false;
        }

        if now.saturating_sub(entry.window_start) > window_ms {
            *entry = RateLimitState::fresh(now);
            return false;
        }

        entry.attempts += 1;
        if entry.attempts > config.max_attempts {
            let until = now.saturating_add(config.block_duration.as_millis() as u64);
            entry.blocked_until = Some(until);
            warn!(
                key,
                attempts = entry.attempts,
                max_attempts = config.max_attempts,
                block_ms = config.block_duration.as_millis() as u64,
                "rate limit exceeded; blocking key"
            );
            return true;
        }

        false
    }

    /// Remaining block time for `key`, if it is currently blocked.
    pub fn retry_after(&self, key: &str) -> Option<Duration> {
        let now = self.clock.now_ms();
        let entry = self.entries.get(key)?;
        let until = entry.blocked_until?;
        (until > now).then(|| Duration::from_millis(until - now))
    }

    /// Forget everything recorded for `key`.
    pub fn reset(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Drop entries whose window and block both ended more than the horizon ago.
    ///
    /// Returns the number of evicted keys.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now_ms();
        let horizon = self.horizon.as_millis() as u64;
        let before = self.entries.len();
        self.entries
            .retain(|_, state| now.saturating_sub(state.last_relevant_instant()) <= horizon);
        before - self.entries.len()
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.entries.len()
    }
}
