//! Per-key request budget acting as a local circuit breaker for outbound backend calls.

use std::time::Duration;

use dashmap::DashMap;
use tracing::{info, warn};

use crate::clock::SharedClock;

/// Limits applied by the [`RequestThrottler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleConfig {
    /// Calls allowed per key inside one window.
    pub max_requests: u32,
    /// Length of the counting window.
    pub window: Duration,
    /// How long the breaker stays open once tripped.
    pub block_duration: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window: Duration::from_secs(60),
            block_duration: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct RequestBudgetState {
    count: u32,
    window_start: u64,
    blocked: bool,
    blocked_until: u64,
    last_activity: u64,
}

impl RequestBudgetState {
    fn new(now: u64) -> Self {
        Self {
            count: 0,
            window_start: now,
            blocked: false,
            blocked_until: 0,
            last_activity: now,
        }
    }
}

/// Observable state of one throttler key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleStatus {
    /// Calls counted in the current window.
    pub count: u32,
    /// Whether the breaker is open.
    pub blocked: bool,
    /// Time left before the breaker closes again.
    pub remaining_time: Duration,
}

/// Global per-key request budget with circuit breaking.
pub struct RequestThrottler {
    entries: DashMap<String, RequestBudgetState>,
    config: ThrottleConfig,
    clock: SharedClock,
}

impl RequestThrottler {
    /// Create a throttler with the given limits.
    pub fn new(config: ThrottleConfig, clock: SharedClock) -> Self {
        Self {
            entries: DashMap::new(),
            config,
            clock,
        }
    }

    /// Limits this throttler enforces.
    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    /// Count a call against `key`, returning `false` when the breaker is (or becomes) open.
    pub fn can_make_request(&self, key: &str) -> bool {
        let now = self.clock.now_ms();
        let window_ms = self.config.window.as_millis() as u64;

        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| RequestBudgetState::new(now));
        entry.last_activity = now;

        if entry.blocked {
            if now < entry.blocked_until {
                return false;
            }
            info!(key, "request breaker cooled down; closing");
            entry.blocked = false;
            entry.count = 0;
            entry.window_start = now;
        }

        if now.saturating_sub(entry.window_start) >= window_ms {
            entry.count = 0;
            entry.window_start = now;
        }

        if entry.count >= self.config.max_requests {
            entry.blocked = true;
            entry.blocked_until = now + self.config.block_duration.as_millis() as u64;
            warn!(
                key,
                count = entry.count,
                max_requests = self.config.max_requests,
                block_ms = self.config.block_duration.as_millis() as u64,
                "request budget exhausted; opening breaker"
            );
            return false;
        }

        entry.count += 1;
        true
    }

    /// Report the counters for `key` without recording a call.
    pub fn status(&self, key: &str) -> ThrottleStatus {
        let now = self.clock.now_ms();
        match self.entries.get(key) {
            Some(entry) => {
                let blocked = entry.blocked && now < entry.blocked_until;
                let remaining_time = if blocked {
                    Duration::from_millis(entry.blocked_until - now)
                } else {
                    Duration::ZERO
                };
                ThrottleStatus {
                    count: entry.count,
                    blocked,
                    remaining_time,
                }
            }
            None => ThrottleStatus {
                count: 0,
                blocked: false,
                remaining_time: Duration::ZERO,
            },
        }
    }

    /// Force-close the breaker and forget the counters for `key`.
    pub fn reset(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Evict keys idle for more than twice the window whose breaker is not open.
    ///
    /// Returns the number of evicted keys.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now_ms();
        let stale_after = 2 * self.config.window.as_millis() as u64;
        let before = self.entries.len();
        self.entries.retain(|_, state| {
            let breaker_open = state.blocked && now < state.blocked_until;
            breaker_open || now.saturating_sub(state.last_activity) <= stale_after
        });
        before - self.entries.len()
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.entries.len()
    }
}
