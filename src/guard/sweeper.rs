use std::{sync::Arc, time::Duration};

use tokio::{
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tracing::debug;

use super::{RateLimiter, RequestThrottler};

/// Periodically evict stale rate limiter entries until the limiter is dropped.
pub fn spawn_rate_limiter_sweeper(limiter: &Arc<RateLimiter>, every: Duration) -> JoinHandle<()> {
    let weak = Arc::downgrade(limiter);
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let Some(limiter) = weak.upgrade() else {
                break;
            };
            let evicted = limiter.sweep();
            if evicted > 0 {
                debug!(evicted, "swept stale rate limiter entries");
            }
        }
    })
}

/// Periodically evict idle throttler keys until the throttler is dropped.
pub fn spawn_throttler_sweeper(
    throttler: &Arc<RequestThrottler>,
    every: Duration,
) -> JoinHandle<()> {
    let weak = Arc::downgrade(throttler);
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let Some(throttler) = weak.upgrade() else {
                break;
            };
            let evicted = throttler.sweep();
            if evicted > 0 {
                debug!(evicted, "swept idle throttler keys");
            }
        }
    })
}
