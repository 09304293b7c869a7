//! Time sources shared by the guards and the vote tally.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use time::OffsetDateTime;

/// Shared handle to the clock injected into time-dependent services.
pub type SharedClock = Arc<dyn Clock>;

/// Source of wall-clock time expressed as milliseconds since the Unix epoch.
pub trait Clock: Send + Sync {
    /// Current instant in milliseconds since the Unix epoch.
    fn now_ms(&self) -> u64;

    /// Current instant as a UTC timestamp.
    fn now_utc(&self) -> OffsetDateTime {
        ms_to_datetime(self.now_ms())
    }
}

/// Clock backed by [`SystemTime`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Manually driven clock used to make window arithmetic deterministic.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Start the clock at `start_ms` milliseconds since the epoch.
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
        }
    }

    /// Move the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    /// Jump to an absolute instant.
    pub fn set_ms(&self, now_ms: u64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Convert epoch milliseconds into a UTC timestamp, saturating at the epoch.
pub fn ms_to_datetime(ms: u64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp_nanos(ms as i128 * 1_000_000)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

/// Convert a UTC timestamp into epoch milliseconds, clamping pre-epoch values to zero.
pub fn datetime_to_ms(value: OffsetDateTime) -> u64 {
    let nanos = value.unix_timestamp_nanos();
    if nanos <= 0 {
        0
    } else {
        (nanos / 1_000_000) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(1_000);
        clock.advance(Duration::from_secs(2));
        assert_eq!(clock.now_ms(), 3_000);
        clock.set_ms(10);
        assert_eq!(clock.now_ms(), 10);
    }

    #[test]
    fn datetime_conversion_round_trips_milliseconds() {
        let value = ms_to_datetime(1_700_000_000_123);
        assert_eq!(datetime_to_ms(value), 1_700_000_000_123);
    }
}
