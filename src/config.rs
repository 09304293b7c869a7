//! Application-level configuration loading, including the rate limit presets and guard constants.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

use crate::guard::{RateLimitConfig, ThrottleConfig, rate_limiter::DEFAULT_SWEEP_HORIZON};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "RANDOM_SYNC_CONFIG_PATH";
/// Votes older than this no longer count toward a force-confirm quorum.
pub const DEFAULT_VOTE_WINDOW: Duration = Duration::from_secs(60 * 60);
/// Longest accepted vote window; larger values are clamped.
pub const MAX_VOTE_WINDOW: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Rate limit presets for the user-triggered actions the service guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPresets {
    /// Casting a force-confirm vote.
    pub force_confirm_vote: RateLimitConfig,
    /// Posting a chat message.
    pub send_message: RateLimitConfig,
    /// Joining a group.
    pub join_group: RateLimitConfig,
    /// Requesting a manual resync of a group view.
    pub manual_resync: RateLimitConfig,
}

impl Default for RateLimitPresets {
    fn default() -> Self {
        Self {
            force_confirm_vote: RateLimitConfig::from_millis(3, 60_000, 300_000),
            send_message: RateLimitConfig::from_millis(20, 60_000, 60_000),
            join_group: RateLimitConfig::from_millis(5, 60_000, 600_000),
            manual_resync: RateLimitConfig::from_millis(10, 60_000, 30_000),
        }
    }
}

/// Intervals of the background sweeps bounding guard memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepConfig {
    /// How often the rate limiter is swept.
    pub rate_limiter_interval: Duration,
    /// Age after which a rate limiter entry is evicted.
    pub rate_limiter_horizon: Duration,
    /// How often the throttler is swept.
    pub throttler_interval: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            rate_limiter_interval: Duration::from_secs(60),
            rate_limiter_horizon: DEFAULT_SWEEP_HORIZON,
            throttler_interval: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Per-action rate limits.
    pub rate_limits: RateLimitPresets,
    /// Outbound request budget.
    pub throttle: ThrottleConfig,
    /// Background sweep cadence.
    pub sweep: SweepConfig,
    /// Trailing window in which force-confirm votes count.
    pub vote_window: Duration,
    /// Buffered change notifications per realtime channel.
    pub channel_capacity: usize,
    /// Buffered events on the admin SSE stream.
    pub admin_sse_capacity: usize,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match Self::from_json(&contents) {
                Ok(app_config) => {
                    info!(path = %path.display(), "loaded configuration");
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Parse a JSON document, filling every omitted field from the defaults.
    pub fn from_json(contents: &str) -> serde_json::Result<Self> {
        serde_json::from_str::<RawConfig>(contents).map(Into::into)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            rate_limits: RateLimitPresets::default(),
            throttle: ThrottleConfig::default(),
            sweep: SweepConfig::default(),
            vote_window: DEFAULT_VOTE_WINDOW,
            channel_capacity: 64,
            admin_sse_capacity: 16,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    rate_limits: RawRateLimits,
    throttle: Option<RawThrottle>,
    sweep: RawSweep,
    vote_window_ms: Option<u64>,
    channel_capacity: Option<usize>,
    admin_sse_capacity: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawRateLimits {
    force_confirm_vote: Option<RawRateLimit>,
    send_message: Option<RawRateLimit>,
    join_group: Option<RawRateLimit>,
    manual_resync: Option<RawRateLimit>,
}

#[derive(Debug, Deserialize)]
/// JSON representation of a single rate limit preset.
struct RawRateLimit {
    max_attempts: u32,
    window_ms: u64,
    block_duration_ms: u64,
}

impl From<RawRateLimit> for RateLimitConfig {
    fn from(value: RawRateLimit) -> Self {
        RateLimitConfig::from_millis(value.max_attempts, value.window_ms, value.block_duration_ms)
    }
}

#[derive(Debug, Deserialize)]
struct RawThrottle {
    max_requests: u32,
    window_ms: u64,
    block_duration_ms: u64,
}

impl From<RawThrottle> for ThrottleConfig {
    fn from(value: RawThrottle) -> Self {
        Self {
            max_requests: value.max_requests,
            window: Duration::from_millis(value.window_ms),
            block_duration: Duration::from_millis(value.block_duration_ms),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawSweep {
    rate_limiter_interval_ms: Option<u64>,
    rate_limiter_horizon_ms: Option<u64>,
    throttler_interval_ms: Option<u64>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let defaults = AppConfig::default();
        let presets = defaults.rate_limits;
        let raw_limits = value.rate_limits;

        let rate_limits = RateLimitPresets {
            force_confirm_vote: raw_limits
                .force_confirm_vote
                .map_or(presets.force_confirm_vote, Into::into),
            send_message: raw_limits
                .send_message
                .map_or(presets.send_message, Into::into),
            join_group: raw_limits
                .join_group
                .map_or(presets.join_group, Into::into),
            manual_resync: raw_limits
                .manual_resync
                .map_or(presets.manual_resync, Into::into),
        };

        let sweep = SweepConfig {
            rate_limiter_interval: positive_millis(
                "sweep.rate_limiter_interval_ms",
                value.sweep.rate_limiter_interval_ms,
                defaults.sweep.rate_limiter_interval,
            ),
            rate_limiter_horizon: positive_millis(
                "sweep.rate_limiter_horizon_ms",
                value.sweep.rate_limiter_horizon_ms,
                defaults.sweep.rate_limiter_horizon,
            ),
            throttler_interval: positive_millis(
                "sweep.throttler_interval_ms",
                value.sweep.throttler_interval_ms,
                defaults.sweep.throttler_interval,
            ),
        };

        let mut vote_window =
            positive_millis("vote_window_ms", value.vote_window_ms, defaults.vote_window);
        if vote_window > MAX_VOTE_WINDOW {
            warn!(
                requested_ms = vote_window.as_millis() as u64,
                max_ms = MAX_VOTE_WINDOW.as_millis() as u64,
                "vote window too long; clamping"
            );
            vote_window = MAX_VOTE_WINDOW;
        }

        Self {
            rate_limits,
            throttle: value.throttle.map_or(defaults.throttle, Into::into),
            sweep,
            vote_window,
            channel_capacity: value.channel_capacity.unwrap_or(defaults.channel_capacity),
            admin_sse_capacity: value
                .admin_sse_capacity
                .unwrap_or(defaults.admin_sse_capacity),
        }
    }
}

/// Millisecond setting that must be non-zero; zero falls back to `default`.
fn positive_millis(field: &'static str, value: Option<u64>, default: Duration) -> Duration {
    match value {
        Some(0) => {
            warn!(field, "zero duration is not allowed; using the default");
            default
        }
        Some(ms) => Duration::from_millis(ms),
        None => default,
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
