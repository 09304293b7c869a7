use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    dto::sse::{ServerEvent, SystemStatus},
    state::SharedState,
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);

const EVENT_SYSTEM_STATUS: &str = "system_status";

/// Ping the backend forever and keep the shared state in degraded mode while it fails.
///
/// Realtime channels are left untouched; views refresh on the next notification
/// or manual resync once the backend answers again.
pub async fn run(state: SharedState) {
    supervise(state, HEALTH_POLL_INTERVAL).await
}

async fn supervise(state: SharedState, poll: Duration) {
    let mut delay = INITIAL_DELAY;
    let mut failures: u32 = 0;

    loop {
        match state.backend().health_check().await {
            Ok(()) => {
                if state.is_degraded() {
                    info!(failures, "backend healthy again; leaving degraded mode");
                    set_degraded(&state, false, 0);
                }
                failures = 0;
                delay = INITIAL_DELAY;
                sleep(poll).await;
            }
            Err(err) => {
                if failures == 0 {
                    warn!(error = %err, "backend health check failed; entering degraded mode");
                    set_degraded(&state, true, 1);
                } else {
                    warn!(attempt = failures, error = %err, "backend still unavailable");
                }
                failures += 1;
                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
        }
    }
}

fn set_degraded(state: &SharedState, degraded: bool, failed_checks: u32) {
    state.update_degraded(degraded);
    let status = SystemStatus {
        degraded,
        failed_checks,
    };
    match ServerEvent::encode(EVENT_SYSTEM_STATUS, &status) {
        Ok(event) => {
            state.admin_sse().broadcast(event);
        }
        Err(err) => warn!(error = %err, "failed to serialize system status"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        clock::SystemClock, config::AppConfig, dao::memory::MemoryBackend, realtime::ChangeHub,
        state::AppState,
    };

    #[tokio::test(start_paused = true)]
    async fn degraded_flag_follows_backend_health() {
        let hub = ChangeHub::new(8);
        let backend = MemoryBackend::new(Some(hub.clone()));
        let state = AppState::new(
            AppConfig::default(),
            Arc::new(SystemClock),
            hub,
            Arc::new(backend.clone()),
        );
        let mut degraded = state.degraded_watcher();
        let task = tokio::spawn(supervise(state.clone(), Duration::from_secs(1)));

        backend.set_unavailable(true);
        degraded.wait_for(|value| *value).await.unwrap();
        assert!(state.is_degraded());

        backend.set_unavailable(false);
        degraded.wait_for(|value| !*value).await.unwrap();
        assert!(!state.is_degraded());

        task.abort();
    }
}
