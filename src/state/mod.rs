mod group_view;
mod sse;
mod tally;

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    clock::SharedClock,
    config::AppConfig,
    dao::{backend::GroupBackend, throttled::ThrottledBackend},
    dto::sse::ServerEvent,
    guard::{RateLimiter, RequestThrottler},
    realtime::{ChangeEvent, ChangeHub, ChangeKind, WatchedTable},
    services::{
        event_bus::{EventBus, Subscription},
        group_sync::GroupSyncRegistry,
    },
};

pub use self::group_view::GroupView;
pub use self::sse::SseHub;
pub use self::tally::{VoteTally, window_start};

/// Shared handle passed to every handler and background task.
pub type SharedState = Arc<AppState>;

/// Central application state wiring the guards, the backend and the realtime sync together.
pub struct AppState {
    config: AppConfig,
    clock: SharedClock,
    backend: Arc<dyn GroupBackend>,
    hub: Arc<ChangeHub>,
    rate_limiter: Arc<RateLimiter>,
    throttler: Arc<RequestThrottler>,
    syncs: Arc<GroupSyncRegistry>,
    bus: EventBus,
    admin_sse: Arc<SseHub>,
    degraded: watch::Sender<bool>,
    _admin_forwarder: Subscription,
}

impl AppState {
    /// Build the shared state around `backend`.
    ///
    /// Every backend call goes through the request throttler; change
    /// notifications travel through `hub`.
    pub fn new(
        config: AppConfig,
        clock: SharedClock,
        hub: Arc<ChangeHub>,
        backend: Arc<dyn GroupBackend>,
    ) -> SharedState {
        let throttler = Arc::new(RequestThrottler::new(config.throttle, clock.clone()));
        let backend: Arc<dyn GroupBackend> =
            Arc::new(ThrottledBackend::new(backend, throttler.clone()));
        let rate_limiter = Arc::new(RateLimiter::new(clock.clone(), config.sweep.rate_limiter_horizon));
        let syncs = GroupSyncRegistry::new(
            backend.clone(),
            hub.clone(),
            clock.clone(),
            config.vote_window,
        );

        let bus = EventBus::new(clock.clone());
        let admin_sse = Arc::new(SseHub::new(config.admin_sse_capacity));
        let forward_to = admin_sse.clone();
        let admin_forwarder = bus.subscribe_all(move |event| {
            match ServerEvent::encode(event.name.as_str(), event) {
                Ok(payload) => {
                    forward_to.broadcast(payload);
                }
                Err(err) => warn!(event = %event.name, error = %err, "failed to serialize admin SSE payload"),
            }
        });

        let (degraded, _rx) = watch::channel(false);

        Arc::new(Self {
            config,
            clock,
            backend,
            hub,
            rate_limiter,
            throttler,
            syncs,
            bus,
            admin_sse,
            degraded,
            _admin_forwarder: admin_forwarder,
        })
    }

    /// Loaded configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Time source used by every window computation.
    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Throttled backend handle.
    pub fn backend(&self) -> &Arc<dyn GroupBackend> {
        &self.backend
    }

    /// Realtime hub delivering change notifications.
    pub fn hub(&self) -> &Arc<ChangeHub> {
        &self.hub
    }

    /// Per-action rate limiter.
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    /// Outbound request breaker.
    pub fn throttler(&self) -> &Arc<RequestThrottler> {
        &self.throttler
    }

    /// Registry of mounted group views.
    pub fn syncs(&self) -> &Arc<GroupSyncRegistry> {
        &self.syncs
    }

    /// Analytics/debug event bus.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Broadcast hub used for the admin SSE stream.
    pub fn admin_sse(&self) -> &SseHub {
        &self.admin_sse
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }

    /// Announce a write this service performed, unless the backend pushes its own notifications.
    pub fn publish_own_write(
        &self,
        table: WatchedTable,
        kind: ChangeKind,
        group_id: Uuid,
        record: Value,
    ) {
        if self.backend.publishes_changes() {
            return;
        }
        let delivered = self
            .hub
            .publish(ChangeEvent::new(table, kind, group_id, record));
        debug!(%group_id, %table, delivered, "published local change notification");
    }
}
