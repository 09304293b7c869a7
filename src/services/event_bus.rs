//! In-process signal bus decoupling producers of "data changed" signals from
//! the dashboards consuming them.

use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc, Mutex, MutexGuard, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::clock::SharedClock;

/// Emitted after a group was force confirmed by its participants.
pub const EVENT_GROUP_FORCE_CONFIRMED: &str = "group.force_confirmed";
/// Emitted after a batch health-score recalculation finished.
pub const EVENT_HEALTH_SCORES_RECALCULATED: &str = "health_scores.recalculated";
/// Emitted after a chat message was posted.
pub const EVENT_MESSAGE_SENT: &str = "group.message_sent";
/// Emitted after a user joined a group.
pub const EVENT_PARTICIPANT_JOINED: &str = "group.participant_joined";
/// Emitted after a user left a group.
pub const EVENT_PARTICIPANT_LEFT: &str = "group.participant_left";

/// One emitted signal.
#[derive(Debug, Clone, Serialize)]
pub struct BusEvent {
    /// Event name, e.g. [`EVENT_GROUP_FORCE_CONFIRMED`].
    pub name: String,
    /// Free-form JSON attached by the emitter.
    pub payload: Value,
    /// Time of emission, read from the bus clock.
    #[serde(with = "time::serde::rfc3339")]
    pub emitted_at: OffsetDateTime,
}

type Callback = Arc<dyn Fn(&BusEvent) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    by_event: IndexMap<String, Vec<(u64, Callback)>>,
    firehose: Vec<(u64, Callback)>,
}

struct BusInner {
    listeners: Mutex<Listeners>,
    next_id: AtomicU64,
    clock: SharedClock,
}

impl BusInner {
    fn listeners(&self) -> MutexGuard<'_, Listeners> {
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn remove(&self, topic: &Topic, id: u64) {
        let mut listeners = self.listeners();
        match topic {
            Topic::Event(name) => {
                if let Some(callbacks) = listeners.by_event.get_mut(name) {
                    callbacks.retain(|(existing, _)| *existing != id);
                    if callbacks.is_empty() {
                        listeners.by_event.shift_remove(name);
                    }
                }
            }
            Topic::All => listeners.firehose.retain(|(existing, _)| *existing != id),
        }
    }
}

#[derive(Debug, Clone)]
enum Topic {
    Event(String),
    All,
}

/// Process-wide event bus. Cloning shares the same subscribers.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create a bus stamping events with `clock`.
    pub fn new(clock: SharedClock) -> Self {
        Self {
            inner: Arc::new(BusInner {
                listeners: Mutex::default(),
                next_id: AtomicU64::new(0),
                clock,
            }),
        }
    }

    /// Register `callback` for `event`. The callback runs until the returned
    /// subscription is unsubscribed or dropped.
    pub fn subscribe<F>(&self, event: &str, callback: F) -> Subscription
    where
        F: Fn(&BusEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners()
            .by_event
            .entry(event.to_string())
            .or_default()
            .push((id, Arc::new(callback)));
        self.subscription(Topic::Event(event.to_string()), id)
    }

    /// Register `callback` for every event, after the per-event subscribers.
    pub fn subscribe_all<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&BusEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners()
            .firehose
            .push((id, Arc::new(callback)));
        self.subscription(Topic::All, id)
    }

    fn subscription(&self, topic: Topic, id: u64) -> Subscription {
        Subscription {
            bus: Arc::downgrade(&self.inner),
            topic,
            id,
            active: true,
        }
    }

    /// Invoke every current subscriber of `event` in registration order.
    ///
    /// A panicking subscriber is logged and skipped. Returns the number of
    /// callbacks that completed.
    pub fn emit(&self, event: &str, payload: Value) -> usize {
        let callbacks: Vec<Callback> = {
            let listeners = self.inner.listeners();
            listeners
                .by_event
                .get(event)
                .into_iter()
                .flatten()
                .chain(listeners.firehose.iter())
                .map(|(_, callback)| callback.clone())
                .collect()
        };

        let signal = BusEvent {
            name: event.to_string(),
            payload,
            emitted_at: self.inner.clock.now_utc(),
        };

        let mut completed = 0;
        for callback in callbacks {
            match catch_unwind(AssertUnwindSafe(|| callback(&signal))) {
                Ok(()) => completed += 1,
                Err(panic) => {
                    let reason = panic
                        .downcast_ref::<&str>()
                        .map(|reason| reason.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    warn!(event, reason = %reason, "event bus subscriber panicked");
                }
            }
        }
        debug!(event, completed, "event emitted");
        completed
    }

    /// Number of callbacks registered for `event`, excluding catch-all subscribers.
    pub fn subscriber_count(&self, event: &str) -> usize {
        self.inner
            .listeners()
            .by_event
            .get(event)
            .map_or(0, Vec::len)
    }
}

/// Registration returned by [`EventBus::subscribe`]. Dropping it unsubscribes.
#[must_use = "dropping the subscription unsubscribes the callback"]
pub struct Subscription {
    bus: Weak<BusInner>,
    topic: Topic,
    id: u64,
    active: bool,
}

impl Subscription {
    /// Stop receiving events.
    pub fn unsubscribe(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if !std::mem::replace(&mut self.active, false) {
            return;
        }
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(&self.topic, self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::clock::{Clock, ManualClock};

    const NOW_MS: u64 = 1_700_000_000_000;

    fn bus() -> EventBus {
        EventBus::new(Arc::new(ManualClock::new(NOW_MS)))
    }

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&'static str) -> Box<dyn Fn(&BusEvent) + Send + Sync>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let make = move |label: &'static str| {
            let sink = sink.clone();
            Box::new(move |_: &BusEvent| sink.lock().unwrap().push(label.to_string()))
                as Box<dyn Fn(&BusEvent) + Send + Sync>
        };
        (seen, make)
    }

    #[test]
    fn subscribers_run_in_registration_order() {
        let bus = bus();
        let (seen, make) = recorder();
        let _first = bus.subscribe("refresh", make("first"));
        let _second = bus.subscribe("refresh", make("second"));
        let _other = bus.subscribe("other", make("other"));

        assert_eq!(bus.emit("refresh", Value::Null), 2);
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn panicking_subscriber_does_not_stop_the_others() {
        let bus = bus();
        let (seen, make) = recorder();
        let _first = bus.subscribe("refresh", make("first"));
        let _boom = bus.subscribe("refresh", |_| panic!("widget failed"));
        let _third = bus.subscribe("refresh", make("third"));

        assert_eq!(bus.emit("refresh", json!({ "batch": 1 })), 2);
        assert_eq!(*seen.lock().unwrap(), vec!["first", "third"]);
    }

    #[test]
    fn dropped_subscriptions_stop_receiving() {
        let bus = bus();
        let (seen, make) = recorder();
        let kept = bus.subscribe("refresh", make("kept"));
        let dropped = bus.subscribe("refresh", make("dropped"));
        drop(dropped);

        bus.emit("refresh", Value::Null);
        assert_eq!(*seen.lock().unwrap(), vec!["kept"]);

        kept.unsubscribe();
        assert_eq!(bus.subscriber_count("refresh"), 0);
        assert_eq!(bus.emit("refresh", Value::Null), 0);
    }

    #[test]
    fn catch_all_subscribers_see_every_event() {
        let bus = bus();
        let names = Arc::new(Mutex::new(Vec::new()));
        let sink = names.clone();
        let _all = bus.subscribe_all(move |event| sink.lock().unwrap().push(event.name.clone()));

        bus.emit(EVENT_GROUP_FORCE_CONFIRMED, Value::Null);
        bus.emit(EVENT_HEALTH_SCORES_RECALCULATED, Value::Null);
        assert_eq!(
            *names.lock().unwrap(),
            vec![EVENT_GROUP_FORCE_CONFIRMED, EVENT_HEALTH_SCORES_RECALCULATED]
        );
    }

    #[test]
    fn events_are_stamped_with_the_bus_clock() {
        let clock = Arc::new(ManualClock::new(NOW_MS));
        let bus = EventBus::new(clock.clone());
        let stamps = Arc::new(Mutex::new(Vec::new()));
        let sink = stamps.clone();
        let _all = bus.subscribe_all(move |event| sink.lock().unwrap().push(event.emitted_at));

        bus.emit("refresh", Value::Null);
        clock.advance(std::time::Duration::from_secs(90));
        bus.emit("refresh", Value::Null);

        let stamps = stamps.lock().unwrap();
        assert_eq!(stamps[0], clock.now_utc() - std::time::Duration::from_secs(90));
        assert_eq!(stamps[1], clock.now_utc());
    }

    #[test]
    fn a_subscriber_may_unsubscribe_another_during_emit() {
        let bus = bus();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let target = slot.clone();
        let _remover = bus.subscribe("refresh", move |_| {
            target.lock().unwrap().take();
        });
        *slot.lock().unwrap() = Some(bus.subscribe("refresh", |_| {}));

        assert_eq!(bus.emit("refresh", Value::Null), 2);
        assert_eq!(bus.subscriber_count("refresh"), 1);
    }
}
