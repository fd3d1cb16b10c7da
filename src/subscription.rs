//! In-process, per-job event fan-out.
//!
//! Mirrors the shape of the framework's [`crate::event_bus`] broadcast
//! manager — a single mutex guarding a map keyed by identifier — but keyed
//! by `jobId` instead of channel name, and with terminal events garbage
//! collecting their own entry instead of requiring an explicit unsubscribe.

use crate::model::{JobError, Progress};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// The callbacks a caller registers for one job via
/// [`SubscriptionBus::subscribe`]. Any subset may be omitted.
#[derive(Default)]
pub struct Callbacks {
    pub on_progress: Option<Box<dyn Fn(&Progress) + Send + Sync>>,
    pub on_completed: Option<Box<dyn Fn(&Value) + Send + Sync>>,
    pub on_failed: Option<Box<dyn Fn(&JobError) + Send + Sync>>,
    pub on_cancelled: Option<Box<dyn Fn(Option<&str>) + Send + Sync>>,
}

struct Subscriber {
    id: u64,
    callbacks: Callbacks,
}

/// A disposer returned by [`SubscriptionBus::subscribe`]. Dropping it does
/// nothing; you must call [`Unsubscribe::unsubscribe`] explicitly, which
/// consumes `self` so a second call on the same handle is a compile error.
/// Removing an id that is no longer registered (e.g. because its terminal
/// event already fired) is itself a harmless no-op.
pub struct Unsubscribe {
    job_id: String,
    subscriber_id: u64,
    bus: Arc<SubscriptionBusInner>,
}

impl Unsubscribe {
    pub fn unsubscribe(self) {
        self.bus.remove_subscriber(&self.job_id, self.subscriber_id);
    }
}

struct SubscriptionBusInner {
    subscribers: Mutex<HashMap<String, Vec<Subscriber>>>,
    next_id: AtomicU64,
}

impl SubscriptionBusInner {
    fn remove_subscriber(&self, job_id: &str, subscriber_id: u64) {
        let mut map = self.subscribers.lock().unwrap();
        if let Some(list) = map.get_mut(job_id) {
            list.retain(|s| s.id != subscriber_id);
            if list.is_empty() {
                map.remove(job_id);
            }
        }
    }
}

/// Per-job fan-out bus. Subscribing after an event was published never
/// delivers that past event (no replay). Callback panics are caught
/// and isolated so one bad subscriber cannot starve the others or the
/// worker that published the event.
#[derive(Clone)]
pub struct SubscriptionBus {
    inner: Arc<SubscriptionBusInner>,
}

impl Default for SubscriptionBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SubscriptionBusInner {
                subscribers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Registers `callbacks` for `job_id`. Returns a disposer; terminal
    /// events (completed/failed/cancelled) also drop the registration on
    /// their own, so calling `unsubscribe` afterwards is a harmless no-op.
    pub fn subscribe(&self, job_id: impl Into<String>, callbacks: Callbacks) -> Unsubscribe {
        let job_id = job_id.into();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut map = self.inner.subscribers.lock().unwrap();
            map.entry(job_id.clone()).or_default().push(Subscriber { id, callbacks });
        }
        Unsubscribe { job_id, subscriber_id: id, bus: self.inner.clone() }
    }

    /// Invokes `call` for every subscriber currently registered for
    /// `job_id`, without holding the bus lock while doing so (deadlock
    /// avoidance: a callback may itself call `subscribe`/`unsubscribe`).
    /// Implemented by taking the subscriber list out of the map for the
    /// duration of the dispatch and putting back whatever remains — any
    /// subscriber added reentrantly during dispatch is appended after.
    fn dispatch(&self, job_id: &str, call: impl Fn(&Callbacks)) {
        let taken = self.inner.subscribers.lock().unwrap().remove(job_id);
        let Some(list) = taken else { return };

        for sub in &list {
            if let Err(_panic) =
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| call(&sub.callbacks)))
            {
                tracing::warn!("subscriber callback for job {job_id} panicked; isolating");
            }
        }

        let mut map = self.inner.subscribers.lock().unwrap();
        match map.remove(job_id) {
            Some(mut reentrant) => {
                let mut list = list;
                list.append(&mut reentrant);
                map.insert(job_id.to_string(), list);
            }
            None => {
                map.insert(job_id.to_string(), list);
            }
        }
    }

    pub fn publish_progress(&self, job_id: &str, progress: &Progress) {
        self.dispatch(job_id, |callbacks| {
            if let Some(cb) = &callbacks.on_progress {
                cb(progress);
            }
        });
    }

    pub fn publish_completed(&self, job_id: &str, result: &Value) {
        self.dispatch(job_id, |callbacks| {
            if let Some(cb) = &callbacks.on_completed {
                cb(result);
            }
        });
        self.inner.subscribers.lock().unwrap().remove(job_id);
    }

    pub fn publish_failed(&self, job_id: &str, error: &JobError) {
        self.dispatch(job_id, |callbacks| {
            if let Some(cb) = &callbacks.on_failed {
                cb(error);
            }
        });
        self.inner.subscribers.lock().unwrap().remove(job_id);
    }

    pub fn publish_cancelled(&self, job_id: &str, reason: Option<&str>) {
        self.dispatch(job_id, |callbacks| {
            if let Some(cb) = &callbacks.on_cancelled {
                cb(reason);
            }
        });
        self.inner.subscribers.lock().unwrap().remove(job_id);
    }
}
