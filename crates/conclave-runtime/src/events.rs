//! In-process event bus (spec.md §4.8, §9 ambient concern). Every engine in
//! this crate publishes onto a shared `EventBus` rather than returning
//! progress out of band, so a front-end can observe a run without threading
//! a callback through every call site.
//!
//! Grounded in the teacher's `aof-runtime` executor event enums
//! (`AgentFlowEvent`, `FleetEvent` in `executor/agentflow_executor.rs` and
//! `fleet/mod.rs`) for the "one append-only enum per engine, fed into a
//! channel" shape; the bounded-ring-buffer-per-subscriber delivery and the
//! synthetic overflow event are authored fresh against spec.md §4.8's
//! "publish must not block the publisher" and "a lagging subscriber may miss
//! events, signaled by a distinguished overflow event" invariants (no
//! `tokio::sync::broadcast`, which can only report lag as a count, not as an
//! event subscribers can route on).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use ulid::Ulid;

/// Every event kind this crate's engines can publish (spec.md §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    AgentTurnStarted,
    AgentTurnCompleted,
    AgentTurnFailed,
    WorkflowStarted,
    WorkflowStepStarted,
    WorkflowStepCompleted,
    WorkflowStepFailed,
    WorkflowCompleted,
    WorkflowFailed,
    GroupSessionStarted,
    GroupMessagePosted,
    GroupConsensusReached,
    GroupSessionEnded,
    SandboxCreated,
    SandboxDestroyed,
    SandboxResourceBreach,
    ReviewRequested,
    ReviewResolved,
    /// Synthetic event injected into a subscriber's own buffer in place of
    /// whatever it dropped, so a lagging consumer learns it lagged instead
    /// of silently missing events (spec.md §4.8).
    BusOverflow,
}

/// One published occurrence. `correlation_id` ties every event from a
/// single execution/session/sandbox run together (spec.md §4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Ulid,
    pub kind: EventKind,
    pub correlation_id: Ulid,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub payload: serde_json::Value,
}

impl Event {
    pub fn new(kind: EventKind, correlation_id: Ulid, payload: serde_json::Value) -> Self {
        Self {
            id: Ulid::new(),
            kind,
            correlation_id,
            timestamp: chrono::Utc::now(),
            payload,
        }
    }
}

/// Per-subscriber bounded ring buffer. Overflow drops the oldest event and
/// replaces it with a `bus.overflow` marker rather than growing unbounded or
/// blocking the publisher (spec.md §4.8).
struct Subscriber {
    buffer: Mutex<VecDeque<Event>>,
    capacity: usize,
    notify: Notify,
}

impl Subscriber {
    fn push(&self, event: Event) {
        let mut buf = self.buffer.lock();
        if buf.len() >= self.capacity {
            buf.pop_front();
            if !matches!(buf.back().map(|e| e.kind), Some(EventKind::BusOverflow)) {
                buf.push_back(Event::new(
                    EventKind::BusOverflow,
                    event.correlation_id,
                    serde_json::json!({"dropped_kind": format!("{:?}", event.kind)}),
                ));
            }
        } else {
            buf.push_back(event);
        }
        drop(buf);
        self.notify.notify_waiters();
    }
}

/// Live handle returned by [`EventBus::subscribe`]. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    bus: EventBus,
    subscriber: Arc<Subscriber>,
}

impl Subscription {
    /// Waits for and returns the next event, in publish order.
    pub async fn recv(&self) -> Event {
        loop {
            if let Some(event) = self.subscriber.buffer.lock().pop_front() {
                return event;
            }
            self.subscriber.notify.notified().await;
        }
    }

    /// Drains whatever is currently buffered without waiting.
    pub fn drain(&self) -> Vec<Event> {
        self.subscriber.buffer.lock().drain(..).collect()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.subscribers.remove(&self.id);
    }
}

/// Publish/subscribe event bus shared across one process's engines
/// (spec.md §4.8). Cheaply `Clone`-able; every clone shares the same
/// subscriber map.
#[derive(Clone)]
pub struct EventBus {
    subscribers: Arc<DashMap<u64, Arc<Subscriber>>>,
    next_id: Arc<AtomicU64>,
    default_capacity: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventBus {
    pub fn new(default_capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(0)),
            default_capacity,
        }
    }

    /// Register a new subscriber with this bus's default buffer capacity.
    pub fn subscribe(&self) -> Subscription {
        self.subscribe_with_capacity(self.default_capacity)
    }

    pub fn subscribe_with_capacity(&self, capacity: usize) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let subscriber = Arc::new(Subscriber {
            buffer: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            capacity,
            notify: Notify::new(),
        });
        self.subscribers.insert(id, subscriber.clone());
        Subscription {
            id,
            bus: self.clone(),
            subscriber,
        }
    }

    /// Fan the event out to every current subscriber. Never blocks: each
    /// subscriber's buffer push is an `O(1)` non-async operation.
    pub fn publish(&self, event: Event) {
        for entry in self.subscribers.iter() {
            entry.value().push(event.clone());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evt(kind: EventKind) -> Event {
        Event::new(kind, Ulid::new(), serde_json::json!({}))
    }

    #[tokio::test]
    async fn subscriber_receives_in_publish_order() {
        let bus = EventBus::default();
        let sub = bus.subscribe();
        bus.publish(evt(EventKind::WorkflowStarted));
        bus.publish(evt(EventKind::WorkflowCompleted));

        assert_eq!(sub.recv().await.kind, EventKind::WorkflowStarted);
        assert_eq!(sub.recv().await.kind, EventKind::WorkflowCompleted);
    }

    #[tokio::test]
    async fn overflow_injects_synthetic_marker_once() {
        let bus = EventBus::new(2);
        let sub = bus.subscribe_with_capacity(2);
        for _ in 0..5 {
            bus.publish(evt(EventKind::AgentTurnStarted));
        }
        let drained = sub.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[1].kind, EventKind::BusOverflow);
    }

    #[tokio::test]
    async fn dropping_subscription_removes_it_from_bus() {
        let bus = EventBus::default();
        let sub = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn unsubscribed_listener_does_not_see_later_events() {
        let bus = EventBus::default();
        let sub = bus.subscribe();
        drop(sub);
        bus.publish(evt(EventKind::WorkflowStarted));
        assert_eq!(bus.subscriber_count(), 0);
    }
}
