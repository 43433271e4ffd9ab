// src/events.rs
//
// Event stream + metrics snapshot. Every externally visible state
// transition is broadcast here; `Scheduler::subscribe` hands callers a
// fresh receiver. A slow or absent subscriber never blocks the
// scheduler — `broadcast` drops old events for lagging receivers rather
// than applying backpressure to the producer.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::job::{ErrorKind, Priority};

#[derive(Debug, Clone, Serialize)]
pub enum SchedulerEvent {
    Submitted { id: Uuid, priority: Priority },
    Blocked { id: Uuid, pending_parents: usize },
    Ready { id: Uuid },
    Dispatched { id: Uuid, attempt: u32 },
    Completed { id: Uuid },
    Failed { id: Uuid, kind: ErrorKind, attempt: u32 },
    TimedOut { id: Uuid },
    RetryScheduled { id: Uuid, attempt: u32, delay_ms: u64 },
    DeadLettered { id: Uuid },
    Cancelled { id: Uuid },
    CascadeFailed { id: Uuid, failed_parent: Uuid },
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub queue_depths: [usize; 4],
    pub cpu_free: u32,
    pub mem_free: u32,
    pub running_count: usize,
    pub dlq_size: usize,
    pub throughput_1m: f64,
    pub throughput_5m: f64,
}

/// Broadcasts scheduler events and tracks a sliding window of completion
/// timestamps to derive throughput figures for `MetricsSnapshot`.
pub struct EventBus {
    tx: broadcast::Sender<SchedulerEvent>,
    completions: Mutex<VecDeque<Instant>>,
}

const THROUGHPUT_WINDOW: Duration = Duration::from_secs(5 * 60);

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self {
            tx,
            completions: Mutex::new(VecDeque::new()),
        }
    }

    pub fn publish(&self, event: SchedulerEvent) {
        if matches!(event, SchedulerEvent::Completed { .. }) {
            let mut g = self.completions.lock().expect("event bus mutex poisoned");
            g.push_back(Instant::now());
        }
        // No receivers is a legitimate state (nobody subscribed yet).
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.tx.subscribe()
    }

    fn throughput_over(&self, window: Duration) -> f64 {
        let now = Instant::now();
        let mut g = self.completions.lock().expect("event bus mutex poisoned");
        while let Some(front) = g.front() {
            if now.duration_since(*front) > THROUGHPUT_WINDOW {
                g.pop_front();
            } else {
                break;
            }
        }
        let count = g.iter().filter(|t| now.duration_since(**t) <= window).count();
        count as f64 / window.as_secs_f64() * 60.0
    }

    pub fn throughput_1m(&self) -> f64 {
        self.throughput_over(Duration::from_secs(60))
    }

    pub fn throughput_5m(&self) -> f64 {
        self.throughput_over(Duration::from_secs(5 * 60))
    }
}

/// Helper used by `Scheduler::metrics` to assemble the full snapshot
/// from the independently-owned components.
pub fn build_snapshot(
    queue_depths: [usize; 4],
    cpu_free: u32,
    mem_free: u32,
    running_count: usize,
    dlq_size: usize,
    bus: &EventBus,
) -> MetricsSnapshot {
    MetricsSnapshot {
        timestamp: Utc::now(),
        queue_depths,
        cpu_free,
        mem_free,
        running_count,
        dlq_size,
        throughput_1m: bus.throughput_1m(),
        throughput_5m: bus.throughput_5m(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new(16);
        bus.publish(SchedulerEvent::Submitted {
            id: Uuid::new_v4(),
            priority: Priority::Normal,
        });
    }

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let id = Uuid::new_v4();
        bus.publish(SchedulerEvent::Ready { id });
        let event = rx.recv().await.unwrap();
        match event {
            SchedulerEvent::Ready { id: got } => assert_eq!(got, id),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn throughput_counts_recent_completions() {
        let bus = EventBus::new(16);
        for _ in 0..3 {
            bus.publish(SchedulerEvent::Completed { id: Uuid::new_v4() });
        }
        assert!(bus.throughput_1m() > 0.0);
    }
}
