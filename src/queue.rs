// src/queue.rs
//
// Priority Queue Set: four strict tiers (CRITICAL > HIGH > NORMAL > LOW).
// A pop always drains the highest non-empty tier first; within a tier,
// FIFO. The Admission Controller uses `requeue_tail` to push a job that
// failed a resource check back behind its peers rather than spinning on
// it.

use std::collections::VecDeque;
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

use crate::job::Priority;

struct Tiers {
    lanes: [VecDeque<Uuid>; 4],
}

impl Tiers {
    fn new() -> Self {
        Self {
            lanes: [
                VecDeque::new(),
                VecDeque::new(),
                VecDeque::new(),
                VecDeque::new(),
            ],
        }
    }

    fn len(&self) -> usize {
        self.lanes.iter().map(|l| l.len()).sum()
    }
}

pub struct PriorityQueueSet {
    tiers: Mutex<Tiers>,
    notify: Notify,
}

impl Default for PriorityQueueSet {
    fn default() -> Self {
        Self::new()
    }
}

impl PriorityQueueSet {
    pub fn new() -> Self {
        Self {
            tiers: Mutex::new(Tiers::new()),
            notify: Notify::new(),
        }
    }

    pub async fn push(&self, priority: Priority, id: Uuid) {
        let mut g = self.tiers.lock().await;
        g.lanes[priority.index()].push_back(id);
        drop(g);
        self.notify.notify_one();
    }

    /// Re-enqueues at the tail of its own tier — used when a job was
    /// popped but couldn't be admitted (resources unavailable), so peers
    /// of equal or lower priority still get a chance.
    pub async fn requeue_tail(&self, priority: Priority, id: Uuid) {
        self.push(priority, id).await;
    }

    /// Blocks until a job is available, then pops the highest-priority
    /// one. Returns `(priority, id)`.
    pub async fn pop_blocking(&self) -> (Priority, Uuid) {
        loop {
            {
                let mut g = self.tiers.lock().await;
                for p in Priority::TIERS {
                    if let Some(id) = g.lanes[p.index()].pop_front() {
                        return (p, id);
                    }
                }
            }
            self.notify.notified().await;
        }
    }

    /// Removes a job wherever it sits in the queue (used on cancellation
    /// of a job that's still Ready but not yet dispatched).
    pub async fn remove(&self, id: Uuid) -> bool {
        let mut g = self.tiers.lock().await;
        for lane in g.lanes.iter_mut() {
            if let Some(pos) = lane.iter().position(|x| *x == id) {
                lane.remove(pos);
                return true;
            }
        }
        false
    }

    pub async fn depths(&self) -> [usize; 4] {
        let g = self.tiers.lock().await;
        [
            g.lanes[0].len(),
            g.lanes[1].len(),
            g.lanes[2].len(),
            g.lanes[3].len(),
        ]
    }

    pub async fn total_len(&self) -> usize {
        self.tiers.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn drains_strictly_by_priority() {
        let q = PriorityQueueSet::new();
        let low = Uuid::new_v4();
        let normal = Uuid::new_v4();
        let high = Uuid::new_v4();
        let critical = Uuid::new_v4();

        q.push(Priority::Low, low).await;
        q.push(Priority::Normal, normal).await;
        q.push(Priority::High, high).await;
        q.push(Priority::Critical, critical).await;

        assert_eq!(q.pop_blocking().await.1, critical);
        assert_eq!(q.pop_blocking().await.1, high);
        assert_eq!(q.pop_blocking().await.1, normal);
        assert_eq!(q.pop_blocking().await.1, low);
    }

    #[tokio::test]
    async fn fifo_within_tier() {
        let q = PriorityQueueSet::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        q.push(Priority::Normal, a).await;
        q.push(Priority::Normal, b).await;
        assert_eq!(q.pop_blocking().await.1, a);
        assert_eq!(q.pop_blocking().await.1, b);
    }

    #[tokio::test]
    async fn requeue_tail_yields_to_peer() {
        let q = PriorityQueueSet::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        q.push(Priority::Normal, a).await;
        q.push(Priority::Normal, b).await;
        let (p, popped) = q.pop_blocking().await;
        assert_eq!(popped, a);
        q.requeue_tail(p, popped).await;
        assert_eq!(q.pop_blocking().await.1, b);
        assert_eq!(q.pop_blocking().await.1, a);
    }

    #[tokio::test]
    async fn remove_before_dispatch() {
        let q = PriorityQueueSet::new();
        let a = Uuid::new_v4();
        q.push(Priority::Normal, a).await;
        assert!(q.remove(a).await);
        assert_eq!(q.total_len().await, 0);
    }
}
