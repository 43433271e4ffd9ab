// src/cascade.rs
//
// Cascade / Readiness Engine: reacts to a job reaching a terminal status
// by walking its children in the Dependency Graph. Runs as its own
// consumer task fed over an unbounded mpsc channel so that publishing a
// cascade event from the executor's hot path never blocks on the walk
// itself.

use std::sync::Arc;

use log::debug;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use uuid::Uuid;

use crate::events::{EventBus, SchedulerEvent};
use crate::graph::DependencyGraph;
use crate::job::{ErrorKind, JobStatus};
use crate::queue::PriorityQueueSet;
use crate::store::JobStateStore;

#[derive(Debug, Clone, Copy)]
pub enum CascadeMessage {
    /// A job reached a terminal status. `success` distinguishes the
    /// readiness path (unblock children) from the failure path (cascade
    /// failure to descendants).
    JobTerminal { id: Uuid, success: bool },
}

#[derive(Clone)]
pub struct CascadeHandle {
    tx: mpsc::UnboundedSender<CascadeMessage>,
}

impl CascadeHandle {
    pub fn notify_terminal(&self, id: Uuid, success: bool) {
        // The receiver only goes away at shutdown; a dropped send at
        // that point is not actionable.
        let _ = self.tx.send(CascadeMessage::JobTerminal { id, success });
    }
}

/// Spawns the cascade consumer task and returns a cheap handle to feed
/// it. Held components are the same shared handles the rest of the
/// scheduler uses.
pub fn spawn(
    graph: Arc<AsyncMutex<DependencyGraph>>,
    store: Arc<JobStateStore>,
    queue: Arc<PriorityQueueSet>,
    events: Arc<EventBus>,
) -> CascadeHandle {
    let (tx, mut rx) = mpsc::unbounded_channel::<CascadeMessage>();

    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match msg {
                CascadeMessage::JobTerminal { id, success } => {
                    if success {
                        unblock_children(&graph, &store, &queue, &events, id).await;
                    } else {
                        fail_descendants(&graph, &store, &events, id).await;
                    }
                }
            }
        }
    });

    CascadeHandle { tx }
}

async fn unblock_children(
    graph: &Arc<AsyncMutex<DependencyGraph>>,
    store: &Arc<JobStateStore>,
    queue: &Arc<PriorityQueueSet>,
    events: &Arc<EventBus>,
    completed_parent: Uuid,
) {
    let children = graph.lock().await.children_of(completed_parent);
    for child_id in children {
        let parents = graph.lock().await.parents_of(child_id);
        let mut all_parents_done = true;
        for parent_id in &parents {
            match store.get(*parent_id).await {
                Some(p) if p.status.is_terminal_success() => {}
                _ => {
                    all_parents_done = false;
                    break;
                }
            }
        }
        if !all_parents_done {
            continue;
        }
        let Some(child) = store.get(child_id).await else {
            continue;
        };
        if child.status != JobStatus::Blocked {
            continue;
        }
        let updated = store
            .cas_status(child_id, JobStatus::Blocked, JobStatus::Ready, |_| {})
            .await;
        if let Some(job) = updated {
            debug!("job {child_id} became ready, all parents satisfied");
            queue.push(job.priority, job.id).await;
            events.publish(SchedulerEvent::Ready { id: child_id });
        }
    }
}

async fn fail_descendants(
    graph: &Arc<AsyncMutex<DependencyGraph>>,
    store: &Arc<JobStateStore>,
    events: &Arc<EventBus>,
    failed_parent: Uuid,
) {
    let mut frontier = graph.lock().await.children_of(failed_parent);
    let mut visited = std::collections::HashSet::new();

    while let Some(child_id) = frontier.pop() {
        if !visited.insert(child_id) {
            continue;
        }
        let Some(child) = store.get(child_id).await else {
            continue;
        };
        if child.status.is_terminal() {
            continue;
        }
        let from_status = child.status;
        let updated = store
            .cas_status(child_id, from_status, JobStatus::Failed, |job| {
                job.last_error = Some((
                    ErrorKind::DependencyFailed,
                    format!("ancestor {failed_parent} failed"),
                ));
                job.finished_at = Some(chrono::Utc::now());
            })
            .await;
        if updated.is_some() {
            events.publish(SchedulerEvent::CascadeFailed {
                id: child_id,
                failed_parent,
            });
            let grandchildren = graph.lock().await.children_of(child_id);
            frontier.extend(grandchildren);
        }
    }
}
