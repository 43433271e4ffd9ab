// src/scheduler.rs
//
// The facade: a constructed value owning every component, with no
// process-global state. Exposes the narrow Core API an HTTP layer
// would sit in front of, split across dedicated component modules
// instead of one coordinator god-object.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use uuid::Uuid;

use crate::cascade::{self, CascadeHandle};
use crate::config::SchedulerConfig;
use crate::events::{build_snapshot, EventBus, MetricsSnapshot, SchedulerEvent};
use crate::executor::ExecutorPool;
use crate::graph::DependencyGraph;
use crate::handler::HandlerRegistry;
use crate::job::{ErrorKind, Job, JobSpec, JobStatus};
use crate::queue::PriorityQueueSet;
use crate::resources::ResourceLedger;
use crate::retry;
use crate::store::JobStateStore;
use crate::{admission, job::Priority};

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("dependency graph would contain a cycle")]
    CycleDetected,
    #[error("depends_on references a job that does not exist")]
    UnknownParent,
    #[error("requested resources exceed configured capacity")]
    UnsatisfiableResources,
    #[error("invalid job spec: {0}")]
    InvalidSpec(String),
}

#[derive(Debug, Error)]
pub enum CancelError {
    #[error("job not found")]
    NotFound,
    #[error("job already in a terminal state")]
    AlreadyTerminal,
}

#[derive(Debug, Error)]
pub enum DlqRetryError {
    #[error("job not found in dead-letter queue")]
    NotFound,
}

#[derive(Debug, Default, Clone)]
pub struct ListFilter {
    pub status: Option<JobStatus>,
    pub priority: Option<Priority>,
    pub job_type: Option<String>,
    pub limit: Option<usize>,
    /// Opaque continuation token from a previous `Page::next_cursor`:
    /// the id of the last item the caller already saw. Results resume
    /// strictly after it in the list's sort order.
    pub cursor: Option<Uuid>,
}

/// A page of `list()` results plus the cursor to pass back in for the
/// next page, or `None` once the result set is exhausted.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<Uuid>,
}

pub struct Scheduler {
    graph: Arc<AsyncMutex<DependencyGraph>>,
    store: Arc<JobStateStore>,
    queue: Arc<PriorityQueueSet>,
    ledger: Arc<ResourceLedger>,
    events: Arc<EventBus>,
    executor: Arc<ExecutorPool>,
    cascade: CascadeHandle,
}

impl Scheduler {
    pub async fn new(config: SchedulerConfig, handlers: HandlerRegistry) -> rusqlite::Result<Self> {
        config.validate().expect("invalid config reached Scheduler::new");

        let graph = Arc::new(AsyncMutex::new(DependencyGraph::new()));
        let store = Arc::new(JobStateStore::open(&config.storage.db_path)?);
        let queue = Arc::new(PriorityQueueSet::new());
        let ledger = Arc::new(ResourceLedger::new(config.capacity.cpu_units, config.capacity.memory_mb));
        let events = Arc::new(EventBus::new(config.storage.event_buffer));
        let handlers = Arc::new(handlers);

        store.restore().await?;

        let cascade = cascade::spawn(
            Arc::clone(&graph),
            Arc::clone(&store),
            Arc::clone(&queue),
            Arc::clone(&events),
        );

        let retry_tx = retry::spawn(Arc::clone(&store), Arc::clone(&queue), Arc::clone(&events));

        let executor = Arc::new(ExecutorPool::new(
            config.executor.max_concurrent,
            handlers,
            Arc::clone(&store),
            Arc::clone(&ledger),
            Arc::clone(&events),
            cascade.clone(),
            retry_tx,
            config.retry.clone(),
        ));

        admission::spawn(
            Arc::clone(&queue),
            Arc::clone(&store),
            Arc::clone(&ledger),
            Arc::clone(&executor),
        );

        // Anything reloaded from disk already READY needs to rejoin its
        // lane; everything else re-resolves naturally as its parents
        // complete via the cascade engine.
        for job in store.list_by_status(JobStatus::Ready).await {
            queue.push(job.priority, job.id).await;
        }

        Ok(Self {
            graph,
            store,
            queue,
            ledger,
            events,
            executor,
            cascade,
        })
    }

    pub async fn submit(&self, spec: JobSpec) -> Result<Uuid, SubmitError> {
        spec.validate().map_err(|_| SubmitError::InvalidSpec("field out of range".into()))?;

        if !self.ledger.is_satisfiable(spec.cpu_units, spec.memory_mb) {
            return Err(SubmitError::UnsatisfiableResources);
        }

        let id = Uuid::new_v4();
        {
            let mut graph = self.graph.lock().await;
            graph.submit(id, &spec.depends_on).map_err(|e| match e {
                ErrorKind::CycleDetected => SubmitError::CycleDetected,
                ErrorKind::UnknownParent => SubmitError::UnknownParent,
                _ => unreachable!("graph::submit only returns cycle/unknown-parent errors"),
            })?;
        }

        let initial_status = self.resolve_initial_status(&spec.depends_on).await;
        let priority = spec.priority;
        let mut job = Job::from_spec(id, spec);
        job.status = initial_status;
        self.store.insert(job).await;

        self.events.publish(SchedulerEvent::Submitted { id, priority });
        match initial_status {
            JobStatus::Ready => {
                self.queue.push(priority, id).await;
                self.events.publish(SchedulerEvent::Ready { id });
            }
            JobStatus::Blocked => {
                self.events.publish(SchedulerEvent::Blocked {
                    id,
                    pending_parents: self.graph.lock().await.parents_of(id).len(),
                });
            }
            _ => unreachable!("a freshly submitted job is either READY or BLOCKED"),
        }

        Ok(id)
    }

    /// READY iff every declared parent is already terminally successful;
    /// BLOCKED otherwise. Shared between initial submission and DLQ
    /// retry, since both re-enter the graph at the same gating point.
    async fn resolve_initial_status(&self, depends_on: &HashSet<Uuid>) -> JobStatus {
        if depends_on.is_empty() {
            return JobStatus::Ready;
        }
        for parent in depends_on {
            match self.store.get(*parent).await {
                Some(p) if p.status.is_terminal_success() => {}
                _ => return JobStatus::Blocked,
            }
        }
        JobStatus::Ready
    }

    pub async fn get(&self, id: Uuid) -> Option<Job> {
        self.store.get(id).await
    }

    pub async fn list(&self, filter: ListFilter) -> Page<Job> {
        let mut jobs = self.store.list_all().await;
        if let Some(status) = filter.status {
            jobs.retain(|j| j.status == status);
        }
        if let Some(priority) = filter.priority {
            jobs.retain(|j| j.priority == priority);
        }
        if let Some(job_type) = &filter.job_type {
            jobs.retain(|j| &j.job_type == job_type);
        }
        // Composite sort key: `created_at` alone can tie (same-millisecond
        // submissions), so `id` breaks ties deterministically — required
        // for the cursor below to name a single, stable position.
        jobs.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));

        if let Some(cursor) = filter.cursor {
            match jobs.iter().position(|j| j.id == cursor) {
                Some(pos) => {
                    jobs.drain(..=pos);
                }
                None => {
                    // Cursor no longer present (job removed, or caller
                    // passed a stale/unknown id): treat as exhausted
                    // rather than silently restarting from the top.
                    jobs.clear();
                }
            }
        }

        let limit = filter.limit.unwrap_or(jobs.len());
        let next_cursor = if limit > 0 && jobs.len() > limit {
            jobs.get(limit - 1).map(|j| j.id)
        } else {
            None
        };
        jobs.truncate(limit);

        Page {
            items: jobs,
            next_cursor,
        }
    }

    pub async fn cancel(&self, id: Uuid) -> Result<(), CancelError> {
        let Some(job) = self.store.get(id).await else {
            return Err(CancelError::NotFound);
        };
        if job.status.is_terminal() {
            return Err(CancelError::AlreadyTerminal);
        }

        match job.status {
            JobStatus::Running => {
                // Cooperative signal only; the executor observes this
                // the next time the handler checks in, or at timeout.
                self.executor.request_cancel(id).await;
                self.store.update(id, |j| j.cancel_requested = true).await;
            }
            JobStatus::Ready | JobStatus::Pending => {
                // Popped-but-not-admitted or still in queue: removing it
                // from the lane releases nothing, since no resources
                // were ever held.
                self.queue.remove(id).await;
                let cancelled = self
                    .store
                    .cas_status(id, job.status, JobStatus::Cancelled, |j| {
                        j.last_error = Some((ErrorKind::Cancelled, "cancelled by caller".into()));
                        j.finished_at = Some(chrono::Utc::now());
                    })
                    .await;
                // If the CAS lost a race (e.g. the Admission Controller
                // dispatched it to RUNNING in between), the job is no
                // longer in the state we observed; don't cascade or
                // publish as if the cancel took effect.
                if cancelled.is_none() {
                    return Ok(());
                }
                self.cascade.notify_terminal(id, false);
            }
            JobStatus::Blocked => {
                let cancelled = self
                    .store
                    .cas_status(id, JobStatus::Blocked, JobStatus::Cancelled, |j| {
                        j.last_error = Some((ErrorKind::Cancelled, "cancelled by caller".into()));
                        j.finished_at = Some(chrono::Utc::now());
                    })
                    .await;
                if cancelled.is_none() {
                    return Ok(());
                }
                self.cascade.notify_terminal(id, false);
            }
            _ => unreachable!("terminal statuses already handled above"),
        }

        self.events.publish(SchedulerEvent::Cancelled { id });
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.events.subscribe()
    }

    pub async fn metrics(&self) -> MetricsSnapshot {
        let depths = self.queue.depths().await;
        let snapshot = self.ledger.snapshot();
        let running_count = self.store.list_by_status(JobStatus::Running).await.len();
        let dlq_size = self.store.list_by_status(JobStatus::DeadLettered).await.len();
        build_snapshot(depths, snapshot.cpu_free, snapshot.mem_free, running_count, dlq_size, &self.events)
    }

    pub async fn dlq_list(&self) -> Vec<Job> {
        self.store.list_by_status(JobStatus::DeadLettered).await
    }

    pub async fn dlq_retry(&self, id: Uuid) -> Result<(), DlqRetryError> {
        let Some(job) = self.store.get(id).await else {
            return Err(DlqRetryError::NotFound);
        };
        if job.status != JobStatus::DeadLettered {
            return Err(DlqRetryError::NotFound);
        }

        let initial_status = self.resolve_initial_status(&job.depends_on).await;
        let updated = self
            .store
            .cas_status(id, JobStatus::DeadLettered, initial_status, |j| {
                j.attempt = 0;
                j.last_error = None;
                j.finished_at = None;
                j.started_at = None;
            })
            .await;

        if let Some(job) = updated {
            self.store.remove_dlq(id);
            if initial_status == JobStatus::Ready {
                self.queue.push(job.priority, job.id).await;
                self.events.publish(SchedulerEvent::Ready { id });
            } else {
                self.events.publish(SchedulerEvent::Blocked {
                    id,
                    pending_parents: self.graph.lock().await.parents_of(id).len(),
                });
            }
        }
        Ok(())
    }
}
