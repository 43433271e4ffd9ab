// src/executor.rs
//
// Executor Pool: bounds concurrency with a semaphore, wraps every
// handler invocation in a timeout, and unconditionally releases the
// job's resources and permit no matter how the attempt ends — success,
// handler error, panic, or timeout.

use std::sync::Arc;
use std::time::Duration;

use log::{error, warn};
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::cascade::CascadeHandle;
use crate::config::RetryConfig;
use crate::events::{EventBus, SchedulerEvent};
use crate::handler::{CancellationToken, HandlerError, HandlerRegistry};
use crate::job::{ErrorKind, Job, JobStatus};
use crate::resources::ResourceLedger;
use crate::retry::{decide, RetryDecision, RetryJob};
use crate::store::JobStateStore;

pub struct ExecutorPool {
    permits: Arc<Semaphore>,
    handlers: Arc<HandlerRegistry>,
    store: Arc<JobStateStore>,
    ledger: Arc<ResourceLedger>,
    events: Arc<EventBus>,
    cascade: CascadeHandle,
    retry_tx: tokio::sync::mpsc::UnboundedSender<RetryJob>,
    retry_config: RetryConfig,
    cancellations: Arc<tokio::sync::Mutex<std::collections::HashMap<Uuid, CancellationToken>>>,
}

impl ExecutorPool {
    pub fn new(
        max_concurrency: usize,
        handlers: Arc<HandlerRegistry>,
        store: Arc<JobStateStore>,
        ledger: Arc<ResourceLedger>,
        events: Arc<EventBus>,
        cascade: CascadeHandle,
        retry_tx: tokio::sync::mpsc::UnboundedSender<RetryJob>,
        retry_config: RetryConfig,
    ) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrency)),
            handlers,
            store,
            ledger,
            events,
            cascade,
            retry_tx,
            retry_config,
            cancellations: Arc::new(tokio::sync::Mutex::new(std::collections::HashMap::new())),
        }
    }

    pub async fn request_cancel(&self, id: Uuid) -> bool {
        if let Some(token) = self.cancellations.lock().await.get(&id) {
            token.cancel();
            true
        } else {
            false
        }
    }

    /// Spawns the attempt as a background task and returns immediately;
    /// the Admission Controller's loop stays free to pop the next job.
    pub fn dispatch(self: &Arc<Self>, job: Job) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let permit = match this.permits.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => return,
            };
            this.run_attempt(job).await;
            drop(permit);
        });
    }

    /// Runs a single attempt for a job the Admission Controller has
    /// already CASed to RUNNING before handing it off here, so by the
    /// time a saturated pool makes this wait on a permit, the job's
    /// resources are already accounted for under its recorded status.
    async fn run_attempt(&self, job: Job) {
        let id = job.id;
        let started = job;

        let token = CancellationToken::new();
        self.cancellations.lock().await.insert(id, token.clone());
        self.events.publish(SchedulerEvent::Dispatched { id, attempt: started.attempt });

        let Some(handler) = self.handlers.get(&started.job_type) else {
            self.finish_failed(
                &started,
                ErrorKind::HandlerErrorPermanent,
                format!("no handler registered for job type {}", started.job_type),
            )
            .await;
            self.cancellations.lock().await.remove(&id);
            return;
        };

        let timeout = Duration::from_secs(started.timeout_seconds);
        let payload = started.payload.clone();
        let handler = Arc::clone(&handler);
        let exec_token = token.clone();

        // Run the handler in its own task so a panic surfaces as a
        // `JoinError` instead of unwinding into the executor's own task
        // and taking every other in-flight job with it.
        let exec = tokio::spawn(async move { handler.execute(&payload, &exec_token).await });
        let outcome = tokio::time::timeout(timeout, exec).await;
        self.cancellations.lock().await.remove(&id);

        match outcome {
            Ok(Ok(Ok(_output))) => {
                self.finish_completed(&started).await;
            }
            Ok(Ok(Err(HandlerError::Cancelled))) => {
                self.finish_terminal(&started, JobStatus::Cancelled, ErrorKind::Cancelled, "cancelled by handler".into())
                    .await;
            }
            Ok(Ok(Err(HandlerError::Retryable(msg)))) => {
                self.finish_failed(&started, ErrorKind::HandlerErrorRetryable, msg).await;
            }
            Ok(Ok(Err(HandlerError::Permanent(msg)))) => {
                self.finish_failed(&started, ErrorKind::HandlerErrorPermanent, msg).await;
            }
            Ok(Err(join_err)) => {
                error!("job {id} handler task ended abnormally: {join_err}");
                self.finish_failed(&started, ErrorKind::HandlerCrash, join_err.to_string()).await;
            }
            Err(_elapsed) => {
                warn!("job {id} exceeded its {}s timeout", started.timeout_seconds);
                self.finish_timeout(&started).await;
            }
        }
    }

    async fn finish_completed(&self, job: &Job) {
        self.ledger.release(job.cpu_units, job.memory_mb);
        let updated = self
            .store
            .cas_status(job.id, JobStatus::Running, JobStatus::Completed, |j| {
                j.finished_at = Some(chrono::Utc::now());
            })
            .await;
        if updated.is_some() {
            self.events.publish(SchedulerEvent::Completed { id: job.id });
            self.cascade.notify_terminal(job.id, true);
        }
    }

    async fn finish_terminal(&self, job: &Job, status: JobStatus, kind: ErrorKind, reason: String) {
        self.ledger.release(job.cpu_units, job.memory_mb);
        let updated = self
            .store
            .cas_status(job.id, JobStatus::Running, status, |j| {
                j.last_error = Some((kind, reason));
                j.finished_at = Some(chrono::Utc::now());
            })
            .await;
        if updated.is_some() {
            self.events.publish(SchedulerEvent::Failed { id: job.id, kind, attempt: job.attempt });
            self.cascade.notify_terminal(job.id, false);
        }
    }

    /// Routes a failed attempt through the retry decision: either a
    /// delayed re-enqueue or a hand-off to the dead-letter queue.
    async fn finish_failed(&self, job: &Job, kind: ErrorKind, reason: String) {
        self.ledger.release(job.cpu_units, job.memory_mb);

        let Some(decision) = self.route_retry_or_dlq(job, JobStatus::Running, kind, reason).await else {
            return;
        };
        if let RetryDecision::Retry { .. } = decision {
            self.events.publish(SchedulerEvent::Failed { id: job.id, kind, attempt: job.attempt });
        }
    }

    /// A handler that overran its timeout gets its own terminal-ish
    /// TIMEOUT status and event, distinct from ordinary failure, before
    /// the same retry/dead-letter routing takes over from there.
    async fn finish_timeout(&self, job: &Job) {
        self.ledger.release(job.cpu_units, job.memory_mb);
        let updated = self
            .store
            .cas_status(job.id, JobStatus::Running, JobStatus::Timeout, |j| {
                j.last_error = Some((ErrorKind::Timeout, "handler exceeded timeout".into()));
            })
            .await;
        let Some(job) = updated else {
            return;
        };
        self.events.publish(SchedulerEvent::TimedOut { id: job.id });
        self.route_retry_or_dlq(&job, JobStatus::Timeout, ErrorKind::Timeout, "handler exceeded timeout".into())
            .await;
    }

    /// Shared retry/dead-letter decision, entered either straight from a
    /// RUNNING failure or from a TIMEOUT job that already recorded its
    /// own terminal-ish status and event. `from_status` is the status
    /// the routing CAS expects to still find the job in. Returns the
    /// decision that was actually applied, or `None` if the CAS lost a
    /// race and nothing changed.
    async fn route_retry_or_dlq(
        &self,
        job: &Job,
        from_status: JobStatus,
        kind: ErrorKind,
        reason: String,
    ) -> Option<RetryDecision> {
        let decision = decide(
            job.attempt,
            job.max_attempts,
            job.backoff_multiplier,
            kind.is_retryable(),
            &self.retry_config,
        );

        match decision {
            RetryDecision::Retry { delay } => {
                // Per the retry contract, a retry-pending job sits in
                // PENDING until its delay elapses, then transitions to
                // READY and is re-enqueued — the same PENDING state a
                // freshly submitted job starts in, not BLOCKED (which
                // means "waiting on an unfinished parent").
                let updated = self
                    .store
                    .cas_status(job.id, from_status, JobStatus::Pending, |j| {
                        j.last_error = Some((kind, reason));
                    })
                    .await;
                updated.as_ref()?;
                self.events.publish(SchedulerEvent::RetryScheduled {
                    id: job.id,
                    attempt: job.attempt,
                    delay_ms: delay.as_millis() as u64,
                });
                if self.retry_tx.send(RetryJob { id: job.id, delay }).is_err() {
                    error!("retry manager channel closed, job {} stuck in Pending", job.id);
                }
            }
            RetryDecision::DeadLetter => {
                let dlq_reason = reason.clone();
                let updated = self
                    .store
                    .cas_status(job.id, from_status, JobStatus::DeadLettered, |j| {
                        j.last_error = Some((kind, reason));
                        j.finished_at = Some(chrono::Utc::now());
                    })
                    .await;
                updated.as_ref()?;
                self.store.record_dlq(job.id, &dlq_reason);
                self.events.publish(SchedulerEvent::DeadLettered { id: job.id });
                self.cascade.notify_terminal(job.id, false);
            }
        }

        Some(decision)
    }
}
