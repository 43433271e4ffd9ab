// src/admission.rs
//
// Admission Controller: the loop that turns a ready, queued job into a
// running one. Pops the highest-priority job, checks its resource
// requirement against the Resource Ledger, and either hands it to the
// Executor Pool or requeues it behind its same-priority peers so one
// resource-hungry job can't starve the lane.

use std::sync::Arc;

use log::debug;

use crate::executor::ExecutorPool;
use crate::job::JobStatus;
use crate::queue::PriorityQueueSet;
use crate::resources::ResourceLedger;
use crate::store::JobStateStore;

pub fn spawn(
    queue: Arc<PriorityQueueSet>,
    store: Arc<JobStateStore>,
    ledger: Arc<ResourceLedger>,
    executor: Arc<ExecutorPool>,
) {
    tokio::spawn(async move {
        loop {
            let (priority, id) = queue.pop_blocking().await;

            let Some(job) = store.get(id).await else {
                // Job was removed entirely (shouldn't normally happen,
                // but a cancelled-and-reaped job could race here).
                continue;
            };

            if job.status != JobStatus::Ready {
                // Cancelled, already dispatched by a retry path, or
                // otherwise stale. Drop it from the lane silently.
                continue;
            }

            if ledger.try_acquire(job.cpu_units, job.memory_mb) {
                let attempt = job.attempt + 1;
                let Some(started) = store
                    .cas_status(id, JobStatus::Ready, JobStatus::Running, |j| {
                        j.attempt = attempt;
                        j.started_at = Some(chrono::Utc::now());
                    })
                    .await
                else {
                    // Lost the race (e.g. concurrent cancel) between the
                    // status check above and this CAS. Give back what we
                    // just debited and move on.
                    ledger.release(job.cpu_units, job.memory_mb);
                    continue;
                };
                // Recorded RUNNING, resources already debited, before
                // handing off to a pool that may itself be saturated and
                // make this job wait on a permit.
                executor.dispatch(started);
            } else {
                debug!(
                    "job {id} ({:?}) could not be admitted, resources unavailable, requeuing",
                    priority
                );
                queue.requeue_tail(priority, id).await;
                // Yield so a single perpetually-unsatisfiable job at the
                // head of an otherwise-idle lane doesn't spin the loop
                // hot; real capacity changes wake it via `Notify` from
                // the next `release`/`push`, but that isn't guaranteed
                // to reorder the lane, so a short cooperative yield
                // keeps this loop from starving other tasks.
                tokio::task::yield_now().await;
            }
        }
    });
}
