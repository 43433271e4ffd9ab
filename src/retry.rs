// src/retry.rs
//
// Retry / DLQ Manager: geometric backoff for retryable failures, dead
// lettering once `max_attempts` is exhausted or the failure is
// permanent. Retrying out of the DLQ resets `attempt` to 0 so the job
// gets a full fresh run of its backoff schedule.

use std::sync::Arc;
use std::time::Duration;

use log::debug;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::RetryConfig;
use crate::events::{EventBus, SchedulerEvent};
use crate::job::JobStatus;
use crate::queue::PriorityQueueSet;
use crate::store::JobStateStore;

/// `base_delay * backoff_multiplier^(attempt - 1)`, clamped to
/// `[bounds.min_delay_seconds, bounds.max_delay_seconds]`. `attempt` is
/// 1-indexed (the attempt that just failed).
pub fn backoff_delay(attempt: u32, backoff_multiplier: f64, bounds: &RetryConfig) -> Duration {
    let base = bounds.base_delay_seconds as f64;
    let exponent = (attempt.saturating_sub(1)) as i32;
    let scaled = base * backoff_multiplier.powi(exponent);
    let min = bounds.min_delay_seconds as f64;
    let max = bounds.max_delay_seconds as f64;
    let clamped = scaled.clamp(min, max);
    Duration::from_secs_f64(clamped)
}

/// What happens to a job after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    DeadLetter,
}

/// Decides retry vs. dead-letter for a failed attempt. Permanent errors
/// always dead-letter regardless of attempts remaining.
pub fn decide(
    attempt: u32,
    max_attempts: u32,
    backoff_multiplier: f64,
    retryable: bool,
    bounds: &RetryConfig,
) -> RetryDecision {
    if retryable && attempt < max_attempts {
        RetryDecision::Retry {
            delay: backoff_delay(attempt, backoff_multiplier, bounds),
        }
    } else {
        RetryDecision::DeadLetter
    }
}

/// A failed attempt that earned a retry, waiting out its backoff delay.
pub struct RetryJob {
    pub id: Uuid,
    pub delay: Duration,
}

/// Spawns the consumer task that waits out each job's backoff delay
/// then transitions it PENDING → READY and re-enqueues it. One task
/// services every pending retry concurrently — each delay is its own
/// `tokio::spawn`, so a long wait never blocks a short one.
pub fn spawn(
    store: Arc<JobStateStore>,
    queue: Arc<PriorityQueueSet>,
    events: Arc<EventBus>,
) -> mpsc::UnboundedSender<RetryJob> {
    let (tx, mut rx) = mpsc::unbounded_channel::<RetryJob>();

    tokio::spawn(async move {
        while let Some(retry_job) = rx.recv().await {
            let store = Arc::clone(&store);
            let queue = Arc::clone(&queue);
            let events = Arc::clone(&events);
            tokio::spawn(async move {
                tokio::time::sleep(retry_job.delay).await;
                let updated = store
                    .cas_status(retry_job.id, JobStatus::Pending, JobStatus::Ready, |_| {})
                    .await;
                match updated {
                    Some(job) => {
                        queue.push(job.priority, job.id).await;
                        events.publish(SchedulerEvent::Ready { id: job.id });
                    }
                    None => {
                        // Job was cancelled (or otherwise moved) while
                        // its retry delay elapsed; cancellation is
                        // terminal and wins over a pending retry.
                        debug!(
                            "retry for job {} skipped, no longer PENDING",
                            retry_job.id
                        );
                    }
                }
            });
        }
    });

    tx
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds() -> RetryConfig {
        RetryConfig::default()
    }

    #[test]
    fn backoff_grows_geometrically_and_clamps() {
        let b = bounds();
        assert_eq!(backoff_delay(1, 2.0, &b), Duration::from_secs(1));
        assert_eq!(backoff_delay(2, 2.0, &b), Duration::from_secs(2));
        assert_eq!(backoff_delay(3, 2.0, &b), Duration::from_secs(4));
        // Large attempt counts clamp to max_delay_seconds rather than overflow.
        assert_eq!(backoff_delay(30, 2.0, &b), Duration::from_secs(b.max_delay_seconds));
    }

    #[test]
    fn retryable_failure_under_max_attempts_retries() {
        let decision = decide(1, 3, 2.0, true, &bounds());
        assert_eq!(
            decision,
            RetryDecision::Retry {
                delay: Duration::from_secs(1)
            }
        );
    }

    #[test]
    fn exhausted_attempts_dead_letters() {
        assert_eq!(decide(3, 3, 2.0, true, &bounds()), RetryDecision::DeadLetter);
    }

    #[test]
    fn permanent_failure_dead_letters_immediately() {
        assert_eq!(decide(1, 5, 2.0, false, &bounds()), RetryDecision::DeadLetter);
    }
}
