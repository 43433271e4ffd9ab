// tests/scenarios.rs
//
// End-to-end scenarios driven through the public `Scheduler` facade,
// alongside unit tests embedded in each component module.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use taskforge::{
    CancellationToken, HandlerError, HandlerRegistry, Job, JobHandler, JobSpec, JobStatus,
    ListFilter, Priority, Scheduler, SchedulerConfig,
};
use tokio::time::timeout;
use uuid::Uuid;

struct NoopHandler;

#[async_trait]
impl JobHandler for NoopHandler {
    async fn execute(&self, payload: &[u8], _token: &CancellationToken) -> Result<Vec<u8>, HandlerError> {
        Ok(payload.to_vec())
    }
}

struct SleepHandler;

#[async_trait]
impl JobHandler for SleepHandler {
    async fn execute(&self, payload: &[u8], token: &CancellationToken) -> Result<Vec<u8>, HandlerError> {
        let millis: u64 = std::str::from_utf8(payload).unwrap_or("0").trim().parse().unwrap_or(0);
        let mut remaining = millis;
        while remaining > 0 {
            if token.is_cancelled() {
                return Err(HandlerError::Cancelled);
            }
            let step = remaining.min(20);
            tokio::time::sleep(Duration::from_millis(step)).await;
            remaining -= step;
        }
        Ok(Vec::new())
    }
}

struct AlwaysFailHandler;

#[async_trait]
impl JobHandler for AlwaysFailHandler {
    async fn execute(&self, _payload: &[u8], _token: &CancellationToken) -> Result<Vec<u8>, HandlerError> {
        Err(HandlerError::Retryable("always fails".into()))
    }
}

struct PanicHandler;

#[async_trait]
impl JobHandler for PanicHandler {
    async fn execute(&self, _payload: &[u8], _token: &CancellationToken) -> Result<Vec<u8>, HandlerError> {
        panic!("handler blew up");
    }
}

fn test_config(cpu: u32, mem: u32) -> SchedulerConfig {
    let mut config = SchedulerConfig::default();
    config.capacity.cpu_units = cpu;
    config.capacity.memory_mb = mem;
    config.storage.db_path = std::env::temp_dir().join(format!("taskforge-scenario-{}.db", Uuid::new_v4()));
    config
}

async fn scheduler_with(cpu: u32, mem: u32) -> Scheduler {
    let mut registry = HandlerRegistry::new();
    registry.register("noop", std::sync::Arc::new(NoopHandler));
    registry.register("sleep", std::sync::Arc::new(SleepHandler));
    registry.register("always-fail", std::sync::Arc::new(AlwaysFailHandler));
    registry.register("panic", std::sync::Arc::new(PanicHandler));
    Scheduler::new(test_config(cpu, mem), registry).await.unwrap()
}

async fn wait_for_status(scheduler: &Scheduler, id: Uuid, status: JobStatus) -> Job {
    timeout(Duration::from_secs(10), async {
        loop {
            if let Some(job) = scheduler.get(id).await {
                if job.status == status {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("job {id} never reached {status:?}"))
}

/// S1 — priority ordering. A single-CPU hog occupies the only slot so
/// three same-cost jobs of differing priority queue up behind it; once
/// it releases, dispatch order must be strictly CRITICAL, NORMAL, LOW.
#[tokio::test]
async fn s1_priority_ordering() {
    let scheduler = scheduler_with(1, 1024).await;
    let mut events = scheduler.subscribe();

    let hog_spec = {
        let mut s = JobSpec::new("sleep", 1, 128);
        s.payload = b"150".to_vec();
        s
    };
    let hog = scheduler.submit(hog_spec).await.unwrap();

    // Give the hog a moment to actually occupy the ledger before the
    // contenders arrive, so all three queue up rather than racing it.
    tokio::time::sleep(Duration::from_millis(20)).await;

    let mut normal_spec = JobSpec::new("noop", 1, 128);
    normal_spec.priority = Priority::Normal;
    let j_normal = scheduler.submit(normal_spec).await.unwrap();

    let mut critical_spec = JobSpec::new("noop", 1, 128);
    critical_spec.priority = Priority::Critical;
    let j_critical = scheduler.submit(critical_spec).await.unwrap();

    let mut low_spec = JobSpec::new("noop", 1, 128);
    low_spec.priority = Priority::Low;
    let j_low = scheduler.submit(low_spec).await.unwrap();

    let mut dispatch_order = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while dispatch_order.len() < 3 && tokio::time::Instant::now() < deadline {
        if let Ok(Ok(ev)) = timeout(Duration::from_millis(500), events.recv()).await {
            if let taskforge::SchedulerEvent::Dispatched { id, .. } = ev {
                if id == j_normal || id == j_critical || id == j_low {
                    dispatch_order.push(id);
                }
            }
        }
    }
    let _ = hog;

    assert_eq!(dispatch_order, vec![j_critical, j_normal, j_low]);
}

/// S2 — linear dependency. A -> B -> C must execute strictly in order.
#[tokio::test]
async fn s2_linear_dependency() {
    let scheduler = scheduler_with(8, 4096).await;

    let mut a_spec = JobSpec::new("noop", 1, 128);
    a_spec.priority = Priority::High;
    let a = scheduler.submit(a_spec).await.unwrap();

    let mut b_spec = JobSpec::new("noop", 1, 128);
    b_spec.priority = Priority::High;
    b_spec.depends_on = [a].into_iter().collect();
    let b = scheduler.submit(b_spec).await.unwrap();

    let mut c_spec = JobSpec::new("noop", 1, 128);
    c_spec.priority = Priority::High;
    c_spec.depends_on = [b].into_iter().collect();
    let c = scheduler.submit(c_spec).await.unwrap();

    assert_eq!(scheduler.get(b).await.unwrap().status, JobStatus::Blocked);
    assert_eq!(scheduler.get(c).await.unwrap().status, JobStatus::Blocked);

    let a_job = wait_for_status(&scheduler, a, JobStatus::Completed).await;
    let b_job = wait_for_status(&scheduler, b, JobStatus::Completed).await;
    let c_job = wait_for_status(&scheduler, c, JobStatus::Completed).await;

    assert!(a_job.finished_at.unwrap() <= b_job.started_at.unwrap());
    assert!(b_job.finished_at.unwrap() <= c_job.started_at.unwrap());
}

/// S4 — resource contention. 5 heavy (4 CPU/2048 MB) + 5 light (1
/// CPU/256 MB) jobs against an 8 CPU/4096 MB ledger must all complete
/// and return the ledger to full capacity.
#[tokio::test]
async fn s4_resource_contention() {
    let scheduler = scheduler_with(8, 4096).await;
    let mut ids = Vec::new();

    for _ in 0..5 {
        let mut spec = JobSpec::new("sleep", 4, 2048);
        spec.payload = b"30".to_vec();
        ids.push(scheduler.submit(spec).await.unwrap());
    }
    for _ in 0..5 {
        let mut spec = JobSpec::new("sleep", 1, 256);
        spec.payload = b"30".to_vec();
        ids.push(scheduler.submit(spec).await.unwrap());
    }

    for id in ids {
        wait_for_status(&scheduler, id, JobStatus::Completed).await;
    }

    let metrics = scheduler.metrics().await;
    assert_eq!(metrics.cpu_free, 8);
    assert_eq!(metrics.mem_free, 4096);
}

/// S5 — retry with backoff. A handler that always fails retryably must
/// be retried once (max_attempts=2) then dead-lettered, with `attempt`
/// reflecting both dispatches.
#[tokio::test]
async fn s5_retry_with_backoff() {
    let scheduler = scheduler_with(8, 4096).await;
    let mut spec = JobSpec::new("always-fail", 1, 128);
    spec.max_attempts = 2;
    let id = scheduler.submit(spec).await.unwrap();

    let job = timeout(Duration::from_secs(10), async {
        loop {
            let job = scheduler.get(id).await.unwrap();
            if job.status == JobStatus::DeadLettered {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(job.attempt, 2);
    let dlq = scheduler.dlq_list().await;
    assert!(dlq.iter().any(|j| j.id == id));
}

/// S6 — dependency failure cascade. A dead-lettered parent must fail
/// its child with DEPENDENCY_FAILED, with no retry attempted on the
/// child.
#[tokio::test]
async fn s6_dependency_failure_cascade() {
    let scheduler = scheduler_with(8, 4096).await;

    let mut parent_spec = JobSpec::new("always-fail", 1, 128);
    parent_spec.max_attempts = 1;
    let parent = scheduler.submit(parent_spec).await.unwrap();

    let mut child_spec = JobSpec::new("noop", 1, 128);
    child_spec.depends_on = [parent].into_iter().collect();
    let child = scheduler.submit(child_spec).await.unwrap();

    wait_for_status(&scheduler, parent, JobStatus::DeadLettered).await;
    let child_job = wait_for_status(&scheduler, child, JobStatus::Failed).await;

    assert_eq!(child_job.attempt, 0);
    let (kind, _) = child_job.last_error.unwrap();
    assert_eq!(kind, taskforge::ErrorKind::DependencyFailed);
}

/// S7 — submitting a job that declares a dependency on a nonexistent
/// job id is rejected outright, never enqueued.
#[tokio::test]
async fn s7_unknown_parent_rejected() {
    let scheduler = scheduler_with(8, 4096).await;
    let mut spec = JobSpec::new("noop", 1, 128);
    spec.depends_on = HashSet::from([Uuid::new_v4()]);
    let err = scheduler.submit(spec).await.unwrap_err();
    assert!(matches!(err, taskforge::SubmitError::UnknownParent));
}

/// S8 — a handler that panics must not crash the executor or leave the
/// job stuck in RUNNING; the panic surfaces as HANDLER_CRASH, which is
/// retryable, so with max_attempts=1 it dead-letters cleanly.
#[tokio::test]
async fn s8_handler_panic_dead_letters_instead_of_hanging() {
    let scheduler = scheduler_with(8, 4096).await;
    let mut spec = JobSpec::new("panic", 1, 128);
    spec.max_attempts = 1;
    let id = scheduler.submit(spec).await.unwrap();

    let job = wait_for_status(&scheduler, id, JobStatus::DeadLettered).await;
    let (kind, _) = job.last_error.unwrap();
    assert_eq!(kind, taskforge::ErrorKind::HandlerCrash);

    // The permit and ledger slot must have been reclaimed, not leaked.
    let metrics = scheduler.metrics().await;
    assert_eq!(metrics.cpu_free, 8);
    assert_eq!(metrics.mem_free, 4096);
}

/// S9 — a handler that overruns its timeout gets its own TIMEOUT status
/// and TimedOut event before the usual retry/DLQ routing takes over;
/// with max_attempts=1 it dead-letters with ErrorKind::Timeout.
#[tokio::test]
async fn s9_handler_timeout_dead_letters() {
    let scheduler = scheduler_with(8, 4096).await;
    let mut events = scheduler.subscribe();

    let mut spec = JobSpec::new("sleep", 1, 128);
    spec.payload = b"3000".to_vec();
    spec.timeout_seconds = 1;
    spec.max_attempts = 1;
    let id = scheduler.submit(spec).await.unwrap();

    let job = wait_for_status(&scheduler, id, JobStatus::DeadLettered).await;
    let (kind, _) = job.last_error.unwrap();
    assert_eq!(kind, taskforge::ErrorKind::Timeout);

    let mut saw_timed_out = false;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !saw_timed_out && tokio::time::Instant::now() < deadline {
        if let Ok(Ok(ev)) = timeout(Duration::from_millis(500), events.recv()).await {
            if let taskforge::SchedulerEvent::TimedOut { id: ev_id } = ev {
                if ev_id == id {
                    saw_timed_out = true;
                }
            }
        }
    }
    assert!(saw_timed_out, "expected a TimedOut event for {id}");
}

#[tokio::test]
async fn unsatisfiable_resources_rejected_at_submission() {
    let scheduler = scheduler_with(4, 1024).await;
    let spec = JobSpec::new("noop", 8, 128);
    let err = scheduler.submit(spec).await.unwrap_err();
    assert!(matches!(err, taskforge::SubmitError::UnsatisfiableResources));
}

#[tokio::test]
async fn list_filters_by_status() {
    let scheduler = scheduler_with(8, 4096).await;
    let id = scheduler.submit(JobSpec::new("noop", 1, 128)).await.unwrap();
    wait_for_status(&scheduler, id, JobStatus::Completed).await;

    let completed = scheduler
        .list(ListFilter {
            status: Some(JobStatus::Completed),
            ..Default::default()
        })
        .await;
    assert!(completed.items.iter().any(|j| j.id == id));
}

#[tokio::test]
async fn list_pages_with_cursor() {
    let scheduler = scheduler_with(8, 4096).await;
    let mut ids = Vec::new();
    for _ in 0..5 {
        let id = scheduler.submit(JobSpec::new("noop", 1, 128)).await.unwrap();
        wait_for_status(&scheduler, id, JobStatus::Completed).await;
        ids.push(id);
    }

    let first = scheduler
        .list(ListFilter {
            status: Some(JobStatus::Completed),
            limit: Some(2),
            ..Default::default()
        })
        .await;
    assert_eq!(first.items.len(), 2);
    assert!(first.next_cursor.is_some());

    let second = scheduler
        .list(ListFilter {
            status: Some(JobStatus::Completed),
            limit: Some(2),
            cursor: first.next_cursor,
            ..Default::default()
        })
        .await;
    assert_eq!(second.items.len(), 2);
    assert!(first.items.iter().all(|a| !second.items.iter().any(|b| b.id == a.id)));

    let mut seen: HashSet<Uuid> = HashSet::new();
    seen.extend(first.items.iter().map(|j| j.id));
    seen.extend(second.items.iter().map(|j| j.id));
    let mut cursor = second.next_cursor;
    while let Some(c) = cursor {
        let page = scheduler
            .list(ListFilter {
                status: Some(JobStatus::Completed),
                limit: Some(2),
                cursor: Some(c),
                ..Default::default()
            })
            .await;
        seen.extend(page.items.iter().map(|j| j.id));
        cursor = page.next_cursor;
    }
    for id in ids {
        assert!(seen.contains(&id));
    }
}
