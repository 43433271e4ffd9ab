// src/job.rs
//
// =============================================================================
// TASKFORGE: CORE SCHEMA (v 0.1)
// =============================================================================
//
// The data contracts shared by every component: Job, JobSpec (the
// submission blueprint), JobStatus (the lifecycle), Priority, and the
// error kinds surfaced on submission/execution/cascade.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

// ============================================================================
// 1. PRIORITY
// ============================================================================

/// One of four fixed scheduling tiers. No weights, no shares — CRITICAL
/// always drains before HIGH before NORMAL before LOW.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Priority {
    Critical,
    High,
    Normal,
    Low,
}

impl Priority {
    /// Tiers in drain order, highest first.
    pub const TIERS: [Priority; 4] = [
        Priority::Critical,
        Priority::High,
        Priority::Normal,
        Priority::Low,
    ];

    pub fn index(self) -> usize {
        match self {
            Priority::Critical => 0,
            Priority::High => 1,
            Priority::Normal => 2,
            Priority::Low => 3,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

// ============================================================================
// 2. STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Blocked,
    Ready,
    Running,
    Completed,
    Failed,
    Timeout,
    Cancelled,
    DeadLettered,
}

impl JobStatus {
    /// Terminal statuses never transition again under normal control flow.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed
                | JobStatus::Failed
                | JobStatus::Timeout
                | JobStatus::Cancelled
                | JobStatus::DeadLettered
        )
    }

    pub fn is_terminal_success(self) -> bool {
        matches!(self, JobStatus::Completed)
    }
}

// ============================================================================
// 3. ERROR KINDS (surfaced in `last_error` and events)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    CycleDetected,
    UnknownParent,
    UnsatisfiableResources,
    InvalidSpec,
    HandlerErrorRetryable,
    HandlerErrorPermanent,
    HandlerCrash,
    Timeout,
    DependencyFailed,
    Cancelled,
}

impl ErrorKind {
    /// Whether a terminal outcome carrying this kind is a retry candidate.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::HandlerErrorRetryable | ErrorKind::HandlerCrash | ErrorKind::Timeout
        )
    }
}

// ============================================================================
// 4. SUBMISSION BLUEPRINT
// ============================================================================

/// What a caller hands to `Scheduler::submit`. The scheduler assigns `id`
/// and timestamps; everything else is carried verbatim into the `Job`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub job_type: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub payload: Vec<u8>,
    pub cpu_units: u32,
    pub memory_mb: u32,
    #[serde(default)]
    pub depends_on: HashSet<Uuid>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_timeout_seconds() -> u64 {
    3600
}

impl JobSpec {
    pub fn new(job_type: impl Into<String>, cpu_units: u32, memory_mb: u32) -> Self {
        Self {
            job_type: job_type.into(),
            priority: Priority::Normal,
            payload: Vec::new(),
            cpu_units,
            memory_mb,
            depends_on: HashSet::new(),
            max_attempts: default_max_attempts(),
            backoff_multiplier: default_backoff_multiplier(),
            timeout_seconds: default_timeout_seconds(),
        }
    }

    /// Validates field-level invariants before this blueprint is even
    /// handed to the Dependency Graph. Cross-job checks
    /// (resource capacity, cycles, unknown parents) happen downstream.
    pub fn validate(&self) -> Result<(), ErrorKind> {
        if self.job_type.is_empty()
            || self.cpu_units == 0
            || self.memory_mb == 0
            || self.max_attempts == 0
            || self.backoff_multiplier < 1.0
            || self.timeout_seconds == 0
        {
            return Err(ErrorKind::InvalidSpec);
        }
        Ok(())
    }
}

// ============================================================================
// 5. THE JOB RECORD (The Lifecycle)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub job_type: String,
    pub priority: Priority,
    pub payload: Vec<u8>,
    pub cpu_units: u32,
    pub memory_mb: u32,
    pub depends_on: HashSet<Uuid>,
    pub max_attempts: u32,
    pub backoff_multiplier: f64,
    pub timeout_seconds: u64,

    pub status: JobStatus,
    pub attempt: u32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,

    pub last_error: Option<(ErrorKind, String)>,

    /// Set when a RUNNING job's cancel has been requested; the executor
    /// checks this at the handler's cooperative points.
    #[serde(skip)]
    pub cancel_requested: bool,
}

impl Job {
    pub fn from_spec(id: Uuid, spec: JobSpec) -> Self {
        let now = Utc::now();
        Self {
            id,
            job_type: spec.job_type,
            priority: spec.priority,
            payload: spec.payload,
            cpu_units: spec.cpu_units,
            memory_mb: spec.memory_mb,
            depends_on: spec.depends_on,
            max_attempts: spec.max_attempts,
            backoff_multiplier: spec.backoff_multiplier,
            timeout_seconds: spec.timeout_seconds,
            status: JobStatus::Pending,
            attempt: 0,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
            last_error: None,
            cancel_requested: false,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
