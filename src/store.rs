// src/store.rs
//
// Job State Store: the in-memory `RwLock<HashMap>` is the linearizable
// authority; `rusqlite` mirrors every mutation for crash recovery. Reads
// never touch the database. `cas_status` is the one primitive every
// other component relies on to avoid a late-timeout overwriting an
// already-recorded success.

use std::collections::HashMap;
use std::path::Path;

use log::warn;
use rusqlite::{params, Connection};
use serde_json;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::job::{Job, JobStatus, Priority};

pub struct JobStateStore {
    jobs: RwLock<HashMap<Uuid, Job>>,
    db: std::sync::Mutex<Connection>,
}

impl JobStateStore {
    pub fn open(db_path: impl AsRef<Path>) -> rusqlite::Result<Self> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                priority TEXT NOT NULL,
                attempt INTEGER NOT NULL,
                updated_at TEXT NOT NULL,
                body TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
            CREATE TABLE IF NOT EXISTS dlq (
                id TEXT PRIMARY KEY,
                reason TEXT NOT NULL,
                fingerprint TEXT NOT NULL,
                recorded_at TEXT NOT NULL
            );",
        )?;
        Ok(Self {
            jobs: RwLock::new(HashMap::new()),
            db: std::sync::Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> rusqlite::Result<Self> {
        Self::open(":memory:")
    }

    /// Inserts a brand-new job. Callers must have already validated the
    /// spec and resolved dependencies; this is a pure bookkeeping step.
    pub async fn insert(&self, job: Job) {
        self.persist(&job);
        self.jobs.write().await.insert(job.id, job);
    }

    pub async fn get(&self, id: Uuid) -> Option<Job> {
        self.jobs.read().await.get(&id).cloned()
    }

    pub async fn list_by_status(&self, status: JobStatus) -> Vec<Job> {
        self.jobs
            .read()
            .await
            .values()
            .filter(|j| j.status == status)
            .cloned()
            .collect()
    }

    pub async fn list_all(&self) -> Vec<Job> {
        self.jobs.read().await.values().cloned().collect()
    }

    /// Compare-and-set: transitions `id`'s status from `expected` to
    /// `next` only if its current status still matches `expected`.
    /// Returns the updated job on success. This is the sole mutation
    /// path status transitions take — it is what makes a stale timeout
    /// firing after a completion is already recorded a no-op instead of
    /// a regression.
    pub async fn cas_status(
        &self,
        id: Uuid,
        expected: JobStatus,
        next: JobStatus,
        mutate: impl FnOnce(&mut Job),
    ) -> Option<Job> {
        let mut guard = self.jobs.write().await;
        let job = guard.get_mut(&id)?;
        if job.status != expected {
            return None;
        }
        job.status = next;
        mutate(job);
        job.touch();
        let snapshot = job.clone();
        drop(guard);
        self.persist(&snapshot);
        Some(snapshot)
    }

    /// Unconditional update used for fields that don't gate on status
    /// (e.g. recording a cancel request on a still-running job).
    pub async fn update(&self, id: Uuid, mutate: impl FnOnce(&mut Job)) -> Option<Job> {
        let mut guard = self.jobs.write().await;
        let job = guard.get_mut(&id)?;
        mutate(job);
        job.touch();
        let snapshot = job.clone();
        drop(guard);
        self.persist(&snapshot);
        Some(snapshot)
    }

    fn persist(&self, job: &Job) {
        let body = match serde_json::to_string(job) {
            Ok(b) => b,
            Err(e) => {
                warn!("failed to serialize job {} for persistence: {e}", job.id);
                return;
            }
        };
        let conn = self.db.lock().expect("store db mutex poisoned");
        let res = conn.execute(
            "INSERT INTO jobs (id, status, priority, attempt, updated_at, body)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                priority = excluded.priority,
                attempt = excluded.attempt,
                updated_at = excluded.updated_at,
                body = excluded.body",
            params![
                job.id.to_string(),
                format!("{:?}", job.status),
                format!("{:?}", job.priority),
                job.attempt,
                job.updated_at.to_rfc3339(),
                body,
            ],
        );
        if let Err(e) = res {
            warn!("failed to persist job {}: {e}", job.id);
        }
    }

    /// Reloads every row from the durable mirror into the in-memory
    /// authority. Called once at startup.
    pub async fn restore(&self) -> rusqlite::Result<usize> {
        let rows: Vec<String> = {
            let conn = self.db.lock().expect("store db mutex poisoned");
            let mut stmt = conn.prepare("SELECT body FROM jobs")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            rows.collect::<Result<_, _>>()?
        };
        let mut restored = 0;
        let mut guard = self.jobs.write().await;
        for body in rows {
            match serde_json::from_str::<Job>(&body) {
                Ok(job) => {
                    guard.insert(job.id, job);
                    restored += 1;
                }
                Err(e) => warn!("skipping unreadable job row during restore: {e}"),
            }
        }
        Ok(restored)
    }

    /// Records a dead-letter entry. This is an append-only audit trail
    /// alongside the authoritative `jobs` row (which already carries
    /// `status = DeadLettered`). `fingerprint` is a SHA-256 digest of the
    /// job id and reason, letting an admin tool spot repeat dead-letters
    /// of the same failure without comparing full reason strings.
    pub fn record_dlq(&self, id: Uuid, reason: &str) {
        let mut hasher = Sha256::new();
        hasher.update(id.as_bytes());
        hasher.update(reason.as_bytes());
        let fingerprint = hex::encode(hasher.finalize());

        let conn = self.db.lock().expect("store db mutex poisoned");
        let res = conn.execute(
            "INSERT INTO dlq (id, reason, fingerprint, recorded_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                reason = excluded.reason,
                fingerprint = excluded.fingerprint,
                recorded_at = excluded.recorded_at",
            params![id.to_string(), reason, fingerprint, chrono::Utc::now().to_rfc3339()],
        );
        if let Err(e) = res {
            warn!("failed to record dlq entry for {id}: {e}");
        }
    }

    pub fn remove_dlq(&self, id: Uuid) {
        let conn = self.db.lock().expect("store db mutex poisoned");
        if let Err(e) = conn.execute("DELETE FROM dlq WHERE id = ?1", params![id.to_string()]) {
            warn!("failed to clear dlq entry for {id}: {e}");
        }
    }

    pub async fn count_by_priority(&self, priority: Priority) -> usize {
        self.jobs
            .read()
            .await
            .values()
            .filter(|j| j.priority == priority && !j.status.is_terminal())
            .count()
    }
}
