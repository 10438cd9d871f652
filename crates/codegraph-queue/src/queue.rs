//! The durable queue itself: enqueue, claim, ack, fail, dead-letter.

use std::collections::HashSet;

use chrono::Utc;
use codegraph_core::PipelineError;
use rand::Rng;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::warn;

use crate::job::{JobMessage, QueueName};

const JOBS_MIGRATIONS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS jobs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        job_id TEXT NOT NULL UNIQUE,
        run_id TEXT NOT NULL,
        queue TEXT NOT NULL,
        payload TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        attempts INTEGER NOT NULL DEFAULT 0,
        max_attempts INTEGER NOT NULL DEFAULT 3,
        not_before INTEGER NOT NULL DEFAULT 0,
        timeout_ms INTEGER NOT NULL DEFAULT 900000,
        claimed_by TEXT,
        claimed_at INTEGER,
        last_heartbeat INTEGER,
        error TEXT,
        created_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_jobs_queue_status ON jobs(queue, status, not_before)",
];

/// Base delay for the exponential retry backoff.
const BACKOFF_BASE_MS: i64 = 500;

/// What happened to a transiently failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailDisposition {
    /// Requeued with backoff; will be delivered again.
    Retried,
    /// Attempts exhausted; parked on the dead-letter queue.
    DeadLettered,
}

/// A job claimed by a worker. Holds the decoded message and the bookkeeping
/// needed to ack or fail it.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub row_id: i64,
    pub job_id: String,
    pub run_id: String,
    pub queue: String,
    pub message: JobMessage,
    pub attempts: u32,
    pub max_attempts: u32,
}

/// Handle to the named queues. Cheap to clone.
#[derive(Clone)]
pub struct JobQueue {
    pool: SqlitePool,
    prefix: String,
    allowed: HashSet<String>,
    default_timeout_ms: i64,
    default_max_attempts: u32,
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn store_err(e: sqlx::Error) -> PipelineError {
    PipelineError::Store(e.to_string())
}

impl JobQueue {
    /// Set up the queue tables on the shared pool. The allow-list is the
    /// fixed queue vocabulary under the configured prefix.
    pub async fn new(
        pool: SqlitePool,
        prefix: &str,
        default_timeout_ms: i64,
        default_max_attempts: u32,
    ) -> Result<Self, PipelineError> {
        for statement in JOBS_MIGRATIONS {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .map_err(store_err)?;
        }
        let allowed = QueueName::all()
            .iter()
            .map(|q| format!("{}{}", prefix, q.as_str()))
            .collect();
        Ok(Self {
            pool,
            prefix: prefix.to_string(),
            allowed,
            default_timeout_ms,
            default_max_attempts,
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Full (prefixed) name of a queue.
    pub fn name_of(&self, queue: QueueName) -> String {
        format!("{}{}", self.prefix, queue.as_str())
    }

    /// Names the orchestrator persists as the `allowed-queues` set.
    pub fn allowed_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.allowed.iter().cloned().collect();
        names.sort();
        names
    }

    fn check_allowed(&self, name: &str) -> Result<(), PipelineError> {
        if self.allowed.contains(name) {
            Ok(())
        } else {
            Err(PipelineError::Permanent(format!(
                "queue '{}' is not on the allow-list",
                name
            )))
        }
    }

    /// Append a job. `job_id` is the durable identity used by the manifest
    /// and the evidence dedup key.
    pub async fn enqueue(
        &self,
        queue: QueueName,
        job_id: &str,
        message: &JobMessage,
    ) -> Result<(), PipelineError> {
        let mut conn = self.pool.acquire().await.map_err(store_err)?;
        self.enqueue_on(&mut conn, queue, job_id, message).await
    }

    /// Append a job inside an open transaction; used by the outbox
    /// publisher to couple queue appends to the PUBLISHED flip.
    pub async fn enqueue_tx(
        &self,
        conn: &mut SqliteConnection,
        queue: QueueName,
        job_id: &str,
        message: &JobMessage,
    ) -> Result<(), PipelineError> {
        self.enqueue_on(conn, queue, job_id, message).await
    }

    async fn enqueue_on(
        &self,
        conn: &mut SqliteConnection,
        queue: QueueName,
        job_id: &str,
        message: &JobMessage,
    ) -> Result<(), PipelineError> {
        let name = self.name_of(queue);
        self.check_allowed(&name)?;
        let payload = serde_json::to_string(message)?;
        sqlx::query(
            "INSERT INTO jobs (job_id, run_id, queue, payload, status, max_attempts,
                               timeout_ms, created_at)
             VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?6, ?7)
             ON CONFLICT(job_id) DO NOTHING",
        )
        .bind(job_id)
        .bind(message.run_id())
        .bind(&name)
        .bind(payload)
        .bind(self.default_max_attempts as i64)
        .bind(self.default_timeout_ms)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *conn)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    /// Claim the oldest deliverable job on a queue, if any. Claiming
    /// increments the attempt counter; the CAS on `status = 'pending'`
    /// guarantees a job is delivered to a single consumer at a time.
    pub async fn claim(
        &self,
        queue: QueueName,
        worker_id: &str,
    ) -> Result<Option<ClaimedJob>, PipelineError> {
        let name = self.name_of(queue);
        let now = now_ms();
        let row: Option<(i64, String, String, String, String, i64, i64)> = sqlx::query_as(
            "UPDATE jobs
             SET status = 'claimed', claimed_by = ?3, claimed_at = ?2,
                 last_heartbeat = ?2, attempts = attempts + 1
             WHERE id = (
                 SELECT id FROM jobs
                 WHERE queue = ?1 AND status = 'pending' AND not_before <= ?2
                 ORDER BY id LIMIT 1
             ) AND status = 'pending'
             RETURNING id, job_id, run_id, queue, payload, attempts, max_attempts",
        )
        .bind(&name)
        .bind(now)
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        let Some((row_id, job_id, run_id, queue, payload, attempts, max_attempts)) = row else {
            return Ok(None);
        };

        match serde_json::from_str::<JobMessage>(&payload) {
            Ok(message) => Ok(Some(ClaimedJob {
                row_id,
                job_id,
                run_id,
                queue,
                message,
                attempts: attempts as u32,
                max_attempts: max_attempts as u32,
            })),
            Err(e) => {
                // An undecodable payload can never succeed; park it.
                warn!(job_id = %job_id, error = %e, "invalid job payload, dead-lettering");
                self.dead_letter(row_id, &format!("invalid payload: {}", e))
                    .await?;
                Ok(None)
            }
        }
    }

    /// Acknowledge successful processing.
    pub async fn complete(&self, row_id: i64) -> Result<(), PipelineError> {
        sqlx::query("UPDATE jobs SET status = 'completed' WHERE id = ?1")
            .bind(row_id)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    /// Refresh the heartbeat of a claimed job.
    pub async fn heartbeat(&self, row_id: i64) -> Result<(), PipelineError> {
        sqlx::query("UPDATE jobs SET last_heartbeat = ?2 WHERE id = ?1")
            .bind(row_id)
            .bind(now_ms())
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    /// Transient failure: requeue with exponential backoff and jitter, or
    /// dead-letter once attempts are exhausted.
    pub async fn fail_transient(
        &self,
        job: &ClaimedJob,
        error: &str,
    ) -> Result<FailDisposition, PipelineError> {
        if job.attempts >= job.max_attempts {
            self.dead_letter(job.row_id, error).await?;
            return Ok(FailDisposition::DeadLettered);
        }
        let backoff = backoff_ms(job.attempts);
        sqlx::query(
            "UPDATE jobs
             SET status = 'pending', claimed_by = NULL, not_before = ?2, error = ?3
             WHERE id = ?1",
        )
        .bind(job.row_id)
        .bind(now_ms() + backoff)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(FailDisposition::Retried)
    }

    /// Permanent failure: straight to the dead-letter queue, no retry.
    pub async fn fail_permanent(&self, job: &ClaimedJob, reason: &str) -> Result<(), PipelineError> {
        self.dead_letter(job.row_id, reason).await
    }

    async fn dead_letter(&self, row_id: i64, reason: &str) -> Result<(), PipelineError> {
        let dlq = self.name_of(QueueName::FailedJobs);
        sqlx::query(
            "UPDATE jobs SET status = 'dead', queue = ?2, error = ?3, claimed_by = NULL
             WHERE id = ?1",
        )
        .bind(row_id)
        .bind(&dlq)
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    /// Deliverable jobs waiting on one queue.
    pub async fn depth(&self, queue: QueueName) -> Result<i64, PipelineError> {
        let (n,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM jobs WHERE queue = ?1 AND status = 'pending'")
                .bind(self.name_of(queue))
                .fetch_one(&self.pool)
                .await
                .map_err(store_err)?;
        Ok(n)
    }

    /// Pending + claimed jobs across all work queues (the DLQ excluded).
    pub async fn inflight_total(&self) -> Result<i64, PipelineError> {
        let (n,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM jobs
             WHERE status IN ('pending', 'claimed') AND queue != ?1",
        )
        .bind(self.name_of(QueueName::FailedJobs))
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(n)
    }

    pub async fn dead_letter_count(&self) -> Result<i64, PipelineError> {
        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM jobs WHERE status = 'dead'")
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(n)
    }

    /// Status of a job by durable id, for manifest completion checks.
    pub async fn job_status(&self, job_id: &str) -> Result<Option<String>, PipelineError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT status FROM jobs WHERE job_id = ?1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(row.map(|(s,)| s))
    }
}

fn backoff_ms(attempts: u32) -> i64 {
    let exp = BACKOFF_BASE_MS.saturating_mul(1 << attempts.min(10));
    let jitter = rand::thread_rng().gen_range(0..=(exp / 4).max(1));
    exp + jitter
}
