//! Reaper — background task that reclaims stale (heartbeat-expired) jobs.

use chrono::Utc;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::job::QueueName;
use crate::queue::JobQueue;

/// Spawn the reaper as a background tokio task. It stops when the returned
/// sender's counterpart observes a change (or the sender is dropped).
pub fn spawn_reaper(queue: JobQueue, interval_ms: u64) -> watch::Sender<()> {
    let (stop_tx, mut stop_rx) = watch::channel(());
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_millis(interval_ms.max(100)));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = reap_stale_jobs(&queue).await {
                        warn!("reaper error: {}", e);
                    }
                }
                _ = stop_rx.changed() => break,
            }
        }
    });
    stop_tx
}

/// Reclaim retryable stale claims and dead-letter the exhausted ones.
pub async fn reap_stale_jobs(queue: &JobQueue) -> anyhow::Result<()> {
    let now = Utc::now().timestamp_millis();

    let reclaimed: Vec<(String,)> = sqlx::query_as(
        "UPDATE jobs
         SET status = 'pending', claimed_by = NULL, not_before = ?1
         WHERE status = 'claimed'
           AND last_heartbeat < ?1 - timeout_ms
           AND attempts < max_attempts
         RETURNING job_id",
    )
    .bind(now)
    .fetch_all(queue.pool())
    .await?;

    for (job_id,) in &reclaimed {
        info!(job_id = %job_id, "reaper reclaimed stale job");
    }

    let dlq = queue.name_of(QueueName::FailedJobs);
    let failed: Vec<(String,)> = sqlx::query_as(
        "UPDATE jobs
         SET status = 'dead', queue = ?2, error = 'job timed out', claimed_by = NULL
         WHERE status = 'claimed'
           AND last_heartbeat < ?1 - timeout_ms
           AND attempts >= max_attempts
         RETURNING job_id",
    )
    .bind(now)
    .bind(&dlq)
    .fetch_all(queue.pool())
    .await?;

    for (job_id,) in &failed {
        warn!(job_id = %job_id, "reaper dead-lettered job");
    }

    Ok(())
}
