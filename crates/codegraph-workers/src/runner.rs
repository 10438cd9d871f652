//! Polymorphic worker runner — pulls jobs from a queue and dispatches to a
//! handler, mapping errors to the queue's retry/dead-letter semantics.

use std::sync::Arc;

use async_trait::async_trait;
use codegraph_core::PipelineError;
use codegraph_queue::{spawn_heartbeat, ClaimedJob, JobQueue, QueueName};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

/// The capability every worker implements. The runner is polymorphic over
/// this; workers stay stateless between jobs.
#[async_trait]
pub trait JobHandler: Send + Sync {
    fn queue(&self) -> QueueName;

    async fn process(&self, job: &ClaimedJob) -> Result<(), PipelineError>;
}

/// Spawn `concurrency` consumer tasks for the handler's queue. Tasks stop
/// when the shutdown signal flips to true.
pub fn spawn_worker_pool(
    queue: JobQueue,
    handler: Arc<dyn JobHandler>,
    concurrency: usize,
    heartbeat_interval_ms: u64,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    (0..concurrency.max(1))
        .map(|i| {
            let queue = queue.clone();
            let handler = handler.clone();
            let shutdown = shutdown.clone();
            let worker_id = format!("{}-{}-{}", handler.queue().as_str(), i, Uuid::new_v4());
            tokio::spawn(worker_loop(
                queue,
                handler,
                worker_id,
                heartbeat_interval_ms,
                shutdown,
            ))
        })
        .collect()
}

async fn worker_loop(
    queue: JobQueue,
    handler: Arc<dyn JobHandler>,
    worker_id: String,
    heartbeat_interval_ms: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(worker_id = %worker_id, "worker started");
    loop {
        if *shutdown.borrow() {
            break;
        }
        match queue.claim(handler.queue(), &worker_id).await {
            Ok(Some(job)) => {
                let _heartbeat = spawn_heartbeat(queue.clone(), job.row_id, heartbeat_interval_ms);
                if let Err(e) = process_claimed(&queue, handler.as_ref(), &job).await {
                    error!(job_id = %job.job_id, "failed to settle job: {}", e);
                }
            }
            Ok(None) => {
                // Queue idle; wait a beat or until shutdown flips.
                tokio::select! {
                    _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => {}
                    _ = shutdown.changed() => {}
                }
            }
            Err(e) => {
                warn!(worker_id = %worker_id, "claim error: {}", e);
                tokio::time::sleep(std::time::Duration::from_millis(500)).await;
            }
        }
    }
    info!(worker_id = %worker_id, "worker stopped");
}

/// Process one claimed job and settle it with the queue. Public so tests
/// and the daemon can drive a handler deterministically.
pub async fn process_claimed(
    queue: &JobQueue,
    handler: &dyn JobHandler,
    job: &ClaimedJob,
) -> Result<(), PipelineError> {
    match handler.process(job).await {
        Ok(()) => queue.complete(job.row_id).await,
        Err(e) if e.is_permanent() => {
            error!(
                job_id = %job.job_id,
                run_id = %job.run_id,
                "permanent failure: {}",
                e
            );
            queue.fail_permanent(job, &e.to_string()).await
        }
        Err(e) => {
            warn!(
                job_id = %job.job_id,
                run_id = %job.run_id,
                attempt = job.attempts,
                "transient failure: {}",
                e
            );
            queue.fail_transient(job, &e.to_string()).await.map(|_| ())
        }
    }
}

/// Drain a queue through a handler until it reports empty. Test and
/// orchestration helper; claims with a synthetic worker id.
pub async fn drain_queue(
    queue: &JobQueue,
    handler: &dyn JobHandler,
) -> Result<u32, PipelineError> {
    let worker_id = format!("drain-{}", Uuid::new_v4());
    let mut processed = 0u32;
    while let Some(job) = queue.claim(handler.queue(), &worker_id).await? {
        process_claimed(queue, handler, &job).await?;
        processed += 1;
    }
    Ok(processed)
}
