//! DirectoryAggregationWorker — the barrier that waits for every file of a
//! directory to finish analysis, then fires directory resolution once.

use async_trait::async_trait;
use codegraph_core::PipelineError;
use codegraph_queue::{ClaimedJob, JobMessage, QueueName};
use codegraph_store::{dir_progress_key, dir_total_key};
use tracing::{debug, info, warn};

use crate::context::WorkerContext;
use crate::runner::JobHandler;

pub struct DirectoryAggregationHandler {
    ctx: WorkerContext,
}

impl DirectoryAggregationHandler {
    pub fn new(ctx: WorkerContext) -> Self {
        Self { ctx }
    }

    async fn expected_total(&self, run_id: &str, directory: &str) -> Result<u32, PipelineError> {
        if let Some(value) = self.ctx.store.kv_get(&dir_total_key(run_id, directory)).await? {
            if let Ok(total) = value.parse::<u32>() {
                return Ok(total);
            }
        }
        let manifest = self.ctx.store.load_manifest(run_id).await?;
        manifest
            .directory_totals
            .get(directory)
            .copied()
            .ok_or_else(|| {
                PipelineError::Inconsistency(format!(
                    "directory '{}' missing from manifest",
                    directory
                ))
            })
    }

    async fn fire_resolution(&self, run_id: &str, directory: &str) -> Result<(), PipelineError> {
        let manifest = self.ctx.store.load_manifest(run_id).await?;
        let job_id = manifest.directory_jobs.get(directory).ok_or_else(|| {
            PipelineError::Inconsistency(format!(
                "no directory-resolution job assigned to '{}'",
                directory
            ))
        })?;
        // The deterministic job id makes a re-fired barrier a no-op.
        self.ctx
            .queue
            .enqueue(
                QueueName::DirectoryResolution,
                job_id,
                &JobMessage::DirectoryResolution {
                    run_id: run_id.to_string(),
                    directory: directory.to_string(),
                },
            )
            .await?;
        info!(run_id, directory, "directory complete, resolution enqueued");
        Ok(())
    }
}

#[async_trait]
impl JobHandler for DirectoryAggregationHandler {
    fn queue(&self) -> QueueName {
        QueueName::DirectoryAggregation
    }

    async fn process(&self, job: &ClaimedJob) -> Result<(), PipelineError> {
        match &job.message {
            JobMessage::DirectoryExpectation {
                run_id,
                directory,
                total_files,
            } => {
                self.ctx
                    .store
                    .kv_put(&dir_total_key(run_id, directory), &total_files.to_string())
                    .await?;
                debug!(
                    run_id = %run_id,
                    directory = %directory,
                    total_files = *total_files,
                    "directory expectation recorded"
                );
                Ok(())
            }
            JobMessage::FileCompleted {
                run_id, directory, ..
            } => {
                let progress = self
                    .ctx
                    .store
                    .counter_incr(&dir_progress_key(run_id, directory))
                    .await?;
                let total = self.expected_total(run_id, directory).await?;

                if progress == total as i64 {
                    self.fire_resolution(run_id, directory).await?;
                    self.ctx
                        .store
                        .counter_delete(&dir_progress_key(run_id, directory))
                        .await?;
                } else if progress > total as i64 {
                    warn!(
                        run_id = %run_id,
                        directory = %directory,
                        progress,
                        total,
                        "late completion notification ignored"
                    );
                } else {
                    debug!(run_id = %run_id, directory = %directory, progress, total, "directory progress");
                }
                Ok(())
            }
            _ => Err(PipelineError::Permanent(
                "unexpected message on directory-aggregation queue".into(),
            )),
        }
    }
}
