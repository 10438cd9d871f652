//! Run completion detection and the final verdict.
//!
//! A run is complete when the outbox holds no PENDING rows and no work
//! queue has pending or claimed jobs — checked repeatedly over a
//! stabilization window by the caller, since an idle instant can race the
//! publisher. The verdict is computed afterwards from what actually
//! happened: dead-lettered jobs and starved relationships demote SUCCESS
//! to PARTIAL; they never hang the run.

use codegraph_core::{PipelineError, RunManifest};
use codegraph_queue::JobQueue;
use codegraph_store::{RunSummary, RunVerdict, Store};
use tracing::{info, warn};

/// Instantaneous idleness check; callers require it to hold for a
/// configurable number of consecutive polls.
pub async fn completion_reached(store: &Store, queue: &JobQueue) -> Result<bool, PipelineError> {
    if store.pending_outbox_count().await? > 0 {
        return Ok(false);
    }
    Ok(queue.inflight_total().await? == 0)
}

/// Compute the run verdict once the queues are idle.
pub async fn compute_run_summary(
    store: &Store,
    queue: &JobQueue,
    manifest: &RunManifest,
    graph_built: bool,
) -> Result<RunSummary, PipelineError> {
    let run_id = &manifest.run_id;
    let validated = store.count_relationships_by_status(run_id, "VALIDATED").await?;
    let rejected = store.count_relationships_by_status(run_id, "REJECTED").await?;
    let conflicted = store.count_conflicted(run_id).await?;
    let dead_lettered = store_dead_jobs(queue, manifest).await?;

    let starved = store.starved_relationships(run_id).await?;
    for row in &starved {
        warn!(
            run_id = %run_id,
            rel_hash = %row.hash,
            source = %row.source_qualified_name,
            target = %row.target_qualified_name,
            "starved relationship: evidence never completed"
        );
    }

    let verdict = if !graph_built {
        RunVerdict::Failed
    } else if dead_lettered > 0 || !starved.is_empty() {
        RunVerdict::Partial
    } else {
        RunVerdict::Success
    };

    let summary = RunSummary {
        run_id: run_id.clone(),
        verdict,
        validated,
        rejected,
        conflicted,
        dead_lettered,
        starved: starved.len() as i64,
    };
    info!(
        run_id = %run_id,
        verdict = verdict.as_str(),
        validated,
        rejected,
        conflicted,
        dead_lettered,
        starved = summary.starved,
        "run summary"
    );
    Ok(summary)
}

/// Dead jobs plus manifest jobs that never ran (their producers died
/// upstream, so the queue never saw them).
async fn store_dead_jobs(queue: &JobQueue, manifest: &RunManifest) -> Result<i64, PipelineError> {
    let mut count = queue.dead_letter_count().await?;
    for job_id in manifest.job_graph.all_job_ids() {
        if queue.job_status(job_id).await?.is_none() {
            warn!(job_id = %job_id, "manifest job was never enqueued");
            count += 1;
        }
    }
    Ok(count)
}

/// Drop the run's KV coordination keys. Outbox history and evidence rows
/// are retained for audit.
pub async fn finalize_run(store: &Store, run_id: &str) -> Result<(), PipelineError> {
    store.cleanup_run_keys(run_id).await
}
