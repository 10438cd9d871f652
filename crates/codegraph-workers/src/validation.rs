//! ValidationWorker — persists evidence and triggers reconciliation at the
//! exact moment a relationship is fully witnessed.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use codegraph_core::hash::file_pair_key;
use codegraph_core::types::EvidenceItem;
use codegraph_core::{PipelineError, RunManifest};
use codegraph_queue::{ClaimedJob, JobMessage, QueueName};
use codegraph_store::{evidence_count_key, expected_key};
use tracing::{debug, info, warn};

use crate::context::WorkerContext;
use crate::runner::JobHandler;

/// Witnesses assumed for relationships with no manifest entry at any
/// granularity (cross-directory pairs): the per-POI pass alone.
const DEFAULT_EXPECTED: i64 = 1;

pub struct ValidationHandler {
    ctx: WorkerContext,
    manifests: Mutex<HashMap<String, Arc<RunManifest>>>,
}

impl ValidationHandler {
    pub fn new(ctx: WorkerContext) -> Self {
        Self {
            ctx,
            manifests: Mutex::new(HashMap::new()),
        }
    }

    async fn manifest(&self, run_id: &str) -> Result<Arc<RunManifest>, PipelineError> {
        if let Some(manifest) = self.manifests.lock().unwrap().get(run_id) {
            return Ok(manifest.clone());
        }
        let manifest = Arc::new(self.ctx.store.load_manifest(run_id).await?);
        self.manifests
            .lock()
            .unwrap()
            .insert(run_id.to_string(), manifest.clone());
        Ok(manifest)
    }

    /// Expected witness count for a relationship, pinned in KV on first
    /// sight so every later lookup agrees: the specific-hash entry wins,
    /// then the file-pair entry from Scout, then the default.
    async fn resolve_expected(
        &self,
        run_id: &str,
        item: &EvidenceItem,
    ) -> Result<i64, PipelineError> {
        let key = expected_key(run_id, &item.relationship_hash);
        if let Some(pinned) = self.ctx.store.kv_get(&key).await? {
            return pinned.parse::<i64>().map_err(|_| {
                PipelineError::Inconsistency(format!("corrupt expected count '{}'", pinned))
            });
        }

        let manifest = self.manifest(run_id).await?;
        let expected = manifest
            .expected_for(&item.relationship_hash)
            .or_else(|| {
                manifest.expected_for(&file_pair_key(&item.source_file, &item.target_file))
            })
            .map(i64::from)
            .unwrap_or(DEFAULT_EXPECTED);

        self.ctx.store.kv_put(&key, &expected.to_string()).await?;
        Ok(expected)
    }

    async fn accept(&self, run_id: &str, item: &EvidenceItem) -> Result<(), PipelineError> {
        // The unique index makes redelivered evidence a no-op; only a real
        // insert may advance the counter.
        let inserted = self.ctx.store.insert_evidence(run_id, item).await?;
        if !inserted {
            debug!(
                run_id,
                rel_hash = %item.relationship_hash,
                job_id = %item.job_id,
                "duplicate evidence ignored"
            );
            return Ok(());
        }

        let count = self
            .ctx
            .store
            .counter_incr(&evidence_count_key(run_id, &item.relationship_hash))
            .await?;
        let expected = self.resolve_expected(run_id, item).await?;

        if count == expected {
            // Deterministic job id: a redelivered trigger collapses.
            let job_id = format!("rec-{}", &item.relationship_hash);
            self.ctx
                .queue
                .enqueue(
                    QueueName::Reconciliation,
                    &job_id,
                    &JobMessage::Reconciliation {
                        run_id: run_id.to_string(),
                        relationship_hash: item.relationship_hash.clone(),
                    },
                )
                .await?;
            info!(
                run_id,
                rel_hash = %item.relationship_hash,
                evidence = count,
                "evidence complete, reconciliation enqueued"
            );
        } else if count > expected {
            warn!(
                run_id,
                rel_hash = %item.relationship_hash,
                count,
                expected,
                "late evidence after counter closed"
            );
        }
        Ok(())
    }
}

#[async_trait]
impl JobHandler for ValidationHandler {
    fn queue(&self) -> QueueName {
        QueueName::AnalysisFindings
    }

    async fn process(&self, job: &ClaimedJob) -> Result<(), PipelineError> {
        let JobMessage::AnalysisFindings { run_id, items } = &job.message else {
            return Err(PipelineError::Permanent(
                "unexpected message on analysis-findings queue".into(),
            ));
        };
        for item in items {
            self.accept(run_id, item).await?;
        }
        Ok(())
    }
}
