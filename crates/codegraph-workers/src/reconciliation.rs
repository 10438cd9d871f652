//! ReconciliationWorker — computes the terminal state of one candidate
//! relationship from its full evidence set.

use async_trait::async_trait;
use codegraph_core::scoring::calculate_final_score;
use codegraph_core::types::RelationshipStatus;
use codegraph_core::PipelineError;
use codegraph_queue::{ClaimedJob, JobMessage, QueueName};
use tracing::{debug, info};

use crate::context::WorkerContext;
use crate::runner::JobHandler;

pub struct ReconciliationHandler {
    ctx: WorkerContext,
}

impl ReconciliationHandler {
    pub fn new(ctx: WorkerContext) -> Self {
        Self { ctx }
    }

    async fn reconcile(&self, run_id: &str, relationship_hash: &str) -> Result<(), PipelineError> {
        // Ordered as recorded; dedup was enforced at insert time.
        let evidence = self.ctx.store.load_evidence(run_id, relationship_hash).await?;
        let outcome = calculate_final_score(&evidence);

        let status = if outcome.final_score >= self.ctx.config.validation_threshold {
            RelationshipStatus::Validated
        } else {
            RelationshipStatus::Rejected
        };

        let moved = self
            .ctx
            .store
            .finalize_relationship(
                run_id,
                relationship_hash,
                status,
                outcome.final_score,
                outcome.has_conflict,
            )
            .await?;

        if moved {
            self.ctx
                .store
                .insert_audit(
                    run_id,
                    relationship_hash,
                    status.as_str(),
                    outcome.final_score,
                    evidence.len() as i64,
                    outcome.has_conflict,
                )
                .await?;
            info!(
                run_id,
                rel_hash = relationship_hash,
                status = status.as_str(),
                score = outcome.final_score,
                evidence = evidence.len(),
                conflict = outcome.has_conflict,
                "relationship reconciled"
            );
            return Ok(());
        }

        // The transition guard did nothing: either a replay of an already
        // terminal row (fine) or evidence for a row that never existed.
        match self.ctx.store.relationship_by_hash(run_id, relationship_hash).await? {
            Some(row) => {
                debug!(
                    run_id,
                    rel_hash = relationship_hash,
                    status = %row.status,
                    "reconciliation replay, row already terminal"
                );
                Ok(())
            }
            None => Err(PipelineError::Inconsistency(format!(
                "unknown relationship hash '{}'",
                relationship_hash
            ))),
        }
    }
}

#[async_trait]
impl JobHandler for ReconciliationHandler {
    fn queue(&self) -> QueueName {
        QueueName::Reconciliation
    }

    async fn process(&self, job: &ClaimedJob) -> Result<(), PipelineError> {
        let JobMessage::Reconciliation {
            run_id,
            relationship_hash,
        } = &job.message
        else {
            return Err(PipelineError::Permanent(
                "unexpected message on reconciliation queue".into(),
            ));
        };
        self.reconcile(run_id, relationship_hash).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codegraph_ai::mock::ScriptedModel;
    use codegraph_core::types::{EvidenceItem, ParseStatus, PoiFinding, PoiKind, SourceWorker};
    use codegraph_core::PipelineConfig;
    use codegraph_queue::JobQueue;
    use codegraph_store::Store;
    use std::sync::Arc;

    async fn setup() -> (tempfile::TempDir, WorkerContext, ReconciliationHandler) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("s.db")).await.unwrap();
        let queue = JobQueue::new(store.pool().clone(), "", 900_000, 3).await.unwrap();
        let ctx = WorkerContext::new(
            store,
            queue,
            Arc::new(ScriptedModel::new()),
            Arc::new(PipelineConfig::default()),
        );
        let handler = ReconciliationHandler::new(ctx.clone());
        (dir, ctx, handler)
    }

    async fn seed_candidate(ctx: &WorkerContext, hash: &str) {
        let file = ctx.store.insert_file("r1", "a.js", None).await.unwrap();
        let mut tx = ctx.store.pool().begin().await.unwrap();
        let a = Store::insert_poi_tx(
            &mut tx,
            "r1",
            file,
            &PoiFinding {
                name: "caller".into(),
                qualified_name: "a.js::caller".into(),
                kind: PoiKind::Function,
                line: 1,
                is_exported: false,
                special_file_type: None,
            },
        )
        .await
        .unwrap();
        let b = Store::insert_poi_tx(
            &mut tx,
            "r1",
            file,
            &PoiFinding {
                name: "callee".into(),
                qualified_name: "a.js::callee".into(),
                kind: PoiKind::Function,
                line: 5,
                is_exported: false,
                special_file_type: None,
            },
        )
        .await
        .unwrap();
        Store::insert_candidate_tx(&mut tx, "r1", a, b, "CALLS", hash, 0.8, ParseStatus::LlmSuccess)
            .await
            .unwrap();
        tx.commit().await.unwrap();
    }

    fn evidence(job: &str, worker: SourceWorker, found: bool, score: f64) -> EvidenceItem {
        EvidenceItem {
            relationship_hash: "h1".into(),
            source_worker: worker,
            found,
            initial_score: score,
            job_id: job.into(),
            source_file: "a.js".into(),
            target_file: "a.js".into(),
            raw: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn agreeing_evidence_validates() {
        let (_dir, ctx, handler) = setup().await;
        seed_candidate(&ctx, "h1").await;
        ctx.store
            .insert_evidence("r1", &evidence("j1", SourceWorker::FileAnalysis, true, 0.8))
            .await
            .unwrap();
        ctx.store
            .insert_evidence("r1", &evidence("j2", SourceWorker::DirectoryResolution, true, 0.5))
            .await
            .unwrap();

        handler.reconcile("r1", "h1").await.unwrap();

        let row = ctx.store.relationship_by_hash("r1", "h1").await.unwrap().unwrap();
        assert_eq!(row.status, "VALIDATED");
        assert!((row.confidence - 0.84).abs() < 1e-12);
        assert!(!row.has_conflict);
    }

    #[tokio::test]
    async fn conflicting_evidence_rejects_with_conflict_annotation() {
        let (_dir, ctx, handler) = setup().await;
        seed_candidate(&ctx, "h1").await;
        ctx.store
            .insert_evidence("r1", &evidence("j1", SourceWorker::FileAnalysis, true, 0.5))
            .await
            .unwrap();
        ctx.store
            .insert_evidence("r1", &evidence("j2", SourceWorker::DirectoryResolution, false, 0.5))
            .await
            .unwrap();

        handler.reconcile("r1", "h1").await.unwrap();

        let row = ctx.store.relationship_by_hash("r1", "h1").await.unwrap().unwrap();
        assert_eq!(row.status, "REJECTED");
        assert!((row.confidence - 0.25).abs() < 1e-12);
        assert!(row.has_conflict);
    }

    #[tokio::test]
    async fn replay_is_a_no_op_with_identical_outcome() {
        let (_dir, ctx, handler) = setup().await;
        seed_candidate(&ctx, "h1").await;
        ctx.store
            .insert_evidence("r1", &evidence("j1", SourceWorker::FileAnalysis, true, 0.8))
            .await
            .unwrap();

        handler.reconcile("r1", "h1").await.unwrap();
        let first = ctx.store.relationship_by_hash("r1", "h1").await.unwrap().unwrap();

        handler.reconcile("r1", "h1").await.unwrap();
        let second = ctx.store.relationship_by_hash("r1", "h1").await.unwrap().unwrap();

        assert_eq!(first.status, second.status);
        assert_eq!(first.confidence, second.confidence);
    }

    #[tokio::test]
    async fn unknown_hash_is_an_inconsistency() {
        let (_dir, _ctx, handler) = setup().await;
        let err = handler.reconcile("r1", "missing").await.unwrap_err();
        assert!(matches!(err, PipelineError::Inconsistency(_)));
        assert!(err.is_permanent());
    }
}
