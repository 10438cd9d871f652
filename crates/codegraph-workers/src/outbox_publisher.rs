//! TransactionalOutboxPublisher — the sole bridge between committed store
//! state and queue emissions. Exactly one instance runs per deployment.
//!
//! Rows are processed strictly by id. For every row, the queue appends and
//! the PENDING -> PUBLISHED flip happen in one transaction: either all of it
//! commits or the row stays PENDING for the next poll. A malformed row is
//! marked FAILED and never blocks its successors.

use codegraph_core::scoring::initial_score_from_finding;
use codegraph_core::types::{
    DirectoryAnalysisFinding, EvidenceItem, FileAnalysisFinding, OutboxEventType,
    PoiAnalysisFinding, RelationshipFinding, SourceWorker,
};
use codegraph_core::PipelineError;
use codegraph_queue::{JobMessage, JobQueue, PoiContext, QueueName};
use codegraph_store::{OutboxRow, Store};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::paths::parent_dir;

pub struct OutboxPublisher {
    store: Store,
    queue: JobQueue,
    batch_size: u32,
    poll_interval_ms: u64,
}

impl OutboxPublisher {
    pub fn new(store: Store, queue: JobQueue, batch_size: u32, poll_interval_ms: u64) -> Self {
        Self {
            store,
            queue,
            batch_size,
            poll_interval_ms,
        }
    }

    /// Run the poll loop until shutdown flips.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("outbox publisher started");
            let mut backoff_ms = self.poll_interval_ms;
            loop {
                if *shutdown.borrow() {
                    break;
                }
                match self.tick().await {
                    Ok(0) => {
                        backoff_ms = self.poll_interval_ms;
                        tokio::select! {
                            _ = tokio::time::sleep(std::time::Duration::from_millis(backoff_ms)) => {}
                            _ = shutdown.changed() => {}
                        }
                    }
                    Ok(_) => {
                        backoff_ms = self.poll_interval_ms;
                    }
                    Err(e) => {
                        // Transient store pressure; retry the same batch later.
                        warn!("outbox publish failed ({}); backing off", e);
                        backoff_ms = (backoff_ms * 2).min(10_000);
                        tokio::time::sleep(std::time::Duration::from_millis(backoff_ms)).await;
                    }
                }
            }
            info!("outbox publisher stopped");
        })
    }

    /// Process one poll batch; returns how many rows were settled.
    pub async fn tick(&self) -> Result<u32, PipelineError> {
        let rows = self.store.fetch_pending_outbox(self.batch_size).await?;
        let mut settled = 0u32;
        for row in rows {
            match self.publish_row(&row).await {
                Ok(()) => settled += 1,
                Err(e) if e.is_permanent() => {
                    warn!(outbox_id = row.id, "marking outbox row FAILED: {}", e);
                    self.store.mark_outbox_failed(row.id, &e.to_string()).await?;
                    settled += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(settled)
    }

    async fn publish_row(&self, row: &OutboxRow) -> Result<(), PipelineError> {
        let event_type = OutboxEventType::parse(&row.event_type).ok_or_else(|| {
            PipelineError::Permanent(format!("unknown outbox event type '{}'", row.event_type))
        })?;

        let mut tx = self
            .store
            .pool()
            .begin()
            .await
            .map_err(|e| PipelineError::Store(e.to_string()))?;

        match event_type {
            OutboxEventType::FileAnalysisFinding => {
                let finding: FileAnalysisFinding = serde_json::from_str(&row.payload)
                    .map_err(|e| PipelineError::Permanent(format!("malformed payload: {}", e)))?;

                // Completion notification for the directory barrier.
                self.queue
                    .enqueue_tx(
                        &mut tx,
                        QueueName::DirectoryAggregation,
                        &format!("fc-{}", finding.job_id),
                        &JobMessage::FileCompleted {
                            run_id: finding.run_id.clone(),
                            directory: finding.directory.clone(),
                            file_path: finding.file_path.clone(),
                        },
                    )
                    .await?;

                // Fan-out: one relationship-resolution job per POI.
                for (index, poi) in finding.pois.iter().enumerate() {
                    self.queue
                        .enqueue_tx(
                            &mut tx,
                            QueueName::RelationshipResolution,
                            &format!("rr-{}-{}", finding.job_id, index),
                            &JobMessage::RelationshipResolution {
                                run_id: finding.run_id.clone(),
                                poi: PoiContext {
                                    qualified_name: poi.qualified_name.clone(),
                                    name: poi.name.clone(),
                                    kind: poi.kind,
                                    file_path: finding.file_path.clone(),
                                    directory: parent_dir(&finding.file_path),
                                },
                            },
                        )
                        .await?;
                }

                // Aggregated evidence batch from the file pass.
                let items = evidence_items(
                    &finding.relationships,
                    SourceWorker::FileAnalysis,
                    &finding.job_id,
                );
                self.queue
                    .enqueue_tx(
                        &mut tx,
                        QueueName::AnalysisFindings,
                        &format!("af-{}", finding.job_id),
                        &JobMessage::AnalysisFindings {
                            run_id: finding.run_id.clone(),
                            items,
                        },
                    )
                    .await?;
            }
            OutboxEventType::DirectoryAnalysisFinding => {
                let finding: DirectoryAnalysisFinding = serde_json::from_str(&row.payload)
                    .map_err(|e| PipelineError::Permanent(format!("malformed payload: {}", e)))?;
                let items = evidence_items(
                    &finding.relationships,
                    SourceWorker::DirectoryResolution,
                    &finding.job_id,
                );
                self.queue
                    .enqueue_tx(
                        &mut tx,
                        QueueName::AnalysisFindings,
                        &format!("af-{}", finding.job_id),
                        &JobMessage::AnalysisFindings {
                            run_id: finding.run_id.clone(),
                            items,
                        },
                    )
                    .await?;
            }
            OutboxEventType::RelationshipAnalysisFinding => {
                let finding: PoiAnalysisFinding = serde_json::from_str(&row.payload)
                    .map_err(|e| PipelineError::Permanent(format!("malformed payload: {}", e)))?;
                let items = evidence_items(
                    &finding.relationships,
                    SourceWorker::RelationshipResolution,
                    &finding.job_id,
                );
                self.queue
                    .enqueue_tx(
                        &mut tx,
                        QueueName::AnalysisFindings,
                        &format!("af-{}", finding.job_id),
                        &JobMessage::AnalysisFindings {
                            run_id: finding.run_id.clone(),
                            items,
                        },
                    )
                    .await?;
            }
        }

        // The CAS and the appends commit or roll back together.
        let flipped = Store::mark_outbox_published_tx(&mut tx, row.id).await?;
        if !flipped {
            debug!(outbox_id = row.id, "row already published, rolling back");
            tx.rollback()
                .await
                .map_err(|e| PipelineError::Store(e.to_string()))?;
            return Ok(());
        }
        tx.commit().await.map_err(|e| PipelineError::Store(e.to_string()))
    }
}

fn evidence_items(
    relationships: &[RelationshipFinding],
    source_worker: SourceWorker,
    job_id: &str,
) -> Vec<EvidenceItem> {
    relationships
        .iter()
        .map(|rel| EvidenceItem {
            relationship_hash: rel.hash(),
            source_worker,
            found: rel.found,
            initial_score: initial_score_from_finding(rel.confidence),
            job_id: job_id.to_string(),
            source_file: rel.source_file.clone(),
            target_file: rel.target_file.clone(),
            raw: serde_json::to_value(rel).unwrap_or(serde_json::Value::Null),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use codegraph_core::types::{ParseStatus, PoiFinding, PoiKind, RelationshipKind};

    async fn setup() -> (tempfile::TempDir, Store, JobQueue, OutboxPublisher) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("s.db")).await.unwrap();
        let queue = JobQueue::new(store.pool().clone(), "", 900_000, 3).await.unwrap();
        let publisher = OutboxPublisher::new(store.clone(), queue.clone(), 10, 50);
        (dir, store, queue, publisher)
    }

    fn file_finding() -> FileAnalysisFinding {
        FileAnalysisFinding {
            run_id: "r1".into(),
            job_id: "job-1".into(),
            file_path: "src/a.js".into(),
            directory: "src".into(),
            parse_status: ParseStatus::LlmSuccess,
            pois: vec![
                PoiFinding {
                    name: "caller".into(),
                    qualified_name: "src/a.js::caller".into(),
                    kind: PoiKind::Function,
                    line: 1,
                    is_exported: false,
                    special_file_type: None,
                },
                PoiFinding {
                    name: "callee".into(),
                    qualified_name: "src/a.js::callee".into(),
                    kind: PoiKind::Function,
                    line: 9,
                    is_exported: false,
                    special_file_type: None,
                },
            ],
            relationships: vec![RelationshipFinding {
                source_qualified_name: "src/a.js::caller".into(),
                target_qualified_name: "src/a.js::callee".into(),
                kind: RelationshipKind::Calls,
                found: true,
                confidence: Some(0.8),
                source_file: "src/a.js".into(),
                target_file: "src/a.js".into(),
            }],
        }
    }

    #[tokio::test]
    async fn file_finding_fans_out_atomically() {
        let (_dir, store, queue, publisher) = setup().await;

        let mut tx = store.pool().begin().await.unwrap();
        Store::insert_outbox_event_tx(
            &mut tx,
            "r1",
            OutboxEventType::FileAnalysisFinding,
            &serde_json::to_string(&file_finding()).unwrap(),
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let settled = publisher.tick().await.unwrap();
        assert_eq!(settled, 1);

        // One FileCompleted, two per-POI fanouts, one findings batch.
        assert_eq!(queue.depth(QueueName::DirectoryAggregation).await.unwrap(), 1);
        assert_eq!(queue.depth(QueueName::RelationshipResolution).await.unwrap(), 2);
        assert_eq!(queue.depth(QueueName::AnalysisFindings).await.unwrap(), 1);
        assert_eq!(store.pending_outbox_count().await.unwrap(), 0);
        assert_eq!(store.outbox_count_by_status("PUBLISHED").await.unwrap(), 1);

        // The evidence batch carries the file pass's opinion.
        let job = queue.claim(QueueName::AnalysisFindings, "t").await.unwrap().unwrap();
        match job.message {
            JobMessage::AnalysisFindings { items, .. } => {
                assert_eq!(items.len(), 1);
                assert_eq!(items[0].source_worker, SourceWorker::FileAnalysis);
                assert!(items[0].found);
                assert_eq!(items[0].initial_score, 0.8);
                assert_eq!(items[0].job_id, "job-1");
            }
            other => panic!("wrong message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn redelivered_tick_does_not_duplicate_jobs() {
        let (_dir, store, queue, publisher) = setup().await;

        let mut tx = store.pool().begin().await.unwrap();
        Store::insert_outbox_event_tx(
            &mut tx,
            "r1",
            OutboxEventType::FileAnalysisFinding,
            &serde_json::to_string(&file_finding()).unwrap(),
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        publisher.tick().await.unwrap();
        // Second tick sees no PENDING rows; deterministic job ids would
        // collapse duplicates even if it did.
        let settled = publisher.tick().await.unwrap();
        assert_eq!(settled, 0);
        assert_eq!(queue.depth(QueueName::RelationshipResolution).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn malformed_rows_fail_without_blocking() {
        let (_dir, store, queue, publisher) = setup().await;

        let mut tx = store.pool().begin().await.unwrap();
        Store::insert_outbox_event_tx(&mut tx, "r1", OutboxEventType::FileAnalysisFinding, "][")
            .await
            .unwrap();
        Store::insert_outbox_event_tx(
            &mut tx,
            "r1",
            OutboxEventType::FileAnalysisFinding,
            &serde_json::to_string(&file_finding()).unwrap(),
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let settled = publisher.tick().await.unwrap();
        assert_eq!(settled, 2);
        assert_eq!(store.outbox_count_by_status("FAILED").await.unwrap(), 1);
        assert_eq!(store.outbox_count_by_status("PUBLISHED").await.unwrap(), 1);
        assert_eq!(queue.depth(QueueName::AnalysisFindings).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn empty_findings_still_publish_a_batch() {
        let (_dir, store, queue, publisher) = setup().await;

        let finding = DirectoryAnalysisFinding {
            run_id: "r1".into(),
            job_id: "dir-1".into(),
            directory: "src".into(),
            relationships: vec![],
        };
        let mut tx = store.pool().begin().await.unwrap();
        Store::insert_outbox_event_tx(
            &mut tx,
            "r1",
            OutboxEventType::DirectoryAnalysisFinding,
            &serde_json::to_string(&finding).unwrap(),
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        publisher.tick().await.unwrap();
        // Every PUBLISHED row corresponds to at least one enqueued job.
        assert_eq!(queue.depth(QueueName::AnalysisFindings).await.unwrap(), 1);
    }
}
