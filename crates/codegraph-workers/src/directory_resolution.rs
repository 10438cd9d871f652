//! DirectoryResolutionWorker — cross-file relationships within one
//! directory. Re-evaluates every candidate already proposed in its scope
//! (emitting found = true/false for each) and may contribute new ones.

use std::collections::BTreeMap;

use async_trait::async_trait;
use codegraph_ai::{PoiSummary, RelationshipSketch};
use codegraph_core::scoring::initial_score_from_finding;
use codegraph_core::types::{
    DirectoryAnalysisFinding, OutboxEventType, ParseStatus, RelationshipFinding, RelationshipKind,
};
use codegraph_core::PipelineError;
use codegraph_queue::{ClaimedJob, JobMessage, QueueName};
use codegraph_store::{PoiRow, Store};
use tracing::{debug, info};

use crate::context::WorkerContext;
use crate::runner::JobHandler;

pub struct DirectoryResolutionHandler {
    ctx: WorkerContext,
}

impl DirectoryResolutionHandler {
    pub fn new(ctx: WorkerContext) -> Self {
        Self { ctx }
    }

    async fn resolve(
        &self,
        run_id: &str,
        job_id: &str,
        directory: &str,
    ) -> Result<(), PipelineError> {
        let pois = self.ctx.store.pois_in_directory(run_id, directory).await?;
        let candidates = self.ctx.store.pending_in_directory(run_id, directory).await?;

        let summaries: Vec<PoiSummary> = pois
            .iter()
            .map(|p| PoiSummary {
                qualified_name: p.qualified_name.clone(),
                name: p.name.clone(),
                kind: p.kind.clone(),
                file_path: p.file_path.clone(),
            })
            .collect();
        let sketches: Vec<RelationshipSketch> = candidates
            .iter()
            .map(|c| RelationshipSketch {
                source_qualified_name: c.source_qualified_name.clone(),
                target_qualified_name: c.target_qualified_name.clone(),
                kind: c.kind.clone(),
            })
            .collect();

        let analysis = self
            .ctx
            .model
            .analyze_directory(directory, &summaries, &sketches)
            .await?;

        let by_qualified: BTreeMap<&str, &PoiRow> = pois
            .iter()
            .map(|p| (p.qualified_name.as_str(), p))
            .collect();

        // Verdicts reported by the model, keyed like the relationship hash.
        let mut verdicts: BTreeMap<(String, String, String), (bool, Option<f64>)> = BTreeMap::new();
        for rel in &analysis.relationships {
            verdicts.insert(
                (rel.source.clone(), rel.target.clone(), rel.kind.to_uppercase()),
                (rel.found, rel.confidence),
            );
        }

        let mut findings: Vec<RelationshipFinding> = Vec::new();
        let mut new_candidates: Vec<(i64, i64, RelationshipKind, String, f64)> = Vec::new();

        // Every known candidate gets a verdict, present or absent.
        for candidate in &candidates {
            let key = (
                candidate.source_qualified_name.clone(),
                candidate.target_qualified_name.clone(),
                candidate.kind.clone(),
            );
            let (found, confidence) = verdicts.remove(&key).unwrap_or((false, None));
            findings.push(RelationshipFinding {
                source_qualified_name: candidate.source_qualified_name.clone(),
                target_qualified_name: candidate.target_qualified_name.clone(),
                kind: RelationshipKind::parse(&candidate.kind).ok_or_else(|| {
                    PipelineError::Inconsistency(format!(
                        "candidate row carries unknown kind '{}'",
                        candidate.kind
                    ))
                })?,
                found,
                confidence,
                source_file: candidate.source_file.clone(),
                target_file: candidate.target_file.clone(),
            });
        }

        // Leftover verdicts are newly discovered relationships.
        for ((source, target, kind), (found, confidence)) in verdicts {
            if !found {
                continue;
            }
            let Some(kind) = RelationshipKind::parse(&kind) else {
                debug!(kind = %kind, "unknown kind from directory pass, skipping");
                continue;
            };
            let (Some(source_poi), Some(target_poi)) =
                (by_qualified.get(source.as_str()), by_qualified.get(target.as_str()))
            else {
                debug!(source = %source, target = %target, "unresolvable endpoints, skipping");
                continue;
            };
            let finding = RelationshipFinding {
                source_qualified_name: source,
                target_qualified_name: target,
                kind,
                found: true,
                confidence,
                source_file: source_poi.file_path.clone(),
                target_file: target_poi.file_path.clone(),
            };
            new_candidates.push((
                source_poi.id,
                target_poi.id,
                kind,
                finding.hash(),
                initial_score_from_finding(confidence),
            ));
            findings.push(finding);
        }

        let finding = DirectoryAnalysisFinding {
            run_id: run_id.to_string(),
            job_id: job_id.to_string(),
            directory: directory.to_string(),
            relationships: findings,
        };

        let mut tx = self
            .ctx
            .store
            .pool()
            .begin()
            .await
            .map_err(|e| PipelineError::Store(e.to_string()))?;
        for (source_id, target_id, kind, hash, initial) in &new_candidates {
            Store::insert_candidate_tx(
                &mut tx,
                run_id,
                *source_id,
                *target_id,
                kind.as_str(),
                hash,
                *initial,
                ParseStatus::LlmSuccess,
            )
            .await?;
        }
        let payload = serde_json::to_string(&finding)?;
        Store::insert_outbox_event_tx(
            &mut tx,
            run_id,
            OutboxEventType::DirectoryAnalysisFinding,
            &payload,
        )
        .await?;
        tx.commit()
            .await
            .map_err(|e| PipelineError::Store(e.to_string()))?;

        info!(
            run_id,
            directory,
            verdicts = finding.relationships.len(),
            discovered = new_candidates.len(),
            "directory resolved"
        );
        Ok(())
    }
}

#[async_trait]
impl JobHandler for DirectoryResolutionHandler {
    fn queue(&self) -> QueueName {
        QueueName::DirectoryResolution
    }

    async fn process(&self, job: &ClaimedJob) -> Result<(), PipelineError> {
        let JobMessage::DirectoryResolution { run_id, directory } = &job.message else {
            return Err(PipelineError::Permanent(
                "unexpected message on directory-resolution queue".into(),
            ));
        };
        self.resolve(run_id, &job.job_id, directory).await
    }
}
