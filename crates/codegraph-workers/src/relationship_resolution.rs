//! RelationshipResolutionWorker — the finest-grain pass: one POI examined
//! against its surroundings.

use std::collections::BTreeMap;

use async_trait::async_trait;
use codegraph_ai::PoiSummary;
use codegraph_core::scoring::initial_score_from_finding;
use codegraph_core::types::{
    OutboxEventType, ParseStatus, PoiAnalysisFinding, RelationshipFinding, RelationshipKind,
};
use codegraph_core::PipelineError;
use codegraph_queue::{ClaimedJob, JobMessage, PoiContext, QueueName};
use codegraph_store::{PoiRow, Store};
use tracing::{debug, info};

use crate::context::WorkerContext;
use crate::runner::JobHandler;

pub struct RelationshipResolutionHandler {
    ctx: WorkerContext,
}

impl RelationshipResolutionHandler {
    pub fn new(ctx: WorkerContext) -> Self {
        Self { ctx }
    }

    async fn resolve(
        &self,
        run_id: &str,
        job_id: &str,
        poi: &PoiContext,
    ) -> Result<(), PipelineError> {
        let neighbors = self.ctx.store.pois_in_directory(run_id, &poi.directory).await?;
        let subject = PoiSummary {
            qualified_name: poi.qualified_name.clone(),
            name: poi.name.clone(),
            kind: poi.kind.as_str().to_string(),
            file_path: poi.file_path.clone(),
        };
        let context: Vec<PoiSummary> = neighbors
            .iter()
            .filter(|p| p.qualified_name != poi.qualified_name)
            .map(|p| PoiSummary {
                qualified_name: p.qualified_name.clone(),
                name: p.name.clone(),
                kind: p.kind.clone(),
                file_path: p.file_path.clone(),
            })
            .collect();

        let analysis = self.ctx.model.analyze_poi(&subject, &context).await?;

        let by_qualified: BTreeMap<&str, &PoiRow> = neighbors
            .iter()
            .map(|p| (p.qualified_name.as_str(), p))
            .collect();

        let mut findings: Vec<RelationshipFinding> = Vec::new();
        let mut candidates: Vec<(i64, i64, RelationshipKind, String, f64)> = Vec::new();

        for rel in &analysis.relationships {
            if rel.source != poi.qualified_name && rel.target != poi.qualified_name {
                debug!(subject = %poi.qualified_name, "finding does not involve subject, skipping");
                continue;
            }
            let Some(kind) = RelationshipKind::parse(&rel.kind.to_uppercase()) else {
                debug!(kind = %rel.kind, "unknown kind from poi pass, skipping");
                continue;
            };
            let (Some(source_poi), Some(target_poi)) = (
                by_qualified.get(rel.source.as_str()),
                by_qualified.get(rel.target.as_str()),
            ) else {
                debug!(source = %rel.source, target = %rel.target, "unresolvable endpoints, skipping");
                continue;
            };

            let finding = RelationshipFinding {
                source_qualified_name: rel.source.clone(),
                target_qualified_name: rel.target.clone(),
                kind,
                found: rel.found,
                confidence: rel.confidence,
                source_file: source_poi.file_path.clone(),
                target_file: target_poi.file_path.clone(),
            };
            if rel.found {
                candidates.push((
                    source_poi.id,
                    target_poi.id,
                    kind,
                    finding.hash(),
                    initial_score_from_finding(rel.confidence),
                ));
            } else {
                // Evidence of absence only makes sense against a candidate
                // somebody proposed; nothing exists to reconcile otherwise.
                let known = self
                    .ctx
                    .store
                    .relationship_by_hash(run_id, &finding.hash())
                    .await?
                    .is_some();
                if !known {
                    debug!(
                        source = %finding.source_qualified_name,
                        target = %finding.target_qualified_name,
                        "negative finding for unknown candidate, skipping"
                    );
                    continue;
                }
            }
            findings.push(finding);
        }

        let finding = PoiAnalysisFinding {
            run_id: run_id.to_string(),
            job_id: job_id.to_string(),
            poi_qualified_name: poi.qualified_name.clone(),
            file_path: poi.file_path.clone(),
            relationships: findings,
        };

        let mut tx = self
            .ctx
            .store
            .pool()
            .begin()
            .await
            .map_err(|e| PipelineError::Store(e.to_string()))?;
        for (source_id, target_id, kind, hash, initial) in &candidates {
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
            OutboxEventType::RelationshipAnalysisFinding,
            &payload,
        )
        .await?;
        tx.commit()
            .await
            .map_err(|e| PipelineError::Store(e.to_string()))?;

        info!(
            run_id,
            poi = %poi.qualified_name,
            findings = finding.relationships.len(),
            "poi resolved"
        );
        Ok(())
    }
}

#[async_trait]
impl JobHandler for RelationshipResolutionHandler {
    fn queue(&self) -> QueueName {
        QueueName::RelationshipResolution
    }

    async fn process(&self, job: &ClaimedJob) -> Result<(), PipelineError> {
        let JobMessage::RelationshipResolution { run_id, poi } = &job.message else {
            return Err(PipelineError::Permanent(
                "unexpected message on relationship-resolution queue".into(),
            ));
        };
        self.resolve(run_id, &job.job_id, poi).await
    }
}
