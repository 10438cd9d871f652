//! FileAnalysisWorker — turns one file into POIs and intra-file
//! relationships, committed together with their outbox event.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use codegraph_core::scoring::{initial_score_from_finding, UNRELIABLE_PARSE_SCORE};
use codegraph_core::types::{
    FileAnalysisFinding, OutboxEventType, ParseStatus, PoiFinding, PoiKind, RelationshipFinding,
    RelationshipKind,
};
use codegraph_core::{qualified_name, PipelineError};
use codegraph_queue::{ClaimedJob, JobMessage, QueueName};
use codegraph_store::Store;
use tracing::{debug, info, warn};

use crate::context::WorkerContext;
use crate::paths::{looks_like_path, parent_dir, resolve_relative};
use crate::runner::JobHandler;

pub struct FileAnalysisHandler {
    ctx: WorkerContext,
}

impl FileAnalysisHandler {
    pub fn new(ctx: WorkerContext) -> Self {
        Self { ctx }
    }

    async fn analyze(
        &self,
        run_id: &str,
        job_id: &str,
        file_path: &str,
    ) -> Result<(), PipelineError> {
        let root = Path::new(&self.ctx.config.run_root)
            .canonicalize()
            .map_err(PipelineError::Io)?;
        let absolute = root.join(file_path);
        let canonical = absolute.canonicalize().map_err(PipelineError::Io)?;
        if !canonical.starts_with(&root) {
            return Err(PipelineError::Permanent(format!(
                "path '{}' resolves outside the run root",
                file_path
            )));
        }

        let bytes = std::fs::read(&canonical)?;
        if bytes.len() as u64 > self.ctx.config.file_size_warn_bytes {
            warn!(
                run_id,
                file = file_path,
                size = bytes.len(),
                "file exceeds size threshold, processing anyway"
            );
        }
        let content = String::from_utf8_lossy(&bytes);

        let (analysis, parse_status) = match self.ctx.model.analyze_file(file_path, &content).await
        {
            Ok(analysis) => (analysis, ParseStatus::LlmSuccess),
            Err(PipelineError::LlmParse(reason)) => {
                warn!(
                    run_id,
                    file = file_path,
                    "model output unparseable ({}); using regex fallback",
                    reason
                );
                (codegraph_ai::fallback::extract_pois(&content), ParseStatus::UnreliableParse)
            }
            Err(e) => return Err(e),
        };

        let finding = assemble_finding(run_id, job_id, file_path, parse_status, analysis);
        self.persist(&finding).await?;
        info!(
            run_id,
            file = file_path,
            pois = finding.pois.len(),
            relationships = finding.relationships.len(),
            parse_status = finding.parse_status.as_str(),
            "file analyzed"
        );
        Ok(())
    }

    /// One transaction: POIs, candidate relationships, the outbox event.
    async fn persist(&self, finding: &FileAnalysisFinding) -> Result<(), PipelineError> {
        let store = &self.ctx.store;
        let (file_id, special) = store
            .file_meta(&finding.run_id, &finding.file_path)
            .await?
            .ok_or_else(|| {
                PipelineError::Inconsistency(format!(
                    "file '{}' missing from catalog",
                    finding.file_path
                ))
            })?;

        // Target files of cross-file relationships must be in the catalog;
        // external imports were already dropped during assembly.
        let mut target_files: BTreeMap<String, i64> = BTreeMap::new();
        for rel in &finding.relationships {
            if rel.target_file != finding.file_path
                && !target_files.contains_key(&rel.target_file)
            {
                match store.file_meta(&finding.run_id, &rel.target_file).await? {
                    Some((id, _)) => {
                        target_files.insert(rel.target_file.clone(), id);
                    }
                    None => {
                        debug!(
                            run_id = %finding.run_id,
                            target = %rel.target_file,
                            "relationship target not in corpus, skipping"
                        );
                    }
                }
            }
        }

        let mut tx = store.pool().begin().await.map_err(|e| PipelineError::Store(e.to_string()))?;
        let mut poi_ids: BTreeMap<String, i64> = BTreeMap::new();

        for poi in &finding.pois {
            let mut poi = poi.clone();
            if poi.qualified_name == finding.file_path {
                poi.special_file_type = special.clone();
            }
            let id = Store::ensure_poi_tx(&mut tx, &finding.run_id, file_id, &poi).await?;
            poi_ids.insert(poi.qualified_name.clone(), id);
        }

        // Only relationships whose candidate row was actually written may
        // appear in the published event: evidence for a row that does not
        // exist would strand reconciliation later.
        let mut persisted: Vec<RelationshipFinding> = Vec::new();
        for rel in &finding.relationships {
            let Some(&source_id) = poi_ids.get(&rel.source_qualified_name) else {
                warn!(source = %rel.source_qualified_name, "relationship source unresolved, skipping");
                continue;
            };
            let target_id = if let Some(&id) = poi_ids.get(&rel.target_qualified_name) {
                id
            } else if let Some(&target_file_id) = target_files.get(&rel.target_file) {
                // Anchor cross-file targets with their File POI.
                let file_poi = file_poi_finding(&rel.target_file);
                let id =
                    Store::ensure_poi_tx(&mut tx, &finding.run_id, target_file_id, &file_poi)
                        .await?;
                poi_ids.insert(rel.target_qualified_name.clone(), id);
                id
            } else {
                continue;
            };

            let initial = match finding.parse_status {
                ParseStatus::LlmSuccess => initial_score_from_finding(rel.confidence),
                ParseStatus::UnreliableParse => UNRELIABLE_PARSE_SCORE,
            };
            Store::insert_candidate_tx(
                &mut tx,
                &finding.run_id,
                source_id,
                target_id,
                rel.kind.as_str(),
                &rel.hash(),
                initial,
                finding.parse_status,
            )
            .await?;
            persisted.push(rel.clone());
        }

        Store::set_file_status_tx(
            &mut tx,
            &finding.run_id,
            &finding.file_path,
            finding.parse_status.as_str(),
        )
        .await?;

        let event = FileAnalysisFinding {
            relationships: persisted,
            ..finding.clone()
        };
        let payload = serde_json::to_string(&event)?;
        Store::insert_outbox_event_tx(
            &mut tx,
            &finding.run_id,
            OutboxEventType::FileAnalysisFinding,
            &payload,
        )
        .await?;

        tx.commit().await.map_err(|e| PipelineError::Store(e.to_string()))
    }
}

/// Resolve the model's raw findings into qualified, corpus-relative form.
fn assemble_finding(
    run_id: &str,
    job_id: &str,
    file_path: &str,
    parse_status: ParseStatus,
    analysis: codegraph_ai::FileAnalysis,
) -> FileAnalysisFinding {
    let directory = parent_dir(file_path);
    let file_name = file_path.rsplit('/').next().unwrap_or(file_path);

    let mut pois: Vec<PoiFinding> = Vec::new();
    for poi in &analysis.pois {
        if poi.name.is_empty() {
            continue;
        }
        let qn = qualified_name(file_path, &poi.name);
        if pois.iter().any(|p| p.qualified_name == qn) {
            continue;
        }
        pois.push(PoiFinding {
            name: poi.name.clone(),
            qualified_name: qn,
            kind: PoiKind::parse_lenient(&poi.kind),
            line: poi.line.max(0),
            is_exported: poi.is_exported,
            special_file_type: None,
        });
    }

    let mut relationships: Vec<RelationshipFinding> = Vec::new();
    for rel in &analysis.relationships {
        let Some(kind) = RelationshipKind::parse(&rel.kind.to_uppercase()) else {
            warn!(kind = %rel.kind, "unknown relationship kind, skipping");
            continue;
        };

        // Source: an in-file POI, or the file itself.
        let source_qualified = if rel.source == file_name || rel.source == file_path {
            ensure_file_poi(&mut pois, file_path);
            file_path.to_string()
        } else {
            let qn = qualified_name(file_path, &rel.source);
            if !pois.iter().any(|p| p.qualified_name == qn) {
                debug!(source = %rel.source, "relationship source is not a reported POI, skipping");
                continue;
            }
            qn
        };

        // Target: another file, or an in-file POI.
        let (target_qualified, target_file) = if looks_like_path(&rel.target) {
            match resolve_relative(&directory, &rel.target) {
                Some(path) if path == *file_path => {
                    ensure_file_poi(&mut pois, file_path);
                    (file_path.to_string(), file_path.to_string())
                }
                Some(path) => (path.clone(), path),
                None => {
                    debug!(target = %rel.target, "target escapes run root, skipping");
                    continue;
                }
            }
        } else {
            let qn = qualified_name(file_path, &rel.target);
            if !pois.iter().any(|p| p.qualified_name == qn) {
                debug!(target = %rel.target, "relationship target is not a reported POI, skipping");
                continue;
            }
            (qn, file_path.to_string())
        };

        if source_qualified == target_qualified {
            continue;
        }

        relationships.push(RelationshipFinding {
            source_qualified_name: source_qualified,
            target_qualified_name: target_qualified,
            kind,
            found: true,
            confidence: rel.confidence,
            source_file: file_path.to_string(),
            target_file,
        });
    }

    FileAnalysisFinding {
        run_id: run_id.to_string(),
        job_id: job_id.to_string(),
        file_path: file_path.to_string(),
        directory,
        parse_status,
        pois,
        relationships,
    }
}

fn ensure_file_poi(pois: &mut Vec<PoiFinding>, file_path: &str) {
    if !pois.iter().any(|p| p.qualified_name == file_path) {
        pois.push(file_poi_finding(file_path));
    }
}

fn file_poi_finding(file_path: &str) -> PoiFinding {
    PoiFinding {
        name: file_path.rsplit('/').next().unwrap_or(file_path).to_string(),
        qualified_name: file_path.to_string(),
        kind: PoiKind::File,
        line: 0,
        is_exported: false,
        special_file_type: None,
    }
}

#[async_trait]
impl JobHandler for FileAnalysisHandler {
    fn queue(&self) -> QueueName {
        QueueName::FileAnalysis
    }

    async fn process(&self, job: &ClaimedJob) -> Result<(), PipelineError> {
        let JobMessage::FileAnalysis { run_id, file_path } = &job.message else {
            return Err(PipelineError::Permanent(
                "unexpected message on file-analysis queue".into(),
            ));
        };
        self.analyze(run_id, &job.job_id, file_path).await
    }
}
