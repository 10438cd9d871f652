//! Append-only evidence log.

use codegraph_core::types::{EvidenceItem, SourceWorker};
use codegraph_core::PipelineError;
use tracing::warn;

use crate::{store_err, Store};

impl Store {
    /// Append one evidence row. The unique index on
    /// (run, hash, source worker, job) makes redelivered findings no-ops;
    /// returns whether a row was actually inserted.
    pub async fn insert_evidence(
        &self,
        run_id: &str,
        item: &EvidenceItem,
    ) -> Result<bool, PipelineError> {
        let raw = serde_json::to_string(&item.raw)?;
        let done = sqlx::query(
            "INSERT INTO relationship_evidence
                (run_id, relationship_hash, source_worker, job_id, found, initial_score, raw_payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(run_id, relationship_hash, source_worker, job_id) DO NOTHING",
        )
        .bind(run_id)
        .bind(&item.relationship_hash)
        .bind(item.source_worker.as_str())
        .bind(&item.job_id)
        .bind(item.found as i64)
        .bind(item.initial_score)
        .bind(raw)
        .execute(self.pool())
        .await
        .map_err(store_err)?;
        Ok(done.rows_affected() > 0)
    }

    /// All evidence for one relationship, in the order it was recorded.
    /// The scoring algebra depends on this order; do not sort.
    pub async fn load_evidence(
        &self,
        run_id: &str,
        relationship_hash: &str,
    ) -> Result<Vec<EvidenceItem>, PipelineError> {
        let rows: Vec<(String, String, i64, f64, String)> = sqlx::query_as(
            "SELECT source_worker, job_id, found, initial_score, raw_payload
             FROM relationship_evidence
             WHERE run_id = ?1 AND relationship_hash = ?2
             ORDER BY id",
        )
        .bind(run_id)
        .bind(relationship_hash)
        .fetch_all(self.pool())
        .await
        .map_err(store_err)?;

        let mut items = Vec::with_capacity(rows.len());
        for (worker, job_id, found, initial_score, raw) in rows {
            let source_worker = match worker.as_str() {
                "FileAnalysisWorker" => SourceWorker::FileAnalysis,
                "DirectoryResolutionWorker" => SourceWorker::DirectoryResolution,
                "RelationshipResolutionWorker" => SourceWorker::RelationshipResolution,
                other => {
                    warn!(source_worker = other, "unknown evidence source, skipping row");
                    continue;
                }
            };
            items.push(EvidenceItem {
                relationship_hash: relationship_hash.to_string(),
                source_worker,
                found: found != 0,
                initial_score,
                job_id,
                source_file: String::new(),
                target_file: String::new(),
                raw: serde_json::from_str(&raw).unwrap_or(serde_json::Value::Null),
            });
        }
        Ok(items)
    }

    pub async fn evidence_count(
        &self,
        run_id: &str,
        relationship_hash: &str,
    ) -> Result<i64, PipelineError> {
        let (n,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM relationship_evidence
             WHERE run_id = ?1 AND relationship_hash = ?2",
        )
        .bind(run_id)
        .bind(relationship_hash)
        .fetch_one(self.pool())
        .await
        .map_err(store_err)?;
        Ok(n)
    }
}
