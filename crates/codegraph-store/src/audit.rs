//! Reconciliation audit log and run summaries.

use codegraph_core::PipelineError;
use serde::{Deserialize, Serialize};

use crate::{now_rfc3339, store_err, Store};

/// Final verdict of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunVerdict {
    Success,
    Partial,
    Failed,
}

impl RunVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunVerdict::Success => "SUCCESS",
            RunVerdict::Partial => "PARTIAL",
            RunVerdict::Failed => "FAILED",
        }
    }
}

/// Counts recorded when a run terminates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub verdict: RunVerdict,
    pub validated: i64,
    pub rejected: i64,
    pub conflicted: i64,
    pub dead_lettered: i64,
    pub starved: i64,
}

impl Store {
    /// Record one reconciliation decision for audit.
    pub async fn insert_audit(
        &self,
        run_id: &str,
        relationship_hash: &str,
        status: &str,
        final_score: f64,
        evidence_count: i64,
        has_conflict: bool,
    ) -> Result<(), PipelineError> {
        sqlx::query(
            "INSERT INTO reconciliation_audit
                (run_id, relationship_hash, status, final_score, evidence_count,
                 has_conflict, decided_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(run_id)
        .bind(relationship_hash)
        .bind(status)
        .bind(final_score)
        .bind(evidence_count)
        .bind(has_conflict as i64)
        .bind(now_rfc3339())
        .execute(self.pool())
        .await
        .map_err(store_err)?;
        Ok(())
    }

    pub async fn write_run_summary(&self, summary: &RunSummary) -> Result<(), PipelineError> {
        sqlx::query(
            "INSERT INTO run_summaries
                (run_id, verdict, validated, rejected, conflicted, dead_lettered,
                 starved, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(run_id) DO UPDATE SET
                verdict = excluded.verdict,
                validated = excluded.validated,
                rejected = excluded.rejected,
                conflicted = excluded.conflicted,
                dead_lettered = excluded.dead_lettered,
                starved = excluded.starved,
                completed_at = excluded.completed_at",
        )
        .bind(&summary.run_id)
        .bind(summary.verdict.as_str())
        .bind(summary.validated)
        .bind(summary.rejected)
        .bind(summary.conflicted)
        .bind(summary.dead_lettered)
        .bind(summary.starved)
        .bind(now_rfc3339())
        .execute(self.pool())
        .await
        .map_err(store_err)?;
        Ok(())
    }

    pub async fn run_verdict(&self, run_id: &str) -> Result<Option<String>, PipelineError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT verdict FROM run_summaries WHERE run_id = ?1")
                .bind(run_id)
                .fetch_optional(self.pool())
                .await
                .map_err(store_err)?;
        Ok(row.map(|(v,)| v))
    }
}
