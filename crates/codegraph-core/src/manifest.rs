//! Run manifest — the pre-computed contract for a run.
//!
//! Built once by Scout before any job is seeded, persisted to KV at
//! `manifest:{runId}`. ValidationWorker reads it to learn how many evidence
//! items each relationship must collect before reconciliation may fire.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Expected witnesses for a relationship (or, pre-POI, a file pair).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpectedEvidence {
    /// Number of evidence items that must arrive before reconciliation.
    pub expected: u32,
    /// Jobs expected to supply that evidence.
    pub jobs: Vec<String>,
}

/// Job ids per queue, enumerated up front.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobGraph {
    pub file_analysis: Vec<String>,
    pub directory_resolution: Vec<String>,
}

impl JobGraph {
    pub fn all_job_ids(&self) -> impl Iterator<Item = &String> {
        self.file_analysis
            .iter()
            .chain(self.directory_resolution.iter())
    }
}

/// The manifest document for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: String,
    pub root: String,
    pub created_at: String,
    pub job_graph: JobGraph,
    /// Files per directory; the aggregation barrier compares against this.
    pub directory_totals: BTreeMap<String, u32>,
    /// Pre-assigned directory-resolution job id per directory.
    pub directory_jobs: BTreeMap<String, String>,
    /// Pre-assigned file-analysis job id per file path.
    pub file_jobs: BTreeMap<String, String>,
    /// Keyed by relationship hash or, pre-POI, by file-pair key.
    pub relationship_evidence_map: BTreeMap<String, ExpectedEvidence>,
}

impl RunManifest {
    pub fn new(run_id: impl Into<String>, root: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            root: root.into(),
            created_at: Utc::now().to_rfc3339(),
            job_graph: JobGraph::default(),
            directory_totals: BTreeMap::new(),
            directory_jobs: BTreeMap::new(),
            file_jobs: BTreeMap::new(),
            relationship_evidence_map: BTreeMap::new(),
        }
    }

    /// KV key under which this manifest lives.
    pub fn kv_key(run_id: &str) -> String {
        format!("manifest:{}", run_id)
    }

    /// Expected evidence count for a key, if the manifest pre-computed one.
    pub fn expected_for(&self, key: &str) -> Option<u32> {
        self.relationship_evidence_map.get(key).map(|e| e.expected)
    }

    pub fn total_files(&self) -> usize {
        self.job_graph.file_analysis.len()
    }
}
