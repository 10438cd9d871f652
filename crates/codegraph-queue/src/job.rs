//! Queue names and the job messages that flow through them.

use codegraph_core::types::{EvidenceItem, PoiKind};
use serde::{Deserialize, Serialize};

/// The fixed queue vocabulary. The orchestrator rejects any queue outside
/// this set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueName {
    FileAnalysis,
    DirectoryAggregation,
    DirectoryResolution,
    RelationshipResolution,
    AnalysisFindings,
    Reconciliation,
    FailedJobs,
}

impl QueueName {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::FileAnalysis => "file-analysis",
            QueueName::DirectoryAggregation => "directory-aggregation",
            QueueName::DirectoryResolution => "directory-resolution",
            QueueName::RelationshipResolution => "relationship-resolution",
            QueueName::AnalysisFindings => "analysis-findings",
            QueueName::Reconciliation => "reconciliation",
            QueueName::FailedJobs => "failed-jobs",
        }
    }

    pub fn all() -> [QueueName; 7] {
        [
            QueueName::FileAnalysis,
            QueueName::DirectoryAggregation,
            QueueName::DirectoryResolution,
            QueueName::RelationshipResolution,
            QueueName::AnalysisFindings,
            QueueName::Reconciliation,
            QueueName::FailedJobs,
        ]
    }
}

/// A POI handed to the relationship-resolution pass, with enough context to
/// prompt the model without another store round-trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoiContext {
    pub qualified_name: String,
    pub name: String,
    pub kind: PoiKind,
    pub file_path: String,
    pub directory: String,
}

/// Job types that flow through the queues.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum JobMessage {
    /// Analyze one file of the corpus.
    FileAnalysis { run_id: String, file_path: String },
    /// Seeded by Scout: records how many files a directory must complete.
    DirectoryExpectation {
        run_id: String,
        directory: String,
        total_files: u32,
    },
    /// One file of a directory finished analysis.
    FileCompleted {
        run_id: String,
        directory: String,
        file_path: String,
    },
    /// All files of a directory are analyzed; find cross-file relationships.
    DirectoryResolution { run_id: String, directory: String },
    /// Fanned out by the outbox publisher, one per POI.
    RelationshipResolution { run_id: String, poi: PoiContext },
    /// A batch of evidence items headed for validation.
    AnalysisFindings {
        run_id: String,
        items: Vec<EvidenceItem>,
    },
    /// All evidence for one relationship has arrived.
    Reconciliation {
        run_id: String,
        relationship_hash: String,
    },
}

impl JobMessage {
    pub fn run_id(&self) -> &str {
        match self {
            JobMessage::FileAnalysis { run_id, .. }
            | JobMessage::DirectoryExpectation { run_id, .. }
            | JobMessage::FileCompleted { run_id, .. }
            | JobMessage::DirectoryResolution { run_id, .. }
            | JobMessage::RelationshipResolution { run_id, .. }
            | JobMessage::AnalysisFindings { run_id, .. }
            | JobMessage::Reconciliation { run_id, .. } => run_id,
        }
    }
}
