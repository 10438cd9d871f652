//! POI and relationship vocabulary shared by every worker.

use serde::{Deserialize, Serialize};

use crate::hash::relationship_hash;

/// Kind of a Point of Interest discovered in the corpus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoiKind {
    File,
    Class,
    Function,
    Variable,
    Table,
    Entrypoint,
    Manifest,
    Config,
    Other,
}

impl PoiKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoiKind::File => "File",
            PoiKind::Class => "Class",
            PoiKind::Function => "Function",
            PoiKind::Variable => "Variable",
            PoiKind::Table => "Table",
            PoiKind::Entrypoint => "Entrypoint",
            PoiKind::Manifest => "Manifest",
            PoiKind::Config => "Config",
            PoiKind::Other => "Other",
        }
    }

    /// Parse a kind label, mapping anything unknown to `Other`.
    pub fn parse_lenient(s: &str) -> Self {
        match s {
            "File" | "file" => PoiKind::File,
            "Class" | "class" => PoiKind::Class,
            "Function" | "function" | "method" => PoiKind::Function,
            "Variable" | "variable" => PoiKind::Variable,
            "Table" | "table" => PoiKind::Table,
            "Entrypoint" | "entrypoint" => PoiKind::Entrypoint,
            "Manifest" | "manifest" => PoiKind::Manifest,
            "Config" | "config" => PoiKind::Config,
            _ => PoiKind::Other,
        }
    }
}

/// Typed relationship between two POIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RelationshipKind {
    Calls,
    Imports,
    Exports,
    Extends,
    Contains,
    Uses,
}

impl RelationshipKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipKind::Calls => "CALLS",
            RelationshipKind::Imports => "IMPORTS",
            RelationshipKind::Exports => "EXPORTS",
            RelationshipKind::Extends => "EXTENDS",
            RelationshipKind::Contains => "CONTAINS",
            RelationshipKind::Uses => "USES",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CALLS" => Some(RelationshipKind::Calls),
            "IMPORTS" => Some(RelationshipKind::Imports),
            "EXPORTS" => Some(RelationshipKind::Exports),
            "EXTENDS" => Some(RelationshipKind::Extends),
            "CONTAINS" => Some(RelationshipKind::Contains),
            "USES" => Some(RelationshipKind::Uses),
            _ => None,
        }
    }
}

/// Status lattice of a candidate relationship. Rows move forward only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationshipStatus {
    PendingValidation,
    Validated,
    Rejected,
}

impl RelationshipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipStatus::PendingValidation => "PENDING_VALIDATION",
            RelationshipStatus::Validated => "VALIDATED",
            RelationshipStatus::Rejected => "REJECTED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING_VALIDATION" => Some(RelationshipStatus::PendingValidation),
            "VALIDATED" => Some(RelationshipStatus::Validated),
            "REJECTED" => Some(RelationshipStatus::Rejected),
            _ => None,
        }
    }
}

/// How the findings for a file were obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParseStatus {
    LlmSuccess,
    UnreliableParse,
}

impl ParseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParseStatus::LlmSuccess => "LLM_SUCCESS",
            ParseStatus::UnreliableParse => "UNRELIABLE_PARSE",
        }
    }
}

/// Which analysis pass produced a piece of evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceWorker {
    FileAnalysis,
    DirectoryResolution,
    RelationshipResolution,
}

impl SourceWorker {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceWorker::FileAnalysis => "FileAnalysisWorker",
            SourceWorker::DirectoryResolution => "DirectoryResolutionWorker",
            SourceWorker::RelationshipResolution => "RelationshipResolutionWorker",
        }
    }
}

/// A POI as reported by an analysis pass, before it gets a row id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoiFinding {
    pub name: String,
    pub qualified_name: String,
    pub kind: PoiKind,
    pub line: i64,
    pub is_exported: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub special_file_type: Option<String>,
}

/// One worker's opinion about one candidate relationship.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipFinding {
    pub source_qualified_name: String,
    pub target_qualified_name: String,
    pub kind: RelationshipKind,
    /// Whether this pass believes the relationship exists.
    pub found: bool,
    /// Explicit probability from the model, when it supplied one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub source_file: String,
    pub target_file: String,
}

impl RelationshipFinding {
    /// The agreement key for this relationship, identical across workers.
    pub fn hash(&self) -> String {
        relationship_hash(
            &self.source_qualified_name,
            &self.target_qualified_name,
            self.kind,
        )
    }
}

/// Payload of a `file-analysis-finding` outbox event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileAnalysisFinding {
    pub run_id: String,
    pub job_id: String,
    pub file_path: String,
    pub directory: String,
    pub parse_status: ParseStatus,
    pub pois: Vec<PoiFinding>,
    pub relationships: Vec<RelationshipFinding>,
}

/// Payload of a `directory-analysis-finding` outbox event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryAnalysisFinding {
    pub run_id: String,
    pub job_id: String,
    pub directory: String,
    pub relationships: Vec<RelationshipFinding>,
}

/// Payload of a `relationship-analysis-finding` outbox event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoiAnalysisFinding {
    pub run_id: String,
    pub job_id: String,
    pub poi_qualified_name: String,
    pub file_path: String,
    pub relationships: Vec<RelationshipFinding>,
}

/// Outbox event types. Wire names match the queue vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutboxEventType {
    #[serde(rename = "file-analysis-finding")]
    FileAnalysisFinding,
    #[serde(rename = "directory-analysis-finding")]
    DirectoryAnalysisFinding,
    #[serde(rename = "relationship-analysis-finding")]
    RelationshipAnalysisFinding,
}

impl OutboxEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxEventType::FileAnalysisFinding => "file-analysis-finding",
            OutboxEventType::DirectoryAnalysisFinding => "directory-analysis-finding",
            OutboxEventType::RelationshipAnalysisFinding => "relationship-analysis-finding",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "file-analysis-finding" => Some(OutboxEventType::FileAnalysisFinding),
            "directory-analysis-finding" => Some(OutboxEventType::DirectoryAnalysisFinding),
            "relationship-analysis-finding" => Some(OutboxEventType::RelationshipAnalysisFinding),
            _ => None,
        }
    }
}

/// One evidence entry as it travels on the `analysis-findings` queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub relationship_hash: String,
    pub source_worker: SourceWorker,
    pub found: bool,
    pub initial_score: f64,
    /// Job that produced this evidence; part of the dedup key.
    pub job_id: String,
    pub source_file: String,
    pub target_file: String,
    pub raw: serde_json::Value,
}

/// Construct the qualified name of a POI inside a file.
///
/// (run id, qualified name) is unique by construction because file paths are
/// unique per run and names are qualified by their file.
pub fn qualified_name(file_path: &str, name: &str) -> String {
    format!("{}::{}", file_path, name)
}
