//! The graph store capability.

use async_trait::async_trait;
use codegraph_core::PipelineError;

/// A node to upsert, keyed by POI id. Properties are set on first create
/// only; a MERGE that matches an existing node leaves them untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphNode {
    pub id: i64,
    /// POI kind; becomes the node label.
    pub label: String,
    pub name: String,
    pub qualified_name: String,
    pub file_path: String,
    pub line: i64,
}

/// An edge to upsert, keyed by (source, target, kind). The confidence is
/// set on create and refreshed on match.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphEdge {
    pub source_id: i64,
    pub target_id: i64,
    pub kind: String,
    pub confidence: f64,
}

/// Driver seam over the external graph database. One batch is one atomic
/// transaction on the store.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn batch_upsert(
        &self,
        nodes: &[GraphNode],
        edges: &[GraphEdge],
    ) -> Result<(), PipelineError>;

    async fn close(&self) -> Result<(), PipelineError>;
}
