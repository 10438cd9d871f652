//! In-memory graph store, used by tests and offline runs. Upsert semantics
//! mirror the Neo4j driver exactly: node properties stick from first
//! create, edge confidence refreshes on every merge.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use codegraph_core::PipelineError;

use crate::store::{GraphEdge, GraphNode, GraphStore};

#[derive(Default)]
pub struct MemoryGraph {
    nodes: Mutex<HashMap<i64, GraphNode>>,
    edges: Mutex<HashMap<(i64, i64, String), f64>>,
    batches: Mutex<u64>,
    /// Remaining batch calls that should fail, for retry tests.
    fail_next: Mutex<u32>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` batch upserts fail transiently.
    pub fn fail_next_batches(&self, count: u32) {
        *self.fail_next.lock().unwrap() = count;
    }

    pub fn node_count(&self) -> usize {
        self.nodes.lock().unwrap().len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.lock().unwrap().len()
    }

    pub fn batch_count(&self) -> u64 {
        *self.batches.lock().unwrap()
    }

    pub fn node(&self, id: i64) -> Option<GraphNode> {
        self.nodes.lock().unwrap().get(&id).cloned()
    }

    pub fn edge_confidence(&self, source: i64, target: i64, kind: &str) -> Option<f64> {
        self.edges
            .lock()
            .unwrap()
            .get(&(source, target, kind.to_string()))
            .copied()
    }
}

#[async_trait]
impl GraphStore for MemoryGraph {
    async fn batch_upsert(
        &self,
        nodes: &[GraphNode],
        edges: &[GraphEdge],
    ) -> Result<(), PipelineError> {
        {
            let mut fail = self.fail_next.lock().unwrap();
            if *fail > 0 {
                *fail -= 1;
                return Err(PipelineError::Graph("injected batch failure".into()));
            }
        }

        {
            let mut stored = self.nodes.lock().unwrap();
            for node in nodes {
                stored.entry(node.id).or_insert_with(|| node.clone());
            }
        }
        {
            let mut stored = self.edges.lock().unwrap();
            for edge in edges {
                stored.insert(
                    (edge.source_id, edge.target_id, edge.kind.clone()),
                    edge.confidence,
                );
            }
        }
        *self.batches.lock().unwrap() += 1;
        Ok(())
    }

    async fn close(&self) -> Result<(), PipelineError> {
        Ok(())
    }
}
