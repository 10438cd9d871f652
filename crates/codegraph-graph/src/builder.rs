//! Streaming graph builder.
//!
//! Pages through VALIDATED relationships by row id (a cursor, never a full
//! materialization), groups them into fixed-size batches, and keeps at most
//! `max_concurrent_batches` writes in flight. Failed batches retry with
//! jittered backoff; exhausted retries fail the whole run.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use codegraph_core::PipelineError;
use codegraph_store::{Store, ValidatedEdge};
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::store::{GraphEdge, GraphNode, GraphStore};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GraphBuildReport {
    pub edges_written: u64,
    pub batches_dispatched: u64,
}

pub struct GraphBuilder {
    store: Store,
    graph: Arc<dyn GraphStore>,
    batch_size: usize,
    max_concurrent_batches: usize,
    batch_retries: u32,
    watermark: AtomicI64,
}

impl GraphBuilder {
    pub fn new(
        store: Store,
        graph: Arc<dyn GraphStore>,
        batch_size: usize,
        max_concurrent_batches: usize,
        batch_retries: u32,
    ) -> Self {
        Self {
            store,
            graph,
            batch_size: batch_size.max(1),
            max_concurrent_batches: max_concurrent_batches.max(1),
            batch_retries,
            watermark: AtomicI64::new(0),
        }
    }

    /// Highest relationship row id whose batch has committed.
    pub fn watermark(&self) -> i64 {
        self.watermark.load(Ordering::SeqCst)
    }

    /// Stream every VALIDATED relationship of the run into the graph store.
    /// Re-running over the same store is idempotent under merge semantics.
    pub async fn run(&self, run_id: &str) -> Result<GraphBuildReport, PipelineError> {
        let mut report = GraphBuildReport::default();
        let mut cursor = 0i64;
        let mut inflight: JoinSet<Result<i64, PipelineError>> = JoinSet::new();

        loop {
            let page = self
                .store
                .validated_page(run_id, cursor, self.batch_size as i64)
                .await?;
            if page.is_empty() {
                break;
            }
            cursor = page.last().map(|e| e.rel_id).unwrap_or(cursor);
            report.edges_written += page.len() as u64;
            report.batches_dispatched += 1;

            // Bounded concurrency: wait for a slot before dispatching more.
            while inflight.len() >= self.max_concurrent_batches {
                self.settle_one(&mut inflight).await?;
            }
            self.dispatch(&mut inflight, page);
        }

        while !inflight.is_empty() {
            self.settle_one(&mut inflight).await?;
        }

        info!(
            run_id,
            edges = report.edges_written,
            batches = report.batches_dispatched,
            "graph build complete"
        );
        Ok(report)
    }

    fn dispatch(&self, inflight: &mut JoinSet<Result<i64, PipelineError>>, page: Vec<ValidatedEdge>) {
        let graph = self.graph.clone();
        let retries = self.batch_retries;
        let high_id = page.last().map(|e| e.rel_id).unwrap_or(0);
        let (nodes, edges) = assemble(page);

        inflight.spawn(async move {
            let mut attempt = 0u32;
            loop {
                match graph.batch_upsert(&nodes, &edges).await {
                    Ok(()) => return Ok(high_id),
                    Err(e) if attempt < retries => {
                        attempt += 1;
                        let base = 200u64 * (1u64 << attempt.min(8));
                        let jitter = rand::random::<u64>() % (base / 2).max(1);
                        warn!(attempt, "graph batch failed ({}); retrying", e);
                        tokio::time::sleep(Duration::from_millis(base + jitter)).await;
                    }
                    Err(e) => return Err(e),
                }
            }
        });
    }

    async fn settle_one(
        &self,
        inflight: &mut JoinSet<Result<i64, PipelineError>>,
    ) -> Result<(), PipelineError> {
        match inflight.join_next().await {
            Some(Ok(Ok(high_id))) => {
                self.watermark.fetch_max(high_id, Ordering::SeqCst);
                Ok(())
            }
            Some(Ok(Err(e))) => Err(e),
            Some(Err(join)) => Err(PipelineError::Graph(format!("batch task panicked: {}", join))),
            None => Ok(()),
        }
    }
}

/// Turn one page of rows into self-consistent (node, node, edge) triples.
/// Nodes are deduplicated within the batch.
fn assemble(page: Vec<ValidatedEdge>) -> (Vec<GraphNode>, Vec<GraphEdge>) {
    let mut nodes: BTreeMap<i64, GraphNode> = BTreeMap::new();
    let mut edges = Vec::with_capacity(page.len());

    for row in page {
        nodes.entry(row.source_poi_id).or_insert_with(|| GraphNode {
            id: row.source_poi_id,
            label: row.source_kind.clone(),
            name: row.source_name.clone(),
            qualified_name: row.source_qualified_name.clone(),
            file_path: row.source_file.clone(),
            line: row.source_line,
        });
        nodes.entry(row.target_poi_id).or_insert_with(|| GraphNode {
            id: row.target_poi_id,
            label: row.target_kind.clone(),
            name: row.target_name.clone(),
            qualified_name: row.target_qualified_name.clone(),
            file_path: row.target_file.clone(),
            line: row.target_line,
        });
        edges.push(GraphEdge {
            source_id: row.source_poi_id,
            target_id: row.target_poi_id,
            kind: row.kind,
            confidence: row.confidence,
        });
    }

    (nodes.into_values().collect(), edges)
}

#[cfg(test)]
mod tests {
    use super::*;
    use codegraph_core::types::{ParseStatus, PoiFinding, PoiKind, RelationshipStatus};
    use codegraph_store::Store;

    async fn seeded_store(validated: usize) -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("s.db")).await.unwrap();
        let file = store.insert_file("r1", "a.js", None).await.unwrap();

        let mut tx = store.pool().begin().await.unwrap();
        let mut poi_ids = Vec::new();
        for i in 0..(validated + 1) {
            let id = Store::insert_poi_tx(
                &mut tx,
                "r1",
                file,
                &PoiFinding {
                    name: format!("fn{}", i),
                    qualified_name: format!("a.js::fn{}", i),
                    kind: PoiKind::Function,
                    line: i as i64,
                    is_exported: false,
                    special_file_type: None,
                },
            )
            .await
            .unwrap();
            poi_ids.push(id);
        }
        for i in 0..validated {
            Store::insert_candidate_tx(
                &mut tx,
                "r1",
                poi_ids[i],
                poi_ids[i + 1],
                "CALLS",
                &format!("h{}", i),
                0.8,
                ParseStatus::LlmSuccess,
            )
            .await
            .unwrap();
        }
        tx.commit().await.unwrap();

        for i in 0..validated {
            store
                .finalize_relationship("r1", &format!("h{}", i), RelationshipStatus::Validated, 0.8, false)
                .await
                .unwrap();
        }
        (dir, store)
    }

    #[tokio::test]
    async fn writes_every_validated_edge() {
        let (_dir, store) = seeded_store(5).await;
        let graph = Arc::new(crate::memory::MemoryGraph::new());
        let builder = GraphBuilder::new(store, graph.clone(), 2, 2, 0);

        let report = builder.run("r1").await.unwrap();
        assert_eq!(report.edges_written, 5);
        // 5 edges at batch size 2 -> 3 batches.
        assert_eq!(report.batches_dispatched, 3);
        assert_eq!(graph.edge_count(), 5);
        assert_eq!(graph.node_count(), 6);
        assert!(builder.watermark() > 0);
    }

    #[tokio::test]
    async fn oversize_set_splits_into_ordered_batches() {
        let (_dir, store) = seeded_store(3).await;
        let graph = Arc::new(crate::memory::MemoryGraph::new());
        // batch_size 3 would fit all; use 2 so the 3 rows need two batches.
        let builder = GraphBuilder::new(store, graph.clone(), 2, 1, 0);
        let report = builder.run("r1").await.unwrap();
        assert_eq!(report.batches_dispatched, 2);
        assert_eq!(graph.edge_count(), 3);
    }

    #[tokio::test]
    async fn rerun_is_idempotent() {
        let (_dir, store) = seeded_store(4).await;
        let graph = Arc::new(crate::memory::MemoryGraph::new());
        let builder = GraphBuilder::new(store, graph.clone(), 10, 2, 0);

        builder.run("r1").await.unwrap();
        let nodes = graph.node_count();
        let edges = graph.edge_count();

        builder.run("r1").await.unwrap();
        assert_eq!(graph.node_count(), nodes);
        assert_eq!(graph.edge_count(), edges);
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let (_dir, store) = seeded_store(2).await;
        let graph = Arc::new(crate::memory::MemoryGraph::new());
        graph.fail_next_batches(1);
        let builder = GraphBuilder::new(store, graph.clone(), 10, 1, 2);
        builder.run("r1").await.unwrap();
        assert_eq!(graph.edge_count(), 2);
    }

    #[tokio::test]
    async fn exhausted_retries_fail_the_run() {
        let (_dir, store) = seeded_store(2).await;
        let graph = Arc::new(crate::memory::MemoryGraph::new());
        graph.fail_next_batches(10);
        let builder = GraphBuilder::new(store, graph.clone(), 10, 1, 1);
        let err = builder.run("r1").await.unwrap_err();
        assert!(matches!(err, PipelineError::Graph(_)));
    }

}
