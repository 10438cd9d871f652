//! End-to-end pipeline scenarios driven deterministically: scout seeds the
//! run, then the publisher and every handler are drained in rounds until
//! the queues go idle, and finally the graph is built into the in-memory
//! store.

use std::path::Path;
use std::sync::Arc;

use codegraph_ai::mock::ScriptedModel;
use codegraph_ai::{DirectoryAnalysis, FileAnalysis, LlmPoi, LlmRelationship};
use codegraph_core::{PipelineConfig, RunManifest};
use codegraph_graph::{GraphBuilder, MemoryGraph};
use codegraph_queue::JobQueue;
use codegraph_store::{RunVerdict, Store};
use codegraph_workers::runner::drain_queue;
use codegraph_workers::{
    completion_reached, compute_run_summary, finalize_run, DirectoryAggregationHandler,
    DirectoryResolutionHandler, FileAnalysisHandler, OutboxPublisher,
    ReconciliationHandler, RelationshipResolutionHandler, Scout, ValidationHandler,
    WorkerContext,
};

struct Pipeline {
    _db_dir: tempfile::TempDir,
    ctx: WorkerContext,
    publisher: OutboxPublisher,
    file: FileAnalysisHandler,
    aggregation: DirectoryAggregationHandler,
    directory: DirectoryResolutionHandler,
    relationship: RelationshipResolutionHandler,
    validation: ValidationHandler,
    reconciliation: ReconciliationHandler,
}

async fn pipeline(corpus: &Path, model: Arc<ScriptedModel>) -> Pipeline {
    let db_dir = tempfile::tempdir().unwrap();
    let store = Store::open(db_dir.path().join("pipeline.db")).await.unwrap();
    let queue = JobQueue::new(store.pool().clone(), "", 900_000, 3).await.unwrap();
    let config = Arc::new(PipelineConfig {
        run_root: corpus.to_string_lossy().to_string(),
        ..PipelineConfig::default()
    });
    let ctx = WorkerContext::new(store.clone(), queue.clone(), model, config);

    Pipeline {
        _db_dir: db_dir,
        publisher: OutboxPublisher::new(store, queue, 50, 10),
        file: FileAnalysisHandler::new(ctx.clone()),
        aggregation: DirectoryAggregationHandler::new(ctx.clone()),
        directory: DirectoryResolutionHandler::new(ctx.clone()),
        relationship: RelationshipResolutionHandler::new(ctx.clone()),
        validation: ValidationHandler::new(ctx.clone()),
        reconciliation: ReconciliationHandler::new(ctx.clone()),
        ctx,
    }
}

impl Pipeline {
    async fn start(&self, run_id: &str) -> RunManifest {
        Scout::new(
            self.ctx.store.clone(),
            self.ctx.queue.clone(),
            self.ctx.config.clone(),
        )
        .start_run(run_id)
        .await
        .unwrap()
    }

    /// Drive publisher and workers in rounds until nothing moves.
    async fn run_until_idle(&self) {
        for _ in 0..200 {
            // Collapse retry backoffs so failed jobs are redeliverable now.
            sqlx::query("UPDATE jobs SET not_before = 0 WHERE status = 'pending'")
                .execute(self.ctx.queue.pool())
                .await
                .unwrap();

            let mut progress = self.publisher.tick().await.unwrap();
            progress += drain_queue(&self.ctx.queue, &self.file).await.unwrap();
            progress += drain_queue(&self.ctx.queue, &self.aggregation).await.unwrap();
            progress += drain_queue(&self.ctx.queue, &self.directory).await.unwrap();
            progress += drain_queue(&self.ctx.queue, &self.relationship).await.unwrap();
            progress += drain_queue(&self.ctx.queue, &self.validation).await.unwrap();
            progress += drain_queue(&self.ctx.queue, &self.reconciliation).await.unwrap();

            if progress == 0 && completion_reached(&self.ctx.store, &self.ctx.queue).await.unwrap()
            {
                return;
            }
        }
        panic!("pipeline did not reach idle");
    }

    async fn build_graph(&self) -> (Arc<MemoryGraph>, &'static str) {
        let graph = Arc::new(MemoryGraph::new());
        let builder = GraphBuilder::new(self.ctx.store.clone(), graph.clone(), 100, 2, 1);
        builder.run("r1").await.unwrap();
        (graph, "r1")
    }
}

fn write(dir: &Path, rel: &str, content: &str) {
    let path = dir.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn llm_poi(name: &str, line: i64) -> LlmPoi {
    LlmPoi {
        name: name.into(),
        kind: "function".into(),
        line,
        is_exported: false,
        confidence: Some(0.9),
    }
}

fn llm_rel(source: &str, target: &str, kind: &str, confidence: Option<f64>) -> LlmRelationship {
    LlmRelationship {
        source: source.into(),
        target: target.into(),
        kind: kind.into(),
        found: true,
        confidence,
    }
}

#[tokio::test]
async fn single_file_single_function() {
    let corpus = tempfile::tempdir().unwrap();
    write(corpus.path(), "a.js", "function foo() {}\n");

    let model = Arc::new(ScriptedModel::new());
    model.script_file(
        "a.js",
        FileAnalysis {
            pois: vec![llm_poi("foo", 1)],
            relationships: vec![],
        },
    );

    let p = pipeline(corpus.path(), model).await;
    p.start("r1").await;
    p.run_until_idle().await;

    assert_eq!(p.ctx.store.poi_count("r1").await.unwrap(), 1);
    assert_eq!(
        p.ctx.store.count_relationships_by_status("r1", "VALIDATED").await.unwrap(),
        0
    );

    let (graph, _) = p.build_graph().await;
    assert_eq!(graph.edge_count(), 0);
    assert_eq!(graph.node_count(), 0);
}

#[tokio::test]
async fn two_functions_one_call_validates() {
    let corpus = tempfile::tempdir().unwrap();
    write(corpus.path(), "a.js", "function caller() { callee(); }\nfunction callee() {}\n");

    let model = Arc::new(ScriptedModel::new());
    model.script_file(
        "a.js",
        FileAnalysis {
            pois: vec![llm_poi("caller", 1), llm_poi("callee", 2)],
            relationships: vec![llm_rel("caller", "callee", "CALLS", Some(0.8))],
        },
    );

    let p = pipeline(corpus.path(), model).await;
    p.start("r1").await;
    p.run_until_idle().await;

    assert_eq!(p.ctx.store.poi_count("r1").await.unwrap(), 2);
    let row = p
        .ctx
        .store
        .relationship_by_hash(
            "r1",
            &codegraph_core::hash::relationship_hash(
                "a.js::caller",
                "a.js::callee",
                codegraph_core::types::RelationshipKind::Calls,
            ),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, "VALIDATED");
    // File pass 0.8, directory pass agreement: 0.8 + 0.2 * 0.2 = 0.84.
    assert!((row.confidence - 0.84).abs() < 1e-12);
    assert!(row.confidence >= 0.5);

    let (graph, _) = p.build_graph().await;
    assert_eq!(graph.node_count(), 2);
    assert_eq!(graph.edge_count(), 1);
}

#[tokio::test]
async fn cross_file_import_scores_0_6() {
    let corpus = tempfile::tempdir().unwrap();
    write(corpus.path(), "a.js", "import b from './b.js';\n");
    write(corpus.path(), "b.js", "export default {};\n");

    let model = Arc::new(ScriptedModel::new());
    model.script_file(
        "a.js",
        FileAnalysis {
            pois: vec![],
            relationships: vec![llm_rel("a.js", "./b.js", "IMPORTS", None)],
        },
    );
    model.script_file("b.js", FileAnalysis::default());

    let p = pipeline(corpus.path(), model).await;
    p.start("r1").await;
    p.run_until_idle().await;

    // Two File POIs anchor the import.
    assert_eq!(p.ctx.store.poi_count("r1").await.unwrap(), 2);

    let hash = codegraph_core::hash::relationship_hash(
        "a.js",
        "b.js",
        codegraph_core::types::RelationshipKind::Imports,
    );
    let row = p.ctx.store.relationship_by_hash("r1", &hash).await.unwrap().unwrap();
    assert_eq!(row.status, "VALIDATED");
    // Default 0.5 from the file pass, agreement from the directory pass:
    // 0.5 + (1 - 0.5) * 0.2 = 0.6.
    assert!((row.confidence - 0.6).abs() < 1e-12);

    let (graph, _) = p.build_graph().await;
    assert_eq!(graph.edge_count(), 1);
    assert_eq!(graph.node_count(), 2);
}

#[tokio::test]
async fn conflicting_passes_reject_with_conflict() {
    let corpus = tempfile::tempdir().unwrap();
    write(corpus.path(), "a.js", "function caller() {}\nfunction callee() {}\n");

    let model = Arc::new(ScriptedModel::new());
    model.script_file(
        "a.js",
        FileAnalysis {
            pois: vec![llm_poi("caller", 1), llm_poi("callee", 2)],
            relationships: vec![llm_rel("caller", "callee", "CALLS", Some(0.8))],
        },
    );
    // The directory pass denies the call.
    model.script_directory(
        ".",
        DirectoryAnalysis {
            relationships: vec![LlmRelationship {
                source: "a.js::caller".into(),
                target: "a.js::callee".into(),
                kind: "CALLS".into(),
                found: false,
                confidence: None,
            }],
        },
    );

    let p = pipeline(corpus.path(), model).await;
    p.start("r1").await;
    p.run_until_idle().await;

    let hash = codegraph_core::hash::relationship_hash(
        "a.js::caller",
        "a.js::callee",
        codegraph_core::types::RelationshipKind::Calls,
    );
    let row = p.ctx.store.relationship_by_hash("r1", &hash).await.unwrap().unwrap();
    assert_eq!(row.status, "REJECTED");
    // 0.8 * 0.5 = 0.4, below the 0.5 threshold.
    assert!((row.confidence - 0.4).abs() < 1e-12);
    assert!(row.has_conflict);

    let (graph, _) = p.build_graph().await;
    assert_eq!(graph.edge_count(), 0);
}

#[tokio::test]
async fn unparseable_model_output_uses_regex_fallback() {
    let corpus = tempfile::tempdir().unwrap();
    write(corpus.path(), "a.js", "export function foo() {}\n");

    let model = Arc::new(ScriptedModel::new());
    model.fail_file_parse("a.js");

    let p = pipeline(corpus.path(), model).await;
    p.start("r1").await;
    p.run_until_idle().await;

    // The fallback extracted the declaration.
    let poi = p
        .ctx
        .store
        .poi_by_qualified_name("r1", "a.js::foo")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(poi.kind, "Function");

    // The file is marked as an unreliable parse; no edges exist.
    let (_, status) = p.ctx.store.file_parse_state("r1", "a.js").await.unwrap().unwrap();
    assert_eq!(status, "UNRELIABLE_PARSE");
    let (graph, _) = p.build_graph().await;
    assert_eq!(graph.edge_count(), 0);
}

#[tokio::test]
async fn empty_file_closes_counters_immediately() {
    let corpus = tempfile::tempdir().unwrap();
    write(corpus.path(), "a.js", "");

    let model = Arc::new(ScriptedModel::new());
    model.script_file("a.js", FileAnalysis::default());

    let p = pipeline(corpus.path(), model).await;
    let manifest = p.start("r1").await;
    p.run_until_idle().await;

    assert_eq!(p.ctx.store.poi_count("r1").await.unwrap(), 0);
    let summary =
        compute_run_summary(&p.ctx.store, &p.ctx.queue, &manifest, true).await.unwrap();
    assert_eq!(summary.verdict, RunVerdict::Success);
    assert_eq!(summary.starved, 0);
}

#[tokio::test]
async fn dead_lettered_file_starves_and_yields_partial() {
    let corpus = tempfile::tempdir().unwrap();
    write(corpus.path(), "a.js", "function caller() {}\nfunction callee() {}\n");
    write(corpus.path(), "b.js", "function lonely() {}\n");

    let model = Arc::new(ScriptedModel::new());
    model.script_file(
        "a.js",
        FileAnalysis {
            pois: vec![llm_poi("caller", 1), llm_poi("callee", 2)],
            relationships: vec![llm_rel("caller", "callee", "CALLS", Some(0.8))],
        },
    );
    // b.js keeps failing transiently until its attempts are exhausted.
    model.fail_file_transient("b.js", 100);

    let p = pipeline(corpus.path(), model).await;
    let manifest = p.start("r1").await;
    p.run_until_idle().await;

    // b.js never completed, so the directory barrier never fired and the
    // a.js call never collected its second witness.
    assert!(p.ctx.queue.dead_letter_count().await.unwrap() >= 1);
    let starved = p.ctx.store.starved_relationships("r1").await.unwrap();
    assert_eq!(starved.len(), 1);

    let summary =
        compute_run_summary(&p.ctx.store, &p.ctx.queue, &manifest, true).await.unwrap();
    assert_eq!(summary.verdict, RunVerdict::Partial);
    assert!(summary.dead_lettered >= 1);
    assert_eq!(summary.starved, 1);
}

#[tokio::test]
async fn replay_and_graph_rebuild_are_idempotent() {
    let corpus = tempfile::tempdir().unwrap();
    write(corpus.path(), "a.js", "function caller() {}\nfunction callee() {}\n");

    let model = Arc::new(ScriptedModel::new());
    model.script_file(
        "a.js",
        FileAnalysis {
            pois: vec![llm_poi("caller", 1), llm_poi("callee", 2)],
            relationships: vec![llm_rel("caller", "callee", "CALLS", Some(0.8))],
        },
    );

    let p = pipeline(corpus.path(), model).await;
    p.start("r1").await;
    p.run_until_idle().await;

    let validated =
        p.ctx.store.count_relationships_by_status("r1", "VALIDATED").await.unwrap();
    let pois = p.ctx.store.poi_count("r1").await.unwrap();

    // Driving an already-idle pipeline changes nothing.
    p.run_until_idle().await;
    assert_eq!(
        p.ctx.store.count_relationships_by_status("r1", "VALIDATED").await.unwrap(),
        validated
    );
    assert_eq!(p.ctx.store.poi_count("r1").await.unwrap(), pois);

    // Rebuilding the graph over the same store produces the same graph.
    let graph = Arc::new(MemoryGraph::new());
    let builder = GraphBuilder::new(p.ctx.store.clone(), graph.clone(), 100, 2, 1);
    builder.run("r1").await.unwrap();
    let (nodes, edges) = (graph.node_count(), graph.edge_count());
    builder.run("r1").await.unwrap();
    assert_eq!(graph.node_count(), nodes);
    assert_eq!(graph.edge_count(), edges);
}

#[tokio::test]
async fn finalize_cleans_coordination_keys() {
    let corpus = tempfile::tempdir().unwrap();
    write(corpus.path(), "a.js", "function foo() {}\n");

    let model = Arc::new(ScriptedModel::new());
    model.script_file(
        "a.js",
        FileAnalysis {
            pois: vec![llm_poi("foo", 1)],
            relationships: vec![],
        },
    );

    let p = pipeline(corpus.path(), model).await;
    p.start("r1").await;
    p.run_until_idle().await;

    finalize_run(&p.ctx.store, "r1").await.unwrap();
    let (n,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM kv_counters WHERE key LIKE 'evidence-count:r1:%'",
    )
    .fetch_one(p.ctx.store.pool())
    .await
    .unwrap();
    assert_eq!(n, 0);

    // Outbox history is retained for audit.
    assert!(p.ctx.store.outbox_count_by_status("PUBLISHED").await.unwrap() >= 1);
}
