//! Orchestrator — boots the pipeline, watches for completion, builds the
//! graph and settles the run verdict.

use std::sync::Arc;

use anyhow::Result;
use codegraph_ai::LanguageModel;
use codegraph_core::PipelineConfig;
use codegraph_graph::{GraphBuilder, GraphStore};
use codegraph_queue::{spawn_reaper, JobQueue, QueueName};
use codegraph_store::{RunVerdict, Store};
use codegraph_workers::{
    completion_reached, compute_run_summary, finalize_run, spawn_worker_pool,
    DirectoryAggregationHandler, DirectoryResolutionHandler, FileAnalysisHandler, JobHandler,
    OutboxPublisher, ReconciliationHandler, RelationshipResolutionHandler, Scout,
    ValidationHandler, WorkerContext,
};
use tokio::sync::watch;
use tracing::{error, info};

use crate::health::RunPhase;
use crate::metrics::{PipelineMetrics, QueueLabel};

pub struct Orchestrator {
    store: Store,
    queue: JobQueue,
    ctx: WorkerContext,
    graph: Arc<dyn GraphStore>,
    config: Arc<PipelineConfig>,
    metrics: PipelineMetrics,
}

impl Orchestrator {
    /// Open the store, set up the queues and register the allow-list.
    pub async fn bootstrap(
        database: &str,
        config: Arc<PipelineConfig>,
        model: Arc<dyn LanguageModel>,
        graph: Arc<dyn GraphStore>,
        metrics: PipelineMetrics,
    ) -> Result<Self> {
        let store = Store::open(database).await?;
        let queue = JobQueue::new(
            store.pool().clone(),
            &config.queue_name_prefix,
            config.job_timeout_ms,
            config.job_max_attempts,
        )
        .await?;
        store.set_allowed_queues(&queue.allowed_names()).await?;

        let ctx = WorkerContext::new(store.clone(), queue.clone(), model, config.clone());
        Ok(Self {
            store,
            queue,
            ctx,
            graph,
            config,
            metrics,
        })
    }

    /// Execute one full run and return its verdict. Lifecycle transitions
    /// are published on `phase` for the health surface.
    pub async fn run(&self, run_id: &str, phase: watch::Sender<RunPhase>) -> Result<RunVerdict> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let heartbeat_ms = (self.config.job_timeout_ms / 3).max(1_000) as u64;

        // Background plumbing: publisher, reaper, metrics sampling.
        let publisher = OutboxPublisher::new(
            self.store.clone(),
            self.queue.clone(),
            self.config.outbox_batch_size,
            self.config.outbox_poll_interval_ms,
        );
        let publisher_handle = publisher.spawn(shutdown_rx.clone());
        let reaper_stop = spawn_reaper(self.queue.clone(), self.config.reaper_interval_ms);
        self.spawn_metrics_sampler(run_id.to_string(), shutdown_rx.clone());

        // Worker pools, one per consuming queue.
        let concurrency = &self.config.worker_concurrency;
        let pools: Vec<(Arc<dyn JobHandler>, usize)> = vec![
            (
                Arc::new(FileAnalysisHandler::new(self.ctx.clone())),
                concurrency.file_analysis,
            ),
            (
                Arc::new(DirectoryAggregationHandler::new(self.ctx.clone())),
                concurrency.directory_aggregation,
            ),
            (
                Arc::new(DirectoryResolutionHandler::new(self.ctx.clone())),
                concurrency.directory_resolution,
            ),
            (
                Arc::new(RelationshipResolutionHandler::new(self.ctx.clone())),
                concurrency.relationship_resolution,
            ),
            (
                Arc::new(ValidationHandler::new(self.ctx.clone())),
                concurrency.analysis_findings,
            ),
            (
                Arc::new(ReconciliationHandler::new(self.ctx.clone())),
                concurrency.reconciliation,
            ),
        ];
        let mut workers = Vec::new();
        for (handler, count) in pools {
            workers.extend(spawn_worker_pool(
                self.queue.clone(),
                handler,
                count,
                heartbeat_ms,
                shutdown_rx.clone(),
            ));
        }

        // Seed the run; jobs flow only after the manifest is durable. A
        // manifest already present means an interrupted run: the outbox and
        // queue state are durable, so the workers just pick up where it
        // stopped.
        let manifest = match self.store.load_manifest(run_id).await {
            Ok(existing) => {
                info!(run_id, "manifest present, resuming interrupted run");
                existing
            }
            Err(_) => {
                let scout =
                    Scout::new(self.store.clone(), self.queue.clone(), self.config.clone());
                scout.start_run(run_id).await?
            }
        };
        let _ = phase.send(RunPhase::Analyzing);

        // Completion: idleness held through the stabilization window.
        // Ctrl-C is a run-level cancel: no new claims, in-flight jobs
        // finish, durable state is left in place for resumption.
        let mut stable = 0u32;
        let mut cancelled = false;
        loop {
            tokio::select! {
                _ = tokio::time::sleep(std::time::Duration::from_millis(
                    self.config.completion_poll_interval_ms,
                )) => {}
                _ = tokio::signal::ctrl_c() => {
                    info!(run_id, "cancel requested, stopping new job claims");
                    cancelled = true;
                    break;
                }
            }
            if completion_reached(&self.store, &self.queue).await? {
                stable += 1;
                if stable >= self.config.stabilization_polls {
                    break;
                }
            } else {
                stable = 0;
            }
        }
        if !cancelled {
            info!(run_id, "pipeline idle, stopping workers");
        }

        let _ = shutdown_tx.send(true);
        drop(reaper_stop);
        for worker in workers {
            let _ = worker.await;
        }
        let _ = publisher_handle.await;

        if cancelled {
            let _ = phase.send(RunPhase::Cancelled);
            info!(run_id, "run interrupted; outbox and counters remain durable for resumption");
            anyhow::bail!("run {} cancelled", run_id);
        }
        let _ = phase.send(RunPhase::BuildingGraph);

        // Terminal stage: stream the validated set into the graph store.
        let builder = GraphBuilder::new(
            self.store.clone(),
            self.graph.clone(),
            self.config.batch_size,
            self.config.max_concurrent_batches,
            self.config.graph_batch_retries,
        );
        let graph_built = match builder.run(run_id).await {
            Ok(report) => {
                info!(
                    run_id,
                    edges = report.edges_written,
                    batches = report.batches_dispatched,
                    "graph populated"
                );
                true
            }
            Err(e) => {
                error!(run_id, "graph build failed: {}", e);
                false
            }
        };

        let summary =
            compute_run_summary(&self.store, &self.queue, &manifest, graph_built).await?;
        self.store.write_run_summary(&summary).await?;
        finalize_run(&self.store, run_id).await?;
        self.graph.close().await?;
        let _ = phase.send(RunPhase::Finished);

        Ok(summary.verdict)
    }

    /// Re-run only the terminal graph stage over an existing store.
    pub async fn rebuild_graph(&self, run_id: &str) -> Result<()> {
        let builder = GraphBuilder::new(
            self.store.clone(),
            self.graph.clone(),
            self.config.batch_size,
            self.config.max_concurrent_batches,
            self.config.graph_batch_retries,
        );
        let report = builder.run(run_id).await?;
        info!(
            run_id,
            edges = report.edges_written,
            "graph rebuild complete"
        );
        self.graph.close().await?;
        Ok(())
    }

    fn spawn_metrics_sampler(&self, run_id: String, mut shutdown: watch::Receiver<bool>) {
        let store = self.store.clone();
        let queue = self.queue.clone();
        let metrics = self.metrics.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_millis(1_000));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        for name in QueueName::all() {
                            if name == QueueName::FailedJobs {
                                continue;
                            }
                            if let Ok(depth) = queue.depth(name).await {
                                metrics
                                    .queue_depth
                                    .get_or_create(&QueueLabel(name.as_str().to_string()))
                                    .set(depth);
                            }
                        }
                        if let Ok(pending) = store.pending_outbox_count().await {
                            metrics.outbox_pending.set(pending);
                        }
                        if let Ok(dead) = queue.dead_letter_count().await {
                            metrics.dead_letters.set(dead);
                        }
                        if let Ok(n) = store
                            .count_relationships_by_status(&run_id, "VALIDATED")
                            .await
                        {
                            metrics.relationships_validated.set(n);
                        }
                        if let Ok(n) = store
                            .count_relationships_by_status(&run_id, "REJECTED")
                            .await
                        {
                            metrics.relationships_rejected.set(n);
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        });
    }
}
