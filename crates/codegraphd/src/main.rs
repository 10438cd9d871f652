//! codegraphd — codegraph analysis daemon.

mod health;
mod metrics;
mod orchestrator;

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use codegraph_ai::{HttpLanguageModel, LanguageModel, LlmLimiter};
use codegraph_core::PipelineConfig;
use codegraph_graph::{GraphStore, MemoryGraph, Neo4jStore};
use codegraph_store::RunVerdict;
use tracing::{info, warn};
use uuid::Uuid;

use health::{HealthState, RunPhase};
use metrics::PipelineMetrics;
use orchestrator::Orchestrator;

#[derive(Parser)]
#[command(name = "codegraphd", about = "Codegraph analysis daemon")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a repository and populate the graph store
    Run {
        /// Root directory of the repository to analyze
        #[arg(long, env = "CODEGRAPH_ROOT")]
        root: String,

        /// Path to the pipeline SQLite database
        #[arg(long, default_value = "./codegraph.db", env = "CODEGRAPH_DB")]
        database: String,

        /// Run identifier (generated if omitted)
        #[arg(long, env = "CODEGRAPH_RUN_ID")]
        run_id: Option<String>,

        /// Optional JSON configuration file layered over defaults
        #[arg(long, env = "CODEGRAPH_CONFIG")]
        config: Option<String>,

        /// HTTP port for health and metrics
        #[arg(long, default_value = "9090", env = "METRICS_PORT")]
        metrics_port: u16,

        /// Neo4j bolt URI; without it results stay in the relational store
        #[arg(long, env = "NEO4J_URI")]
        neo4j_uri: Option<String>,

        #[arg(long, default_value = "neo4j", env = "NEO4J_USER")]
        neo4j_user: String,

        #[arg(long, default_value = "", env = "NEO4J_PASSWORD")]
        neo4j_password: String,
    },

    /// Re-run the terminal graph stage over an existing database
    RebuildGraph {
        #[arg(long, default_value = "./codegraph.db", env = "CODEGRAPH_DB")]
        database: String,

        #[arg(long, env = "CODEGRAPH_RUN_ID")]
        run_id: String,

        #[arg(long, env = "NEO4J_URI")]
        neo4j_uri: Option<String>,

        #[arg(long, default_value = "neo4j", env = "NEO4J_USER")]
        neo4j_user: String,

        #[arg(long, default_value = "", env = "NEO4J_PASSWORD")]
        neo4j_password: String,
    },
}

async fn graph_store(
    uri: Option<&str>,
    user: &str,
    password: &str,
) -> Result<Arc<dyn GraphStore>> {
    match uri {
        Some(uri) => Ok(Arc::new(Neo4jStore::connect(uri, user, password).await?)),
        None => {
            warn!("no graph store configured; validated results stay in the relational store");
            Ok(Arc::new(MemoryGraph::new()))
        }
    }
}

fn load_config(root: &str, path: Option<&str>) -> Result<Arc<PipelineConfig>> {
    let mut config = match path {
        Some(path) => PipelineConfig::from_json(&std::fs::read_to_string(path)?)?,
        None => PipelineConfig::default(),
    };
    config.run_root = root.to_string();
    config.validate()?;
    Ok(Arc::new(config))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            root,
            database,
            run_id,
            config,
            metrics_port,
            neo4j_uri,
            neo4j_user,
            neo4j_password,
        } => {
            let run_id = run_id.unwrap_or_else(|| Uuid::new_v4().to_string());
            let config = load_config(&root, config.as_deref())?;

            let model: Arc<dyn LanguageModel> = Arc::new(LlmLimiter::new(
                Arc::new(HttpLanguageModel::from_env(config.llm_timeout_ms)?),
                config.llm_concurrency,
            ));
            let graph =
                graph_store(neo4j_uri.as_deref(), &neo4j_user, &neo4j_password).await?;

            let pipeline_metrics = PipelineMetrics::new();
            let (phase_tx, phase_rx) = tokio::sync::watch::channel(RunPhase::Booting);
            let health_state = Arc::new(HealthState {
                run_id: run_id.clone(),
                phase: phase_rx,
                metrics: pipeline_metrics.clone(),
            });
            tokio::spawn(async move {
                let addr = format!("0.0.0.0:{}", metrics_port);
                info!("metrics server listening on {}", addr);
                match tokio::net::TcpListener::bind(&addr).await {
                    Ok(listener) => {
                        if let Err(e) = axum::serve(listener, health::health_router(health_state)).await
                        {
                            warn!("metrics server stopped: {}", e);
                        }
                    }
                    Err(e) => warn!("metrics server failed to bind {}: {}", addr, e),
                }
            });

            let orchestrator = Orchestrator::bootstrap(
                &database,
                config,
                model,
                graph,
                pipeline_metrics,
            )
            .await?;

            info!(run_id = %run_id, root = %root, "starting analysis run");
            let verdict = orchestrator.run(&run_id, phase_tx).await?;
            info!(run_id = %run_id, verdict = verdict.as_str(), "run finished");

            if verdict == RunVerdict::Failed {
                anyhow::bail!("run {} failed", run_id);
            }
        }
        Commands::RebuildGraph {
            database,
            run_id,
            neo4j_uri,
            neo4j_user,
            neo4j_password,
        } => {
            let config = Arc::new(PipelineConfig::default());
            let graph =
                graph_store(neo4j_uri.as_deref(), &neo4j_user, &neo4j_password).await?;
            // The rebuild path never calls the model; a scripted stand-in
            // keeps the wiring uniform.
            let model: Arc<dyn LanguageModel> =
                Arc::new(codegraph_ai::mock::ScriptedModel::new());
            let orchestrator = Orchestrator::bootstrap(
                &database,
                config,
                model,
                graph,
                PipelineMetrics::new(),
            )
            .await?;
            orchestrator.rebuild_graph(&run_id).await?;
        }
    }

    Ok(())
}
