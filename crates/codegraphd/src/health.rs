//! HTTP surface of the daemon: liveness, readiness derived from the run
//! lifecycle, a plain-text status line, and the Prometheus registry.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Router};
use tokio::sync::watch;

use crate::metrics::PipelineMetrics;

/// Where the current run is in its lifecycle. Published by the
/// orchestrator over a watch channel; the handlers only ever read the
/// latest value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    /// Stores and queues are being opened; no jobs claimed yet.
    Booting,
    /// Workers are consuming the analysis queues.
    Analyzing,
    /// Queues are idle; validated relationships are streaming out.
    BuildingGraph,
    Finished,
    Cancelled,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunPhase::Booting => "booting",
            RunPhase::Analyzing => "analyzing",
            RunPhase::BuildingGraph => "building-graph",
            RunPhase::Finished => "finished",
            RunPhase::Cancelled => "cancelled",
        }
    }

    /// Whether the daemon can still make progress on work sent its way.
    fn accepts_work(&self) -> bool {
        matches!(self, RunPhase::Analyzing | RunPhase::BuildingGraph)
    }
}

pub struct HealthState {
    pub run_id: String,
    pub phase: watch::Receiver<RunPhase>,
    pub metrics: PipelineMetrics,
}

pub fn health_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/status", get(status))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Liveness: the process is up and serving.
async fn health() -> &'static str {
    "OK"
}

/// Readiness tracks the run lifecycle: a finished or cancelled daemon
/// reports unavailable so supervisors recycle it instead of routing to it.
async fn ready(State(state): State<Arc<HealthState>>) -> Result<&'static str, StatusCode> {
    let phase = *state.phase.borrow();
    if phase.accepts_work() {
        Ok("OK")
    } else {
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}

/// One line of operator-facing state for quick curls.
async fn status(State(state): State<Arc<HealthState>>) -> String {
    let phase = *state.phase.borrow();
    format!("run={} phase={}\n", state.run_id, phase.as_str())
}

async fn metrics(State(state): State<Arc<HealthState>>) -> String {
    state.metrics.encode()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_follows_the_lifecycle() {
        assert!(!RunPhase::Booting.accepts_work());
        assert!(RunPhase::Analyzing.accepts_work());
        assert!(RunPhase::BuildingGraph.accepts_work());
        assert!(!RunPhase::Finished.accepts_work());
        assert!(!RunPhase::Cancelled.accepts_work());
    }

    #[test]
    fn phase_labels_are_stable() {
        assert_eq!(RunPhase::Analyzing.as_str(), "analyzing");
        assert_eq!(RunPhase::BuildingGraph.as_str(), "building-graph");
    }
}
