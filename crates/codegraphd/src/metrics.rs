//! Prometheus metrics for pipeline observability.

use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use std::sync::Arc;

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct QueueLabel(pub String);

impl prometheus_client::encoding::EncodeLabelSet for QueueLabel {
    fn encode(
        &self,
        mut encoder: prometheus_client::encoding::LabelSetEncoder,
    ) -> Result<(), std::fmt::Error> {
        use prometheus_client::encoding::EncodeLabel;
        ("queue", self.0.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct PipelineMetrics {
    pub queue_depth: Family<QueueLabel, Gauge>,
    pub outbox_pending: Gauge,
    pub dead_letters: Gauge,
    /// Sampled from the relationship table of the current run.
    pub relationships_validated: Gauge,
    pub relationships_rejected: Gauge,
    pub registry: Arc<Registry>,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let queue_depth = Family::<QueueLabel, Gauge>::default();
        registry.register(
            "codegraph_queue_depth",
            "Deliverable jobs waiting per queue",
            queue_depth.clone(),
        );

        let outbox_pending = Gauge::default();
        registry.register(
            "codegraph_outbox_pending",
            "Outbox rows awaiting publication",
            outbox_pending.clone(),
        );

        let dead_letters = Gauge::default();
        registry.register(
            "codegraph_dead_letters",
            "Jobs parked on the dead-letter queue",
            dead_letters.clone(),
        );

        let relationships_validated = Gauge::default();
        registry.register(
            "codegraph_relationships_validated",
            "Relationships of the current run reconciled to VALIDATED",
            relationships_validated.clone(),
        );

        let relationships_rejected = Gauge::default();
        registry.register(
            "codegraph_relationships_rejected",
            "Relationships of the current run reconciled to REJECTED",
            relationships_rejected.clone(),
        );

        Self {
            queue_depth,
            outbox_pending,
            dead_letters,
            relationships_validated,
            relationships_rejected,
            registry: Arc::new(registry),
        }
    }

    /// Encode all metrics as Prometheus text format.
    pub fn encode(&self) -> String {
        let mut buf = String::new();
        encode(&mut buf, &self.registry).unwrap_or_default();
        buf
    }
}
