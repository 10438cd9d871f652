//! Shared dependencies handed to every worker.

use std::sync::Arc;

use codegraph_ai::LanguageModel;
use codegraph_core::PipelineConfig;
use codegraph_queue::JobQueue;
use codegraph_store::Store;

/// Everything a worker needs: the store, the queues, the (rate-limited)
/// language model and the configuration bundle. Cheap to clone.
#[derive(Clone)]
pub struct WorkerContext {
    pub store: Store,
    pub queue: JobQueue,
    pub model: Arc<dyn LanguageModel>,
    pub config: Arc<PipelineConfig>,
}

impl WorkerContext {
    pub fn new(
        store: Store,
        queue: JobQueue,
        model: Arc<dyn LanguageModel>,
        config: Arc<PipelineConfig>,
    ) -> Self {
        Self {
            store,
            queue,
            model,
            config,
        }
    }
}
