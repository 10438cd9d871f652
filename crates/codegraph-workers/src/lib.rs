//! Pipeline actors.
//!
//! Scout seeds a run; the analysis workers (file, directory, relationship)
//! extract findings through the language model; the outbox publisher couples
//! committed findings to queue emissions; validation collects evidence and
//! triggers reconciliation at the exact moment a relationship is fully
//! witnessed; reconciliation computes the terminal verdict.

pub mod completion;
pub mod context;
pub mod directory_aggregation;
pub mod directory_resolution;
pub mod file_analysis;
pub mod outbox_publisher;
pub mod paths;
pub mod reconciliation;
pub mod relationship_resolution;
pub mod runner;
pub mod scout;
pub mod validation;

pub use completion::{completion_reached, compute_run_summary, finalize_run};
pub use context::WorkerContext;
pub use directory_aggregation::DirectoryAggregationHandler;
pub use directory_resolution::DirectoryResolutionHandler;
pub use file_analysis::FileAnalysisHandler;
pub use outbox_publisher::OutboxPublisher;
pub use reconciliation::ReconciliationHandler;
pub use relationship_resolution::RelationshipResolutionHandler;
pub use runner::{spawn_worker_pool, JobHandler};
pub use scout::Scout;
pub use validation::ValidationHandler;
