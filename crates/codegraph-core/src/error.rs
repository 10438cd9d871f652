//! Typed errors for the pipeline.
//!
//! The taxonomy follows the worker retry contract: transient errors are
//! retried by the queue, permanent errors go straight to the dead-letter
//! queue, and inconsistencies halt the run.

use thiserror::Error;

/// Errors that can occur anywhere in the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// I/O failure reading the corpus or scratch files.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Relational store failure.
    #[error("store error: {0}")]
    Store(String),

    /// Payload could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Language model call failed after the client's own retries.
    #[error("language model error: {0}")]
    Llm(String),

    /// Language model output could not be parsed into findings.
    #[error("language model parse error: {0}")]
    LlmParse(String),

    /// Graph store round-trip failed.
    #[error("graph store error: {0}")]
    Graph(String),

    /// Non-retryable input: path traversal, schema violation, bad payload.
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// Logical inconsistency that must halt the run.
    #[error("inconsistency: {0}")]
    Inconsistency(String),

    /// Invalid or missing configuration.
    #[error("config error: {0}")]
    Config(String),
}

impl PipelineError {
    /// Whether this error must not be retried by the queue.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            PipelineError::Permanent(_)
                | PipelineError::Inconsistency(_)
                | PipelineError::Config(_)
        )
    }
}
