//! Codegraph AI - the language model boundary
//!
//! This crate provides:
//! - The `LanguageModel` capability trait the workers program against
//! - An HTTP client implementation (OpenAI-compatible / Anthropic)
//! - A concurrency limiter enforcing the global in-flight request cap
//! - Prompt building with strict content/instruction demarcation
//! - Response parsing and the best-effort regex fallback extractor
//! - A scripted model for tests and offline runs

pub mod client;
pub mod fallback;
pub mod mock;
pub mod parse;
pub mod prompt;

pub use client::{
    DirectoryAnalysis, FileAnalysis, HttpLanguageModel, LanguageModel, LlmLimiter, LlmPoi,
    LlmProvider, LlmRelationship, PoiAnalysis, PoiSummary, RelationshipSketch,
};
