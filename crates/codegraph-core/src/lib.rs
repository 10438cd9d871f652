//! Codegraph core - shared vocabulary for the analysis pipeline
//!
//! This crate provides:
//! - POI and relationship types shared by every worker
//! - The relationship hash (the single agreement key between workers)
//! - The confidence scoring algebra
//! - The run manifest document
//! - The pipeline configuration bundle and error taxonomy

pub mod config;
pub mod error;
pub mod hash;
pub mod manifest;
pub mod scoring;
pub mod types;

pub use config::PipelineConfig;
pub use error::PipelineError;
pub use hash::{file_pair_key, relationship_hash};
pub use manifest::RunManifest;
pub use scoring::{calculate_final_score, initial_score_from_finding, FinalScore};
pub use types::qualified_name;
