//! Relational store for the codegraph pipeline.
//!
//! One SQLite database (WAL, foreign keys ON) holds the POI catalog,
//! candidate relationships, the transactional outbox, the evidence log and
//! the key-value coordination state. All coordination primitives the
//! pipeline relies on — atomic counters, the manifest document, the outbox
//! CAS — are single-statement SQL operations on this database.

mod audit;
mod db;
mod evidence;
mod kv;
mod outbox;
mod pois;
mod relationships;

pub use audit::{RunSummary, RunVerdict};
pub use db::Store;
pub use kv::{dir_progress_key, dir_total_key, evidence_count_key, expected_key};
pub use outbox::OutboxRow;
pub use pois::PoiRow;
pub use relationships::{RelationshipRow, ValidatedEdge};

use codegraph_core::PipelineError;

pub(crate) fn store_err(e: sqlx::Error) -> PipelineError {
    PipelineError::Store(e.to_string())
}

pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
