//! Pool construction and idempotent migrations.

use std::path::Path;
use std::time::Duration;

use codegraph_core::PipelineError;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use crate::store_err;

/// Schema statements, applied in order on every startup. All idempotent.
const MIGRATIONS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS files (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        run_id TEXT NOT NULL,
        path TEXT NOT NULL,
        checksum TEXT,
        language TEXT,
        special_file_type TEXT,
        status TEXT NOT NULL DEFAULT 'discovered',
        UNIQUE(run_id, path)
    )",
    "CREATE TABLE IF NOT EXISTS pois (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        run_id TEXT NOT NULL,
        file_id INTEGER NOT NULL REFERENCES files(id),
        name TEXT NOT NULL,
        kind TEXT NOT NULL,
        qualified_name TEXT NOT NULL,
        line_number INTEGER NOT NULL DEFAULT 0,
        is_exported INTEGER NOT NULL DEFAULT 0,
        special_file_type TEXT,
        UNIQUE(run_id, qualified_name)
    )",
    "CREATE TABLE IF NOT EXISTS relationships (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        run_id TEXT NOT NULL,
        source_poi_id INTEGER NOT NULL REFERENCES pois(id),
        target_poi_id INTEGER NOT NULL REFERENCES pois(id),
        kind TEXT NOT NULL,
        hash TEXT NOT NULL,
        confidence REAL NOT NULL DEFAULT 0.0,
        status TEXT NOT NULL DEFAULT 'PENDING_VALIDATION',
        parse_status TEXT NOT NULL DEFAULT 'LLM_SUCCESS',
        has_conflict INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        UNIQUE(run_id, hash)
    )",
    "CREATE INDEX IF NOT EXISTS idx_relationships_run_status
        ON relationships(run_id, status)",
    "CREATE TABLE IF NOT EXISTS relationship_evidence (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        run_id TEXT NOT NULL,
        relationship_hash TEXT NOT NULL,
        source_worker TEXT NOT NULL,
        job_id TEXT NOT NULL,
        found INTEGER NOT NULL,
        initial_score REAL NOT NULL,
        raw_payload TEXT NOT NULL,
        UNIQUE(run_id, relationship_hash, source_worker, job_id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_evidence_run_hash
        ON relationship_evidence(run_id, relationship_hash)",
    "CREATE TABLE IF NOT EXISTS outbox (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        run_id TEXT NOT NULL,
        event_type TEXT NOT NULL,
        payload TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'PENDING',
        error TEXT,
        created_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_outbox_status_id ON outbox(status, id)",
    "CREATE TABLE IF NOT EXISTS kv (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS kv_counters (
        key TEXT PRIMARY KEY,
        value INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS reconciliation_audit (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        run_id TEXT NOT NULL,
        relationship_hash TEXT NOT NULL,
        status TEXT NOT NULL,
        final_score REAL NOT NULL,
        evidence_count INTEGER NOT NULL,
        has_conflict INTEGER NOT NULL,
        decided_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS run_summaries (
        run_id TEXT PRIMARY KEY,
        verdict TEXT NOT NULL,
        validated INTEGER NOT NULL,
        rejected INTEGER NOT NULL,
        conflicted INTEGER NOT NULL,
        dead_lettered INTEGER NOT NULL,
        starved INTEGER NOT NULL,
        completed_at TEXT NOT NULL
    )",
];

/// Handle to the relational store. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if missing) the database at `path` and apply migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(10));

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .map_err(store_err)?;

        let store = Self { pool };
        store.migrate().await?;
        info!("store ready at {}", path.as_ref().display());
        Ok(store)
    }

    /// Wrap an existing pool (shared with the queue) and apply migrations.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, PipelineError> {
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate(&self) -> Result<(), PipelineError> {
        for statement in MIGRATIONS {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(store_err)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_applies_migrations_idempotently() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        let store = Store::open(&path).await.unwrap();
        // Re-applying on an existing database is a no-op.
        store.migrate().await.unwrap();

        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM outbox")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn wal_and_foreign_keys_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("store.db")).await.unwrap();

        let (mode,): (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");

        let (fk,): (i64,) = sqlx::query_as("PRAGMA foreign_keys")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(fk, 1);
    }
}
