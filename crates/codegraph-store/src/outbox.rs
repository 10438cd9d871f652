//! Transactional outbox rows.
//!
//! Events are inserted in the same transaction as the state change that
//! produced them. The publisher is the only writer of the PUBLISHED and
//! FAILED transitions; PENDING -> PUBLISHED is a compare-and-set.

use codegraph_core::types::OutboxEventType;
use codegraph_core::PipelineError;
use sqlx::SqliteConnection;

use crate::{now_rfc3339, store_err, Store};

#[derive(Debug, Clone)]
pub struct OutboxRow {
    pub id: i64,
    pub run_id: String,
    pub event_type: String,
    pub payload: String,
    pub status: String,
}

impl Store {
    /// Insert a PENDING event inside an open transaction.
    pub async fn insert_outbox_event_tx(
        conn: &mut SqliteConnection,
        run_id: &str,
        event_type: OutboxEventType,
        payload_json: &str,
    ) -> Result<i64, PipelineError> {
        let done = sqlx::query(
            "INSERT INTO outbox (run_id, event_type, payload, status, created_at)
             VALUES (?1, ?2, ?3, 'PENDING', ?4)",
        )
        .bind(run_id)
        .bind(event_type.as_str())
        .bind(payload_json)
        .bind(now_rfc3339())
        .execute(&mut *conn)
        .await
        .map_err(store_err)?;
        Ok(done.last_insert_rowid())
    }

    /// Oldest PENDING rows, strictly ordered by id.
    pub async fn fetch_pending_outbox(&self, limit: u32) -> Result<Vec<OutboxRow>, PipelineError> {
        let rows: Vec<(i64, String, String, String, String)> = sqlx::query_as(
            "SELECT id, run_id, event_type, payload, status
             FROM outbox WHERE status = 'PENDING' ORDER BY id LIMIT ?1",
        )
        .bind(limit as i64)
        .fetch_all(self.pool())
        .await
        .map_err(store_err)?;
        Ok(rows
            .into_iter()
            .map(|(id, run_id, event_type, payload, status)| OutboxRow {
                id,
                run_id,
                event_type,
                payload,
                status,
            })
            .collect())
    }

    /// CAS the row to PUBLISHED inside the publisher's transaction.
    /// Returns false when another publisher got there first.
    pub async fn mark_outbox_published_tx(
        conn: &mut SqliteConnection,
        id: i64,
    ) -> Result<bool, PipelineError> {
        let done = sqlx::query(
            "UPDATE outbox SET status = 'PUBLISHED' WHERE id = ?1 AND status = 'PENDING'",
        )
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(store_err)?;
        Ok(done.rows_affected() > 0)
    }

    /// Park a malformed event. FAILED rows are never retried and never
    /// block later rows.
    pub async fn mark_outbox_failed(&self, id: i64, reason: &str) -> Result<(), PipelineError> {
        sqlx::query(
            "UPDATE outbox SET status = 'FAILED', error = ?2 WHERE id = ?1 AND status = 'PENDING'",
        )
        .bind(id)
        .bind(reason)
        .execute(self.pool())
        .await
        .map_err(store_err)?;
        Ok(())
    }

    pub async fn pending_outbox_count(&self) -> Result<i64, PipelineError> {
        let (n,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM outbox WHERE status = 'PENDING'")
                .fetch_one(self.pool())
                .await
                .map_err(store_err)?;
        Ok(n)
    }

    pub async fn outbox_count_by_status(&self, status: &str) -> Result<i64, PipelineError> {
        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM outbox WHERE status = ?1")
            .bind(status)
            .fetch_one(self.pool())
            .await
            .map_err(store_err)?;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pending_rows_come_back_in_id_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("s.db")).await.unwrap();

        let mut tx = store.pool().begin().await.unwrap();
        for i in 0..4 {
            Store::insert_outbox_event_tx(
                &mut tx,
                "r1",
                OutboxEventType::FileAnalysisFinding,
                &format!("{{\"n\":{}}}", i),
            )
            .await
            .unwrap();
        }
        tx.commit().await.unwrap();

        let rows = store.fetch_pending_outbox(10).await.unwrap();
        assert_eq!(rows.len(), 4);
        assert!(rows.windows(2).all(|w| w[0].id < w[1].id));
        assert_eq!(rows[0].event_type, "file-analysis-finding");
    }

    #[tokio::test]
    async fn publish_cas_fires_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("s.db")).await.unwrap();

        let mut tx = store.pool().begin().await.unwrap();
        let id = Store::insert_outbox_event_tx(
            &mut tx,
            "r1",
            OutboxEventType::DirectoryAnalysisFinding,
            "{}",
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.pool().begin().await.unwrap();
        assert!(Store::mark_outbox_published_tx(&mut tx, id).await.unwrap());
        assert!(!Store::mark_outbox_published_tx(&mut tx, id).await.unwrap());
        tx.commit().await.unwrap();

        assert_eq!(store.pending_outbox_count().await.unwrap(), 0);
        assert_eq!(store.outbox_count_by_status("PUBLISHED").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn rollback_leaves_row_pending() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("s.db")).await.unwrap();

        let mut tx = store.pool().begin().await.unwrap();
        let id = Store::insert_outbox_event_tx(
            &mut tx,
            "r1",
            OutboxEventType::RelationshipAnalysisFinding,
            "{}",
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.pool().begin().await.unwrap();
        assert!(Store::mark_outbox_published_tx(&mut tx, id).await.unwrap());
        tx.rollback().await.unwrap();

        // The transition rolled back with the transaction.
        assert_eq!(store.pending_outbox_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn failed_rows_do_not_block_later_rows() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("s.db")).await.unwrap();

        let mut tx = store.pool().begin().await.unwrap();
        let bad =
            Store::insert_outbox_event_tx(&mut tx, "r1", OutboxEventType::FileAnalysisFinding, "][")
                .await
                .unwrap();
        Store::insert_outbox_event_tx(&mut tx, "r1", OutboxEventType::FileAnalysisFinding, "{}")
            .await
            .unwrap();
        tx.commit().await.unwrap();

        store.mark_outbox_failed(bad, "malformed payload").await.unwrap();

        let rows = store.fetch_pending_outbox(10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(store.outbox_count_by_status("FAILED").await.unwrap(), 1);
    }
}
