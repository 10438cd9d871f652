//! Candidate relationship rows and their terminal transitions.

use codegraph_core::types::{ParseStatus, RelationshipStatus};
use codegraph_core::PipelineError;
use sqlx::SqliteConnection;

use crate::{now_rfc3339, store_err, Store};

/// A candidate relationship joined with both endpoint qualified names.
#[derive(Debug, Clone)]
pub struct RelationshipRow {
    pub id: i64,
    pub run_id: String,
    pub hash: String,
    pub kind: String,
    pub status: String,
    pub confidence: f64,
    pub parse_status: String,
    pub has_conflict: bool,
    pub source_qualified_name: String,
    pub target_qualified_name: String,
    pub source_file: String,
    pub target_file: String,
}

/// A VALIDATED relationship with everything the graph writer needs.
#[derive(Debug, Clone)]
pub struct ValidatedEdge {
    pub rel_id: i64,
    pub kind: String,
    pub confidence: f64,
    pub source_poi_id: i64,
    pub source_name: String,
    pub source_kind: String,
    pub source_qualified_name: String,
    pub source_file: String,
    pub source_line: i64,
    pub target_poi_id: i64,
    pub target_name: String,
    pub target_kind: String,
    pub target_qualified_name: String,
    pub target_file: String,
    pub target_line: i64,
}

type RelTuple = (
    i64,
    String,
    String,
    String,
    String,
    f64,
    String,
    i64,
    String,
    String,
    String,
    String,
);

const REL_SELECT: &str = "SELECT r.id, r.run_id, r.hash, r.kind, r.status, r.confidence,
        r.parse_status, r.has_conflict,
        sp.qualified_name, tp.qualified_name, sf.path, tf.path
     FROM relationships r
     JOIN pois sp ON sp.id = r.source_poi_id
     JOIN pois tp ON tp.id = r.target_poi_id
     JOIN files sf ON sf.id = sp.file_id
     JOIN files tf ON tf.id = tp.file_id";

fn rel_from_tuple(t: RelTuple) -> RelationshipRow {
    RelationshipRow {
        id: t.0,
        run_id: t.1,
        hash: t.2,
        kind: t.3,
        status: t.4,
        confidence: t.5,
        parse_status: t.6,
        has_conflict: t.7 != 0,
        source_qualified_name: t.8,
        target_qualified_name: t.9,
        source_file: t.10,
        target_file: t.11,
    }
}

impl Store {
    /// Insert a candidate in PENDING_VALIDATION inside an open transaction.
    /// A row already holding this (run, hash) is left untouched.
    pub async fn insert_candidate_tx(
        conn: &mut SqliteConnection,
        run_id: &str,
        source_poi_id: i64,
        target_poi_id: i64,
        kind: &str,
        hash: &str,
        initial_confidence: f64,
        parse_status: ParseStatus,
    ) -> Result<bool, PipelineError> {
        let done = sqlx::query(
            "INSERT INTO relationships
                (run_id, source_poi_id, target_poi_id, kind, hash, confidence,
                 status, parse_status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'PENDING_VALIDATION', ?7, ?8)
             ON CONFLICT(run_id, hash) DO NOTHING",
        )
        .bind(run_id)
        .bind(source_poi_id)
        .bind(target_poi_id)
        .bind(kind)
        .bind(hash)
        .bind(initial_confidence)
        .bind(parse_status.as_str())
        .bind(now_rfc3339())
        .execute(&mut *conn)
        .await
        .map_err(store_err)?;
        Ok(done.rows_affected() > 0)
    }

    pub async fn relationship_by_hash(
        &self,
        run_id: &str,
        hash: &str,
    ) -> Result<Option<RelationshipRow>, PipelineError> {
        let sql = format!("{} WHERE r.run_id = ?1 AND r.hash = ?2", REL_SELECT);
        let row: Option<RelTuple> = sqlx::query_as(&sql)
            .bind(run_id)
            .bind(hash)
            .fetch_optional(self.pool())
            .await
            .map_err(store_err)?;
        Ok(row.map(rel_from_tuple))
    }

    /// Open candidates whose source POI lives directly in `directory`.
    pub async fn pending_in_directory(
        &self,
        run_id: &str,
        directory: &str,
    ) -> Result<Vec<RelationshipRow>, PipelineError> {
        let prefix = if directory.is_empty() || directory == "." {
            String::new()
        } else {
            format!("{}/", directory)
        };
        let sql = format!(
            "{} WHERE r.run_id = ?1 AND r.status = 'PENDING_VALIDATION'
               AND sf.path LIKE ?2 || '%'
               AND instr(substr(sf.path, length(?2) + 1), '/') = 0
             ORDER BY r.id",
            REL_SELECT
        );
        let rows: Vec<RelTuple> = sqlx::query_as(&sql)
            .bind(run_id)
            .bind(&prefix)
            .fetch_all(self.pool())
            .await
            .map_err(store_err)?;
        Ok(rows.into_iter().map(rel_from_tuple).collect())
    }

    /// Move a candidate to a terminal status. The guard on
    /// PENDING_VALIDATION makes retries no-ops; returns whether this call
    /// performed the transition.
    pub async fn finalize_relationship(
        &self,
        run_id: &str,
        hash: &str,
        status: RelationshipStatus,
        confidence: f64,
        has_conflict: bool,
    ) -> Result<bool, PipelineError> {
        let done = sqlx::query(
            "UPDATE relationships
             SET status = ?1, confidence = ?2, has_conflict = ?3
             WHERE run_id = ?4 AND hash = ?5 AND status = 'PENDING_VALIDATION'",
        )
        .bind(status.as_str())
        .bind(confidence)
        .bind(has_conflict as i64)
        .bind(run_id)
        .bind(hash)
        .execute(self.pool())
        .await
        .map_err(store_err)?;
        Ok(done.rows_affected() > 0)
    }

    pub async fn count_relationships_by_status(
        &self,
        run_id: &str,
        status: &str,
    ) -> Result<i64, PipelineError> {
        let (n,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM relationships WHERE run_id = ?1 AND status = ?2",
        )
        .bind(run_id)
        .bind(status)
        .fetch_one(self.pool())
        .await
        .map_err(store_err)?;
        Ok(n)
    }

    pub async fn count_conflicted(&self, run_id: &str) -> Result<i64, PipelineError> {
        let (n,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM relationships WHERE run_id = ?1 AND has_conflict = 1",
        )
        .bind(run_id)
        .fetch_one(self.pool())
        .await
        .map_err(store_err)?;
        Ok(n)
    }

    /// Relationships still PENDING_VALIDATION when the queues went idle.
    pub async fn starved_relationships(
        &self,
        run_id: &str,
    ) -> Result<Vec<RelationshipRow>, PipelineError> {
        let sql = format!(
            "{} WHERE r.run_id = ?1 AND r.status = 'PENDING_VALIDATION' ORDER BY r.id",
            REL_SELECT
        );
        let rows: Vec<RelTuple> = sqlx::query_as(&sql)
            .bind(run_id)
            .fetch_all(self.pool())
            .await
            .map_err(store_err)?;
        Ok(rows.into_iter().map(rel_from_tuple).collect())
    }

    /// One page of the VALIDATED cursor, ordered by row id. The graph
    /// writer pages through this instead of materializing the result set.
    pub async fn validated_page(
        &self,
        run_id: &str,
        after_id: i64,
        limit: i64,
    ) -> Result<Vec<ValidatedEdge>, PipelineError> {
        let rows: Vec<(
            i64,
            String,
            f64,
            i64,
            String,
            String,
            String,
            String,
            i64,
            i64,
            String,
            String,
            String,
            String,
            i64,
        )> = sqlx::query_as(
            "SELECT r.id, r.kind, r.confidence,
                    sp.id, sp.name, sp.kind, sp.qualified_name, sf.path, sp.line_number,
                    tp.id, tp.name, tp.kind, tp.qualified_name, tf.path, tp.line_number
             FROM relationships r
             JOIN pois sp ON sp.id = r.source_poi_id
             JOIN pois tp ON tp.id = r.target_poi_id
             JOIN files sf ON sf.id = sp.file_id
             JOIN files tf ON tf.id = tp.file_id
             WHERE r.run_id = ?1 AND r.status = 'VALIDATED' AND r.id > ?2
             ORDER BY r.id
             LIMIT ?3",
        )
        .bind(run_id)
        .bind(after_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await
        .map_err(store_err)?;

        Ok(rows
            .into_iter()
            .map(|t| ValidatedEdge {
                rel_id: t.0,
                kind: t.1,
                confidence: t.2,
                source_poi_id: t.3,
                source_name: t.4,
                source_kind: t.5,
                source_qualified_name: t.6,
                source_file: t.7,
                source_line: t.8,
                target_poi_id: t.9,
                target_name: t.10,
                target_kind: t.11,
                target_qualified_name: t.12,
                target_file: t.13,
                target_line: t.14,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codegraph_core::types::{PoiFinding, PoiKind};

    async fn seed(store: &Store) -> (i64, i64) {
        let file = store.insert_file("r1", "a.js", None).await.unwrap();
        let mut tx = store.pool().begin().await.unwrap();
        let caller = Store::insert_poi_tx(
            &mut tx,
            "r1",
            file,
            &PoiFinding {
                name: "caller".into(),
                qualified_name: "a.js::caller".into(),
                kind: PoiKind::Function,
                line: 1,
                is_exported: false,
                special_file_type: None,
            },
        )
        .await
        .unwrap();
        let callee = Store::insert_poi_tx(
            &mut tx,
            "r1",
            file,
            &PoiFinding {
                name: "callee".into(),
                qualified_name: "a.js::callee".into(),
                kind: PoiKind::Function,
                line: 9,
                is_exported: false,
                special_file_type: None,
            },
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();
        (caller, callee)
    }

    #[tokio::test]
    async fn candidate_insert_is_idempotent_per_hash() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("s.db")).await.unwrap();
        let (a, b) = seed(&store).await;

        let mut tx = store.pool().begin().await.unwrap();
        let first =
            Store::insert_candidate_tx(&mut tx, "r1", a, b, "CALLS", "h1", 0.8, ParseStatus::LlmSuccess)
                .await
                .unwrap();
        let second =
            Store::insert_candidate_tx(&mut tx, "r1", a, b, "CALLS", "h1", 0.3, ParseStatus::LlmSuccess)
                .await
                .unwrap();
        tx.commit().await.unwrap();

        assert!(first);
        assert!(!second);
        let row = store.relationship_by_hash("r1", "h1").await.unwrap().unwrap();
        assert_eq!(row.status, "PENDING_VALIDATION");
        assert_eq!(row.confidence, 0.8);
        assert_eq!(row.source_qualified_name, "a.js::caller");
    }

    #[tokio::test]
    async fn finalize_moves_forward_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("s.db")).await.unwrap();
        let (a, b) = seed(&store).await;

        let mut tx = store.pool().begin().await.unwrap();
        Store::insert_candidate_tx(&mut tx, "r1", a, b, "CALLS", "h1", 0.8, ParseStatus::LlmSuccess)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let moved = store
            .finalize_relationship("r1", "h1", RelationshipStatus::Validated, 0.84, false)
            .await
            .unwrap();
        assert!(moved);

        // Replay is a no-op; the row keeps its first terminal state.
        let replay = store
            .finalize_relationship("r1", "h1", RelationshipStatus::Rejected, 0.1, true)
            .await
            .unwrap();
        assert!(!replay);

        let row = store.relationship_by_hash("r1", "h1").await.unwrap().unwrap();
        assert_eq!(row.status, "VALIDATED");
        assert_eq!(row.confidence, 0.84);
        assert!(!row.has_conflict);
    }

    #[tokio::test]
    async fn validated_page_orders_and_limits() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("s.db")).await.unwrap();
        let (a, b) = seed(&store).await;

        let mut tx = store.pool().begin().await.unwrap();
        for i in 0..5 {
            Store::insert_candidate_tx(
                &mut tx,
                "r1",
                a,
                b,
                "CALLS",
                &format!("h{}", i),
                0.8,
                ParseStatus::LlmSuccess,
            )
            .await
            .unwrap();
        }
        tx.commit().await.unwrap();

        for i in 0..5 {
            store
                .finalize_relationship("r1", &format!("h{}", i), RelationshipStatus::Validated, 0.8, false)
                .await
                .unwrap();
        }

        let page1 = store.validated_page("r1", 0, 3).await.unwrap();
        assert_eq!(page1.len(), 3);
        let page2 = store
            .validated_page("r1", page1.last().unwrap().rel_id, 3)
            .await
            .unwrap();
        assert_eq!(page2.len(), 2);
        assert!(page2[0].rel_id > page1[2].rel_id);
        assert_eq!(page1[0].source_name, "caller");
        assert_eq!(page1[0].target_file, "a.js");
    }

    #[tokio::test]
    async fn starved_lists_pending_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("s.db")).await.unwrap();
        let (a, b) = seed(&store).await;

        let mut tx = store.pool().begin().await.unwrap();
        Store::insert_candidate_tx(&mut tx, "r1", a, b, "CALLS", "h1", 0.8, ParseStatus::LlmSuccess)
            .await
            .unwrap();
        Store::insert_candidate_tx(&mut tx, "r1", b, a, "USES", "h2", 0.5, ParseStatus::LlmSuccess)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        store
            .finalize_relationship("r1", "h1", RelationshipStatus::Rejected, 0.25, true)
            .await
            .unwrap();

        let starved = store.starved_relationships("r1").await.unwrap();
        assert_eq!(starved.len(), 1);
        assert_eq!(starved[0].hash, "h2");
        assert_eq!(store.count_conflicted("r1").await.unwrap(), 1);
    }
}
