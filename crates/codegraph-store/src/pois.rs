//! File catalog and POI rows.

use codegraph_core::types::PoiFinding;
use codegraph_core::PipelineError;
use sqlx::SqliteConnection;

use crate::{store_err, Store};

/// A POI as persisted, joined with its file path.
#[derive(Debug, Clone)]
pub struct PoiRow {
    pub id: i64,
    pub run_id: String,
    pub file_path: String,
    pub name: String,
    pub kind: String,
    pub qualified_name: String,
    pub line_number: i64,
    pub is_exported: bool,
}

type PoiTuple = (i64, String, String, String, String, String, i64, i64);

fn row_from_tuple(t: PoiTuple) -> PoiRow {
    PoiRow {
        id: t.0,
        run_id: t.1,
        file_path: t.2,
        name: t.3,
        kind: t.4,
        qualified_name: t.5,
        line_number: t.6,
        is_exported: t.7 != 0,
    }
}

const POI_SELECT: &str = "SELECT p.id, p.run_id, f.path, p.name, p.kind, p.qualified_name,
        p.line_number, p.is_exported
     FROM pois p JOIN files f ON f.id = p.file_id";

impl Store {
    /// Record a discovered file. Duplicate (run, path) rows are an error:
    /// they would break POI qualified-name uniqueness downstream.
    pub async fn insert_file(
        &self,
        run_id: &str,
        path: &str,
        special_file_type: Option<&str>,
    ) -> Result<i64, PipelineError> {
        let result = sqlx::query(
            "INSERT INTO files (run_id, path, special_file_type) VALUES (?1, ?2, ?3)",
        )
        .bind(run_id)
        .bind(path)
        .bind(special_file_type)
        .execute(self.pool())
        .await;

        match result {
            Ok(done) => Ok(done.last_insert_rowid()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(
                PipelineError::Inconsistency(format!("duplicate file path '{}'", path)),
            ),
            Err(e) => Err(store_err(e)),
        }
    }

    pub async fn file_id(&self, run_id: &str, path: &str) -> Result<Option<i64>, PipelineError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM files WHERE run_id = ?1 AND path = ?2")
                .bind(run_id)
                .bind(path)
                .fetch_optional(self.pool())
                .await
                .map_err(store_err)?;
        Ok(row.map(|(id,)| id))
    }

    /// File row id plus the special-file classification Scout recorded.
    pub async fn file_meta(
        &self,
        run_id: &str,
        path: &str,
    ) -> Result<Option<(i64, Option<String>)>, PipelineError> {
        let row: Option<(i64, Option<String>)> = sqlx::query_as(
            "SELECT id, special_file_type FROM files WHERE run_id = ?1 AND path = ?2",
        )
        .bind(run_id)
        .bind(path)
        .fetch_optional(self.pool())
        .await
        .map_err(store_err)?;
        Ok(row)
    }

    /// Record how a file's findings were obtained, inside the same
    /// transaction that persists them.
    pub async fn set_file_status_tx(
        conn: &mut SqliteConnection,
        run_id: &str,
        path: &str,
        status: &str,
    ) -> Result<(), PipelineError> {
        sqlx::query("UPDATE files SET status = ?3 WHERE run_id = ?1 AND path = ?2")
            .bind(run_id)
            .bind(path)
            .bind(status)
            .execute(&mut *conn)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    /// File row id and its analysis status.
    pub async fn file_parse_state(
        &self,
        run_id: &str,
        path: &str,
    ) -> Result<Option<(i64, String)>, PipelineError> {
        let row: Option<(i64, String)> =
            sqlx::query_as("SELECT id, status FROM files WHERE run_id = ?1 AND path = ?2")
                .bind(run_id)
                .bind(path)
                .fetch_optional(self.pool())
                .await
                .map_err(store_err)?;
        Ok(row)
    }

    /// Idempotent insert for File POIs: two workers may both need the File
    /// node of a path they reference. Returns the row id either way.
    pub async fn ensure_poi_tx(
        conn: &mut SqliteConnection,
        run_id: &str,
        file_id: i64,
        poi: &PoiFinding,
    ) -> Result<i64, PipelineError> {
        sqlx::query(
            "INSERT INTO pois (run_id, file_id, name, kind, qualified_name, line_number,
                               is_exported, special_file_type)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(run_id, qualified_name) DO NOTHING",
        )
        .bind(run_id)
        .bind(file_id)
        .bind(&poi.name)
        .bind(poi.kind.as_str())
        .bind(&poi.qualified_name)
        .bind(poi.line)
        .bind(poi.is_exported as i64)
        .bind(poi.special_file_type.as_deref())
        .execute(&mut *conn)
        .await
        .map_err(store_err)?;

        let (id,): (i64,) = sqlx::query_as(
            "SELECT id FROM pois WHERE run_id = ?1 AND qualified_name = ?2",
        )
        .bind(run_id)
        .bind(&poi.qualified_name)
        .fetch_one(&mut *conn)
        .await
        .map_err(store_err)?;
        Ok(id)
    }

    /// Insert a POI inside an open transaction. Duplicate qualified names
    /// within a run are a logical inconsistency.
    pub async fn insert_poi_tx(
        conn: &mut SqliteConnection,
        run_id: &str,
        file_id: i64,
        poi: &PoiFinding,
    ) -> Result<i64, PipelineError> {
        let result = sqlx::query(
            "INSERT INTO pois (run_id, file_id, name, kind, qualified_name, line_number,
                               is_exported, special_file_type)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(run_id)
        .bind(file_id)
        .bind(&poi.name)
        .bind(poi.kind.as_str())
        .bind(&poi.qualified_name)
        .bind(poi.line)
        .bind(poi.is_exported as i64)
        .bind(poi.special_file_type.as_deref())
        .execute(&mut *conn)
        .await;

        match result {
            Ok(done) => Ok(done.last_insert_rowid()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(PipelineError::Inconsistency(format!(
                    "duplicate POI qualified name '{}'",
                    poi.qualified_name
                )))
            }
            Err(e) => Err(store_err(e)),
        }
    }

    pub async fn poi_by_qualified_name(
        &self,
        run_id: &str,
        qualified_name: &str,
    ) -> Result<Option<PoiRow>, PipelineError> {
        let sql = format!("{} WHERE p.run_id = ?1 AND p.qualified_name = ?2", POI_SELECT);
        let row: Option<PoiTuple> = sqlx::query_as(&sql)
            .bind(run_id)
            .bind(qualified_name)
            .fetch_optional(self.pool())
            .await
            .map_err(store_err)?;
        Ok(row.map(row_from_tuple))
    }

    /// POIs whose file lives directly in `directory`.
    pub async fn pois_in_directory(
        &self,
        run_id: &str,
        directory: &str,
    ) -> Result<Vec<PoiRow>, PipelineError> {
        let prefix = if directory.is_empty() || directory == "." {
            String::new()
        } else {
            format!("{}/", directory)
        };
        let sql = format!(
            "{} WHERE p.run_id = ?1 AND f.path LIKE ?2 || '%'
               AND instr(substr(f.path, length(?2) + 1), '/') = 0
             ORDER BY p.id",
            POI_SELECT
        );
        let rows: Vec<PoiTuple> = sqlx::query_as(&sql)
            .bind(run_id)
            .bind(&prefix)
            .fetch_all(self.pool())
            .await
            .map_err(store_err)?;
        Ok(rows.into_iter().map(row_from_tuple).collect())
    }

    pub async fn poi_count(&self, run_id: &str) -> Result<i64, PipelineError> {
        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM pois WHERE run_id = ?1")
            .bind(run_id)
            .fetch_one(self.pool())
            .await
            .map_err(store_err)?;
        Ok(n)
    }
}
