//! Key-value coordination state: atomic counters, the manifest document,
//! directory progress, the queue allow-list.
//!
//! Every operation is a single SQL statement, so each key behaves like an
//! atomic primitive under concurrent workers.

use codegraph_core::{PipelineError, RunManifest};

use crate::{store_err, Store};

impl Store {
    pub async fn kv_put(&self, key: &str, value: &str) -> Result<(), PipelineError> {
        sqlx::query(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(self.pool())
        .await
        .map_err(store_err)?;
        Ok(())
    }

    /// Insert only if absent; returns false when the key already existed.
    pub async fn kv_put_if_absent(&self, key: &str, value: &str) -> Result<bool, PipelineError> {
        let done = sqlx::query(
            "INSERT INTO kv (key, value) VALUES (?1, ?2) ON CONFLICT(key) DO NOTHING",
        )
        .bind(key)
        .bind(value)
        .execute(self.pool())
        .await
        .map_err(store_err)?;
        Ok(done.rows_affected() > 0)
    }

    pub async fn kv_get(&self, key: &str) -> Result<Option<String>, PipelineError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM kv WHERE key = ?1")
            .bind(key)
            .fetch_optional(self.pool())
            .await
            .map_err(store_err)?;
        Ok(row.map(|(v,)| v))
    }

    pub async fn kv_delete(&self, key: &str) -> Result<(), PipelineError> {
        sqlx::query("DELETE FROM kv WHERE key = ?1")
            .bind(key)
            .execute(self.pool())
            .await
            .map_err(store_err)?;
        Ok(())
    }

    /// Atomically increment a counter, returning the new value.
    pub async fn counter_incr(&self, key: &str) -> Result<i64, PipelineError> {
        let (value,): (i64,) = sqlx::query_as(
            "INSERT INTO kv_counters (key, value) VALUES (?1, 1)
             ON CONFLICT(key) DO UPDATE SET value = value + 1
             RETURNING value",
        )
        .bind(key)
        .fetch_one(self.pool())
        .await
        .map_err(store_err)?;
        Ok(value)
    }

    pub async fn counter_get(&self, key: &str) -> Result<Option<i64>, PipelineError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT value FROM kv_counters WHERE key = ?1")
            .bind(key)
            .fetch_optional(self.pool())
            .await
            .map_err(store_err)?;
        Ok(row.map(|(v,)| v))
    }

    pub async fn counter_delete(&self, key: &str) -> Result<(), PipelineError> {
        sqlx::query("DELETE FROM kv_counters WHERE key = ?1")
            .bind(key)
            .execute(self.pool())
            .await
            .map_err(store_err)?;
        Ok(())
    }

    /// Persist the run manifest. Overwriting an existing manifest is an
    /// error: the manifest is the run's contract and is written exactly once.
    pub async fn put_manifest(&self, manifest: &RunManifest) -> Result<(), PipelineError> {
        let key = RunManifest::kv_key(&manifest.run_id);
        let json = serde_json::to_string(manifest)?;
        if !self.kv_put_if_absent(&key, &json).await? {
            return Err(PipelineError::Inconsistency(format!(
                "manifest already exists for run '{}'",
                manifest.run_id
            )));
        }
        Ok(())
    }

    pub async fn load_manifest(&self, run_id: &str) -> Result<RunManifest, PipelineError> {
        let key = RunManifest::kv_key(run_id);
        let json = self.kv_get(&key).await?.ok_or_else(|| {
            PipelineError::Inconsistency(format!("manifest missing for run '{}'", run_id))
        })?;
        Ok(serde_json::from_str(&json)?)
    }

    pub async fn set_allowed_queues(&self, names: &[String]) -> Result<(), PipelineError> {
        let json = serde_json::to_string(names)?;
        self.kv_put("allowed-queues", &json).await
    }

    pub async fn allowed_queues(&self) -> Result<Vec<String>, PipelineError> {
        match self.kv_get("allowed-queues").await? {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Vec::new()),
        }
    }

    /// Drop all per-run coordination keys; called by run finalize.
    pub async fn cleanup_run_keys(&self, run_id: &str) -> Result<(), PipelineError> {
        for prefix in ["evidence-count:", "dir-progress:", "dir-total:", "expected:"] {
            let pattern = format!("{}{}:", prefix, run_id);
            sqlx::query("DELETE FROM kv_counters WHERE key LIKE ?1 || '%'")
                .bind(&pattern)
                .execute(self.pool())
                .await
                .map_err(store_err)?;
            sqlx::query("DELETE FROM kv WHERE key LIKE ?1 || '%'")
                .bind(&pattern)
                .execute(self.pool())
                .await
                .map_err(store_err)?;
        }
        Ok(())
    }
}

/// Key of the evidence counter for one relationship.
pub fn evidence_count_key(run_id: &str, relationship_hash: &str) -> String {
    format!("evidence-count:{}:{}", run_id, relationship_hash)
}

/// Key of the pinned expected-count for one relationship.
pub fn expected_key(run_id: &str, relationship_hash: &str) -> String {
    format!("expected:{}:{}", run_id, relationship_hash)
}

/// Key of the per-directory completion counter.
pub fn dir_progress_key(run_id: &str, directory: &str) -> String {
    format!("dir-progress:{}:{}", run_id, directory)
}

/// Key of the per-directory expected-file total.
pub fn dir_total_key(run_id: &str, directory: &str) -> String {
    format!("dir-total:{}:{}", run_id, directory)
}
