//! Pipeline configuration bundle.

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// One special-file classification rule; first match wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecialFilePattern {
    /// Regex matched against the file name.
    pub pattern: String,
    /// Label recorded on the POI, e.g. "manifest", "config", "entrypoint".
    pub file_type: String,
}

/// Worker pool sizes, one per consuming queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConcurrency {
    pub file_analysis: usize,
    pub directory_aggregation: usize,
    pub directory_resolution: usize,
    pub relationship_resolution: usize,
    pub analysis_findings: usize,
    pub reconciliation: usize,
}

impl Default for WorkerConcurrency {
    fn default() -> Self {
        Self {
            file_analysis: 8,
            directory_aggregation: 2,
            directory_resolution: 4,
            relationship_resolution: 8,
            analysis_findings: 4,
            reconciliation: 4,
        }
    }
}

/// The full configuration bundle consumed by the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Root of the corpus to analyze.
    pub run_root: String,
    /// Regexes matched against relative paths; matches are skipped.
    pub ignore_globs: Vec<String>,
    pub special_file_patterns: Vec<SpecialFilePattern>,
    pub llm_timeout_ms: u64,
    /// Global cap on in-flight model requests, independent of worker counts.
    pub llm_concurrency: usize,
    pub worker_concurrency: WorkerConcurrency,
    /// Outbox rows fetched per publisher poll.
    pub outbox_batch_size: u32,
    pub outbox_poll_interval_ms: u64,
    /// Graph writer batch size.
    pub batch_size: usize,
    pub max_concurrent_batches: usize,
    pub graph_batch_retries: u32,
    pub validation_threshold: f64,
    pub queue_name_prefix: String,
    /// Files larger than this log a warning but are still processed.
    pub file_size_warn_bytes: u64,
    pub job_timeout_ms: i64,
    pub job_max_attempts: u32,
    pub reaper_interval_ms: u64,
    /// Consecutive idle polls required before the run is declared complete.
    pub stabilization_polls: u32,
    pub completion_poll_interval_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            run_root: ".".to_string(),
            ignore_globs: default_ignore_globs(),
            special_file_patterns: default_special_file_patterns(),
            llm_timeout_ms: 60_000,
            llm_concurrency: 4,
            worker_concurrency: WorkerConcurrency::default(),
            outbox_batch_size: 50,
            outbox_poll_interval_ms: 200,
            batch_size: 100,
            max_concurrent_batches: 4,
            graph_batch_retries: 3,
            validation_threshold: 0.5,
            queue_name_prefix: String::new(),
            file_size_warn_bytes: 1_000_000,
            job_timeout_ms: 15 * 60 * 1000,
            job_max_attempts: 3,
            reaper_interval_ms: 30_000,
            stabilization_polls: 3,
            completion_poll_interval_ms: 500,
        }
    }
}

impl PipelineConfig {
    /// Load a configuration file, layered over the defaults.
    pub fn from_json(json: &str) -> Result<Self, PipelineError> {
        let config: PipelineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if !(0.0..=1.0).contains(&self.validation_threshold) {
            return Err(PipelineError::Config(format!(
                "validation_threshold must be in [0, 1], got {}",
                self.validation_threshold
            )));
        }
        if self.batch_size == 0 || self.max_concurrent_batches == 0 {
            return Err(PipelineError::Config(
                "batch_size and max_concurrent_batches must be positive".into(),
            ));
        }
        if self.llm_concurrency == 0 {
            return Err(PipelineError::Config("llm_concurrency must be positive".into()));
        }
        for glob in &self.ignore_globs {
            regex::Regex::new(glob).map_err(|e| {
                PipelineError::Config(format!("invalid ignore pattern '{}': {}", glob, e))
            })?;
        }
        for special in &self.special_file_patterns {
            regex::Regex::new(&special.pattern).map_err(|e| {
                PipelineError::Config(format!(
                    "invalid special file pattern '{}': {}",
                    special.pattern, e
                ))
            })?;
        }
        Ok(())
    }
}

fn default_ignore_globs() -> Vec<String> {
    [
        r"(^|/)\.git(/|$)",
        r"(^|/)\.svn(/|$)",
        r"(^|/)\.hg(/|$)",
        r"(^|/)node_modules(/|$)",
        r"(^|/)target(/|$)",
        r"(^|/)dist(/|$)",
        r"(^|/)build(/|$)",
        r"(^|/)__pycache__(/|$)",
        r"(^|/)\.venv(/|$)",
        r"(^|/)vendor(/|$)",
        r"(^|/)coverage(/|$)",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_special_file_patterns() -> Vec<SpecialFilePattern> {
    [
        (r"^(package\.json|Cargo\.toml|pom\.xml|go\.mod|requirements\.txt)$", "manifest"),
        (r"^(Dockerfile|docker-compose\.ya?ml|Makefile)$", "build"),
        (r"(^\.env.*|config\.[a-z]+|.*\.config\.[a-z]+)$", "config"),
        (r"^(main|index|app|server)\.[a-z]+$", "entrypoint"),
        (r"^(schema|migrations?)\b.*$", "schema"),
    ]
    .into_iter()
    .map(|(pattern, file_type)| SpecialFilePattern {
        pattern: pattern.to_string(),
        file_type: file_type.to_string(),
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.validation_threshold, 0.5);
        assert_eq!(config.llm_concurrency, 4);
        assert_eq!(config.job_timeout_ms, 900_000);
    }

    #[test]
    fn from_json_layers_over_defaults() {
        let config =
            PipelineConfig::from_json(r#"{"run_root": "/corpus", "batch_size": 7}"#).unwrap();
        assert_eq!(config.run_root, "/corpus");
        assert_eq!(config.batch_size, 7);
        // Untouched fields keep defaults.
        assert_eq!(config.outbox_batch_size, 50);
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let err = PipelineConfig::from_json(r#"{"validation_threshold": 1.5}"#).unwrap_err();
        assert!(err.to_string().contains("validation_threshold"));
    }

    #[test]
    fn rejects_bad_ignore_pattern() {
        let err = PipelineConfig::from_json(r#"{"ignore_globs": ["("]}"#).unwrap_err();
        assert!(err.to_string().contains("invalid ignore pattern"));
    }

    #[test]
    fn special_patterns_classify_manifests_first() {
        let config = PipelineConfig::default();
        let rule = config
            .special_file_patterns
            .iter()
            .find(|p| regex::Regex::new(&p.pattern).unwrap().is_match("package.json"))
            .unwrap();
        assert_eq!(rule.file_type, "manifest");
    }
}
