//! Scout — entry-point producer for a run.
//!
//! Walks the corpus, classifies special files, records the file catalog,
//! pre-computes the run manifest (job graph + file-pair evidence map), and
//! only then seeds the initial jobs. Consumers rely on the manifest being
//! present before the first job is claimed.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use codegraph_core::config::PipelineConfig;
use codegraph_core::hash::file_pair_key;
use codegraph_core::manifest::{ExpectedEvidence, RunManifest};
use codegraph_core::PipelineError;
use codegraph_queue::{JobMessage, JobQueue, QueueName};
use codegraph_store::Store;
use regex::Regex;
use tracing::info;
use uuid::Uuid;

use crate::paths::parent_dir;

/// Evidence expected for any pair of files sharing a directory: the file
/// pass plus the directory pass.
const INTRA_DIRECTORY_WITNESSES: u32 = 2;

pub struct Scout {
    store: Store,
    queue: JobQueue,
    config: Arc<PipelineConfig>,
}

impl Scout {
    pub fn new(store: Store, queue: JobQueue, config: Arc<PipelineConfig>) -> Self {
        Self {
            store,
            queue,
            config,
        }
    }

    /// Enumerate the corpus and seed the run. Produces exactly one manifest;
    /// a second call for the same run id fails.
    pub async fn start_run(&self, run_id: &str) -> Result<RunManifest, PipelineError> {
        let root = Path::new(&self.config.run_root);
        std::fs::metadata(root)?;

        let ignore_patterns = compile(&self.config.ignore_globs)?;
        let special_patterns: Vec<(Regex, String)> = {
            let mut compiled = Vec::new();
            for rule in &self.config.special_file_patterns {
                compiled.push((
                    Regex::new(&rule.pattern).map_err(|e| {
                        PipelineError::Config(format!("special pattern '{}': {}", rule.pattern, e))
                    })?,
                    rule.file_type.clone(),
                ));
            }
            compiled
        };

        let files = self.discover(root, &ignore_patterns)?;
        info!(run_id, files = files.len(), "scout discovered corpus");

        // Record the catalog. Duplicate paths abort the run here.
        for path in &files {
            let special = classify(path, &special_patterns);
            self.store.insert_file(run_id, path, special.as_deref()).await?;
        }

        let manifest = build_manifest(run_id, &self.config.run_root, &files);
        self.store.put_manifest(&manifest).await?;

        self.seed_jobs(&manifest).await?;
        info!(
            run_id,
            file_jobs = manifest.job_graph.file_analysis.len(),
            directories = manifest.directory_totals.len(),
            "run seeded"
        );
        Ok(manifest)
    }

    fn discover(&self, root: &Path, ignored: &[Regex]) -> Result<Vec<String>, PipelineError> {
        let mut seen = BTreeSet::new();
        let walker = ignore::WalkBuilder::new(root)
            .hidden(false)
            .git_ignore(true)
            .git_global(false)
            .git_exclude(false)
            .build();

        for entry in walker {
            let entry =
                entry.map_err(|e| PipelineError::Permanent(format!("corpus walk: {}", e)))?;
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(root)
                .map_err(|e| PipelineError::Permanent(format!("corpus walk: {}", e)))?;
            let rel = rel.to_string_lossy().replace('\\', "/");
            if ignored.iter().any(|re| re.is_match(&rel)) {
                continue;
            }
            if !seen.insert(rel.clone()) {
                return Err(PipelineError::Inconsistency(format!(
                    "duplicate file path '{}'",
                    rel
                )));
            }
        }
        Ok(seen.into_iter().collect())
    }

    async fn seed_jobs(&self, manifest: &RunManifest) -> Result<(), PipelineError> {
        // Directory expectations first so the barrier knows its totals even
        // before the first file completes.
        for (directory, total) in &manifest.directory_totals {
            let job_id = format!("exp-{}", manifest.directory_jobs[directory]);
            self.queue
                .enqueue(
                    QueueName::DirectoryAggregation,
                    &job_id,
                    &JobMessage::DirectoryExpectation {
                        run_id: manifest.run_id.clone(),
                        directory: directory.clone(),
                        total_files: *total,
                    },
                )
                .await?;
        }

        for (path, job_id) in &manifest.file_jobs {
            self.queue
                .enqueue(
                    QueueName::FileAnalysis,
                    job_id,
                    &JobMessage::FileAnalysis {
                        run_id: manifest.run_id.clone(),
                        file_path: path.clone(),
                    },
                )
                .await?;
        }
        Ok(())
    }
}

fn compile(patterns: &[String]) -> Result<Vec<Regex>, PipelineError> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p)
                .map_err(|e| PipelineError::Config(format!("ignore pattern '{}': {}", p, e)))
        })
        .collect()
}

fn classify(path: &str, patterns: &[(Regex, String)]) -> Option<String> {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    for (pattern, file_type) in patterns {
        if pattern.is_match(file_name) {
            return Some(file_type.clone());
        }
    }
    None
}

/// Pre-compute the job graph and the file-pair evidence map.
fn build_manifest(run_id: &str, root: &str, files: &[String]) -> RunManifest {
    let mut manifest = RunManifest::new(run_id, root);

    let mut by_directory: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut file_jobs: BTreeMap<String, String> = BTreeMap::new();

    for path in files {
        let job_id = Uuid::new_v4().to_string();
        manifest.job_graph.file_analysis.push(job_id.clone());
        file_jobs.insert(path.clone(), job_id);
        by_directory.entry(parent_dir(path)).or_default().push(path.clone());
    }

    for (directory, members) in &by_directory {
        let dir_job = Uuid::new_v4().to_string();
        manifest.job_graph.directory_resolution.push(dir_job.clone());
        manifest.directory_jobs.insert(directory.clone(), dir_job.clone());
        manifest
            .directory_totals
            .insert(directory.clone(), members.len() as u32);

        // Pre-POI evidence entries at file-pair granularity. ValidationWorker
        // refines these to POI-pair hashes at runtime.
        for (i, a) in members.iter().enumerate() {
            for b in members.iter().skip(i) {
                let mut jobs = vec![file_jobs[a].clone()];
                if b != a {
                    jobs.push(file_jobs[b].clone());
                }
                jobs.push(dir_job.clone());
                manifest.relationship_evidence_map.insert(
                    file_pair_key(a, b),
                    ExpectedEvidence {
                        expected: INTRA_DIRECTORY_WITNESSES,
                        jobs,
                    },
                );
            }
        }
    }

    manifest.file_jobs = file_jobs;
    manifest
}
