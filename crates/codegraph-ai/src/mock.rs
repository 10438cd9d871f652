//! Scripted language model for tests and offline runs.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use codegraph_core::PipelineError;

use crate::client::{
    DirectoryAnalysis, FileAnalysis, LanguageModel, PoiAnalysis, PoiSummary, RelationshipSketch,
};

/// Deterministic model double. Script responses per file / directory / POI;
/// anything unscripted returns an empty analysis.
#[derive(Default)]
pub struct ScriptedModel {
    files: Mutex<HashMap<String, FileAnalysis>>,
    directories: Mutex<HashMap<String, DirectoryAnalysis>>,
    pois: Mutex<HashMap<String, PoiAnalysis>>,
    parse_failures: Mutex<HashMap<String, ()>>,
    transient_failures: Mutex<HashMap<String, u32>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_file(&self, file_path: &str, analysis: FileAnalysis) {
        self.files.lock().unwrap().insert(file_path.to_string(), analysis);
    }

    pub fn script_directory(&self, directory: &str, analysis: DirectoryAnalysis) {
        self.directories
            .lock()
            .unwrap()
            .insert(directory.to_string(), analysis);
    }

    pub fn script_poi(&self, qualified_name: &str, analysis: PoiAnalysis) {
        self.pois
            .lock()
            .unwrap()
            .insert(qualified_name.to_string(), analysis);
    }

    /// Make `analyze_file` for this path fail with a parse error, as if the
    /// model kept emitting unparseable output through all client retries.
    pub fn fail_file_parse(&self, file_path: &str) {
        self.parse_failures
            .lock()
            .unwrap()
            .insert(file_path.to_string(), ());
    }

    /// Make the next `count` calls for this path fail transiently.
    pub fn fail_file_transient(&self, file_path: &str, count: u32) {
        self.transient_failures
            .lock()
            .unwrap()
            .insert(file_path.to_string(), count);
    }

    /// Every call recorded, e.g. `file:a.js`, `dir:src`, `poi:a.js::foo`.
    pub fn call_log(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn analyze_file(
        &self,
        file_path: &str,
        _content: &str,
    ) -> Result<FileAnalysis, PipelineError> {
        self.record(format!("file:{}", file_path));

        {
            let mut transient = self.transient_failures.lock().unwrap();
            if let Some(remaining) = transient.get_mut(file_path) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(PipelineError::Llm("scripted transient failure".into()));
                }
            }
        }

        if self.parse_failures.lock().unwrap().contains_key(file_path) {
            return Err(PipelineError::LlmParse("scripted parse failure".into()));
        }

        Ok(self
            .files
            .lock()
            .unwrap()
            .get(file_path)
            .cloned()
            .unwrap_or_default())
    }

    async fn analyze_directory(
        &self,
        directory: &str,
        _summaries: &[PoiSummary],
        known: &[RelationshipSketch],
    ) -> Result<DirectoryAnalysis, PipelineError> {
        self.record(format!("dir:{}", directory));
        if let Some(scripted) = self.directories.lock().unwrap().get(directory) {
            return Ok(scripted.clone());
        }
        // Unscripted directories confirm nothing and deny nothing new: the
        // known candidates come back with found = true so barrier tests can
        // close evidence without per-test scripting.
        Ok(DirectoryAnalysis {
            relationships: known
                .iter()
                .map(|sketch| crate::client::LlmRelationship {
                    source: sketch.source_qualified_name.clone(),
                    target: sketch.target_qualified_name.clone(),
                    kind: sketch.kind.clone(),
                    found: true,
                    confidence: None,
                })
                .collect(),
        })
    }

    async fn analyze_poi(
        &self,
        poi: &PoiSummary,
        _context: &[PoiSummary],
    ) -> Result<PoiAnalysis, PipelineError> {
        self.record(format!("poi:{}", poi.qualified_name));
        Ok(self
            .pois
            .lock()
            .unwrap()
            .get(&poi.qualified_name)
            .cloned()
            .unwrap_or_default())
    }
}
