//! Parsing of model responses into findings.

use codegraph_core::PipelineError;

use crate::client::{DirectoryAnalysis, FileAnalysis, PoiAnalysis};

/// Strip markdown code fences, if present, and return the JSON body.
fn extract_json(response: &str) -> &str {
    if response.contains("```json") {
        response
            .split("```json")
            .nth(1)
            .and_then(|s| s.split("```").next())
            .map(|s| s.trim())
            .unwrap_or(response)
    } else if response.contains("```") {
        response
            .split("```")
            .nth(1)
            .map(|s| s.trim())
            .unwrap_or(response)
    } else {
        response.trim()
    }
}

pub fn parse_file_analysis(response: &str) -> Result<FileAnalysis, PipelineError> {
    serde_json::from_str(extract_json(response))
        .map_err(|e| PipelineError::LlmParse(format!("file analysis: {}", e)))
}

pub fn parse_directory_analysis(response: &str) -> Result<DirectoryAnalysis, PipelineError> {
    serde_json::from_str(extract_json(response))
        .map_err(|e| PipelineError::LlmParse(format!("directory analysis: {}", e)))
}

pub fn parse_poi_analysis(response: &str) -> Result<PoiAnalysis, PipelineError> {
    serde_json::from_str(extract_json(response))
        .map_err(|e| PipelineError::LlmParse(format!("poi analysis: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_json() {
        let out = parse_file_analysis(
            r#"{"pois": [{"name": "foo", "kind": "function", "line": 3}], "relationships": []}"#,
        )
        .unwrap();
        assert_eq!(out.pois.len(), 1);
        assert_eq!(out.pois[0].name, "foo");
        assert_eq!(out.pois[0].line, 3);
        assert!(!out.pois[0].is_exported);
    }

    #[test]
    fn parses_fenced_json() {
        let response = "Here you go:\n```json\n{\"relationships\": [{\"source\": \"a\", \"target\": \"b\", \"kind\": \"CALLS\"}]}\n```";
        let out = parse_directory_analysis(response).unwrap();
        assert_eq!(out.relationships.len(), 1);
        // found defaults to true when the model omits it.
        assert!(out.relationships[0].found);
    }

    #[test]
    fn semantically_empty_output_is_valid() {
        let out = parse_file_analysis("{}").unwrap();
        assert!(out.pois.is_empty());
        assert!(out.relationships.is_empty());
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let err = parse_poi_analysis("I could not analyze this file, sorry!").unwrap_err();
        assert!(matches!(err, PipelineError::LlmParse(_)));
    }

    #[test]
    fn explicit_found_false_survives() {
        let out = parse_directory_analysis(
            r#"{"relationships": [{"source": "a", "target": "b", "kind": "CALLS", "found": false, "confidence": 0.2}]}"#,
        )
        .unwrap();
        assert!(!out.relationships[0].found);
        assert_eq!(out.relationships[0].confidence, Some(0.2));
    }
}
