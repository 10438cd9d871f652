//! Best-effort regex extractor, used when the model's output stays
//! unparseable after the client's own retries. Findings recovered this way
//! are tagged UNRELIABLE_PARSE and scored at a fixed low confidence.

use regex::Regex;
use std::sync::OnceLock;

use crate::client::{FileAnalysis, LlmPoi};

struct Extractor {
    pattern: Regex,
    kind: &'static str,
    exported_group: bool,
}

fn extractors() -> &'static Vec<Extractor> {
    static EXTRACTORS: OnceLock<Vec<Extractor>> = OnceLock::new();
    EXTRACTORS.get_or_init(|| {
        vec![
            Extractor {
                pattern: Regex::new(
                    r"(?m)^\s*(export\s+)?(?:async\s+)?function\s+([A-Za-z_][A-Za-z0-9_]*)",
                )
                .unwrap(),
                kind: "Function",
                exported_group: true,
            },
            Extractor {
                pattern: Regex::new(r"(?m)^\s*(pub\s+)?(?:async\s+)?fn\s+([A-Za-z_][A-Za-z0-9_]*)")
                    .unwrap(),
                kind: "Function",
                exported_group: true,
            },
            Extractor {
                pattern: Regex::new(r"(?m)^\s*()def\s+([A-Za-z_][A-Za-z0-9_]*)").unwrap(),
                kind: "Function",
                exported_group: false,
            },
            Extractor {
                pattern: Regex::new(r"(?m)^\s*(export\s+)?class\s+([A-Za-z_][A-Za-z0-9_]*)")
                    .unwrap(),
                kind: "Class",
                exported_group: true,
            },
            Extractor {
                pattern: Regex::new(
                    r"(?m)^\s*(export\s+)?(?:const|let|var)\s+([A-Za-z_][A-Za-z0-9_]*)\s*=",
                )
                .unwrap(),
                kind: "Variable",
                exported_group: true,
            },
        ]
    })
}

/// Scan raw source text for declarations. Produces POIs only — the fallback
/// does not guess relationships.
pub fn extract_pois(content: &str) -> FileAnalysis {
    let mut pois: Vec<LlmPoi> = Vec::new();

    for extractor in extractors() {
        for captures in extractor.pattern.captures_iter(content) {
            let Some(name_match) = captures.get(2) else {
                continue;
            };
            let name = name_match.as_str().to_string();
            if pois.iter().any(|p| p.name == name) {
                continue;
            }
            let line = line_of(content, name_match.start());
            let is_exported = extractor.exported_group
                && captures.get(1).map(|m| !m.as_str().is_empty()).unwrap_or(false);
            pois.push(LlmPoi {
                name,
                kind: extractor.kind.to_string(),
                line,
                is_exported,
                confidence: None,
            });
        }
    }

    pois.sort_by_key(|p| p.line);
    FileAnalysis {
        pois,
        relationships: Vec::new(),
    }
}

fn line_of(content: &str, offset: usize) -> i64 {
    content[..offset].bytes().filter(|b| *b == b'\n').count() as i64 + 1
}
