//! Path helpers shared by Scout and the analysis workers. All corpus paths
//! are run-root-relative with forward slashes.

/// Parent directory of a relative path; "." for root-level files.
pub fn parent_dir(path: &str) -> String {
    match path.rfind('/') {
        Some(idx) => path[..idx].to_string(),
        None => ".".to_string(),
    }
}

/// Resolve a possibly-relative import target against the directory of the
/// importing file. Collapses `.` and `..` components; returns None when the
/// target escapes the run root.
pub fn resolve_relative(base_dir: &str, target: &str) -> Option<String> {
    let mut parts: Vec<&str> = if target.starts_with("./") || target.starts_with("../") {
        if base_dir == "." {
            Vec::new()
        } else {
            base_dir.split('/').collect()
        }
    } else {
        Vec::new()
    };

    for component in target.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return None;
                }
            }
            other => parts.push(other),
        }
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Whether a relationship target string names a file rather than an
/// in-file POI.
pub fn looks_like_path(target: &str) -> bool {
    target.contains('/')
        || target.starts_with("./")
        || [
            ".js", ".jsx", ".ts", ".tsx", ".mjs", ".cjs", ".py", ".rs", ".go", ".java", ".rb",
            ".php", ".cs", ".json", ".sql",
        ]
        .iter()
        .any(|ext| target.ends_with(ext))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_of_nested_and_root() {
        assert_eq!(parent_dir("src/app/a.js"), "src/app");
        assert_eq!(parent_dir("a.js"), ".");
    }

    #[test]
    fn resolves_same_directory_imports() {
        assert_eq!(resolve_relative("src", "./b.js"), Some("src/b.js".into()));
        assert_eq!(resolve_relative(".", "./b.js"), Some("b.js".into()));
    }

    #[test]
    fn resolves_parent_imports() {
        assert_eq!(resolve_relative("src/app", "../lib/util.js"), Some("src/lib/util.js".into()));
    }

    #[test]
    fn escaping_the_root_is_rejected() {
        assert_eq!(resolve_relative(".", "../outside.js"), None);
        assert_eq!(resolve_relative("src", "../../outside.js"), None);
    }

    #[test]
    fn absolute_style_targets_pass_through() {
        assert_eq!(resolve_relative("src", "lib/util.js"), Some("lib/util.js".into()));
    }

    #[test]
    fn path_detection() {
        assert!(looks_like_path("./b.js"));
        assert!(looks_like_path("lib/util.py"));
        assert!(looks_like_path("schema.sql"));
        assert!(!looks_like_path("callee"));
        assert!(!looks_like_path("Widget"));
    }
}
