//! Path-based file classification.
//!
//! Scores are rough tie-breakers for ordering and risk. They are not a contract.

use std::path::Path;

use super::{FileCategory, FileClassification, FileClassifier};

const TEST_MARKERS: &[&str] = &["/test/", "/tests/", "__tests__", ".test.", ".spec.", "_test.", "/spec/"];
const CORE_MARKERS: &[&str] = &["core", "lib", "index", "main", "mod.rs"];
const STABLE_MARKERS: &[&str] = &["types", "interfaces", "constants", "config", "schema"];
const VOLATILE_MARKERS: &[&str] = &["experimental", "temp", "draft", "wip"];

/// Classifies by extension and path substrings
#[derive(Debug, Clone, Copy, Default)]
pub struct PathHeuristicClassifier;

pub fn language_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "ts" | "tsx" | "mts" | "cts" => "typescript",
        "js" | "jsx" | "mjs" | "cjs" => "javascript",
        "rs" => "rust",
        "py" => "python",
        "go" => "go",
        "java" => "java",
        "kt" | "kts" => "kotlin",
        "cs" => "csharp",
        "cpp" | "cc" | "cxx" | "hpp" => "cpp",
        "c" | "h" => "c",
        "swift" => "swift",
        "scala" => "scala",
        "rb" => "ruby",
        "json" => "json",
        "toml" => "toml",
        "yaml" | "yml" => "yaml",
        "md" | "mdx" => "markdown",
        "css" | "scss" => "css",
        "html" | "htm" => "html",
        _ => "unknown",
    }
}

fn category_for(normalized: &str, language: &str) -> FileCategory {
    let padded = format!("/{}", normalized);
    if TEST_MARKERS.iter().any(|m| padded.contains(m)) {
        return FileCategory::Test;
    }
    match language {
        "json" | "toml" | "yaml" => FileCategory::Config,
        "markdown" => FileCategory::Documentation,
        "css" | "html" => FileCategory::Asset,
        "unknown" => {
            let is_asset = [".png", ".jpg", ".jpeg", ".gif", ".svg", ".ico", ".woff"]
                .iter()
                .any(|ext| normalized.ends_with(ext));
            if is_asset {
                FileCategory::Asset
            } else {
                FileCategory::Other
            }
        }
        _ => FileCategory::Source,
    }
}

impl FileClassifier for PathHeuristicClassifier {
    fn classify(&self, path: &Path) -> FileClassification {
        let normalized = path.to_string_lossy().replace('\\', "/").to_lowercase();
        let language = language_for(path);
        let category = category_for(&normalized, language);

        let mut importance: f64 = 0.5;
        if CORE_MARKERS.iter().any(|m| normalized.contains(m)) {
            importance += 0.3;
        }
        if normalized.contains("api") {
            importance += 0.2;
        }
        if category == FileCategory::Test {
            importance -= 0.2;
        }

        let mut stability: f64 = 0.5;
        if STABLE_MARKERS.iter().any(|m| normalized.contains(m)) {
            stability += 0.3;
        }
        if VOLATILE_MARKERS.iter().any(|m| normalized.contains(m)) {
            stability -= 0.3;
        }

        FileClassification {
            language: language.to_string(),
            category,
            importance: importance.clamp(0.0, 1.0),
            stability: stability.clamp(0.0, 1.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_and_category() {
        let c = PathHeuristicClassifier;
        let source = c.classify(Path::new("src/services/user.ts"));
        assert_eq!(source.language, "typescript");
        assert_eq!(source.category, FileCategory::Source);
        assert!(source.is_statically_typed());

        let test = c.classify(Path::new("src/services/user.test.ts"));
        assert_eq!(test.category, FileCategory::Test);

        assert_eq!(c.classify(Path::new("package.json")).category, FileCategory::Config);
        assert!(!c.classify(Path::new("app.js")).is_statically_typed());
    }

    #[test]
    fn test_scores_stay_in_unit_range() {
        let c = PathHeuristicClassifier;
        let core = c.classify(Path::new("src/core/api/index.ts"));
        assert!(core.importance <= 1.0);
        assert!(core.importance > 0.5);

        let types = c.classify(Path::new("src/types.ts"));
        assert!(types.stability > 0.5);
    }
}
