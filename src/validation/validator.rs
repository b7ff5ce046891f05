//! Change validator
//!
//! Six independent groups run concurrently and reduce to one verdict. Checks
//! never return errors: collaborator failures become issues.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

use super::result::{GroupKind, Severity, ValidationGroup, ValidationIssue, ValidationResult};
use super::rules::evaluate_rules;
use crate::changes::{path_key, ChangeSet, FileChange, OperationType};
use crate::collaborators::{
    language_for, Collaborators, FileCategory, FileClassifier, FileStateStore, RuleEvaluator, SyntaxChecker,
    TypeChecker,
};
use crate::config::ValidationLevel;
use crate::graph::DependencyGraph;

static TYPE_DECL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:class|interface|struct|enum|trait|type)\s+([A-Za-z_$][\w$]*)").expect("Invalid regex")
});
static SCRIPT_FN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bfunction\s*\*?\s*([A-Za-z_$][\w$]*)\s*\(").expect("Invalid regex"));
static SNAKE_FN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(?:fn|def)\s+([A-Za-z_]\w*)").expect("Invalid regex"));
static PASCAL_CASE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z][A-Za-z0-9]*$").expect("Invalid regex"));
static CAMEL_CASE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^_?[a-z$][A-Za-z0-9$]*$").expect("Invalid regex"));
static SNAKE_CASE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^_?[a-z][a-z0-9_]*$").expect("Invalid regex"));

const SEARCH_SKIP_DIRS: &[&str] = &["node_modules", "target", ".git", "dist", "build"];
const SEARCH_MAX_DEPTH: usize = 8;

pub struct ChangeValidator {
    classifier: Arc<dyn FileClassifier>,
    syntax: Arc<dyn SyntaxChecker>,
    types: Arc<dyn TypeChecker>,
    state: Arc<dyn FileStateStore>,
    rules: Arc<dyn RuleEvaluator>,
}

impl ChangeValidator {
    pub fn new(collaborators: &Collaborators) -> Self {
        Self {
            classifier: collaborators.classifier.clone(),
            syntax: collaborators.syntax.clone(),
            types: collaborators.types.clone(),
            state: collaborators.state.clone(),
            rules: collaborators.rules.clone(),
        }
    }

    pub async fn validate(
        &self,
        root: &Path,
        change_set: &ChangeSet,
        graph: &DependencyGraph,
        level: ValidationLevel,
    ) -> ValidationResult {
        let (syntax, type_check, dependency, consistency, test, custom) = tokio::join!(
            self.syntax_group(change_set),
            self.type_group(change_set, level),
            async { dependency_group(change_set, graph) },
            async { consistency_group(change_set) },
            self.test_group(root, change_set, level),
            self.custom_group(change_set),
        );

        let result = ValidationResult::new(level, syntax, type_check, dependency, consistency, test, custom);
        tracing::info!(
            change_set = %change_set.id,
            level = %level,
            overall = %result.overall,
            errors = result.error_count(),
            warnings = result.warning_count(),
            "Validated change set"
        );
        result
    }

    /// Check the files as they now exist on disk after execution
    pub async fn validate_workspace(&self, root: &Path, paths: &[PathBuf], level: ValidationLevel) -> ValidationResult {
        let mut current: Vec<(PathBuf, String)> = Vec::new();
        let mut issues = Vec::new();
        for path in paths {
            match self.state.capture(root, path).await {
                Ok(state) => {
                    if let Some(content) = state.content {
                        current.push((path.clone(), content));
                    }
                }
                Err(e) => issues.push(
                    ValidationIssue::new(Severity::Warning, format!("Could not read {}: {}", path.display(), e))
                        .in_file(path),
                ),
            }
        }

        for (path, content) in &current {
            if let Some(issue) = self.check_syntax(path, content).await {
                issues.push(issue);
            }
        }
        let syntax = ValidationGroup::from_issues(GroupKind::Syntax, current.len(), issues);

        let type_check = if level == ValidationLevel::Basic {
            ValidationGroup::skipped(GroupKind::Type)
        } else {
            let mut checked = 0;
            let mut issues = Vec::new();
            for (path, content) in &current {
                if !self.is_typed_source(path) {
                    continue;
                }
                checked += 1;
                if let Some(issue) = self.check_types(path, content).await {
                    issues.push(issue);
                }
            }
            if checked == 0 {
                ValidationGroup::skipped(GroupKind::Type)
            } else {
                ValidationGroup::from_issues(GroupKind::Type, checked, issues)
            }
        };

        ValidationResult::new(
            level,
            syntax,
            type_check,
            ValidationGroup::skipped(GroupKind::Dependency),
            ValidationGroup::skipped(GroupKind::Consistency),
            ValidationGroup::skipped(GroupKind::Test),
            ValidationGroup::skipped(GroupKind::Custom),
        )
    }

    async fn check_syntax(&self, path: &Path, content: &str) -> Option<ValidationIssue> {
        match self.syntax.check_syntax(path, content).await {
            Ok(true) => None,
            Ok(false) => Some(
                ValidationIssue::new(Severity::Error, format!("Unbalanced delimiters in {}", path.display()))
                    .in_file(path)
                    .suggest("Check brackets, braces and parentheses in the edited content"),
            ),
            Err(e) => Some(
                ValidationIssue::new(Severity::Warning, format!("Syntax check unavailable: {}", e)).in_file(path),
            ),
        }
    }

    async fn check_types(&self, path: &Path, content: &str) -> Option<ValidationIssue> {
        match self.types.check_types(path, content).await {
            Ok(true) => None,
            Ok(false) => Some(
                ValidationIssue::new(Severity::Error, format!("Type check failed for {}", path.display()))
                    .in_file(path)
                    .suggest("Run the project's type checker for details"),
            ),
            Err(e) => {
                Some(ValidationIssue::new(Severity::Warning, format!("Type check unavailable: {}", e)).in_file(path))
            }
        }
    }

    fn is_typed_source(&self, path: &Path) -> bool {
        let class = self.classifier.classify(path);
        class.category == FileCategory::Source && class.is_statically_typed()
    }

    /// One error per failing file
    async fn syntax_group(&self, change_set: &ChangeSet) -> ValidationGroup {
        let mut issues = Vec::new();
        for change in &change_set.changes {
            for content in change.resulting_contents() {
                if let Some(issue) = self.check_syntax(change.operation_target(), content).await {
                    issues.push(issue);
                    break;
                }
            }
        }
        ValidationGroup::from_issues(GroupKind::Syntax, change_set.changes.len(), issues)
    }

    async fn type_group(&self, change_set: &ChangeSet, level: ValidationLevel) -> ValidationGroup {
        if level == ValidationLevel::Basic {
            return ValidationGroup::skipped(GroupKind::Type);
        }

        let mut checked = 0;
        let mut issues = Vec::new();
        for change in change_set.changes.iter().filter(|c| !c.kind.removes_file() || c.new_path.is_some()) {
            let path = change.operation_target();
            if !self.is_typed_source(path) {
                continue;
            }
            checked += 1;
            let content = change.resulting_contents().join("\n");
            if let Some(issue) = self.check_types(path, &content).await {
                issues.push(issue);
            }
        }

        if checked == 0 {
            ValidationGroup::skipped(GroupKind::Type)
        } else {
            ValidationGroup::from_issues(GroupKind::Type, checked, issues)
        }
    }

    async fn test_group(&self, root: &Path, change_set: &ChangeSet, level: ValidationLevel) -> ValidationGroup {
        if level == ValidationLevel::Basic {
            return ValidationGroup::skipped(GroupKind::Test);
        }

        let planned: HashSet<String> = change_set
            .changes
            .iter()
            .flat_map(|c| c.touched_paths())
            .map(|p| path_key(&p))
            .collect();

        let mut checked = 0;
        let mut issues = Vec::new();
        for change in change_set.changes.iter().filter(|c| !c.kind.removes_file()) {
            let path = change.operation_target();
            if self.classifier.classify(path).category != FileCategory::Source {
                continue;
            }
            checked += 1;
            if self.has_test(root, path, &planned, level).await {
                continue;
            }
            issues.push(
                ValidationIssue::new(Severity::Warning, format!("No test file found for {}", path.display()))
                    .in_file(path)
                    .suggest("Add or update tests covering this change"),
            );
        }

        if checked == 0 {
            ValidationGroup::skipped(GroupKind::Test)
        } else {
            ValidationGroup::from_issues(GroupKind::Test, checked, issues)
        }
    }

    async fn has_test(&self, root: &Path, path: &Path, planned: &HashSet<String>, level: ValidationLevel) -> bool {
        for candidate in test_candidates(path) {
            if planned.contains(&path_key(&candidate)) {
                return true;
            }
            if let Ok(state) = self.state.capture(root, &candidate).await {
                if state.exists() {
                    return true;
                }
            }
        }

        if level >= ValidationLevel::Thorough && root.is_dir() {
            let root = root.to_path_buf();
            let stem = file_stem(path);
            let classifier = self.classifier.clone();
            return tokio::task::spawn_blocking(move || search_tests(&root, &stem, classifier.as_ref()))
                .await
                .unwrap_or(false);
        }
        false
    }

    async fn custom_group(&self, change_set: &ChangeSet) -> ValidationGroup {
        let (issues, rules) = evaluate_rules(change_set, self.rules.as_ref()).await;
        if rules == 0 {
            return ValidationGroup::skipped(GroupKind::Custom);
        }
        ValidationGroup::from_issues(GroupKind::Custom, rules, issues)
    }
}

/// Incoming edges of each changed file whose referenced symbols the change removes
fn dependency_group(change_set: &ChangeSet, graph: &DependencyGraph) -> ValidationGroup {
    let mut by_key: BTreeMap<String, Vec<&FileChange>> = BTreeMap::new();
    for change in &change_set.changes {
        by_key.entry(change.key()).or_default().push(change);
    }

    let mut checked = 0;
    let mut issues = Vec::new();
    for (key, changes) in by_key.iter().filter(|(k, _)| graph.contains(k)) {
        checked += 1;
        let removes_file = changes.iter().any(|c| c.kind.removes_file());

        for edge in graph.incoming(key) {
            let broken: Vec<&str> = edge
                .symbols
                .iter()
                .filter(|s| changes.iter().any(|c| c.removes_symbol(&s.name)))
                .map(|s| s.name.as_str())
                .collect();
            if broken.is_empty() && !removes_file {
                continue;
            }

            let severity = if edge.critical { Severity::Error } else { Severity::Warning };
            let message = if broken.is_empty() {
                format!("{} depends on {}, which this change removes", edge.source, key)
            } else {
                format!("{} uses {} from {}, which this change removes", edge.source, broken.join(", "), key)
            };
            issues.push(
                ValidationIssue::new(severity, message)
                    .in_file(PathBuf::from(&edge.source))
                    .from_source(format!("{} -> {}", edge.source, edge.target))
                    .suggest(format!("Update {} in the same change set", edge.source)),
            );
        }
    }

    ValidationGroup::from_issues(GroupKind::Dependency, checked, issues)
}

/// Naming conventions and cross-file agreement; advisory only
fn consistency_group(change_set: &ChangeSet) -> ValidationGroup {
    let mut issues = Vec::new();

    for change in &change_set.changes {
        let path = change.operation_target();
        let language = language_for(path);
        for content in change.resulting_contents() {
            for name in captures(&TYPE_DECL, content) {
                if !PASCAL_CASE.is_match(name) {
                    issues.push(naming_issue(path, name, "type", "PascalCase"));
                }
            }
            let (functions, convention, pattern) = match language {
                "typescript" | "javascript" => (captures(&SCRIPT_FN, content), "camelCase", &*CAMEL_CASE),
                "rust" | "python" => (captures(&SNAKE_FN, content), "snake_case", &*SNAKE_CASE),
                _ => continue,
            };
            for name in functions.into_iter().filter(|n| !pattern.is_match(n)) {
                issues.push(naming_issue(path, name, "function", convention));
            }
        }
    }

    let mut destinations: BTreeMap<String, usize> = BTreeMap::new();
    for dest in change_set.changes.iter().filter_map(|c| c.new_path.as_ref()) {
        *destinations.entry(path_key(dest)).or_default() += 1;
    }
    for (dest, count) in destinations.into_iter().filter(|(_, n)| *n > 1) {
        issues.push(
            ValidationIssue::new(Severity::Warning, format!("{} changes write to {}", count, dest)).in_file(dest),
        );
    }

    let mut renames: BTreeMap<&str, HashSet<&str>> = BTreeMap::new();
    for op in change_set
        .changes
        .iter()
        .flat_map(|c| c.operations.iter())
        .filter(|o| o.op_type == OperationType::Rename)
    {
        if let (Some(from), Some(to)) = (op.symbol.as_deref(), op.after.as_deref()) {
            renames.entry(from).or_default().insert(to);
        }
    }
    for (from, targets) in renames.into_iter().filter(|(_, t)| t.len() > 1) {
        let mut targets: Vec<&str> = targets.into_iter().collect();
        targets.sort_unstable();
        issues.push(ValidationIssue::new(
            Severity::Warning,
            format!("{} is renamed inconsistently: {}", from, targets.join(", ")),
        ));
    }

    ValidationGroup::advisory(GroupKind::Consistency, change_set.changes.len(), issues)
}

fn captures<'a>(regex: &Regex, content: &'a str) -> Vec<&'a str> {
    regex
        .captures_iter(content)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .collect()
}

fn naming_issue(path: &Path, name: &str, what: &str, convention: &str) -> ValidationIssue {
    ValidationIssue::new(Severity::Warning, format!("{} name '{}' is not {}", what, name, convention))
        .in_file(path)
        .suggest(format!("Rename '{}' to follow {}", name, convention))
}

fn file_stem(path: &Path) -> String {
    path.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default()
}

/// Conventional locations of a test for `path`
pub fn test_candidates(path: &Path) -> Vec<PathBuf> {
    let stem = file_stem(path);
    let ext = path.extension().map(|e| e.to_string_lossy().to_string()).unwrap_or_default();
    let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();

    match language_for(path) {
        "rust" => vec![
            dir.join("tests.rs"),
            dir.join(&stem).join("tests.rs"),
            PathBuf::from("tests").join(format!("{}.rs", stem)),
        ],
        "python" => vec![
            dir.join(format!("test_{}.py", stem)),
            PathBuf::from("tests").join(format!("test_{}.py", stem)),
        ],
        "go" => vec![dir.join(format!("{}_test.go", stem))],
        _ => vec![
            dir.join(format!("{}.test.{}", stem, ext)),
            dir.join(format!("{}.spec.{}", stem, ext)),
            dir.join("__tests__").join(format!("{}.test.{}", stem, ext)),
            dir.join("__tests__").join(format!("{}.{}", stem, ext)),
        ],
    }
}

fn search_tests(root: &Path, stem: &str, classifier: &dyn FileClassifier) -> bool {
    if stem.is_empty() {
        return false;
    }
    WalkDir::new(root)
        .follow_links(false)
        .max_depth(SEARCH_MAX_DEPTH)
        .into_iter()
        .filter_entry(|e| !SEARCH_SKIP_DIRS.iter().any(|d| e.file_name() == *d))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .any(|e| {
            let name = e.file_name().to_string_lossy();
            name.contains(stem) && classifier.classify(e.path()).category == FileCategory::Test
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changes::{ChangeKind, ChangeScope, ChangeType, CodeLocation, Operation};
    use crate::collaborators::{MemoryWorkspace, ReferencedSymbol};
    use crate::graph::fixtures::{edge, node};
    use crate::validation::ValidationStatus;

    fn validator(ws: Arc<MemoryWorkspace>) -> ChangeValidator {
        ChangeValidator::new(&Collaborators::in_memory(ws))
    }

    fn replace(path: &str, line: u32, after: &str) -> FileChange {
        FileChange::modify(path)
            .with_operation(Operation::new(OperationType::Replace, CodeLocation::line(path, line)).with_after(after))
    }

    fn change_set(changes: Vec<FileChange>) -> ChangeSet {
        changes
            .into_iter()
            .fold(ChangeSet::new(ChangeType::Refactor, ChangeScope::Module), |cs, c| cs.with_change(c))
    }

    fn critical_graph() -> DependencyGraph {
        let mut uses_user = edge("a.ts", "b.ts");
        uses_user.critical = true;
        uses_user.symbols = vec![ReferencedSymbol::typed("User")];
        DependencyGraph::from_parts(vec![node("a.ts"), node("b.ts")], vec![uses_user]).unwrap()
    }

    #[tokio::test]
    async fn test_deleting_critical_symbol_is_one_error() {
        let delete = FileChange::modify("b.ts").with_operation(
            Operation::new(OperationType::Delete, CodeLocation::lines("b.ts", 1, 3))
                .with_symbol("User")
                .with_before("export interface User {}"),
        );
        let cs = change_set(vec![delete]);
        let result = validator(Arc::new(MemoryWorkspace::new()))
            .validate(Path::new("/"), &cs, &critical_graph(), ValidationLevel::Basic)
            .await;

        assert_eq!(result.dependency.status, ValidationStatus::Failed);
        assert_eq!(result.dependency.issues.len(), 1);
        let issue = &result.dependency.issues[0];
        assert_eq!(issue.severity, Severity::Error);
        assert_eq!(issue.source.as_deref(), Some("a.ts -> b.ts"));
        assert_eq!(result.overall, ValidationStatus::Failed);
    }

    #[tokio::test]
    async fn test_deleting_whole_file_breaks_every_incoming_edge() {
        let cs = change_set(vec![FileChange::new("b.ts", ChangeKind::Delete)]);
        let result = validator(Arc::new(MemoryWorkspace::new()))
            .validate(Path::new("/"), &cs, &critical_graph(), ValidationLevel::Basic)
            .await;
        assert_eq!(result.dependency.issues.len(), 1);
    }

    #[tokio::test]
    async fn test_unrelated_edit_keeps_dependencies_intact() {
        let cs = change_set(vec![replace("b.ts", 10, "export const limit = 5;")]);
        let result = validator(Arc::new(MemoryWorkspace::new()))
            .validate(Path::new("/"), &cs, &critical_graph(), ValidationLevel::Basic)
            .await;
        assert_eq!(result.dependency.status, ValidationStatus::Passed);
    }

    #[tokio::test]
    async fn test_unbalanced_content_fails_syntax() {
        let cs = change_set(vec![replace("a.ts", 1, "function broken( {")]);
        let result = validator(Arc::new(MemoryWorkspace::new()))
            .validate(Path::new("/"), &cs, &DependencyGraph::default(), ValidationLevel::Basic)
            .await;
        assert_eq!(result.syntax.status, ValidationStatus::Failed);
        assert_eq!(result.syntax.count(Severity::Error), 1);
    }

    #[tokio::test]
    async fn test_basic_level_skips_types_and_tests() {
        let cs = change_set(vec![replace("src/a.ts", 1, "const x = 1;")]);
        let result = validator(Arc::new(MemoryWorkspace::new()))
            .validate(Path::new("/"), &cs, &DependencyGraph::default(), ValidationLevel::Basic)
            .await;
        assert_eq!(result.type_check.status, ValidationStatus::Skipped);
        assert_eq!(result.test.status, ValidationStatus::Skipped);
        assert_eq!(result.custom.status, ValidationStatus::Skipped);
    }

    #[tokio::test]
    async fn test_missing_test_file_is_a_warning() {
        let ws = Arc::new(MemoryWorkspace::new().with_file("src/b.test.ts", "test('b', () => {});"));
        let cs = change_set(vec![replace("src/a.ts", 1, "const x = 1;"), replace("src/b.ts", 1, "const y = 2;")]);
        let result = validator(ws)
            .validate(Path::new("/"), &cs, &DependencyGraph::default(), ValidationLevel::Standard)
            .await;

        assert_eq!(result.test.status, ValidationStatus::Warning);
        assert_eq!(result.test.issues.len(), 1);
        assert_eq!(result.test.issues[0].file.as_deref(), Some(Path::new("src/a.ts")));
    }

    #[tokio::test]
    async fn test_consistency_is_advisory() {
        let cs = change_set(vec![
            replace("a.ts", 1, "class user_record {}"),
            replace("b.rs", 1, "fn DoThing() {}"),
            replace("c.ts", 1, "function Bad_Name() {}"),
        ]);
        let result = validator(Arc::new(MemoryWorkspace::new()))
            .validate(Path::new("/"), &cs, &DependencyGraph::default(), ValidationLevel::Basic)
            .await;

        assert_eq!(result.consistency.status, ValidationStatus::Warning);
        assert_eq!(result.consistency.issues.len(), 3);
        assert!(result.consistency.issues.iter().all(|i| i.severity == Severity::Warning));
    }

    #[tokio::test]
    async fn test_inconsistent_renames_across_files() {
        let rename = |path: &str, to: &str| {
            FileChange::modify(path).with_operation(
                Operation::new(OperationType::Rename, CodeLocation::line(path, 1))
                    .with_symbol("fetchUser")
                    .with_after(to),
            )
        };
        let cs = change_set(vec![rename("a.ts", "loadUser"), rename("b.ts", "getUser")]);
        let result = validator(Arc::new(MemoryWorkspace::new()))
            .validate(Path::new("/"), &cs, &DependencyGraph::default(), ValidationLevel::Basic)
            .await;
        assert!(result.consistency.issues.iter().any(|i| i.message.contains("fetchUser")));
    }

    #[tokio::test]
    async fn test_revalidation_is_stable() {
        let ws = Arc::new(MemoryWorkspace::new());
        let cs = change_set(vec![replace("b.ts", 1, "class bad {"), replace("src/c.ts", 2, "const ok = 1;")]);
        let graph = critical_graph();
        let v = validator(ws);

        let root = Path::new("no-such-workspace");
        let first = v.validate(root, &cs, &graph, ValidationLevel::Exhaustive).await;
        let second = v.validate(root, &cs, &graph, ValidationLevel::Exhaustive).await;

        assert_eq!(first.overall, second.overall);
        assert_eq!(first.issue_count(), second.issue_count());
        let ids = |r: &ValidationResult| r.issues().map(|i| i.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&first), ids(&second));
    }

    #[tokio::test]
    async fn test_workspace_validation_reads_current_files() {
        let ws = Arc::new(MemoryWorkspace::new().with_file("a.ts", "fn() {").with_file("b.ts", "ok();"));
        let result = validator(ws)
            .validate_workspace(
                Path::new("/"),
                &[PathBuf::from("a.ts"), PathBuf::from("b.ts"), PathBuf::from("gone.ts")],
                ValidationLevel::Standard,
            )
            .await;
        assert_eq!(result.syntax.checked, 2);
        assert_eq!(result.syntax.issues.len(), 1);
        assert_eq!(result.overall, ValidationStatus::Failed);
    }

    #[test]
    fn test_candidates_by_language() {
        let ts = test_candidates(Path::new("src/user.ts"));
        assert!(ts.contains(&PathBuf::from("src/user.test.ts")));
        let rs = test_candidates(Path::new("src/graph/builder.rs"));
        assert!(rs.contains(&PathBuf::from("tests/builder.rs")));
    }

    #[test]
    fn test_search_finds_nested_tests() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("spec/unit")).unwrap();
        std::fs::write(dir.path().join("spec/unit/user.spec.ts"), "").unwrap();
        assert!(search_tests(dir.path(), "user", &crate::collaborators::PathHeuristicClassifier));
        assert!(!search_tests(dir.path(), "order", &crate::collaborators::PathHeuristicClassifier));
    }
}
