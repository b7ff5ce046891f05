//! Change set entry types
//!
//! A `ChangeSet` is the unit of work handed to one coordination session: an
//! ordered list of `FileChange`s, each carrying its line-located `Operation`s.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::policy::{ImpactAssessment, RollbackPlan, ValidationRule};

/// Stable string key for a workspace-relative path (forward slashes, no leading `./`)
pub fn path_key(path: &Path) -> String {
    let raw = path.to_string_lossy().replace('\\', "/");
    raw.trim_start_matches("./").to_string()
}

/// What happens to the file as a whole
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Create,
    #[default]
    Modify,
    Delete,
    Rename,
    Move,
    Split,
    Merge,
    Copy,
}

impl ChangeKind {
    /// The original path stops existing once this change is applied
    pub fn removes_file(&self) -> bool {
        matches!(self, ChangeKind::Delete | ChangeKind::Rename | ChangeKind::Move)
    }

    /// The change produces a file at `new_path`
    pub fn needs_destination(&self) -> bool {
        matches!(self, ChangeKind::Rename | ChangeKind::Move | ChangeKind::Copy)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Insert,
    Delete,
    Replace,
    Move,
    Extract,
    Inline,
    Rename,
    Reformat,
}

/// Relative cost of a change, used for duration and risk estimates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Trivial,
    #[default]
    Simple,
    Moderate,
    Complex,
    Expert,
}

impl Complexity {
    pub fn multiplier(&self) -> f64 {
        match self {
            Complexity::Trivial => 1.0,
            Complexity::Simple => 1.5,
            Complexity::Moderate => 2.0,
            Complexity::Complex => 3.0,
            Complexity::Expert => 5.0,
        }
    }

    pub fn risk(&self) -> RiskLevel {
        match self {
            Complexity::Trivial => RiskLevel::VeryLow,
            Complexity::Simple => RiskLevel::Low,
            Complexity::Moderate => RiskLevel::Medium,
            Complexity::Complex => RiskLevel::High,
            Complexity::Expert => RiskLevel::VeryHigh,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    VeryLow,
    #[default]
    Low,
    Medium,
    High,
    VeryHigh,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// Kind of relationship between two files
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyType {
    #[default]
    Import,
    Inheritance,
    Composition,
    Call,
    TypeReference,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl Position {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineRange {
    pub start: Position,
    pub end: Position,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeLocation {
    pub file: PathBuf,
    /// 1-based
    pub line: u32,
    pub column: u32,
    pub range: Option<LineRange>,
}

impl CodeLocation {
    pub fn line(file: impl Into<PathBuf>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column: 0,
            range: None,
        }
    }

    pub fn lines(file: impl Into<PathBuf>, start: u32, end: u32) -> Self {
        Self {
            file: file.into(),
            line: start,
            column: 0,
            range: Some(LineRange {
                start: Position::new(start, 0),
                end: Position::new(end, 0),
            }),
        }
    }
}

/// One localized edit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub id: String,
    pub op_type: OperationType,
    pub location: CodeLocation,
    pub before: Option<String>,
    pub after: Option<String>,
    /// Symbol the operation acts on (deleted, renamed, extracted...)
    pub symbol: Option<String>,
    /// Destination line for move/extract
    pub target_line: Option<u32>,
}

impl Operation {
    pub fn new(op_type: OperationType, location: CodeLocation) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            op_type,
            location,
            before: None,
            after: None,
            symbol: None,
            target_line: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_before(mut self, before: impl Into<String>) -> Self {
        self.before = Some(before.into());
        self
    }

    pub fn with_after(mut self, after: impl Into<String>) -> Self {
        self.after = Some(after.into());
        self
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn with_target_line(mut self, line: u32) -> Self {
        self.target_line = Some(line);
        self
    }

    /// Closed line interval this operation touches
    pub fn affected_lines(&self) -> (u32, u32) {
        match &self.location.range {
            Some(range) => {
                let (a, b) = (range.start.line, range.end.line);
                (a.min(b), a.max(b))
            }
            None => (self.location.line, self.location.line),
        }
    }

    /// True when the two closed line intervals intersect
    pub fn overlaps(&self, other: &Operation) -> bool {
        let (a_start, a_end) = self.affected_lines();
        let (b_start, b_end) = other.affected_lines();
        a_start <= b_end && b_start <= a_end
    }

    /// Content the file will contain at this location after the edit
    pub fn resulting_content(&self) -> Option<&str> {
        self.after.as_deref()
    }

    /// Whether applying this operation removes `name` from the file's surface
    pub fn removes_symbol(&self, name: &str) -> bool {
        let named = self.symbol.as_deref() == Some(name);
        match self.op_type {
            OperationType::Rename => named,
            OperationType::Delete => {
                named
                    || (self.symbol.is_none()
                        && self.before.as_deref().is_some_and(|b| contains_identifier(b, name)))
            }
            OperationType::Replace => {
                let before_has = named || self.before.as_deref().is_some_and(|b| contains_identifier(b, name));
                let after_has = self.after.as_deref().is_some_and(|a| contains_identifier(a, name));
                before_has && !after_has
            }
            _ => false,
        }
    }
}

/// Whole-identifier match (`Foo` does not match inside `FooBar`)
pub fn contains_identifier(text: &str, name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    let is_ident = |c: char| c.is_alphanumeric() || c == '_' || c == '$';
    let mut search = text;
    let mut offset = 0;
    while let Some(idx) = search.find(name) {
        let start = offset + idx;
        let end = start + name.len();
        let before_ok = text[..start].chars().next_back().is_none_or(|c| !is_ident(c));
        let after_ok = text[end..].chars().next().is_none_or(|c| !is_ident(c));
        if before_ok && after_ok {
            return true;
        }
        offset = start + name.len();
        search = &text[offset..];
    }
    false
}

/// A dependency declared by the change author rather than discovered by analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDependency {
    pub target: PathBuf,
    pub dependency_type: DependencyType,
    #[serde(default)]
    pub symbols: Vec<String>,
}

/// One file's edits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChange {
    pub path: PathBuf,
    pub kind: ChangeKind,
    #[serde(default)]
    pub operations: Vec<Operation>,
    #[serde(default)]
    pub dependencies: Vec<FileDependency>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub complexity: Complexity,
    /// Destination for rename/move/copy, first output file for split
    #[serde(default)]
    pub new_path: Option<PathBuf>,
    /// Full content for create
    #[serde(default)]
    pub content: Option<String>,
}

impl FileChange {
    pub fn new(path: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
            operations: Vec::new(),
            dependencies: Vec::new(),
            priority: Priority::default(),
            complexity: Complexity::default(),
            new_path: None,
            content: None,
        }
    }

    pub fn modify(path: impl Into<PathBuf>) -> Self {
        Self::new(path, ChangeKind::Modify)
    }

    pub fn with_operation(mut self, operation: Operation) -> Self {
        self.operations.push(operation);
        self
    }

    pub fn with_complexity(mut self, complexity: Complexity) -> Self {
        self.complexity = complexity;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_new_path(mut self, new_path: impl Into<PathBuf>) -> Self {
        self.new_path = Some(new_path.into());
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_dependency(mut self, dependency: FileDependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn key(&self) -> String {
        path_key(&self.path)
    }

    /// File the operations are applied to: the copy for `copy`, the source otherwise
    pub fn operation_target(&self) -> &Path {
        match (self.kind, &self.new_path) {
            (ChangeKind::Copy, Some(dest)) => dest,
            _ => &self.path,
        }
    }

    /// Every path this change reads or writes
    pub fn touched_paths(&self) -> Vec<PathBuf> {
        let mut paths = vec![self.path.clone()];
        if let Some(dest) = &self.new_path {
            paths.push(dest.clone());
        }
        paths
    }

    /// All content this change will write, for syntax and convention checks
    pub fn resulting_contents(&self) -> Vec<&str> {
        let mut contents: Vec<&str> = self.content.as_deref().into_iter().collect();
        contents.extend(self.operations.iter().filter_map(|op| op.resulting_content()));
        contents
    }

    pub fn removes_symbol(&self, name: &str) -> bool {
        self.kind.removes_file() || self.operations.iter().any(|op| op.removes_symbol(name))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    #[default]
    Refactor,
    Feature,
    Bugfix,
    Migration,
    Cleanup,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeScope {
    File,
    #[default]
    Module,
    Package,
    Workspace,
}

/// The full unit of proposed multi-file work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSet {
    pub id: String,
    pub change_type: ChangeType,
    pub scope: ChangeScope,
    pub changes: Vec<FileChange>,
    #[serde(default)]
    pub validation_rules: Vec<ValidationRule>,
    #[serde(default)]
    pub rollback_plan: RollbackPlan,
    #[serde(default)]
    pub impact: ImpactAssessment,
}

impl ChangeSet {
    pub fn new(change_type: ChangeType, scope: ChangeScope) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            change_type,
            scope,
            changes: Vec::new(),
            validation_rules: Vec::new(),
            rollback_plan: RollbackPlan::default(),
            impact: ImpactAssessment::default(),
        }
    }

    pub fn with_change(mut self, change: FileChange) -> Self {
        self.changes.push(change);
        self
    }

    pub fn with_rule(mut self, rule: ValidationRule) -> Self {
        self.validation_rules.push(rule);
        self
    }

    pub fn with_rollback_plan(mut self, plan: RollbackPlan) -> Self {
        self.rollback_plan = plan;
        self
    }

    /// Recompute the impact assessment from the current changes
    pub fn assess_impact(mut self) -> Self {
        self.impact = ImpactAssessment::estimate(&self.changes);
        self
    }

    /// Changes grouped under one path key, in declaration order
    pub fn changes_for(&self, key: &str) -> Vec<&FileChange> {
        self.changes.iter().filter(|c| c.key() == key).collect()
    }

    /// Distinct source paths, in declaration order
    pub fn files(&self) -> Vec<PathBuf> {
        let mut seen = BTreeSet::new();
        self.changes
            .iter()
            .filter(|c| seen.insert(c.key()))
            .map(|c| c.path.clone())
            .collect()
    }

    /// Source and destination paths of every change, deduplicated
    pub fn touched_paths(&self) -> Vec<PathBuf> {
        let mut seen = BTreeSet::new();
        self.changes
            .iter()
            .flat_map(|c| c.touched_paths())
            .filter(|p| seen.insert(path_key(p)))
            .collect()
    }

    pub fn operation_count(&self) -> usize {
        self.changes.iter().map(|c| c.operations.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_affected_lines_prefers_range() {
        let single = Operation::new(OperationType::Insert, CodeLocation::line("a.ts", 7));
        assert_eq!(single.affected_lines(), (7, 7));

        let ranged = Operation::new(OperationType::Replace, CodeLocation::lines("a.ts", 10, 4));
        assert_eq!(ranged.affected_lines(), (4, 10));
    }

    #[test]
    fn test_overlap_is_closed_interval() {
        let a = Operation::new(OperationType::Replace, CodeLocation::lines("a.ts", 1, 5));
        let touching = Operation::new(OperationType::Insert, CodeLocation::line("a.ts", 5));
        let apart = Operation::new(OperationType::Insert, CodeLocation::line("a.ts", 6));

        assert!(a.overlaps(&touching));
        assert!(!a.overlaps(&apart));
    }

    #[test]
    fn test_removes_symbol() {
        let delete = Operation::new(OperationType::Delete, CodeLocation::line("b.ts", 3))
            .with_symbol("UserService");
        assert!(delete.removes_symbol("UserService"));
        assert!(!delete.removes_symbol("User"));

        let replace = Operation::new(OperationType::Replace, CodeLocation::line("b.ts", 3))
            .with_before("export interface Config {}")
            .with_after("export interface Settings {}");
        assert!(replace.removes_symbol("Config"));
        assert!(!replace.removes_symbol("Settings"));

        let insert = Operation::new(OperationType::Insert, CodeLocation::line("b.ts", 3)).with_symbol("Config");
        assert!(!insert.removes_symbol("Config"));
    }

    #[test]
    fn test_contains_identifier_respects_boundaries() {
        assert!(contains_identifier("class Foo extends Bar {}", "Foo"));
        assert!(!contains_identifier("class FooBar {}", "Foo"));
        assert!(contains_identifier("x = FooBar + Foo;", "Foo"));
    }

    #[test]
    fn test_whole_file_removal_breaks_every_symbol() {
        let change = FileChange::new("b.ts", ChangeKind::Delete);
        assert!(change.removes_symbol("anything"));
    }

    #[test]
    fn test_change_set_paths() {
        let set = ChangeSet::new(ChangeType::Refactor, ChangeScope::Module)
            .with_change(FileChange::modify("./src/a.ts"))
            .with_change(FileChange::new("src/b.ts", ChangeKind::Rename).with_new_path("src/c.ts"))
            .with_change(FileChange::modify("src/a.ts"));

        assert_eq!(set.files().len(), 2);
        assert_eq!(set.touched_paths().len(), 3);
        assert_eq!(set.changes_for("src/a.ts").len(), 2);
    }
}
