//! External capabilities consumed by the coordination core
//!
//! Parsing, editing, state capture and recovery tooling sit behind these traits.
//! Each component receives the implementations it needs through `Collaborators`
//! at construction time.

pub mod checks;
pub mod edit;
pub mod filesystem;
pub mod heuristics;
pub mod memory;
pub mod source;

pub use checks::*;
pub use filesystem::*;
pub use heuristics::*;
pub use memory::*;
pub use source::*;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::changes::{ChangeSet, DependencyType, FileChange, Operation, ValidationRule};
use crate::error::Result;
use crate::execution::ExecutionError;
use crate::rollback::FileState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileCategory {
    Source,
    Test,
    Config,
    Documentation,
    Asset,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileClassification {
    pub language: String,
    pub category: FileCategory,
    /// 0.0 - 1.0
    pub importance: f64,
    /// 0.0 - 1.0
    pub stability: f64,
}

impl FileClassification {
    pub fn is_statically_typed(&self) -> bool {
        matches!(
            self.language.as_str(),
            "typescript" | "rust" | "go" | "java" | "kotlin" | "csharp" | "cpp" | "c" | "swift" | "scala"
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Class,
    Interface,
    Type,
    Function,
    Constant,
    Variable,
    Enum,
    Module,
}

impl SymbolKind {
    /// Interface-like symbols weigh more in coupling and count toward abstractness
    pub fn is_type_like(&self) -> bool {
        matches!(self, SymbolKind::Interface | SymbolKind::Type)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    Internal,
    Private,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub visibility: Visibility,
}

impl Symbol {
    pub fn new(name: impl Into<String>, kind: SymbolKind, visibility: Visibility) -> Self {
        Self {
            name: name.into(),
            kind,
            visibility,
        }
    }
}

/// A symbol the source file uses from its dependency
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferencedSymbol {
    pub name: String,
    pub kind: SymbolKind,
    #[serde(default)]
    pub via_inheritance: bool,
}

impl ReferencedSymbol {
    pub fn value(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: SymbolKind::Function,
            via_inheritance: false,
        }
    }

    pub fn typed(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: SymbolKind::Interface,
            via_inheritance: false,
        }
    }

    pub fn inherited(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: SymbolKind::Class,
            via_inheritance: true,
        }
    }
}

/// A dependency of one target file on another
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedDependency {
    pub target: PathBuf,
    pub kind: DependencyType,
    pub symbols: Vec<ReferencedSymbol>,
    /// Overrides the computed edge weight
    #[serde(default)]
    pub strength: Option<f64>,
    /// Overrides the computed criticality
    #[serde(default)]
    pub critical: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutcome {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// When a file-level action runs relative to the change's operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilePhase {
    BeforeOperations,
    AfterOperations,
}

pub trait FileClassifier: Send + Sync {
    fn classify(&self, path: &Path) -> FileClassification;
}

#[async_trait]
pub trait SymbolExtractor: Send + Sync {
    async fn extract_symbols(&self, root: &Path, path: &Path) -> Result<Vec<Symbol>>;
}

#[async_trait]
pub trait DependencyResolver: Send + Sync {
    /// Dependencies of `source` that resolve to one of `candidates`
    async fn resolve_dependencies(
        &self,
        root: &Path,
        source: &Path,
        candidates: &[PathBuf],
    ) -> Result<Vec<ResolvedDependency>>;
}

#[async_trait]
pub trait SyntaxChecker: Send + Sync {
    async fn check_syntax(&self, path: &Path, content: &str) -> Result<bool>;
}

#[async_trait]
pub trait TypeChecker: Send + Sync {
    async fn check_types(&self, path: &Path, content: &str) -> Result<bool>;
}

#[async_trait]
pub trait OperationApplier: Send + Sync {
    /// Apply one edit to `path`. `CollaboratorUnavailable` aborts the engine;
    /// any other error is recorded against the operation.
    async fn apply_operation(&self, root: &Path, path: &Path, operation: &Operation) -> Result<()>;

    /// Create/copy before operations run; delete/rename/move/split/merge after
    async fn apply_file_action(&self, root: &Path, change: &FileChange, phase: FilePhase) -> Result<()>;
}

#[async_trait]
pub trait FileStateStore: Send + Sync {
    async fn capture(&self, root: &Path, path: &Path) -> Result<FileState>;
    async fn restore(&self, root: &Path, state: &FileState) -> Result<()>;
}

#[async_trait]
pub trait RecoveryDelegate: Send + Sync {
    async fn run_command(
        &self,
        root: &Path,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<CommandOutcome>;

    async fn restart_service(&self, name: &str) -> Result<()>;

    async fn version_control_revert(&self, root: &Path, paths: &[PathBuf]) -> Result<()>;

    async fn forward_fix(&self, root: &Path, change_set: &ChangeSet, errors: &[ExecutionError]) -> Result<()>;
}

#[async_trait]
pub trait RuleEvaluator: Send + Sync {
    /// `check` is the AST or custom check name carried by the rule
    async fn evaluate(&self, rule: &ValidationRule, check: &str, path: &Path, content: &str) -> Result<bool>;
}

/// Every capability a coordinator needs, injected once
#[derive(Clone)]
pub struct Collaborators {
    pub classifier: Arc<dyn FileClassifier>,
    pub symbols: Arc<dyn SymbolExtractor>,
    pub resolver: Arc<dyn DependencyResolver>,
    pub syntax: Arc<dyn SyntaxChecker>,
    pub types: Arc<dyn TypeChecker>,
    pub applier: Arc<dyn OperationApplier>,
    pub state: Arc<dyn FileStateStore>,
    pub recovery: Arc<dyn RecoveryDelegate>,
    pub rules: Arc<dyn RuleEvaluator>,
}

impl Collaborators {
    /// Defaults that work against a real directory tree
    pub fn filesystem() -> Self {
        let analyzer = Arc::new(RegexSourceAnalyzer::new());
        Self {
            classifier: Arc::new(PathHeuristicClassifier),
            symbols: analyzer.clone(),
            resolver: analyzer,
            syntax: Arc::new(DelimiterSyntaxChecker),
            types: Arc::new(AcceptingTypeChecker),
            applier: Arc::new(FsOperationApplier),
            state: Arc::new(FsStateStore),
            recovery: Arc::new(CommandRecovery),
            rules: Arc::new(NoopRuleEvaluator),
        }
    }

    /// Everything backed by one in-memory workspace
    pub fn in_memory(workspace: Arc<MemoryWorkspace>) -> Self {
        Self {
            classifier: Arc::new(PathHeuristicClassifier),
            symbols: workspace.clone(),
            resolver: workspace.clone(),
            syntax: Arc::new(DelimiterSyntaxChecker),
            types: Arc::new(AcceptingTypeChecker),
            applier: workspace.clone(),
            state: workspace.clone(),
            recovery: workspace,
            rules: Arc::new(NoopRuleEvaluator),
        }
    }

    pub fn with_syntax_checker(mut self, syntax: Arc<dyn SyntaxChecker>) -> Self {
        self.syntax = syntax;
        self
    }

    pub fn with_type_checker(mut self, types: Arc<dyn TypeChecker>) -> Self {
        self.types = types;
        self
    }

    pub fn with_rule_evaluator(mut self, rules: Arc<dyn RuleEvaluator>) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn FileClassifier>) -> Self {
        self.classifier = classifier;
        self
    }
}

impl Default for Collaborators {
    fn default() -> Self {
        Self::filesystem()
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
