//! In-memory workspace
//!
//! Implements every file-touching collaborator over a map of contents, with
//! declared dependencies and failure injection. Used by tests and dry tooling.

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

use super::edit::apply_to_text;
use super::{
    CommandOutcome, DependencyResolver, FilePhase, FileStateStore, OperationApplier, RecoveryDelegate,
    ResolvedDependency, Symbol, SymbolExtractor,
};
use crate::changes::{path_key, ChangeKind, ChangeSet, FileChange, Operation};
use crate::error::{CoordinationError, Result};
use crate::execution::ExecutionError;
use crate::rollback::{FileMetadata, FileState};

#[derive(Debug, Default)]
pub struct MemoryWorkspace {
    files: DashMap<String, String>,
    symbols: DashMap<String, Vec<Symbol>>,
    dependencies: DashMap<String, Vec<ResolvedDependency>>,
    failing_operations: DashSet<String>,
    failing_commands: DashSet<String>,
    unavailable: AtomicBool,
    apply_delay_ms: AtomicU64,
    applied: Mutex<Vec<String>>,
    commands: Mutex<Vec<String>>,
}

impl MemoryWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, path: impl AsRef<Path>, content: impl Into<String>) -> Self {
        self.write(path, content);
        self
    }

    /// `source` depends on `dependency.target`
    pub fn with_dependency(self, source: impl AsRef<Path>, dependency: ResolvedDependency) -> Self {
        self.dependencies
            .entry(path_key(source.as_ref()))
            .or_default()
            .push(dependency);
        self
    }

    pub fn with_symbols(self, path: impl AsRef<Path>, symbols: Vec<Symbol>) -> Self {
        self.symbols.insert(path_key(path.as_ref()), symbols);
        self
    }

    pub fn write(&self, path: impl AsRef<Path>, content: impl Into<String>) {
        self.files.insert(path_key(path.as_ref()), content.into());
    }

    pub fn read(&self, path: impl AsRef<Path>) -> Option<String> {
        self.files.get(&path_key(path.as_ref())).map(|c| c.clone())
    }

    pub fn remove(&self, path: impl AsRef<Path>) {
        self.files.remove(&path_key(path.as_ref()));
    }

    pub fn exists(&self, path: impl AsRef<Path>) -> bool {
        self.files.contains_key(&path_key(path.as_ref()))
    }

    /// Applying this operation id fails with an execution error
    pub fn fail_operation(&self, operation_id: impl Into<String>) {
        self.failing_operations.insert(operation_id.into());
    }

    pub fn fail_command(&self, program: impl Into<String>) {
        self.failing_commands.insert(program.into());
    }

    /// Every apply call reports the applier as unavailable
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn set_apply_delay(&self, delay: Duration) {
        self.apply_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Operation ids in the order they were applied
    pub async fn applied_operations(&self) -> Vec<String> {
        self.applied.lock().await.clone()
    }

    /// Commands run, as `program arg...`
    pub async fn commands_run(&self) -> Vec<String> {
        self.commands.lock().await.clone()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CoordinationError::unavailable("operation applier", "workspace offline"));
        }
        Ok(())
    }

    fn take(&self, path: &Path) -> Result<String> {
        self.read(path)
            .ok_or_else(|| CoordinationError::Execution(format!("File not found: {}", path.display())))
    }

    fn destination(change: &FileChange) -> Result<&PathBuf> {
        change.new_path.as_ref().ok_or_else(|| {
            CoordinationError::Execution(format!("{:?} of {} has no destination", change.kind, change.path.display()))
        })
    }
}

#[async_trait]
impl SymbolExtractor for MemoryWorkspace {
    async fn extract_symbols(&self, _root: &Path, path: &Path) -> Result<Vec<Symbol>> {
        Ok(self
            .symbols
            .get(&path_key(path))
            .map(|s| s.clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl DependencyResolver for MemoryWorkspace {
    async fn resolve_dependencies(
        &self,
        _root: &Path,
        source: &Path,
        candidates: &[PathBuf],
    ) -> Result<Vec<ResolvedDependency>> {
        let declared = match self.dependencies.get(&path_key(source)) {
            Some(d) => d.clone(),
            None => return Ok(Vec::new()),
        };
        Ok(declared
            .into_iter()
            .filter(|d| candidates.iter().any(|c| path_key(c) == path_key(&d.target)))
            .collect())
    }
}

#[async_trait]
impl OperationApplier for MemoryWorkspace {
    async fn apply_operation(&self, _root: &Path, path: &Path, operation: &Operation) -> Result<()> {
        self.check_available()?;

        let delay = self.apply_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        self.applied.lock().await.push(operation.id.clone());

        if self.failing_operations.contains(&operation.id) {
            return Err(CoordinationError::Execution(format!(
                "Injected failure for operation {}",
                operation.id
            )));
        }

        let content = self.take(path)?;
        let updated = apply_to_text(&content, operation)?;
        self.write(path, updated);
        Ok(())
    }

    async fn apply_file_action(&self, _root: &Path, change: &FileChange, phase: FilePhase) -> Result<()> {
        self.check_available()?;

        match (phase, change.kind) {
            (FilePhase::BeforeOperations, ChangeKind::Create) => {
                if self.exists(&change.path) {
                    return Err(CoordinationError::Execution(format!(
                        "Cannot create {}: file already exists",
                        change.path.display()
                    )));
                }
                self.write(&change.path, change.content.clone().unwrap_or_default());
            }
            (FilePhase::BeforeOperations, ChangeKind::Copy) => {
                let dest = Self::destination(change)?;
                let content = self.take(&change.path)?;
                self.write(dest, content);
            }
            (FilePhase::AfterOperations, ChangeKind::Delete) => {
                self.take(&change.path)?;
                self.remove(&change.path);
            }
            (FilePhase::AfterOperations, ChangeKind::Rename | ChangeKind::Move) => {
                let dest = Self::destination(change)?;
                let content = self.take(&change.path)?;
                self.remove(&change.path);
                self.write(dest, content);
            }
            (FilePhase::AfterOperations, ChangeKind::Split) => {
                if let (Some(dest), Some(content)) = (&change.new_path, &change.content) {
                    self.write(dest, content.clone());
                }
            }
            (FilePhase::AfterOperations, ChangeKind::Merge) => {
                if let Some(dest) = &change.new_path {
                    self.remove(dest);
                }
            }
            _ => {}
        }
        Ok(())
    }
}

#[async_trait]
impl FileStateStore for MemoryWorkspace {
    async fn capture(&self, _root: &Path, path: &Path) -> Result<FileState> {
        Ok(match self.read(path) {
            Some(content) => FileState::present(path, content, FileMetadata::default()),
            None => FileState::missing(path),
        })
    }

    async fn restore(&self, _root: &Path, state: &FileState) -> Result<()> {
        match &state.content {
            Some(content) => self.write(&state.path, content.clone()),
            None => self.remove(&state.path),
        }
        Ok(())
    }
}

#[async_trait]
impl RecoveryDelegate for MemoryWorkspace {
    async fn run_command(
        &self,
        _root: &Path,
        program: &str,
        args: &[String],
        _timeout: Duration,
    ) -> Result<CommandOutcome> {
        let line = std::iter::once(program.to_string())
            .chain(args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ");
        self.commands.lock().await.push(line);

        let success = !self.failing_commands.contains(program);
        Ok(CommandOutcome {
            success,
            exit_code: Some(if success { 0 } else { 1 }),
            stdout: String::new(),
            stderr: if success {
                String::new()
            } else {
                format!("{} failed", program)
            },
        })
    }

    async fn restart_service(&self, name: &str) -> Result<()> {
        self.commands.lock().await.push(format!("restart {}", name));
        Ok(())
    }

    async fn version_control_revert(&self, _root: &Path, paths: &[PathBuf]) -> Result<()> {
        let listed = paths.iter().map(|p| path_key(p)).collect::<Vec<_>>().join(" ");
        self.commands.lock().await.push(format!("git checkout -- {}", listed));
        Ok(())
    }

    async fn forward_fix(&self, _root: &Path, change_set: &ChangeSet, errors: &[ExecutionError]) -> Result<()> {
        self.commands
            .lock()
            .await
            .push(format!("forward-fix {} ({} errors)", change_set.id, errors.len()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changes::{CodeLocation, DependencyType, OperationType};

    #[tokio::test]
    async fn test_apply_and_inject_failure() {
        let ws = MemoryWorkspace::new().with_file("a.ts", "one\ntwo\n");
        let root = Path::new("/");

        let ok = Operation::new(OperationType::Insert, CodeLocation::line("a.ts", 1))
            .with_id("ok")
            .with_after("zero");
        ws.apply_operation(root, Path::new("a.ts"), &ok).await.unwrap();
        assert_eq!(ws.read("a.ts").unwrap(), "zero\none\ntwo\n");

        let bad = ok.clone().with_id("bad");
        ws.fail_operation("bad");
        assert!(ws.apply_operation(root, Path::new("a.ts"), &bad).await.is_err());
        assert_eq!(ws.applied_operations().await, vec!["ok", "bad"]);
    }

    #[tokio::test]
    async fn test_resolver_filters_to_candidates() {
        let ws = MemoryWorkspace::new().with_dependency(
            "a.ts",
            ResolvedDependency {
                target: PathBuf::from("b.ts"),
                kind: DependencyType::Import,
                symbols: Vec::new(),
                strength: None,
                critical: None,
            },
        );
        let root = Path::new("/");

        let found = ws
            .resolve_dependencies(root, Path::new("a.ts"), &[PathBuf::from("b.ts")])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);

        let none = ws
            .resolve_dependencies(root, Path::new("a.ts"), &[PathBuf::from("c.ts")])
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_applier() {
        let ws = MemoryWorkspace::new().with_file("a.ts", "x\n");
        ws.set_unavailable(true);
        let op = Operation::new(OperationType::Delete, CodeLocation::line("a.ts", 1));
        let err = ws.apply_operation(Path::new("/"), Path::new("a.ts"), &op).await.unwrap_err();
        assert!(matches!(err, CoordinationError::CollaboratorUnavailable { .. }));
    }
}
