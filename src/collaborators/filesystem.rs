//! Filesystem-backed collaborators
//!
//! All std::fs and std::process work runs on blocking threads.

use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tokio::time::timeout;

use super::edit::apply_to_text;
use super::{CommandOutcome, FilePhase, FileStateStore, OperationApplier, RecoveryDelegate};
use crate::changes::{ChangeKind, ChangeSet, FileChange, Operation};
use crate::error::{CoordinationError, Result};
use crate::execution::ExecutionError;
use crate::rollback::checksum::get_mtime;
use crate::rollback::{FileMetadata, FileState};

const VCS_TIMEOUT_SECS: u64 = 60;

async fn blocking<T, F>(task: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| CoordinationError::Execution(format!("Task join error: {}", e)))?
}

fn ensure_root(root: &Path) -> Result<()> {
    if root.is_dir() {
        Ok(())
    } else {
        Err(CoordinationError::unavailable(
            "operation applier",
            format!("workspace root {} is not a directory", root.display()),
        ))
    }
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn destination(change: &FileChange) -> Result<&PathBuf> {
    change.new_path.as_ref().ok_or_else(|| {
        CoordinationError::Execution(format!(
            "{:?} of {} has no destination path",
            change.kind,
            change.path.display()
        ))
    })
}

/// Applies edits to files under the workspace root
#[derive(Debug, Clone, Copy, Default)]
pub struct FsOperationApplier;

#[async_trait]
impl OperationApplier for FsOperationApplier {
    async fn apply_operation(&self, root: &Path, path: &Path, operation: &Operation) -> Result<()> {
        ensure_root(root)?;
        let full = root.join(path);
        let operation = operation.clone();

        blocking(move || {
            let content = fs::read_to_string(&full).map_err(|e| {
                CoordinationError::Execution(format!("Failed to read {}: {}", full.display(), e))
            })?;
            let updated = apply_to_text(&content, &operation)?;
            fs::write(&full, updated)?;
            Ok(())
        })
        .await
    }

    async fn apply_file_action(&self, root: &Path, change: &FileChange, phase: FilePhase) -> Result<()> {
        ensure_root(root)?;
        let source = root.join(&change.path);
        let dest = change.new_path.as_ref().map(|p| root.join(p));
        let change = change.clone();

        blocking(move || {
            match (phase, change.kind) {
                (FilePhase::BeforeOperations, ChangeKind::Create) => {
                    if source.exists() {
                        return Err(CoordinationError::Execution(format!(
                            "Cannot create {}: file already exists",
                            source.display()
                        )));
                    }
                    create_parent(&source)?;
                    fs::write(&source, change.content.as_deref().unwrap_or(""))?;
                }
                (FilePhase::BeforeOperations, ChangeKind::Copy) => {
                    destination(&change)?;
                    let dest = dest.unwrap_or_default();
                    create_parent(&dest)?;
                    fs::copy(&source, &dest)?;
                }
                (FilePhase::AfterOperations, ChangeKind::Delete) => {
                    fs::remove_file(&source)?;
                }
                (FilePhase::AfterOperations, ChangeKind::Rename | ChangeKind::Move) => {
                    destination(&change)?;
                    let dest = dest.unwrap_or_default();
                    create_parent(&dest)?;
                    fs::rename(&source, &dest)?;
                }
                (FilePhase::AfterOperations, ChangeKind::Split) => {
                    if let (Some(dest), Some(content)) = (dest, change.content.as_deref()) {
                        create_parent(&dest)?;
                        fs::write(&dest, content)?;
                    }
                }
                (FilePhase::AfterOperations, ChangeKind::Merge) => {
                    // `new_path` is the file absorbed into `path`
                    if let Some(dest) = dest.filter(|d| d.exists()) {
                        fs::remove_file(dest)?;
                    }
                }
                _ => {}
            }
            Ok(())
        })
        .await
    }
}

/// Captures and restores file content with SHA-256 hashes
#[derive(Debug, Clone, Copy, Default)]
pub struct FsStateStore;

#[async_trait]
impl FileStateStore for FsStateStore {
    async fn capture(&self, root: &Path, path: &Path) -> Result<FileState> {
        let full = root.join(path);
        let relative = path.to_path_buf();

        blocking(move || {
            if !full.exists() {
                return Ok(FileState::missing(relative));
            }
            let metadata = fs::metadata(&full)?;
            let content = fs::read_to_string(&full)?;
            Ok(FileState::present(
                relative,
                content,
                FileMetadata {
                    size: metadata.len(),
                    modified: Some(get_mtime(&metadata)),
                    readonly: metadata.permissions().readonly(),
                },
            ))
        })
        .await
    }

    async fn restore(&self, root: &Path, state: &FileState) -> Result<()> {
        let full = root.join(&state.path);
        let state = state.clone();

        blocking(move || {
            match &state.content {
                Some(content) => {
                    create_parent(&full)?;
                    fs::write(&full, content)?;
                }
                None => {
                    if full.exists() {
                        fs::remove_file(&full)?;
                    }
                }
            }
            tracing::debug!(path = %full.display(), existed = state.exists(), "Restored file state");
            Ok(())
        })
        .await
    }
}

/// Runs recovery commands as child processes
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandRecovery;

#[async_trait]
impl RecoveryDelegate for CommandRecovery {
    async fn run_command(
        &self,
        root: &Path,
        program: &str,
        args: &[String],
        limit: Duration,
    ) -> Result<CommandOutcome> {
        let root = root.to_path_buf();
        let program_owned = program.to_string();
        let args = args.to_vec();

        let output_future = tokio::task::spawn_blocking(move || {
            Command::new(&program_owned).args(&args).current_dir(&root).output()
        });

        let output = match timeout(limit, output_future).await {
            Ok(Ok(Ok(output))) => output,
            Ok(Ok(Err(e))) => {
                return Err(CoordinationError::unavailable(
                    "recovery command",
                    format!("{} could not be started: {}", program, e),
                ))
            }
            Ok(Err(e)) => return Err(CoordinationError::Rollback(format!("Task join error: {}", e))),
            Err(_) => {
                return Err(CoordinationError::Timeout {
                    stage: format!("command {}", program),
                    after: limit,
                })
            }
        };

        Ok(CommandOutcome {
            success: output.status.success(),
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    async fn restart_service(&self, name: &str) -> Result<()> {
        Err(CoordinationError::unavailable(
            "service manager",
            format!("no service manager configured to restart {}", name),
        ))
    }

    async fn version_control_revert(&self, root: &Path, paths: &[PathBuf]) -> Result<()> {
        let mut args = vec!["checkout".to_string(), "--".to_string()];
        args.extend(paths.iter().map(|p| p.to_string_lossy().to_string()));

        let outcome = self
            .run_command(root, "git", &args, Duration::from_secs(VCS_TIMEOUT_SECS))
            .await?;
        if !outcome.success {
            return Err(CoordinationError::Rollback(format!(
                "git checkout failed: {}",
                outcome.stderr.trim()
            )));
        }
        Ok(())
    }

    async fn forward_fix(&self, _root: &Path, change_set: &ChangeSet, errors: &[ExecutionError]) -> Result<()> {
        tracing::info!(
            change_set = %change_set.id,
            errors = errors.len(),
            "Forward fix requested; leaving workspace as-is for follow-up changes"
        );
        Ok(())
    }
}
