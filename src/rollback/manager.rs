//! Rollback manager
//!
//! Captures checkpoints and restores from them according to the selected
//! strategy, then runs the rollback plan's validation checks. The checkpoint
//! list itself is owned by the session and only ever appended to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::checkpoint::{FileState, RollbackCheckpoint, ValidationSnapshot};
use super::checksum::compare_states;
use crate::changes::{path_key, ChangeSet, RollbackCheck, RollbackProcedure};
use crate::collaborators::{Collaborators, FileStateStore, RecoveryDelegate, SyntaxChecker};
use crate::config::RollbackStrategy;
use crate::error::{CoordinationError, Result};
use crate::execution::ExecutionError;

const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Result of one post-rollback check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckOutcome {
    pub check: String,
    pub passed: bool,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackOutcome {
    pub strategy: RollbackStrategy,
    /// Checkpoint restored from, when the strategy restores one
    pub checkpoint_id: Option<String>,
    pub restored_files: Vec<PathBuf>,
    pub procedures_run: usize,
    pub checks: Vec<CheckOutcome>,
    pub completed_at: DateTime<Utc>,
}

impl RollbackOutcome {
    fn new(strategy: RollbackStrategy) -> Self {
        Self {
            strategy,
            checkpoint_id: None,
            restored_files: Vec::new(),
            procedures_run: 0,
            checks: Vec::new(),
            completed_at: Utc::now(),
        }
    }
}

pub struct RollbackManager {
    root: PathBuf,
    state: Arc<dyn FileStateStore>,
    syntax: Arc<dyn SyntaxChecker>,
    recovery: Arc<dyn RecoveryDelegate>,
}

impl RollbackManager {
    pub fn new(collaborators: &Collaborators, root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            state: Arc::clone(&collaborators.state),
            syntax: Arc::clone(&collaborators.syntax),
            recovery: Arc::clone(&collaborators.recovery),
        }
    }

    /// Capture the current state of `paths`; missing files are recorded as absent
    pub async fn create_checkpoint(
        &self,
        label: impl Into<String>,
        paths: &[PathBuf],
        validation: ValidationSnapshot,
    ) -> Result<RollbackCheckpoint> {
        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            files.push(self.state.capture(&self.root, path).await?);
        }
        let checkpoint = RollbackCheckpoint::new(label, files, validation);
        tracing::debug!(
            checkpoint_id = %checkpoint.id,
            label = %checkpoint.label,
            files = checkpoint.files.len(),
            "Checkpoint created"
        );
        Ok(checkpoint)
    }

    /// Roll back with `strategy`, then run the change set's validation checks
    pub async fn rollback(
        &self,
        strategy: RollbackStrategy,
        change_set: &ChangeSet,
        checkpoints: &[RollbackCheckpoint],
        errors: &[ExecutionError],
    ) -> Result<RollbackOutcome> {
        tracing::info!(
            strategy = %strategy,
            checkpoints = checkpoints.len(),
            change_set = %change_set.id,
            "Starting rollback"
        );

        let mut outcome = RollbackOutcome::new(strategy);
        // Which states integrity checks compare against
        let mut expected: Vec<FileState> = Vec::new();

        match strategy {
            RollbackStrategy::None => {
                tracing::info!("Rollback strategy is none, leaving workspace untouched");
                return Ok(outcome);
            }
            RollbackStrategy::FullRevert => {
                let checkpoint = checkpoints
                    .iter()
                    .rev()
                    .find(|c| c.validation.is_consistent())
                    .ok_or_else(|| no_checkpoint(strategy))?;
                expected = self.restore_checkpoint(checkpoint, &mut outcome).await?;
            }
            RollbackStrategy::CheckpointRestore => {
                let checkpoint = checkpoints.last().ok_or_else(|| no_checkpoint(strategy))?;
                expected = self.restore_checkpoint(checkpoint, &mut outcome).await?;
            }
            RollbackStrategy::PartialRevert => {
                expected = self.run_procedures(change_set, checkpoints, &mut outcome).await?;
            }
            RollbackStrategy::VersionControlRevert => {
                let paths = change_set.touched_paths();
                self.recovery.version_control_revert(&self.root, &paths).await?;
                outcome.restored_files = paths;
            }
            RollbackStrategy::ForwardFix => {
                self.recovery.forward_fix(&self.root, change_set, errors).await?;
            }
        }

        outcome.checks = self
            .run_checks(&change_set.rollback_plan.validation_checks, change_set, &expected)
            .await;

        let failed: Vec<String> = outcome
            .checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| match &c.detail {
                Some(detail) => format!("{}: {}", c.check, detail),
                None => c.check.clone(),
            })
            .collect();
        if !failed.is_empty() {
            tracing::warn!(failed = failed.len(), "Post-rollback validation failed");
            return Err(CoordinationError::RollbackValidationFailed(failed.join("; ")));
        }

        outcome.completed_at = Utc::now();
        tracing::info!(
            strategy = %strategy,
            restored = outcome.restored_files.len(),
            checks = outcome.checks.len(),
            "Rollback completed"
        );
        Ok(outcome)
    }

    async fn restore_checkpoint(
        &self,
        checkpoint: &RollbackCheckpoint,
        outcome: &mut RollbackOutcome,
    ) -> Result<Vec<FileState>> {
        tracing::debug!(checkpoint_id = %checkpoint.id, label = %checkpoint.label, "Restoring checkpoint");
        for state in &checkpoint.files {
            self.restore_state(state, outcome).await?;
        }
        outcome.checkpoint_id = Some(checkpoint.id.clone());
        Ok(checkpoint.files.clone())
    }

    async fn restore_state(&self, state: &FileState, outcome: &mut RollbackOutcome) -> Result<()> {
        self.state
            .restore(&self.root, state)
            .await
            .map_err(|e| CoordinationError::Rollback(format!("Failed to restore {}: {}", state.path.display(), e)))?;
        outcome.restored_files.push(state.path.clone());
        Ok(())
    }

    /// Run the plan's explicit procedures in order. With no procedures listed,
    /// every touched file is restored from the newest checkpoint that has it.
    async fn run_procedures(
        &self,
        change_set: &ChangeSet,
        checkpoints: &[RollbackCheckpoint],
        outcome: &mut RollbackOutcome,
    ) -> Result<Vec<FileState>> {
        let procedures = if change_set.rollback_plan.procedures.is_empty() {
            change_set
                .touched_paths()
                .into_iter()
                .map(|path| RollbackProcedure::RestoreFile { path })
                .collect()
        } else {
            change_set.rollback_plan.procedures.clone()
        };

        let mut restored = Vec::new();
        for procedure in &procedures {
            match procedure {
                RollbackProcedure::RestoreFile { path } => {
                    let state = latest_state(checkpoints, path).ok_or_else(|| {
                        CoordinationError::Rollback(format!("No checkpoint captured {}", path.display()))
                    })?;
                    self.restore_state(state, outcome).await?;
                    restored.push(state.clone());
                }
                RollbackProcedure::RunCommand {
                    program,
                    args,
                    timeout_secs,
                } => {
                    let timeout = timeout_secs.map(Duration::from_secs).unwrap_or(DEFAULT_COMMAND_TIMEOUT);
                    let result = self.recovery.run_command(&self.root, program, args, timeout).await?;
                    if !result.success {
                        return Err(CoordinationError::Rollback(format!(
                            "Command `{}` failed: {}",
                            program,
                            result.stderr.trim()
                        )));
                    }
                }
                RollbackProcedure::RestartService { name } => {
                    self.recovery.restart_service(name).await?;
                }
                RollbackProcedure::RunValidation => {
                    let failures = self.syntax_failures(&change_set.touched_paths()).await;
                    if !failures.is_empty() {
                        return Err(CoordinationError::RollbackValidationFailed(failures.join("; ")));
                    }
                }
            }
            outcome.procedures_run += 1;
            tracing::debug!(procedure = ?procedure, "Rollback procedure finished");
        }
        Ok(restored)
    }

    async fn run_checks(&self, checks: &[RollbackCheck], change_set: &ChangeSet, expected: &[FileState]) -> Vec<CheckOutcome> {
        let mut outcomes = Vec::with_capacity(checks.len());
        for check in checks {
            let outcome = match check {
                RollbackCheck::Syntax => {
                    let paths: Vec<PathBuf> = if expected.is_empty() {
                        change_set.touched_paths()
                    } else {
                        expected.iter().map(|s| s.path.clone()).collect()
                    };
                    let failures = self.syntax_failures(&paths).await;
                    CheckOutcome {
                        check: "syntax".to_string(),
                        passed: failures.is_empty(),
                        detail: (!failures.is_empty()).then(|| failures.join(", ")),
                    }
                }
                RollbackCheck::Integrity => {
                    let mismatches = self.integrity_mismatches(expected).await;
                    CheckOutcome {
                        check: "integrity".to_string(),
                        passed: mismatches.is_empty(),
                        detail: (!mismatches.is_empty()).then(|| mismatches.join(", ")),
                    }
                }
                RollbackCheck::Command { program, args } => {
                    let name = format!("command `{}`", program);
                    match self
                        .recovery
                        .run_command(&self.root, program, args, DEFAULT_COMMAND_TIMEOUT)
                        .await
                    {
                        Ok(result) => CheckOutcome {
                            check: name,
                            passed: result.success,
                            detail: (!result.success).then(|| format!("exit code {:?}", result.exit_code)),
                        },
                        Err(e) => CheckOutcome {
                            check: name,
                            passed: false,
                            detail: Some(e.to_string()),
                        },
                    }
                }
            };
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Paths whose current content does not parse
    async fn syntax_failures(&self, paths: &[PathBuf]) -> Vec<String> {
        let mut failures = Vec::new();
        for path in paths {
            let state = match self.state.capture(&self.root, path).await {
                Ok(state) => state,
                Err(e) => {
                    failures.push(format!("{} ({})", path.display(), e));
                    continue;
                }
            };
            let Some(content) = &state.content else {
                continue;
            };
            match self.syntax.check_syntax(path, content).await {
                Ok(true) => {}
                Ok(false) => failures.push(path.display().to_string()),
                Err(e) => failures.push(format!("{} ({})", path.display(), e)),
            }
        }
        failures
    }

    async fn integrity_mismatches(&self, expected: &[FileState]) -> Vec<String> {
        let mut mismatches = Vec::new();
        for state in expected {
            match self.state.capture(&self.root, &state.path).await {
                Ok(actual) => {
                    if let Some(mismatch) = compare_states(state, &actual) {
                        mismatches.push(format!("{} ({:?})", state.path.display(), mismatch));
                    }
                }
                Err(e) => mismatches.push(format!("{} ({})", state.path.display(), e)),
            }
        }
        mismatches
    }
}

fn no_checkpoint(strategy: RollbackStrategy) -> CoordinationError {
    CoordinationError::NoValidCheckpoint {
        strategy: strategy.to_string(),
    }
}

fn latest_state<'a>(checkpoints: &'a [RollbackCheckpoint], path: &Path) -> Option<&'a FileState> {
    let key = path_key(path);
    checkpoints
        .iter()
        .rev()
        .find_map(|c| c.files.iter().find(|f| path_key(&f.path) == key))
}
