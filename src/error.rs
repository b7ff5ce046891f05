//! Error types for coordination sessions.
//!
//! Component methods return `CoordinationError`; the coordinator decides whether
//! a failure triggers rollback or ends the session.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Coarse grouping used when recording session errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Planning,
    Validation,
    Execution,
    Rollback,
    Session,
    Internal,
}

#[derive(Error, Debug)]
pub enum CoordinationError {
    #[error("Circular dependency detected at {node}: {}", cycle.join(" -> "))]
    CircularDependency { node: String, cycle: Vec<String> },

    #[error("Execution plan is empty: no files with pending changes")]
    EmptyPlan,

    #[error("Invalid dependency graph: {0}")]
    InvalidGraph(String),

    #[error("Validation blocked execution: overall status {status} ({errors} errors, {warnings} warnings)")]
    ValidationBlocked {
        status: String,
        errors: usize,
        warnings: usize,
    },

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("{capability} unavailable: {message}")]
    CollaboratorUnavailable { capability: String, message: String },

    #[error("Workspace changed since planning: {}", display_paths(paths))]
    WorkspaceDrift { paths: Vec<PathBuf> },

    #[error("No valid checkpoint available for {strategy} rollback")]
    NoValidCheckpoint { strategy: String },

    #[error("Post-rollback validation failed: {0}")]
    RollbackValidationFailed(String),

    #[error("Rollback error: {0}")]
    Rollback(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Invalid session transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Session {session} has no {artifact} yet")]
    MissingArtifact { session: String, artifact: String },

    #[error("{stage} timed out after {}s", after.as_secs())]
    Timeout { stage: String, after: Duration },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid pattern: {0}")]
    Regex(#[from] regex::Error),
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl CoordinationError {
    /// Helper for collaborator outages
    pub fn unavailable(capability: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CollaboratorUnavailable {
            capability: capability.into(),
            message: message.into(),
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::CollaboratorUnavailable { .. })
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::CircularDependency { .. } | Self::EmptyPlan | Self::InvalidGraph(_) => {
                ErrorCategory::Planning
            }
            Self::ValidationBlocked { .. } => ErrorCategory::Validation,
            Self::Execution(_)
            | Self::CollaboratorUnavailable { .. }
            | Self::WorkspaceDrift { .. } => ErrorCategory::Execution,
            Self::NoValidCheckpoint { .. }
            | Self::RollbackValidationFailed(_)
            | Self::Rollback(_) => ErrorCategory::Rollback,
            Self::SessionNotFound(_)
            | Self::InvalidTransition { .. }
            | Self::MissingArtifact { .. } => ErrorCategory::Session,
            Self::Timeout { .. }
            | Self::Config(_)
            | Self::Io(_)
            | Self::Serialization(_)
            | Self::Regex(_) => ErrorCategory::Internal,
        }
    }

    /// Whether this error ends the session without a retry
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::SessionNotFound(_) | Self::InvalidTransition { .. } | Self::MissingArtifact { .. }
        )
    }

    /// Human-readable next step for the caller
    pub fn recovery_suggestion(&self) -> String {
        match self {
            Self::CircularDependency { cycle, .. } => format!(
                "Break the dependency cycle ({}) or split the change set so the files are not changed together",
                cycle.join(" -> ")
            ),
            Self::EmptyPlan => "Add at least one file change that maps to an analyzed file".to_string(),
            Self::InvalidGraph(_) => "Re-run dependency analysis over the current target files".to_string(),
            Self::ValidationBlocked { .. } => {
                "Fix the reported validation errors, or lower the validation strictness".to_string()
            }
            Self::Execution(_) => "Inspect the failed operations and re-run after fixing them".to_string(),
            Self::CollaboratorUnavailable { capability, .. } => {
                format!("Restore the {} collaborator and retry the session", capability)
            }
            Self::WorkspaceDrift { .. } => {
                "Files changed after planning; re-run analysis and planning before executing".to_string()
            }
            Self::NoValidCheckpoint { .. } => {
                "Restore files manually or retry with the checkpoint_restore strategy".to_string()
            }
            Self::RollbackValidationFailed(_) | Self::Rollback(_) => {
                "Review restored files manually; the workspace may be partially reverted".to_string()
            }
            Self::SessionNotFound(_) => "Start a new coordination session".to_string(),
            Self::InvalidTransition { .. } => {
                "Check the session status before calling this operation".to_string()
            }
            Self::MissingArtifact { artifact, .. } => {
                format!("Run the step that produces the {} first", artifact)
            }
            Self::Timeout { .. } => "Increase the configured timeout or reduce the target file set".to_string(),
            Self::Config(_) => "Correct the configuration value and restart".to_string(),
            Self::Io(_) => "Check file permissions and that the workspace root exists".to_string(),
            Self::Serialization(_) => "Check the input data format".to_string(),
            Self::Regex(_) => "Fix the validation rule pattern".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoordinationError>;
