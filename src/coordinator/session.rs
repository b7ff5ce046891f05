//! Coordination sessions
//!
//! A session carries one change set through analysis, planning, validation,
//! execution and possibly rollback. Sessions live in a `SessionStore` owned by
//! the coordinator.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::changes::ChangeSet;
use crate::config::CoordinatorConfig;
use crate::error::{CoordinationError, Result};
use crate::events::Stage;
use crate::execution::{DriftReport, ExecutionResult, StateSnapshot};
use crate::graph::DependencyGraph;
use crate::planning::ExecutionPlan;
use crate::rollback::{RollbackCheckpoint, RollbackOutcome};
use crate::validation::ValidationResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Analyzing,
    Planning,
    Validating,
    Executing,
    Completed,
    Failed,
    PartiallyCompleted,
    RolledBack,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Analyzing => "analyzing",
            SessionStatus::Planning => "planning",
            SessionStatus::Validating => "validating",
            SessionStatus::Executing => "executing",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::PartiallyCompleted => "partially_completed",
            SessionStatus::RolledBack => "rolled_back",
            SessionStatus::Cancelled => "cancelled",
        }
    }

    /// Before execution starts
    pub fn is_preparing(&self) -> bool {
        matches!(
            self,
            SessionStatus::Pending | SessionStatus::Analyzing | SessionStatus::Planning | SessionStatus::Validating
        )
    }

    /// No further stage will run on its own
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed
                | SessionStatus::Failed
                | SessionStatus::PartiallyCompleted
                | SessionStatus::RolledBack
                | SessionStatus::Cancelled
        )
    }

    /// Whether an explicit rollback may start from here
    pub fn can_roll_back(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::PartiallyCompleted
        )
    }

    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        match self {
            // Preparation stages may be re-run in any order
            Pending | Analyzing | Planning | Validating => {
                matches!(next, Analyzing | Planning | Validating | Executing | Failed | Cancelled)
            }
            Executing => matches!(next, Completed | Failed | PartiallyCompleted | Cancelled),
            Completed | PartiallyCompleted => matches!(next, RolledBack | Failed),
            Failed => next == RolledBack,
            RolledBack | Cancelled => false,
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionError {
    pub stage: Stage,
    pub message: String,
    pub recovery_suggestion: String,
    pub occurred_at: DateTime<Utc>,
}

impl SessionError {
    pub fn from_error(stage: Stage, error: &CoordinationError) -> Self {
        Self {
            stage,
            message: error.to_string(),
            recovery_suggestion: error.recovery_suggestion(),
            occurred_at: Utc::now(),
        }
    }
}

/// What a caller supplies to start a session
#[derive(Debug, Clone)]
pub struct CoordinationContext {
    pub root: PathBuf,
    pub change_set: ChangeSet,
    /// Files to analyze; the change set's files when empty
    pub target_files: Vec<PathBuf>,
    /// Replaces the coordinator's config for this session
    pub config: Option<CoordinatorConfig>,
}

impl CoordinationContext {
    pub fn new(root: impl Into<PathBuf>, change_set: ChangeSet) -> Self {
        Self {
            root: root.into(),
            change_set,
            target_files: Vec::new(),
            config: None,
        }
    }

    pub fn with_targets(mut self, targets: Vec<PathBuf>) -> Self {
        self.target_files = targets;
        self
    }

    pub fn with_config(mut self, config: CoordinatorConfig) -> Self {
        self.config = Some(config);
        self
    }
}

/// Full session record, returned by `get_coordination_results`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinationSession {
    pub id: String,
    pub status: SessionStatus,
    pub root: PathBuf,
    pub change_set: ChangeSet,
    pub target_files: Vec<PathBuf>,
    pub config: CoordinatorConfig,
    pub graph: Option<DependencyGraph>,
    pub plan: Option<ExecutionPlan>,
    /// Workspace state when the plan was built
    pub planned_state: Option<StateSnapshot>,
    pub validation: Option<ValidationResult>,
    pub drift: Option<DriftReport>,
    pub execution: Option<ExecutionResult>,
    pub post_validation: Option<ValidationResult>,
    /// Append-only
    pub checkpoints: Vec<RollbackCheckpoint>,
    pub rollback: Option<RollbackOutcome>,
    /// Cumulative
    pub errors: Vec<SessionError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl CoordinationSession {
    pub fn new(context: CoordinationContext, default_config: &CoordinatorConfig) -> Self {
        let now = Utc::now();
        let target_files = if context.target_files.is_empty() {
            context.change_set.files()
        } else {
            context.target_files
        };
        Self {
            id: Uuid::new_v4().to_string(),
            status: SessionStatus::Pending,
            root: context.root,
            change_set: context.change_set,
            target_files,
            config: context.config.unwrap_or_else(|| default_config.clone()),
            graph: None,
            plan: None,
            planned_state: None,
            validation: None,
            drift: None,
            execution: None,
            post_validation: None,
            checkpoints: Vec::new(),
            rollback: None,
            errors: Vec::new(),
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    /// Move to `next`, returning the previous status
    pub fn transition(&mut self, next: SessionStatus) -> Result<SessionStatus> {
        if !self.status.can_transition_to(next) {
            return Err(CoordinationError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        let previous = self.status;
        self.status = next;
        self.updated_at = Utc::now();
        if next.is_terminal() {
            self.finished_at = Some(self.updated_at);
        }
        Ok(previous)
    }

    pub fn record_error(&mut self, stage: Stage, error: &CoordinationError) {
        self.errors.push(SessionError::from_error(stage, error));
        self.updated_at = Utc::now();
    }

    pub fn require_graph(&self) -> Result<&DependencyGraph> {
        self.graph.as_ref().ok_or_else(|| self.missing("dependency graph"))
    }

    pub fn require_plan(&self) -> Result<&ExecutionPlan> {
        self.plan.as_ref().ok_or_else(|| self.missing("execution plan"))
    }

    fn missing(&self, artifact: &str) -> CoordinationError {
        CoordinationError::MissingArtifact {
            session: self.id.clone(),
            artifact: artifact.to_string(),
        }
    }
}

/// Live session: the record plus cancellation and background preparation
#[derive(Debug)]
pub struct SessionHandle {
    pub id: String,
    pub record: Mutex<CoordinationSession>,
    cancelled: AtomicBool,
    preparation: Mutex<Option<JoinHandle<()>>>,
}

impl SessionHandle {
    pub fn new(session: CoordinationSession) -> Self {
        Self {
            id: session.id.clone(),
            record: Mutex::new(session),
            cancelled: AtomicBool::new(false),
            preparation: Mutex::new(None),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub async fn set_preparation(&self, handle: JoinHandle<()>) {
        *self.preparation.lock().await = Some(handle);
    }

    /// Wait for background preparation, if any is still running
    pub async fn join_preparation(&self) {
        let handle = self.preparation.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    tracing::warn!(session_id = %self.id, error = %e, "Preparation task panicked");
                }
            }
        }
    }

    pub async fn abort_preparation(&self) {
        if let Some(handle) = self.preparation.lock().await.take() {
            handle.abort();
        }
    }

    pub async fn status(&self) -> SessionStatus {
        self.record.lock().await.status
    }

    pub async fn snapshot(&self) -> CoordinationSession {
        self.record.lock().await.clone()
    }
}

/// Sessions keyed by id
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: DashMap<String, Arc<SessionHandle>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: CoordinationSession) -> Arc<SessionHandle> {
        let handle = Arc::new(SessionHandle::new(session));
        self.sessions.insert(handle.id.clone(), Arc::clone(&handle));
        handle
    }

    pub fn get(&self, id: &str) -> Result<Arc<SessionHandle>> {
        self.sessions
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| CoordinationError::SessionNotFound(id.to_string()))
    }

    pub fn remove(&self, id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions.remove(id).map(|(_, handle)| handle)
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drop terminal sessions that finished before `cutoff`
    pub async fn purge_finished_before(&self, cutoff: DateTime<Utc>) -> usize {
        let handles: Vec<Arc<SessionHandle>> = self.sessions.iter().map(|e| Arc::clone(e.value())).collect();
        let mut purged = 0;
        for handle in handles {
            let expired = {
                let record = handle.record.lock().await;
                record.status.is_terminal() && record.finished_at.is_some_and(|t| t < cutoff)
            };
            if expired && self.remove(&handle.id).is_some() {
                purged += 1;
            }
        }
        purged
    }
}
