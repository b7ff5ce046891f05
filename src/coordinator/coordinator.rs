//! Session orchestration
//!
//! The coordinator owns the session store and the event bus, and is the only
//! place that decides whether a failure rolls back or ends a session.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use super::session::{CoordinationContext, CoordinationSession, SessionError, SessionHandle, SessionStatus, SessionStore};
use crate::changes::ChangeSet;
use crate::collaborators::Collaborators;
use crate::config::{CoordinatorConfig, RollbackStrategy, ValidationLevel};
use crate::error::{CoordinationError, Result};
use crate::events::{EventBus, EventKind, LifecycleEvent, Stage};
use crate::execution::{
    ExecutionConfig, ExecutionEngine, ExecutionError, ExecutionObserver, ExecutionResult, GroupProgress, StateSnapshot,
    StateValidator,
};
use crate::graph::{DependencyGraph, GraphBuilder};
use crate::planning::{ExecutionPlan, ExecutionPlanner, ParallelGroup};
use crate::rollback::{RollbackCheckpoint, RollbackManager, RollbackOutcome, ValidationSnapshot};
use crate::validation::{ChangeValidator, ValidationResult};

/// What `execute_changes` reports back
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinationResult {
    pub session_id: String,
    pub status: SessionStatus,
    pub execution: Option<ExecutionResult>,
    pub post_validation: Option<ValidationResult>,
    pub rollback: Option<RollbackOutcome>,
    pub errors: Vec<SessionError>,
}

impl CoordinationResult {
    pub fn from_session(session: &CoordinationSession) -> Self {
        Self {
            session_id: session.id.clone(),
            status: session.status,
            execution: session.execution.clone(),
            post_validation: session.post_validation.clone(),
            rollback: session.rollback.clone(),
            errors: session.errors.clone(),
        }
    }

    pub fn success(&self) -> bool {
        self.status == SessionStatus::Completed
    }
}

/// Drives coordination sessions. Cheap to clone; clones share sessions and events.
#[derive(Clone)]
pub struct Coordinator {
    config: CoordinatorConfig,
    collaborators: Collaborators,
    sessions: Arc<SessionStore>,
    events: EventBus,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;
        let events = EventBus::new(config.event_capacity);
        Ok(Self {
            config,
            collaborators,
            sessions: Arc::new(SessionStore::new()),
            events,
        })
    }

    /// Resolved config with the filesystem collaborators
    pub fn from_env() -> Result<Self> {
        Self::new(CoordinatorConfig::resolve()?, Collaborators::filesystem())
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    /// Create a session and start analysis, planning and (above basic level)
    /// validation in the background
    pub async fn initiate_coordination(&self, context: CoordinationContext) -> Result<String> {
        let session = CoordinationSession::new(context, &self.config);
        session.config.validate()?;

        tracing::info!(
            session_id = %session.id,
            change_set = %session.change_set.id,
            changes = session.change_set.changes.len(),
            targets = session.target_files.len(),
            "Initiating coordination"
        );

        let handle = self.sessions.insert(session);
        let id = handle.id.clone();
        self.events.publish(&id, EventKind::SessionCreated);
        self.transition(&handle, SessionStatus::Analyzing).await?;

        let coordinator = self.clone();
        let task_id = id.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = coordinator.prepare(&task_id).await {
                tracing::warn!(session_id = %task_id, error = %e, "Session preparation stopped");
            }
        });
        handle.set_preparation(task).await;

        Ok(id)
    }

    /// Wait for background preparation to finish and return the resulting status
    pub async fn await_preparation(&self, session_id: &str) -> Result<SessionStatus> {
        let handle = self.sessions.get(session_id)?;
        handle.join_preparation().await;
        Ok(handle.status().await)
    }

    async fn prepare(&self, session_id: &str) -> Result<()> {
        let handle = self.sessions.get(session_id)?;
        let (targets, level) = {
            let record = handle.record.lock().await;
            (record.target_files.clone(), record.config.validation_level)
        };

        self.analyze_dependencies(session_id, &targets).await?;
        self.plan_execution(session_id).await?;
        if level != ValidationLevel::Basic {
            self.validate_changes(session_id).await?;
        }
        Ok(())
    }

    pub async fn analyze_dependencies(&self, session_id: &str, targets: &[PathBuf]) -> Result<DependencyGraph> {
        let handle = self.sessions.get(session_id)?;
        let (root, changes, config) = {
            let record = handle.record.lock().await;
            (record.root.clone(), record.change_set.changes.clone(), record.config.clone())
        };

        self.transition(&handle, SessionStatus::Analyzing).await?;
        self.events.publish(session_id, EventKind::StageStarted { stage: Stage::Analysis });

        let builder = GraphBuilder::new(&self.collaborators, config.analysis_depth).with_declared_dependencies(&changes);
        let graph = match with_timeout(Stage::Analysis, config.analysis_timeout(), builder.build(&root, targets)).await {
            Ok(graph) => graph,
            Err(e) => return Err(self.fail(&handle, Stage::Analysis, e).await),
        };

        if graph.has_cycles() {
            tracing::warn!(session_id = %session_id, cycles = graph.cycles.len(), "Dependency cycles detected");
            self.events.publish(
                session_id,
                EventKind::CyclesDetected {
                    cycles: graph.cycles.clone(),
                },
            );
        }

        {
            let mut record = handle.record.lock().await;
            record.target_files = targets.to_vec();
            record.graph = Some(graph.clone());
            // Later artifacts were derived from the old graph
            record.plan = None;
            record.planned_state = None;
            record.validation = None;
        }

        self.events.publish(
            session_id,
            EventKind::StageCompleted {
                stage: Stage::Analysis,
                summary: format!(
                    "{} nodes, {} edges, {} cycles",
                    graph.len(),
                    graph.edge_count(),
                    graph.cycles.len()
                ),
            },
        );
        Ok(graph)
    }

    pub async fn plan_execution(&self, session_id: &str) -> Result<ExecutionPlan> {
        let handle = self.sessions.get(session_id)?;
        let (graph, change_set, config, root) = {
            let record = handle.record.lock().await;
            (
                record.require_graph()?.clone(),
                record.change_set.clone(),
                record.config.clone(),
                record.root.clone(),
            )
        };

        self.transition(&handle, SessionStatus::Planning).await?;
        self.events.publish(session_id, EventKind::StageStarted { stage: Stage::Planning });

        let plan = match ExecutionPlanner::new(&config).plan(&graph, &change_set) {
            Ok(plan) => plan,
            Err(e) => return Err(self.fail(&handle, Stage::Planning, e).await),
        };

        let planned_state =
            match StateSnapshot::capture(self.collaborators.state.as_ref(), &root, &plan.touched_paths()).await {
                Ok(snapshot) => snapshot,
                Err(e) => return Err(self.fail(&handle, Stage::Planning, e).await),
            };

        {
            let mut record = handle.record.lock().await;
            record.plan = Some(plan.clone());
            record.planned_state = Some(planned_state);
            record.validation = None;
        }

        self.events.publish(
            session_id,
            EventKind::StageCompleted {
                stage: Stage::Planning,
                summary: format!("{} steps in {} groups", plan.step_count(), plan.groups.len()),
            },
        );
        Ok(plan)
    }

    pub async fn validate_changes(&self, session_id: &str) -> Result<ValidationResult> {
        let handle = self.sessions.get(session_id)?;
        let (graph, change_set, config, root) = {
            let record = handle.record.lock().await;
            (
                record.require_graph()?.clone(),
                record.change_set.clone(),
                record.config.clone(),
                record.root.clone(),
            )
        };

        self.transition(&handle, SessionStatus::Validating).await?;
        self.events.publish(session_id, EventKind::StageStarted { stage: Stage::Validation });

        let validator = ChangeValidator::new(&self.collaborators);
        let validation = with_timeout(Stage::Validation, config.validation_timeout(), async {
            Ok(validator
                .validate(&root, &change_set, &graph, config.validation_level)
                .await)
        })
        .await;
        let result = match validation {
            Ok(result) => result,
            Err(e) => return Err(self.fail(&handle, Stage::Validation, e).await),
        };

        handle.record.lock().await.validation = Some(result.clone());

        if result.blocks(config.warnings_block()) {
            return Err(self.fail(&handle, Stage::Validation, blocked(&result)).await);
        }

        self.events.publish(
            session_id,
            EventKind::StageCompleted {
                stage: Stage::Validation,
                summary: format!(
                    "{} ({} errors, {} warnings)",
                    result.overall,
                    result.error_count(),
                    result.warning_count()
                ),
            },
        );
        Ok(result)
    }

    /// Run the plan. Operation failures come back in the result with the session
    /// rolled back; only engine-level failures and drift are returned as `Err`.
    pub async fn execute_changes(&self, session_id: &str) -> Result<CoordinationResult> {
        let handle = self.sessions.get(session_id)?;
        handle.join_preparation().await;

        let (plan, planned_state, change_set, config, root) = {
            let record = handle.record.lock().await;
            (
                record.require_plan()?.clone(),
                record.planned_state.clone(),
                record.change_set.clone(),
                record.config.clone(),
                record.root.clone(),
            )
        };

        self.transition(&handle, SessionStatus::Executing).await?;
        self.events.publish(session_id, EventKind::StageStarted { stage: Stage::Execution });

        if let Some(snapshot) = planned_state {
            let report = match StateValidator::new(snapshot)
                .validate_current_state(self.collaborators.state.as_ref(), &root)
                .await
            {
                Ok(report) => report,
                Err(e) => return Err(self.fail(&handle, Stage::Execution, e).await),
            };
            if !report.valid {
                self.events.publish(
                    session_id,
                    EventKind::DriftDetected {
                        critical: report.critical_count,
                        warnings: report.warning_count,
                    },
                );
            }
            let critical = report.critical_paths();
            handle.record.lock().await.drift = Some(report);
            if !critical.is_empty() {
                let error = CoordinationError::WorkspaceDrift { paths: critical };
                return Err(self.fail(&handle, Stage::Execution, error).await);
            }
        }

        let manager = RollbackManager::new(&self.collaborators, root.clone());
        let touched = plan.touched_paths();
        let checkpoint_state = {
            let record = handle.record.lock().await;
            record
                .validation
                .as_ref()
                .map(ValidationSnapshot::from_result)
                .unwrap_or_else(ValidationSnapshot::clean)
        };

        if config.create_backups && !config.dry_run {
            match manager
                .create_checkpoint("pre-execution", &touched, checkpoint_state)
                .await
            {
                Ok(checkpoint) => self.append_checkpoint(&handle, checkpoint).await,
                Err(e) => return Err(self.fail(&handle, Stage::Execution, e).await),
            }
        }

        let observer = SessionObserver {
            coordinator: self,
            handle: &handle,
            plan: &plan,
            manager: &manager,
            paths: &touched,
            validation: checkpoint_state,
            checkpoints: !config.dry_run,
        };
        let engine = ExecutionEngine::new(
            Arc::clone(&self.collaborators.applier),
            root.clone(),
            ExecutionConfig::from_config(&config),
        );

        let result = match engine.execute(&plan, &observer).await {
            Ok(result) => result,
            Err(e) => {
                let error = self.fail(&handle, Stage::Execution, e).await;
                self.auto_rollback(&handle, &change_set, &config, &[]).await;
                return Err(error);
            }
        };
        handle.record.lock().await.execution = Some(result.clone());

        if result.cancelled || handle.is_cancelled() {
            self.finish_cancelled(&handle, &change_set, &config).await;
            let result = self.result_for(&handle).await;
            if result.status == SessionStatus::Cancelled {
                self.sessions.remove(session_id);
            }
            return Ok(result);
        }

        if !result.errors.is_empty() {
            self.finish_failed_execution(&handle, &change_set, &config, &result).await;
            return Ok(self.result_for(&handle).await);
        }

        self.events.publish(
            session_id,
            EventKind::StageCompleted {
                stage: Stage::Execution,
                summary: format!(
                    "{} operations in {} groups",
                    result.operations_executed, result.groups_completed
                ),
            },
        );

        self.events.publish(session_id, EventKind::StageStarted { stage: Stage::PostValidation });
        let validator = ChangeValidator::new(&self.collaborators);
        let post = with_timeout(Stage::PostValidation, config.validation_timeout(), async {
            Ok(validator
                .validate_workspace(&root, &touched, config.validation_level)
                .await)
        })
        .await;

        let post = match post {
            Ok(post) => post,
            Err(e) => {
                self.fail(&handle, Stage::PostValidation, e).await;
                self.auto_rollback(&handle, &change_set, &config, &[]).await;
                return Ok(self.result_for(&handle).await);
            }
        };
        handle.record.lock().await.post_validation = Some(post.clone());

        if post.blocks(config.warnings_block()) {
            self.fail(&handle, Stage::PostValidation, blocked(&post)).await;
            self.auto_rollback(&handle, &change_set, &config, &[]).await;
            return Ok(self.result_for(&handle).await);
        }

        self.events.publish(
            session_id,
            EventKind::StageCompleted {
                stage: Stage::PostValidation,
                summary: post.overall.to_string(),
            },
        );
        self.transition(&handle, SessionStatus::Completed).await?;

        tracing::info!(
            session_id = %session_id,
            operations = result.operations_executed,
            elapsed_ms = result.elapsed_ms,
            "Coordination completed"
        );
        Ok(self.result_for(&handle).await)
    }

    /// Roll back a finished session with its effective strategy
    pub async fn rollback_changes(&self, session_id: &str) -> Result<RollbackOutcome> {
        let handle = self.sessions.get(session_id)?;
        let (status, strategy, errors) = {
            let record = handle.record.lock().await;
            (
                record.status,
                effective_strategy(&record.change_set, &record.config),
                record.execution.as_ref().map(|e| e.errors.clone()).unwrap_or_default(),
            )
        };

        if !status.can_roll_back() {
            return Err(CoordinationError::InvalidTransition {
                from: status.to_string(),
                to: SessionStatus::RolledBack.to_string(),
            });
        }

        self.run_rollback(&handle, strategy, &errors, SessionStatus::RolledBack).await
    }

    /// Cancel a session and drop it from the registry.
    ///
    /// Preparation stops immediately and the final record is returned. An
    /// executing session only gets the request here: it stops before its next
    /// group, rolls back, and is dropped when `execute_changes` returns.
    pub async fn cancel_coordination(&self, session_id: &str) -> Result<CoordinationResult> {
        let handle = self.sessions.get(session_id)?;

        let previous = {
            let mut record = handle.record.lock().await;
            if record.status == SessionStatus::Executing {
                handle.cancel();
                tracing::info!(session_id = %session_id, "Cancellation requested during execution");
                return Ok(CoordinationResult::from_session(&record));
            }
            let previous = record.transition(SessionStatus::Cancelled)?;
            handle.cancel();
            previous
        };

        handle.abort_preparation().await;
        self.publish_status(session_id, previous, SessionStatus::Cancelled);
        self.events.publish(session_id, EventKind::Cancelled);

        let result = self.result_for(&handle).await;
        self.sessions.remove(session_id);
        tracing::info!(session_id = %session_id, from = %previous, "Coordination cancelled");
        Ok(result)
    }

    pub async fn get_coordination_status(&self, session_id: &str) -> Result<SessionStatus> {
        Ok(self.sessions.get(session_id)?.status().await)
    }

    pub async fn get_coordination_results(&self, session_id: &str) -> Result<CoordinationSession> {
        Ok(self.sessions.get(session_id)?.snapshot().await)
    }

    pub async fn list_sessions(&self) -> Vec<(String, SessionStatus)> {
        let mut sessions = Vec::new();
        for id in self.sessions.ids() {
            if let Ok(handle) = self.sessions.get(&id) {
                sessions.push((id, handle.status().await));
            }
        }
        sessions
    }

    /// Forget a session that is not executing
    pub async fn remove_session(&self, session_id: &str) -> Result<()> {
        let handle = self.sessions.get(session_id)?;
        let status = handle.status().await;
        if status == SessionStatus::Executing {
            return Err(CoordinationError::InvalidTransition {
                from: status.to_string(),
                to: "removed".to_string(),
            });
        }
        handle.abort_preparation().await;
        self.sessions.remove(session_id);
        Ok(())
    }

    /// Drop terminal sessions that finished more than `older_than` ago
    pub async fn purge_finished(&self, older_than: Duration) -> Result<usize> {
        let age = chrono::Duration::from_std(older_than).map_err(|e| CoordinationError::Config(e.to_string()))?;
        let purged = self.sessions.purge_finished_before(Utc::now() - age).await;
        if purged > 0 {
            tracing::info!(purged, "Purged finished sessions");
        }
        Ok(purged)
    }

    async fn finish_failed_execution(
        &self,
        handle: &SessionHandle,
        change_set: &ChangeSet,
        config: &CoordinatorConfig,
        result: &ExecutionResult,
    ) {
        let error = CoordinationError::Execution(format!(
            "{} error(s) during execution, first: {}",
            result.errors.len(),
            result.errors.first().map(|e| e.message.as_str()).unwrap_or("unknown")
        ));
        let strategy = effective_strategy(change_set, config);

        if strategy == RollbackStrategy::None && result.is_partial() {
            tracing::warn!(session_id = %handle.id, "Execution partially applied, rollback disabled");
            handle.record.lock().await.record_error(Stage::Execution, &error);
            self.events.publish(
                &handle.id,
                EventKind::StageFailed {
                    stage: Stage::Execution,
                    error: error.to_string(),
                },
            );
            if let Err(e) = self.transition(handle, SessionStatus::PartiallyCompleted).await {
                tracing::warn!(session_id = %handle.id, error = %e, "Could not mark session partially completed");
            }
            return;
        }

        self.fail(handle, Stage::Execution, error).await;
        self.auto_rollback(handle, change_set, config, &result.errors).await;
    }

    async fn finish_cancelled(&self, handle: &SessionHandle, change_set: &ChangeSet, config: &CoordinatorConfig) {
        let strategy = effective_strategy(change_set, config);
        tracing::info!(session_id = %handle.id, strategy = %strategy, "Rolling back cancelled execution");

        if !config.dry_run && rolls_back_automatically(strategy) {
            if self
                .run_rollback(handle, strategy, &[], SessionStatus::Cancelled)
                .await
                .is_err()
            {
                return;
            }
        } else if let Err(e) = self.transition(handle, SessionStatus::Cancelled).await {
            tracing::warn!(session_id = %handle.id, error = %e, "Could not mark session cancelled");
            return;
        }
        self.events.publish(&handle.id, EventKind::Cancelled);
    }

    /// Roll back after a failure unless the strategy leaves recovery to the caller
    async fn auto_rollback(
        &self,
        handle: &SessionHandle,
        change_set: &ChangeSet,
        config: &CoordinatorConfig,
        errors: &[ExecutionError],
    ) {
        let strategy = effective_strategy(change_set, config);
        if config.dry_run || !rolls_back_automatically(strategy) {
            tracing::info!(session_id = %handle.id, strategy = %strategy, "Skipping automatic rollback");
            return;
        }
        if let Err(e) = self.run_rollback(handle, strategy, errors, SessionStatus::RolledBack).await {
            tracing::warn!(session_id = %handle.id, error = %e, "Automatic rollback failed");
        }
    }

    async fn run_rollback(
        &self,
        handle: &SessionHandle,
        strategy: RollbackStrategy,
        errors: &[ExecutionError],
        on_success: SessionStatus,
    ) -> Result<RollbackOutcome> {
        let (change_set, checkpoints, root) = {
            let record = handle.record.lock().await;
            (record.change_set.clone(), record.checkpoints.clone(), record.root.clone())
        };

        self.events.publish(&handle.id, EventKind::StageStarted { stage: Stage::Rollback });
        self.events.publish(&handle.id, EventKind::RollbackStarted { strategy });

        let manager = RollbackManager::new(&self.collaborators, root);
        match manager.rollback(strategy, &change_set, &checkpoints, errors).await {
            Ok(outcome) => {
                handle.record.lock().await.rollback = Some(outcome.clone());
                self.events.publish(
                    &handle.id,
                    EventKind::RollbackCompleted {
                        strategy,
                        restored_files: outcome.restored_files.len(),
                    },
                );
                self.events.publish(
                    &handle.id,
                    EventKind::StageCompleted {
                        stage: Stage::Rollback,
                        summary: format!("{} files restored", outcome.restored_files.len()),
                    },
                );
                self.transition(handle, on_success).await?;
                Ok(outcome)
            }
            Err(e) => {
                self.events.publish(&handle.id, EventKind::RollbackFailed { error: e.to_string() });
                Err(self.fail(handle, Stage::Rollback, e).await)
            }
        }
    }

    async fn append_checkpoint(&self, handle: &SessionHandle, checkpoint: RollbackCheckpoint) {
        self.events.publish(
            &handle.id,
            EventKind::CheckpointCreated {
                checkpoint_id: checkpoint.id.clone(),
                files: checkpoint.files.len(),
            },
        );
        handle.record.lock().await.checkpoints.push(checkpoint);
    }

    async fn transition(&self, handle: &SessionHandle, next: SessionStatus) -> Result<()> {
        let previous = handle.record.lock().await.transition(next)?;
        self.publish_status(&handle.id, previous, next);
        Ok(())
    }

    fn publish_status(&self, session_id: &str, from: SessionStatus, to: SessionStatus) {
        if from != to {
            self.events.publish(
                session_id,
                EventKind::StatusChanged {
                    from: from.to_string(),
                    to: to.to_string(),
                },
            );
        }
    }

    /// Record the error, mark the session failed and hand the error back
    async fn fail(&self, handle: &SessionHandle, stage: Stage, error: CoordinationError) -> CoordinationError {
        tracing::warn!(session_id = %handle.id, stage = %stage, error = %error, "Stage failed");
        let transitioned = {
            let mut record = handle.record.lock().await;
            record.record_error(stage, &error);
            record.transition(SessionStatus::Failed).ok()
        };
        if let Some(previous) = transitioned {
            self.publish_status(&handle.id, previous, SessionStatus::Failed);
        }
        self.events.publish(
            &handle.id,
            EventKind::StageFailed {
                stage,
                error: error.to_string(),
            },
        );
        error
    }

    async fn result_for(&self, handle: &SessionHandle) -> CoordinationResult {
        CoordinationResult::from_session(&*handle.record.lock().await)
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("config", &self.config)
            .field("sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}

/// Publishes progress and takes plan checkpoints between groups
struct SessionObserver<'a> {
    coordinator: &'a Coordinator,
    handle: &'a SessionHandle,
    plan: &'a ExecutionPlan,
    manager: &'a RollbackManager,
    paths: &'a [PathBuf],
    validation: ValidationSnapshot,
    checkpoints: bool,
}

#[async_trait]
impl<'a> ExecutionObserver for SessionObserver<'a> {
    async fn group_started(&self, group: &ParallelGroup) {
        self.coordinator.events.publish(
            &self.handle.id,
            EventKind::GroupStarted {
                group_index: group.index,
                steps: group.steps.len(),
            },
        );
    }

    async fn group_completed(&self, group: &ParallelGroup, progress: GroupProgress) -> Result<()> {
        self.coordinator.events.publish(
            &self.handle.id,
            EventKind::GroupProgress {
                completed_groups: progress.completed_groups,
                total_groups: progress.total_groups,
                estimated_remaining: progress.estimated_remaining_ms,
            },
        );

        if !self.checkpoints {
            return Ok(());
        }
        if !progress.clean {
            tracing::debug!(
                session_id = %self.handle.id,
                group = group.index,
                "Skipping checkpoint after failed operations"
            );
            return Ok(());
        }
        if let Some(marker) = self.plan.checkpoint_after(group.index) {
            // Dependents of files already changed may still be waiting in later groups
            let validation = ValidationSnapshot {
                dependencies_resolved: self.validation.dependencies_resolved && self.plan.settled_after(group.index),
                ..self.validation
            };
            let checkpoint = self
                .manager
                .create_checkpoint(marker.label.clone(), self.paths, validation)
                .await?
                .after_group(group.index);
            self.coordinator.append_checkpoint(self.handle, checkpoint).await;
        }
        Ok(())
    }

    fn is_cancelled(&self) -> bool {
        self.handle.is_cancelled()
    }
}

fn effective_strategy(change_set: &ChangeSet, config: &CoordinatorConfig) -> RollbackStrategy {
    change_set.rollback_plan.strategy.unwrap_or(config.rollback_strategy)
}

/// Forward fix and none leave recovery to the caller
fn rolls_back_automatically(strategy: RollbackStrategy) -> bool {
    !matches!(strategy, RollbackStrategy::ForwardFix | RollbackStrategy::None)
}

fn blocked(result: &ValidationResult) -> CoordinationError {
    CoordinationError::ValidationBlocked {
        status: result.overall.to_string(),
        errors: result.error_count(),
        warnings: result.warning_count(),
    }
}

async fn with_timeout<T, F>(stage: Stage, after: Duration, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(after, future)
        .await
        .map_err(|_| CoordinationError::Timeout {
            stage: stage.to_string(),
            after,
        })?
}
