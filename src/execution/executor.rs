//! Execution Engine
//!
//! Walks an execution plan group by group. Steps in a parallel group run as
//! concurrent tokio tasks bounded by a semaphore; everything else runs in
//! order. Groups always run in sequence because later groups may depend on
//! earlier ones.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, Semaphore};

use crate::changes::{ChangeKind, FileChange};
use crate::collaborators::{FilePhase, OperationApplier};
use crate::config::CoordinatorConfig;
use crate::error::{CoordinationError, Result};
use crate::planning::{ExecutionPlan, ExecutionStep, ParallelGroup};

/// Configuration for execution behavior
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Upper bound on concurrently running steps
    pub max_parallel: usize,
    /// Stop a file's remaining operations, and all later groups, on the first error
    pub fail_fast: bool,
    /// Count operations without applying them
    pub dry_run: bool,
}

impl ExecutionConfig {
    pub fn from_config(config: &CoordinatorConfig) -> Self {
        Self {
            max_parallel: config.max_parallel_operations.max(1),
            fail_fast: config.fail_fast,
            dry_run: config.dry_run,
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self::from_config(&CoordinatorConfig::default())
    }
}

/// Progress after a group finishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupProgress {
    pub completed_groups: usize,
    pub total_groups: usize,
    pub estimated_remaining_ms: u64,
    /// No operation has failed in this group or any before it
    pub clean: bool,
}

/// Hooks the engine calls between groups
#[async_trait]
pub trait ExecutionObserver: Send + Sync {
    async fn group_started(&self, _group: &ParallelGroup) {}

    /// An error here aborts execution
    async fn group_completed(&self, _group: &ParallelGroup, _progress: GroupProgress) -> Result<()> {
        Ok(())
    }

    /// Checked before each group is dispatched
    fn is_cancelled(&self) -> bool {
        false
    }
}

pub struct NoopObserver;

impl ExecutionObserver for NoopObserver {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionErrorKind {
    OperationFailed,
    FileActionFailed,
    TaskPanicked,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionError {
    pub file: PathBuf,
    pub operation_id: Option<String>,
    pub kind: ExecutionErrorKind,
    pub message: String,
    pub recovery_suggestion: String,
}

impl ExecutionError {
    fn operation(file: &Path, operation_id: &str, message: String) -> Self {
        Self {
            file: file.to_path_buf(),
            operation_id: Some(operation_id.to_string()),
            kind: ExecutionErrorKind::OperationFailed,
            message,
            recovery_suggestion: format!(
                "Check that {} still matches the content operation {} was planned against",
                file.display(),
                operation_id
            ),
        }
    }

    fn file_action(change: &FileChange, message: String) -> Self {
        Self {
            file: change.path.clone(),
            operation_id: None,
            kind: ExecutionErrorKind::FileActionFailed,
            message,
            recovery_suggestion: format!(
                "Verify that the source and destination of the {:?} are in the expected state",
                change.kind
            ),
        }
    }

    fn panicked(file: &Path, message: String) -> Self {
        Self {
            file: file.to_path_buf(),
            operation_id: None,
            kind: ExecutionErrorKind::TaskPanicked,
            message,
            recovery_suggestion: "Inspect the operation applier for bugs and re-run the session".to_string(),
        }
    }
}

/// Result of executing a plan
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub files_processed: usize,
    pub files_modified: usize,
    pub files_created: usize,
    pub files_deleted: usize,
    pub operations_executed: usize,
    pub operations_failed: usize,
    pub groups_completed: usize,
    pub elapsed_ms: u64,
    pub errors: Vec<ExecutionError>,
    /// Stopped before every group ran
    pub cancelled: bool,
    pub dry_run: bool,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.errors.is_empty() && !self.cancelled
    }

    /// Some work landed but not all of it
    pub fn is_partial(&self) -> bool {
        !self.errors.is_empty() && self.operations_executed > 0
    }
}

/// Counters for one step or group
#[derive(Debug, Default)]
struct Tally {
    files_processed: usize,
    modified: usize,
    created: usize,
    deleted: usize,
    executed: usize,
    failed: usize,
    errors: Vec<ExecutionError>,
}

impl Tally {
    fn merge(&mut self, other: Tally) {
        self.files_processed += other.files_processed;
        self.modified += other.modified;
        self.created += other.created;
        self.deleted += other.deleted;
        self.executed += other.executed;
        self.failed += other.failed;
        self.errors.extend(other.errors);
    }

    /// Record what a completed change did to the workspace
    fn record_kind(&mut self, kind: ChangeKind) {
        match kind {
            ChangeKind::Create | ChangeKind::Copy => self.created += 1,
            ChangeKind::Delete => self.deleted += 1,
            ChangeKind::Merge => {
                self.modified += 1;
                self.deleted += 1;
            }
            ChangeKind::Split => {
                self.modified += 1;
                self.created += 1;
            }
            ChangeKind::Modify | ChangeKind::Rename | ChangeKind::Move => self.modified += 1,
        }
    }
}

/// Execution engine for planned changes
pub struct ExecutionEngine {
    applier: Arc<dyn OperationApplier>,
    root: PathBuf,
    config: ExecutionConfig,
}

impl ExecutionEngine {
    pub fn new(applier: Arc<dyn OperationApplier>, root: impl Into<PathBuf>, config: ExecutionConfig) -> Self {
        Self {
            applier,
            root: root.into(),
            config,
        }
    }

    /// Execute every group of the plan in order.
    ///
    /// Operation failures are collected into the result. Only an unavailable
    /// applier or an observer error is returned as `Err`.
    pub async fn execute(&self, plan: &ExecutionPlan, observer: &dyn ExecutionObserver) -> Result<ExecutionResult> {
        let started = Instant::now();
        let total_groups = plan.groups.len();
        let mut totals = Tally::default();
        let mut groups_completed = 0;
        let mut cancelled = false;

        tracing::info!(
            plan_id = %plan.id,
            groups = total_groups,
            steps = plan.step_count(),
            dry_run = self.config.dry_run,
            "Executing plan"
        );

        for group in &plan.groups {
            if observer.is_cancelled() {
                tracing::info!(group = group.index, "Execution cancelled before group");
                cancelled = true;
                break;
            }

            observer.group_started(group).await;
            tracing::debug!(
                group = group.index,
                steps = group.steps.len(),
                parallel = group.parallel,
                "Executing group"
            );

            let group_tally = if group.parallel {
                self.execute_parallel(group).await?
            } else {
                self.execute_sequential(group).await?
            };

            let group_failed = group_tally.failed > 0 || !group_tally.errors.is_empty();
            totals.merge(group_tally);
            groups_completed += 1;

            let progress = GroupProgress {
                completed_groups: groups_completed,
                total_groups,
                estimated_remaining_ms: plan.remaining_time_ms(group.index + 1),
                clean: totals.failed == 0 && totals.errors.is_empty(),
            };
            observer.group_completed(group, progress).await?;

            if group_failed {
                tracing::warn!(group = group.index, "Group had failures");
                if self.config.fail_fast {
                    tracing::warn!(group = group.index, "Fail-fast set, stopping execution");
                    break;
                }
            }
        }

        let result = ExecutionResult {
            files_processed: totals.files_processed,
            files_modified: totals.modified,
            files_created: totals.created,
            files_deleted: totals.deleted,
            operations_executed: totals.executed,
            operations_failed: totals.failed,
            groups_completed,
            elapsed_ms: started.elapsed().as_millis() as u64,
            errors: totals.errors,
            cancelled,
            dry_run: self.config.dry_run,
        };

        tracing::info!(
            plan_id = %plan.id,
            executed = result.operations_executed,
            failed = result.operations_failed,
            groups_completed = result.groups_completed,
            elapsed_ms = result.elapsed_ms,
            "Plan execution finished"
        );

        Ok(result)
    }

    async fn execute_sequential(&self, group: &ParallelGroup) -> Result<Tally> {
        let mut tally = Tally::default();
        for step in &group.steps {
            let step_tally = run_step(self.applier.as_ref(), &self.root, step, &self.config).await?;
            tally.merge(step_tally);
        }
        Ok(tally)
    }

    /// Spawn one task per step; a failing step never cancels its siblings
    async fn execute_parallel(&self, group: &ParallelGroup) -> Result<Tally> {
        let tally = Arc::new(Mutex::new(Tally::default()));
        let fatal = Arc::new(Mutex::new(None::<CoordinationError>));
        let permits = Arc::new(Semaphore::new(self.config.max_parallel));

        let mut handles = Vec::new();

        for step in &group.steps {
            let step = step.clone();
            let file = step.file_path.clone();
            let applier = Arc::clone(&self.applier);
            let root = self.root.clone();
            let config = self.config.clone();
            let tally = Arc::clone(&tally);
            let fatal = Arc::clone(&fatal);
            let permits = Arc::clone(&permits);

            let handle = tokio::spawn(async move {
                let _permit = match permits.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        *fatal.lock().await = Some(CoordinationError::Execution(e.to_string()));
                        return;
                    }
                };

                match run_step(applier.as_ref(), &root, &step, &config).await {
                    Ok(step_tally) => tally.lock().await.merge(step_tally),
                    Err(e) => {
                        tracing::warn!(step = %step.id, error = %e, "Step aborted");
                        let mut slot = fatal.lock().await;
                        if slot.is_none() {
                            *slot = Some(e);
                        }
                    }
                }
            });

            handles.push((file, handle));
        }

        for (file, handle) in handles {
            if let Err(join_err) = handle.await {
                tracing::warn!(error = %join_err, "Task panicked");
                let mut t = tally.lock().await;
                t.failed += 1;
                t.errors
                    .push(ExecutionError::panicked(&file, format!("Task panicked: {}", join_err)));
            }
        }

        if let Some(e) = fatal.lock().await.take() {
            return Err(e);
        }

        let mut tally = tally.lock().await;
        Ok(std::mem::take(&mut *tally))
    }
}

/// Apply every change of one step
async fn run_step(
    applier: &dyn OperationApplier,
    root: &Path,
    step: &ExecutionStep,
    config: &ExecutionConfig,
) -> Result<Tally> {
    let mut tally = Tally {
        files_processed: 1,
        ..Default::default()
    };

    for change in &step.changes {
        if config.dry_run {
            tally.executed += change.operations.len();
            tally.record_kind(change.kind);
            continue;
        }

        if let Err(e) = applier.apply_file_action(root, change, FilePhase::BeforeOperations).await {
            if e.is_unavailable() {
                return Err(e);
            }
            tracing::debug!(file = %change.path.display(), error = %e, "File action failed");
            tally.errors.push(ExecutionError::file_action(change, e.to_string()));
            continue;
        }

        let target = change.operation_target();
        let mut failed_here = 0;

        for operation in &change.operations {
            match applier.apply_operation(root, target, operation).await {
                Ok(()) => {
                    tally.executed += 1;
                    tracing::debug!(file = %target.display(), operation = %operation.id, "Operation applied");
                }
                Err(e) if e.is_unavailable() => return Err(e),
                Err(e) => {
                    tracing::debug!(file = %target.display(), operation = %operation.id, error = %e, "Operation failed");
                    tally.failed += 1;
                    failed_here += 1;
                    tally
                        .errors
                        .push(ExecutionError::operation(target, &operation.id, e.to_string()));
                    if config.fail_fast {
                        break;
                    }
                }
            }
        }

        if failed_here > 0 {
            // Leave renames and deletes undone when the edits did not all land
            continue;
        }

        match applier.apply_file_action(root, change, FilePhase::AfterOperations).await {
            Ok(()) => tally.record_kind(change.kind),
            Err(e) if e.is_unavailable() => return Err(e),
            Err(e) => {
                tracing::debug!(file = %change.path.display(), error = %e, "File action failed");
                tally.errors.push(ExecutionError::file_action(change, e.to_string()));
            }
        }
    }

    Ok(tally)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changes::{CodeLocation, Operation, OperationType};
    use crate::collaborators::MemoryWorkspace;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    fn replace(path: &str, id: &str, line: u32, after: &str) -> Operation {
        Operation::new(OperationType::Replace, CodeLocation::line(path, line))
            .with_id(id)
            .with_after(after)
    }

    fn step(path: &str, changes: Vec<FileChange>) -> ExecutionStep {
        ExecutionStep::new(path, PathBuf::from(path), changes)
    }

    fn plan(groups: Vec<ParallelGroup>) -> ExecutionPlan {
        ExecutionPlan {
            id: "plan".to_string(),
            change_set_id: "cs".to_string(),
            order: groups.iter().flat_map(|g| g.steps.iter().map(|s| s.node_id.clone())).collect(),
            total_time_ms: groups.iter().map(|g| g.estimated_time_ms).sum(),
            parallel_time_ms: 0,
            groups,
            checkpoints: Vec::new(),
            risk: Default::default(),
            resources: Default::default(),
        }
    }

    fn engine(ws: &Arc<MemoryWorkspace>, config: ExecutionConfig) -> ExecutionEngine {
        ExecutionEngine::new(ws.clone(), "no-such-workspace", config)
    }

    fn config() -> ExecutionConfig {
        ExecutionConfig {
            max_parallel: 4,
            fail_fast: false,
            dry_run: false,
        }
    }

    #[tokio::test]
    async fn test_parallel_group_applies_every_step() {
        let ws = Arc::new(MemoryWorkspace::new().with_file("a.ts", "a\n").with_file("b.ts", "b\n"));
        let group = ParallelGroup::new(
            0,
            vec![
                step("a.ts", vec![FileChange::modify("a.ts").with_operation(replace("a.ts", "op-a", 1, "A"))]),
                step("b.ts", vec![FileChange::modify("b.ts").with_operation(replace("b.ts", "op-b", 1, "B"))]),
            ],
            true,
            Vec::new(),
        );

        let result = engine(&ws, config()).execute(&plan(vec![group]), &NoopObserver).await.unwrap();
        assert!(result.success());
        assert_eq!(result.files_processed, 2);
        assert_eq!(result.files_modified, 2);
        assert_eq!(result.operations_executed, 2);
        assert_eq!(ws.read("a.ts").unwrap(), "A\n");
        assert_eq!(ws.read("b.ts").unwrap(), "B\n");
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_siblings() {
        let ws = Arc::new(MemoryWorkspace::new().with_file("a.ts", "1\n2\n").with_file("b.ts", "b\n"));
        ws.fail_operation("bad");
        let group = ParallelGroup::new(
            0,
            vec![
                step(
                    "a.ts",
                    vec![FileChange::modify("a.ts")
                        .with_operation(replace("a.ts", "bad", 1, "x"))
                        .with_operation(replace("a.ts", "good", 2, "two"))],
                ),
                step("b.ts", vec![FileChange::modify("b.ts").with_operation(replace("b.ts", "op-b", 1, "B"))]),
            ],
            true,
            Vec::new(),
        );

        let result = engine(&ws, config()).execute(&plan(vec![group]), &NoopObserver).await.unwrap();
        assert!(!result.success());
        assert_eq!(result.operations_executed, 2);
        assert_eq!(result.operations_failed, 1);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].operation_id.as_deref(), Some("bad"));
        assert!(!result.errors[0].recovery_suggestion.is_empty());
        assert_eq!(ws.read("a.ts").unwrap(), "1\ntwo\n");
        assert_eq!(ws.read("b.ts").unwrap(), "B\n");
    }

    #[tokio::test]
    async fn test_fail_fast_stops_file_and_later_groups() {
        let ws = Arc::new(MemoryWorkspace::new().with_file("a.ts", "1\n2\n").with_file("b.ts", "b\n"));
        ws.fail_operation("bad");
        let first = ParallelGroup::new(
            0,
            vec![step(
                "a.ts",
                vec![FileChange::modify("a.ts")
                    .with_operation(replace("a.ts", "bad", 1, "x"))
                    .with_operation(replace("a.ts", "skipped", 2, "two"))],
            )],
            false,
            Vec::new(),
        );
        let second = ParallelGroup::new(
            1,
            vec![step("b.ts", vec![FileChange::modify("b.ts").with_operation(replace("b.ts", "op-b", 1, "B"))])],
            false,
            vec![0],
        );

        let config = ExecutionConfig {
            fail_fast: true,
            ..config()
        };
        let result = engine(&ws, config).execute(&plan(vec![first, second]), &NoopObserver).await.unwrap();
        assert_eq!(result.groups_completed, 1);
        assert_eq!(ws.applied_operations().await, vec!["bad"]);
        assert_eq!(ws.read("b.ts").unwrap(), "b\n");
    }

    #[tokio::test]
    async fn test_file_actions_and_kind_tally() {
        let ws = Arc::new(MemoryWorkspace::new().with_file("old.ts", "x\n").with_file("gone.ts", "y\n"));
        let group = ParallelGroup::new(
            0,
            vec![
                step("new.ts", vec![FileChange::new("new.ts", ChangeKind::Create).with_content("export {}\n")]),
                step("gone.ts", vec![FileChange::new("gone.ts", ChangeKind::Delete)]),
                step("old.ts", vec![FileChange::new("old.ts", ChangeKind::Rename).with_new_path("renamed.ts")]),
            ],
            false,
            Vec::new(),
        );

        let result = engine(&ws, config()).execute(&plan(vec![group]), &NoopObserver).await.unwrap();
        assert!(result.success());
        assert_eq!(result.files_created, 1);
        assert_eq!(result.files_deleted, 1);
        assert_eq!(result.files_modified, 1);
        assert!(ws.exists("new.ts"));
        assert!(!ws.exists("gone.ts"));
        assert!(ws.exists("renamed.ts") && !ws.exists("old.ts"));
    }

    #[tokio::test]
    async fn test_dry_run_never_applies() {
        let ws = Arc::new(MemoryWorkspace::new().with_file("a.ts", "a\n"));
        let group = ParallelGroup::new(
            0,
            vec![step("a.ts", vec![FileChange::modify("a.ts").with_operation(replace("a.ts", "op", 1, "A"))])],
            false,
            Vec::new(),
        );
        let config = ExecutionConfig {
            dry_run: true,
            ..config()
        };

        let result = engine(&ws, config).execute(&plan(vec![group]), &NoopObserver).await.unwrap();
        assert!(result.dry_run);
        assert_eq!(result.operations_executed, 1);
        assert!(ws.applied_operations().await.is_empty());
        assert_eq!(ws.read("a.ts").unwrap(), "a\n");
    }

    #[tokio::test]
    async fn test_unavailable_applier_is_fatal() {
        let ws = Arc::new(MemoryWorkspace::new().with_file("a.ts", "a\n").with_file("b.ts", "b\n"));
        ws.set_unavailable(true);
        let group = ParallelGroup::new(
            0,
            vec![
                step("a.ts", vec![FileChange::modify("a.ts").with_operation(replace("a.ts", "op-a", 1, "A"))]),
                step("b.ts", vec![FileChange::modify("b.ts").with_operation(replace("b.ts", "op-b", 1, "B"))]),
            ],
            true,
            Vec::new(),
        );

        let err = engine(&ws, config()).execute(&plan(vec![group]), &NoopObserver).await.unwrap_err();
        assert!(matches!(err, CoordinationError::CollaboratorUnavailable { .. }));
    }

    struct Recording {
        progress: std::sync::Mutex<Vec<GroupProgress>>,
        cancel_after: usize,
        seen: AtomicUsize,
        cancelled: AtomicBool,
    }

    #[async_trait]
    impl ExecutionObserver for Recording {
        async fn group_completed(&self, _group: &ParallelGroup, progress: GroupProgress) -> Result<()> {
            self.progress.lock().unwrap().push(progress);
            if self.seen.fetch_add(1, Ordering::SeqCst) + 1 >= self.cancel_after {
                self.cancelled.store(true, Ordering::SeqCst);
            }
            Ok(())
        }

        fn is_cancelled(&self) -> bool {
            self.cancelled.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn test_progress_and_cancellation_between_groups() {
        let ws = Arc::new(
            MemoryWorkspace::new()
                .with_file("a.ts", "a\n")
                .with_file("b.ts", "b\n")
                .with_file("c.ts", "c\n"),
        );
        ws.set_apply_delay(Duration::from_millis(5));
        let groups = ["a.ts", "b.ts", "c.ts"]
            .iter()
            .enumerate()
            .map(|(i, p)| {
                ParallelGroup::new(
                    i,
                    vec![step(p, vec![FileChange::modify(*p).with_operation(replace(p, p, 1, "X"))])],
                    false,
                    Vec::new(),
                )
            })
            .collect();
        let observer = Recording {
            progress: std::sync::Mutex::new(Vec::new()),
            cancel_after: 2,
            seen: AtomicUsize::new(0),
            cancelled: AtomicBool::new(false),
        };

        let result = engine(&ws, config()).execute(&plan(groups), &observer).await.unwrap();
        assert!(result.cancelled);
        assert_eq!(result.groups_completed, 2);
        assert_eq!(ws.read("c.ts").unwrap(), "c\n");

        let progress = observer.progress.lock().unwrap().clone();
        assert_eq!(progress.len(), 2);
        assert_eq!(progress[0].completed_groups, 1);
        assert_eq!(progress[0].total_groups, 3);
        assert!(progress[0].estimated_remaining_ms > progress[1].estimated_remaining_ms);
        assert!(progress.iter().all(|p| p.clean));
    }

    #[tokio::test]
    async fn test_progress_stays_dirty_after_a_failed_group() {
        let ws = Arc::new(MemoryWorkspace::new().with_file("a.ts", "a\n").with_file("b.ts", "b\n"));
        ws.fail_operation("op-a");
        let groups = vec![
            ParallelGroup::new(
                0,
                vec![step("a.ts", vec![FileChange::modify("a.ts").with_operation(replace("a.ts", "op-a", 1, "A"))])],
                false,
                Vec::new(),
            ),
            ParallelGroup::new(
                1,
                vec![step("b.ts", vec![FileChange::modify("b.ts").with_operation(replace("b.ts", "op-b", 1, "B"))])],
                false,
                vec![0],
            ),
        ];
        let observer = Recording {
            progress: std::sync::Mutex::new(Vec::new()),
            cancel_after: usize::MAX,
            seen: AtomicUsize::new(0),
            cancelled: AtomicBool::new(false),
        };

        let result = engine(&ws, config()).execute(&plan(groups), &observer).await.unwrap();
        assert_eq!(result.operations_failed, 1);

        let progress = observer.progress.lock().unwrap().clone();
        assert_eq!(progress.len(), 2);
        assert!(!progress[0].clean);
        assert!(!progress[1].clean);
    }
}
