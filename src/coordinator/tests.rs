use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::changes::{
    ChangeScope, ChangeSet, ChangeType, CodeLocation, DependencyType, FileChange, Operation, OperationType, RollbackPlan,
};
use crate::collaborators::{Collaborators, MemoryWorkspace, ResolvedDependency};
use crate::config::{CoordinatorConfig, OptimizationStrategy, RollbackStrategy, ValidationLevel};
use crate::error::CoordinationError;
use crate::events::{EventKind, Stage};

const ROOT: &str = "no-such-workspace";

fn depends_on(target: &str) -> ResolvedDependency {
    ResolvedDependency {
        target: PathBuf::from(target),
        kind: DependencyType::Import,
        symbols: Vec::new(),
        strength: None,
        critical: None,
    }
}

/// a.ts imports b.ts
fn workspace() -> Arc<MemoryWorkspace> {
    Arc::new(
        MemoryWorkspace::new()
            .with_file("a.ts", "import { b } from './b';\nexport const a = b;\n")
            .with_file("b.ts", "export const b = 1;\n")
            .with_dependency("a.ts", depends_on("b.ts")),
    )
}

fn replace(path: &str, id: &str, line: u32, after: &str) -> Operation {
    Operation::new(OperationType::Replace, CodeLocation::line(path, line))
        .with_id(id)
        .with_after(after)
}

fn change_set(plan: RollbackPlan) -> ChangeSet {
    ChangeSet::new(ChangeType::Refactor, ChangeScope::Module)
        .with_change(FileChange::modify("a.ts").with_operation(replace("a.ts", "op-a", 2, "export const a = b + 1;")))
        .with_change(FileChange::modify("b.ts").with_operation(replace("b.ts", "op-b", 1, "export const b = 2;")))
        .with_rollback_plan(plan)
}

fn config() -> CoordinatorConfig {
    CoordinatorConfig {
        max_parallel_operations: 4,
        ..CoordinatorConfig::default()
    }
}

fn coordinator(ws: &Arc<MemoryWorkspace>) -> Coordinator {
    Coordinator::new(config(), Collaborators::in_memory(ws.clone())).unwrap()
}

/// Checkpoint after every group
fn conservative(ws: &Arc<MemoryWorkspace>) -> Coordinator {
    let config = CoordinatorConfig {
        optimization_strategy: OptimizationStrategy::Conservative,
        ..config()
    };
    Coordinator::new(config, Collaborators::in_memory(ws.clone())).unwrap()
}

async fn prepared(coordinator: &Coordinator, cs: ChangeSet) -> String {
    let id = coordinator
        .initiate_coordination(CoordinationContext::new(ROOT, cs))
        .await
        .unwrap();
    coordinator.await_preparation(&id).await.unwrap();
    id
}

#[tokio::test]
async fn test_dependency_is_applied_before_dependent() {
    let ws = workspace();
    let coordinator = coordinator(&ws);
    let id = prepared(&coordinator, change_set(RollbackPlan::default())).await;
    assert_eq!(coordinator.get_coordination_status(&id).await.unwrap(), SessionStatus::Validating);

    let result = coordinator.execute_changes(&id).await.unwrap();

    assert!(result.success());
    assert_eq!(ws.applied_operations().await, vec!["op-b", "op-a"]);
    assert_eq!(ws.read("b.ts").unwrap(), "export const b = 2;\n");
    assert!(ws.read("a.ts").unwrap().contains("b + 1"));

    let session = coordinator.get_coordination_results(&id).await.unwrap();
    assert_eq!(session.plan.unwrap().groups.len(), 2);
    assert_eq!(session.checkpoints.len(), 1);
    assert!(session.post_validation.is_some());
    assert!(session.finished_at.is_some());
}

#[tokio::test]
async fn test_failed_operation_rolls_back_completed_groups() {
    let ws = workspace();
    ws.fail_operation("op-a");
    let coordinator = coordinator(&ws);
    let id = prepared(&coordinator, change_set(RollbackPlan::default())).await;

    let result = coordinator.execute_changes(&id).await.unwrap();

    assert_eq!(result.status, SessionStatus::RolledBack);
    let execution = result.execution.unwrap();
    assert_eq!(execution.operations_failed, 1);
    assert_eq!(result.rollback.unwrap().strategy, RollbackStrategy::FullRevert);
    assert_eq!(ws.read("b.ts").unwrap(), "export const b = 1;\n");
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].stage, Stage::Execution);
}

#[tokio::test]
async fn test_disabled_rollback_leaves_partial_work() {
    let ws = workspace();
    ws.fail_operation("op-a");
    let coordinator = coordinator(&ws);
    let id = prepared(&coordinator, change_set(RollbackPlan::with_strategy(RollbackStrategy::None))).await;

    let result = coordinator.execute_changes(&id).await.unwrap();

    assert_eq!(result.status, SessionStatus::PartiallyCompleted);
    assert!(result.rollback.is_none());
    assert_eq!(ws.read("b.ts").unwrap(), "export const b = 2;\n");
}

#[tokio::test]
async fn test_forward_fix_stays_failed_without_rollback() {
    let ws = workspace();
    ws.fail_operation("op-a");
    let coordinator = coordinator(&ws);
    let id = prepared(&coordinator, change_set(RollbackPlan::with_strategy(RollbackStrategy::ForwardFix))).await;

    let result = coordinator.execute_changes(&id).await.unwrap();

    assert_eq!(result.status, SessionStatus::Failed);
    assert!(result.rollback.is_none());
    assert!(ws.commands_run().await.is_empty());
}

#[tokio::test]
async fn test_explicit_rollback_after_completion() {
    let ws = workspace();
    let coordinator = coordinator(&ws);
    let id = prepared(&coordinator, change_set(RollbackPlan::default())).await;
    coordinator.execute_changes(&id).await.unwrap();

    let outcome = coordinator.rollback_changes(&id).await.unwrap();

    assert_eq!(outcome.restored_files.len(), 2);
    assert_eq!(ws.read("b.ts").unwrap(), "export const b = 1;\n");
    assert_eq!(coordinator.get_coordination_status(&id).await.unwrap(), SessionStatus::RolledBack);

    let again = coordinator.rollback_changes(&id).await;
    assert!(matches!(again, Err(CoordinationError::InvalidTransition { .. })));
}

#[tokio::test]
async fn test_failed_validation_blocks_execution() {
    let ws = workspace();
    let coordinator = coordinator(&ws);
    let cs = ChangeSet::new(ChangeType::Refactor, ChangeScope::File)
        .with_change(FileChange::modify("b.ts").with_operation(replace("b.ts", "op-b", 1, "function broken( {")));
    let id = prepared(&coordinator, cs).await;

    let session = coordinator.get_coordination_results(&id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Failed);
    assert_eq!(session.errors[0].stage, Stage::Validation);

    assert!(coordinator.execute_changes(&id).await.is_err());
    assert!(ws.applied_operations().await.is_empty());
}

#[tokio::test]
async fn test_basic_level_skips_pre_validation() {
    let ws = workspace();
    let coordinator = coordinator(&ws);
    let context = CoordinationContext::new(ROOT, change_set(RollbackPlan::default())).with_config(CoordinatorConfig {
        validation_level: ValidationLevel::Basic,
        ..config()
    });
    let id = coordinator.initiate_coordination(context).await.unwrap();

    assert_eq!(coordinator.await_preparation(&id).await.unwrap(), SessionStatus::Planning);
    let session = coordinator.get_coordination_results(&id).await.unwrap();
    assert!(session.validation.is_none());

    let result = coordinator.execute_changes(&id).await.unwrap();
    assert!(result.success());
}

#[tokio::test]
async fn test_circular_dependency_fails_planning() {
    let ws = Arc::new(
        MemoryWorkspace::new()
            .with_file("a.ts", "export const a = 1;\n")
            .with_file("b.ts", "export const b = 1;\n")
            .with_dependency("a.ts", depends_on("b.ts"))
            .with_dependency("b.ts", depends_on("a.ts")),
    );
    let coordinator = coordinator(&ws);
    let id = prepared(&coordinator, change_set(RollbackPlan::default())).await;

    let session = coordinator.get_coordination_results(&id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Failed);
    assert!(session.graph.unwrap().has_cycles());
    assert!(session.plan.is_none());
    assert_eq!(session.errors[0].stage, Stage::Planning);
}

#[tokio::test]
async fn test_deleted_file_aborts_execution() {
    let ws = workspace();
    let coordinator = coordinator(&ws);
    let id = prepared(&coordinator, change_set(RollbackPlan::default())).await;
    ws.remove("b.ts");

    let err = coordinator.execute_changes(&id).await.unwrap_err();

    assert!(matches!(err, CoordinationError::WorkspaceDrift { .. }));
    assert!(ws.applied_operations().await.is_empty());
    let session = coordinator.get_coordination_results(&id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Failed);
    assert_eq!(session.drift.unwrap().critical_count, 1);
}

#[tokio::test]
async fn test_unavailable_applier_is_returned_as_error() {
    let ws = workspace();
    let coordinator = coordinator(&ws);
    let id = prepared(&coordinator, change_set(RollbackPlan::default())).await;
    ws.set_unavailable(true);

    let err = coordinator.execute_changes(&id).await.unwrap_err();

    assert!(err.is_unavailable());
    let status = coordinator.get_coordination_status(&id).await.unwrap();
    assert_ne!(status, SessionStatus::Completed);
}

#[tokio::test]
async fn test_cancel_before_execution() {
    let ws = workspace();
    let coordinator = coordinator(&ws);
    let id = prepared(&coordinator, change_set(RollbackPlan::default())).await;

    let cancelled = coordinator.cancel_coordination(&id).await.unwrap();
    assert_eq!(cancelled.status, SessionStatus::Cancelled);
    assert!(cancelled.execution.is_none());

    assert!(matches!(
        coordinator.get_coordination_status(&id).await,
        Err(CoordinationError::SessionNotFound(_))
    ));
    assert!(coordinator.execute_changes(&id).await.is_err());
    assert!(coordinator.cancel_coordination(&id).await.is_err());
    assert!(coordinator.list_sessions().await.is_empty());
    assert!(ws.applied_operations().await.is_empty());
}

#[tokio::test]
async fn test_cancel_during_execution_rolls_back() {
    let ws = workspace();
    ws.set_apply_delay(Duration::from_millis(200));
    let coordinator = coordinator(&ws);
    let id = prepared(&coordinator, change_set(RollbackPlan::default())).await;

    let runner = coordinator.clone();
    let run_id = id.clone();
    let execution = tokio::spawn(async move { runner.execute_changes(&run_id).await });

    while coordinator.get_coordination_status(&id).await.unwrap() != SessionStatus::Executing {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(coordinator.cancel_coordination(&id).await.unwrap().status, SessionStatus::Executing);

    let result = execution.await.unwrap().unwrap();
    assert_eq!(result.status, SessionStatus::Cancelled);
    assert!(!ws.applied_operations().await.contains(&"op-a".to_string()));
    assert_eq!(ws.read("b.ts").unwrap(), "export const b = 1;\n");
    assert!(coordinator.get_coordination_status(&id).await.is_err());
}

/// a.ts imports b.ts, b.ts imports c.ts
fn chain_workspace() -> Arc<MemoryWorkspace> {
    Arc::new(
        MemoryWorkspace::new()
            .with_file("a.ts", "import { b } from './b';\nexport const a = b;\n")
            .with_file("b.ts", "import { c } from './c';\nexport const b = c;\n")
            .with_file("c.ts", "export const c = 1;\n")
            .with_dependency("a.ts", depends_on("b.ts"))
            .with_dependency("b.ts", depends_on("c.ts")),
    )
}

#[tokio::test]
async fn test_cancel_with_intermediate_checkpoints_restores_backup() {
    let ws = chain_workspace();
    ws.set_apply_delay(Duration::from_millis(150));
    let coordinator = conservative(&ws);
    let mut events = coordinator.subscribe();
    let cs = ChangeSet::new(ChangeType::Refactor, ChangeScope::Module)
        .with_change(FileChange::modify("a.ts").with_operation(replace("a.ts", "op-a", 2, "export const a = b + 1;")))
        .with_change(FileChange::modify("b.ts").with_operation(replace("b.ts", "op-b", 2, "export const b = c + 1;")))
        .with_change(FileChange::modify("c.ts").with_operation(replace("c.ts", "op-c", 1, "export const c = 2;")));
    let id = prepared(&coordinator, cs).await;

    let runner = coordinator.clone();
    let run_id = id.clone();
    let execution = tokio::spawn(async move { runner.execute_changes(&run_id).await });

    // Wait for the backup and the checkpoint after the first group
    let backup = loop {
        let session = coordinator.get_coordination_results(&id).await.unwrap();
        if session.checkpoints.len() >= 2 {
            break session.checkpoints[0].clone();
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    };
    assert_eq!(backup.label, "pre-execution");
    coordinator.cancel_coordination(&id).await.unwrap();

    let result = execution.await.unwrap().unwrap();
    assert_eq!(result.status, SessionStatus::Cancelled);
    assert_eq!(result.rollback.unwrap().checkpoint_id, Some(backup.id));
    assert!(!ws.applied_operations().await.contains(&"op-a".to_string()));
    assert_eq!(ws.read("c.ts").unwrap(), "export const c = 1;\n");
    assert_eq!(ws.read("b.ts").unwrap(), "import { c } from './c';\nexport const b = c;\n");
    assert!(coordinator.get_coordination_status(&id).await.is_err());

    let mut checkpoints = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event.kind, EventKind::CheckpointCreated { .. }) {
            checkpoints += 1;
        }
    }
    assert_eq!(checkpoints, 3);
}

#[tokio::test]
async fn test_failed_group_is_never_a_restore_point() {
    for strategy in [RollbackStrategy::FullRevert, RollbackStrategy::CheckpointRestore] {
        let ws = Arc::new(
            MemoryWorkspace::new()
                .with_file("a.ts", "import { b } from './b';\nexport const a = b;\n")
                .with_file("b.ts", "export const b = 1;\nexport const c = 1;\n")
                .with_dependency("a.ts", depends_on("b.ts")),
        );
        ws.fail_operation("op-b2");
        let coordinator = conservative(&ws);
        let cs = ChangeSet::new(ChangeType::Refactor, ChangeScope::Module)
            .with_change(
                FileChange::modify("a.ts").with_operation(replace("a.ts", "op-a", 2, "export const a = b + 1;")),
            )
            .with_change(
                FileChange::modify("b.ts")
                    .with_operation(replace("b.ts", "op-b1", 1, "export const b = 2;"))
                    .with_operation(replace("b.ts", "op-b2", 2, "export const c = 2;")),
            )
            .with_rollback_plan(RollbackPlan::with_strategy(strategy));
        let id = prepared(&coordinator, cs).await;

        let result = coordinator.execute_changes(&id).await.unwrap();

        assert_eq!(result.status, SessionStatus::RolledBack, "{strategy}");
        let session = coordinator.get_coordination_results(&id).await.unwrap();
        let labels: Vec<&str> = session.checkpoints.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(labels, vec!["pre-execution"], "{strategy}");
        assert_eq!(result.rollback.unwrap().checkpoint_id, Some(session.checkpoints[0].id.clone()));
        assert_eq!(ws.read("b.ts").unwrap(), "export const b = 1;\nexport const c = 1;\n");
        assert_eq!(ws.read("a.ts").unwrap(), "import { b } from './b';\nexport const a = b;\n");
    }
}

#[tokio::test]
async fn test_checkpoint_with_pending_dependents_is_skipped_by_full_revert() {
    let ws = workspace();
    let coordinator = conservative(&ws);
    let id = prepared(&coordinator, change_set(RollbackPlan::default())).await;
    coordinator.execute_changes(&id).await.unwrap();

    let session = coordinator.get_coordination_results(&id).await.unwrap();
    assert_eq!(session.checkpoints.len(), 2);
    assert!(session.checkpoints[0].validation.is_consistent());
    assert!(!session.checkpoints[1].validation.dependencies_resolved);

    let outcome = coordinator.rollback_changes(&id).await.unwrap();
    assert_eq!(outcome.checkpoint_id, Some(session.checkpoints[0].id.clone()));
    assert_eq!(ws.read("b.ts").unwrap(), "export const b = 1;\n");
}

#[tokio::test]
async fn test_lifecycle_events_are_published() {
    let ws = workspace();
    let coordinator = coordinator(&ws);
    let mut events = coordinator.subscribe();
    let id = prepared(&coordinator, change_set(RollbackPlan::default())).await;
    coordinator.execute_changes(&id).await.unwrap();

    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.session_id, id);
        kinds.push(event.kind);
    }

    assert_eq!(kinds.first(), Some(&EventKind::SessionCreated));
    assert!(kinds.contains(&EventKind::StageStarted { stage: Stage::Analysis }));
    assert!(kinds.iter().any(|k| matches!(k, EventKind::CheckpointCreated { .. })));
    assert_eq!(kinds.iter().filter(|k| matches!(k, EventKind::GroupStarted { .. })).count(), 2);
    assert_eq!(
        kinds.last(),
        Some(&EventKind::StatusChanged {
            from: "executing".to_string(),
            to: "completed".to_string(),
        })
    );
}

#[tokio::test]
async fn test_dry_run_leaves_workspace_untouched() {
    let ws = workspace();
    let coordinator = Coordinator::new(
        CoordinatorConfig {
            dry_run: true,
            ..config()
        },
        Collaborators::in_memory(ws.clone()),
    )
    .unwrap();
    let id = prepared(&coordinator, change_set(RollbackPlan::default())).await;

    let result = coordinator.execute_changes(&id).await.unwrap();

    assert!(result.success());
    assert!(result.execution.unwrap().dry_run);
    assert!(ws.applied_operations().await.is_empty());
    let session = coordinator.get_coordination_results(&id).await.unwrap();
    assert!(session.checkpoints.is_empty());
}

#[tokio::test]
async fn test_unknown_session() {
    let coordinator = coordinator(&workspace());
    assert!(matches!(
        coordinator.get_coordination_status("missing").await,
        Err(CoordinationError::SessionNotFound(_))
    ));
}

#[tokio::test]
async fn test_purge_and_remove_finished_sessions() {
    let ws = workspace();
    let coordinator = coordinator(&ws);
    let done = prepared(&coordinator, change_set(RollbackPlan::default())).await;
    coordinator.execute_changes(&done).await.unwrap();
    let pending = prepared(&coordinator, change_set(RollbackPlan::default())).await;

    assert_eq!(coordinator.list_sessions().await.len(), 2);
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(coordinator.purge_finished(Duration::ZERO).await.unwrap(), 1);
    assert!(coordinator.get_coordination_status(&done).await.is_err());

    coordinator.remove_session(&pending).await.unwrap();
    assert!(coordinator.list_sessions().await.is_empty());
}
