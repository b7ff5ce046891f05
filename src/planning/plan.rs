//! Execution plan types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::changes::{path_key, FileChange, Operation, RiskLevel};

/// Estimated cost of one operation at trivial complexity
pub const OPERATION_UNIT_MS: u64 = 100;

/// One file's worth of pending changes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStep {
    pub id: String,
    pub node_id: String,
    pub file_path: PathBuf,
    pub changes: Vec<FileChange>,
    /// Node ids of steps that must finish first
    pub dependencies: Vec<String>,
    pub estimated_time_ms: u64,
    pub risk: RiskLevel,
}

impl ExecutionStep {
    pub fn new(node_id: impl Into<String>, file_path: PathBuf, changes: Vec<FileChange>) -> Self {
        let node_id = node_id.into();
        let estimated_time_ms = changes
            .iter()
            .map(|c| {
                // File-level actions without operations still cost one unit
                let units = c.operations.len().max(1) as f64;
                (units * OPERATION_UNIT_MS as f64 * c.complexity.multiplier()).round() as u64
            })
            .sum();
        let risk = changes
            .iter()
            .map(|c| c.complexity)
            .max()
            .map(|c| c.risk())
            .unwrap_or_default();

        Self {
            id: format!("step-{}", node_id),
            node_id,
            file_path,
            changes,
            dependencies: Vec::new(),
            estimated_time_ms,
            risk,
        }
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn operations(&self) -> impl Iterator<Item = &Operation> {
        self.changes.iter().flat_map(|c| c.operations.iter())
    }

    pub fn operation_count(&self) -> usize {
        self.changes.iter().map(|c| c.operations.len()).sum()
    }

    /// Path keys of every file this step reads or writes
    pub fn touched_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .changes
            .iter()
            .flat_map(|c| c.touched_paths())
            .map(|p| path_key(&p))
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParallelGroup {
    pub id: String,
    pub index: usize,
    pub steps: Vec<ExecutionStep>,
    /// Steps may run concurrently
    pub parallel: bool,
    /// Max of the members' estimates when parallel, the sum otherwise
    pub estimated_time_ms: u64,
    /// Indices of groups that must complete first
    pub dependencies: Vec<usize>,
}

impl ParallelGroup {
    pub fn new(index: usize, steps: Vec<ExecutionStep>, parallel: bool, dependencies: Vec<usize>) -> Self {
        let parallel = parallel && steps.len() > 1;
        let estimated_time_ms = if parallel {
            steps.iter().map(|s| s.estimated_time_ms).max().unwrap_or(0)
        } else {
            steps.iter().map(|s| s.estimated_time_ms).sum()
        };
        Self {
            id: format!("group-{}", index),
            index,
            steps,
            parallel,
            estimated_time_ms,
            dependencies,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointMarker {
    /// Checkpoint is taken once this group has finished
    pub after_group: usize,
    pub label: String,
}

/// Placeholder resource figures; real profiling would replace these
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceEstimate {
    pub peak_parallelism: usize,
    pub files_touched: usize,
    pub operations: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPlan {
    pub id: String,
    pub change_set_id: String,
    /// Node ids in execution order
    pub order: Vec<String>,
    pub groups: Vec<ParallelGroup>,
    pub checkpoints: Vec<CheckpointMarker>,
    pub total_time_ms: u64,
    pub parallel_time_ms: u64,
    pub risk: RiskLevel,
    pub resources: ResourceEstimate,
}

impl ExecutionPlan {
    pub fn steps(&self) -> impl Iterator<Item = &ExecutionStep> {
        self.groups.iter().flat_map(|g| g.steps.iter())
    }

    pub fn step_count(&self) -> usize {
        self.groups.iter().map(|g| g.steps.len()).sum()
    }

    pub fn group_of(&self, node_id: &str) -> Option<usize> {
        self.groups
            .iter()
            .find(|g| g.steps.iter().any(|s| s.node_id == node_id))
            .map(|g| g.index)
    }

    pub fn checkpoint_after(&self, group_index: usize) -> Option<&CheckpointMarker> {
        self.checkpoints.iter().find(|c| c.after_group == group_index)
    }

    /// Every path the plan touches, deduplicated
    pub fn touched_paths(&self) -> Vec<PathBuf> {
        let mut seen = std::collections::BTreeSet::new();
        self.steps()
            .flat_map(|s| s.changes.iter().flat_map(|c| c.touched_paths()))
            .filter(|p| seen.insert(path_key(p)))
            .collect()
    }

    /// No step after `group_index` still depends on a step at or before it
    pub fn settled_after(&self, group_index: usize) -> bool {
        let done: std::collections::HashSet<&str> = self
            .groups
            .iter()
            .filter(|g| g.index <= group_index)
            .flat_map(|g| g.steps.iter().map(|s| s.node_id.as_str()))
            .collect();
        self.groups
            .iter()
            .filter(|g| g.index > group_index)
            .flat_map(|g| g.steps.iter())
            .all(|s| s.dependencies.iter().all(|d| !done.contains(d.as_str())))
    }

    /// Estimated time of the groups from `group_index` on
    pub fn remaining_time_ms(&self, group_index: usize) -> u64 {
        self.groups.iter().skip(group_index).map(|g| g.estimated_time_ms).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changes::{CodeLocation, Complexity, OperationType};

    fn change(path: &str, ops: usize, complexity: Complexity) -> FileChange {
        (0..ops).fold(FileChange::modify(path).with_complexity(complexity), |c, i| {
            c.with_operation(Operation::new(OperationType::Replace, CodeLocation::line(path, i as u32 + 1)))
        })
    }

    #[test]
    fn test_step_estimate_and_risk() {
        let step = ExecutionStep::new(
            "a.ts",
            PathBuf::from("a.ts"),
            vec![change("a.ts", 2, Complexity::Simple), change("a.ts", 1, Complexity::Complex)],
        );
        // 2 * 100 * 1.5 + 1 * 100 * 3
        assert_eq!(step.estimated_time_ms, 600);
        assert_eq!(step.risk, RiskLevel::High);
    }

    #[test]
    fn test_group_time_is_max_when_parallel() {
        let a = ExecutionStep::new("a", PathBuf::from("a"), vec![change("a", 1, Complexity::Trivial)]);
        let b = ExecutionStep::new("b", PathBuf::from("b"), vec![change("b", 3, Complexity::Trivial)]);

        let parallel = ParallelGroup::new(0, vec![a.clone(), b.clone()], true, vec![]);
        assert!(parallel.parallel);
        assert_eq!(parallel.estimated_time_ms, 300);

        let sequential = ParallelGroup::new(0, vec![a.clone(), b], false, vec![]);
        assert_eq!(sequential.estimated_time_ms, 400);

        let single = ParallelGroup::new(0, vec![a], true, vec![]);
        assert!(!single.parallel);
    }

    #[test]
    fn test_settled_only_once_dependents_have_run() {
        let c = ExecutionStep::new("c", PathBuf::from("c"), vec![change("c", 1, Complexity::Trivial)]);
        let b = ExecutionStep::new("b", PathBuf::from("b"), vec![change("b", 1, Complexity::Trivial)])
            .with_dependencies(vec!["c".to_string()]);
        let x = ExecutionStep::new("x", PathBuf::from("x"), vec![change("x", 1, Complexity::Trivial)]);
        let plan = ExecutionPlan {
            id: "plan".to_string(),
            change_set_id: "cs".to_string(),
            order: vec!["c".into(), "b".into(), "x".into()],
            groups: vec![
                ParallelGroup::new(0, vec![c], false, vec![]),
                ParallelGroup::new(1, vec![b], false, vec![0]),
                ParallelGroup::new(2, vec![x], false, vec![1]),
            ],
            checkpoints: Vec::new(),
            total_time_ms: 0,
            parallel_time_ms: 0,
            risk: RiskLevel::Low,
            resources: ResourceEstimate::default(),
        };

        assert!(!plan.settled_after(0));
        assert!(plan.settled_after(1));
        assert!(plan.settled_after(2));
    }
}
