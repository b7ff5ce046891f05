//! Execution planner
//!
//! Orders steps so every file's dependencies are changed before it, then
//! packs the ordered steps into groups that are safe to run together.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use uuid::Uuid;

use super::conflicts::{independent, steps_conflict};
use super::plan::{CheckpointMarker, ExecutionPlan, ExecutionStep, ParallelGroup, ResourceEstimate};
use crate::changes::{ChangeSet, FileChange, Priority};
use crate::config::{ConcurrencyMode, CoordinatorConfig};
use crate::error::{CoordinationError, Result};
use crate::graph::DependencyGraph;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    OnStack,
    Done,
}

#[derive(Debug, Clone)]
pub struct ExecutionPlanner {
    concurrency: ConcurrencyMode,
    max_parallel: usize,
    checkpoint_frequency: usize,
}

impl ExecutionPlanner {
    pub fn new(config: &CoordinatorConfig) -> Self {
        Self {
            concurrency: config.concurrency_mode,
            max_parallel: config.max_parallel_operations.max(1),
            checkpoint_frequency: config.effective_checkpoint_frequency(),
        }
    }

    pub fn plan(&self, graph: &DependencyGraph, change_set: &ChangeSet) -> Result<ExecutionPlan> {
        if change_set.changes.is_empty() {
            return Err(CoordinationError::EmptyPlan);
        }

        let mut by_key: BTreeMap<String, Vec<FileChange>> = BTreeMap::new();
        let mut declared_order: Vec<String> = Vec::new();
        for change in &change_set.changes {
            let key = change.key();
            if !by_key.contains_key(&key) {
                declared_order.push(key.clone());
            }
            by_key.entry(key).or_default().push(change.clone());
        }

        let order = self.order(graph, &by_key)?;
        let steps = build_steps(graph, &order, &declared_order, &by_key);
        if steps.is_empty() {
            return Err(CoordinationError::EmptyPlan);
        }

        let groups = match self.concurrency {
            ConcurrencyMode::Sequential => sequential_groups(steps.clone()),
            ConcurrencyMode::Adaptive => self.greedy_groups(graph, steps.clone(), self.max_parallel),
            ConcurrencyMode::Parallel | ConcurrencyMode::Custom => {
                self.greedy_groups(graph, steps.clone(), usize::MAX)
            }
        };
        if groups.is_empty() {
            return Err(CoordinationError::EmptyPlan);
        }

        let checkpoints = self.checkpoints(groups.len());
        let total_time_ms = groups.iter().map(|g| g.estimated_time_ms).sum();
        let parallel_time_ms = groups.iter().map(|g| g.estimated_time_ms).max().unwrap_or(0);
        let risk = steps.iter().map(|s| s.risk).max().unwrap_or_default();
        let resources = ResourceEstimate {
            peak_parallelism: groups
                .iter()
                .map(|g| if g.parallel { g.steps.len() } else { 1 })
                .max()
                .unwrap_or(0)
                .min(self.max_parallel),
            files_touched: change_set.touched_paths().len(),
            operations: change_set.operation_count(),
        };

        let plan = ExecutionPlan {
            id: Uuid::new_v4().to_string(),
            change_set_id: change_set.id.clone(),
            order: steps.iter().map(|s| s.node_id.clone()).collect(),
            groups,
            checkpoints,
            total_time_ms,
            parallel_time_ms,
            risk,
            resources,
        };

        tracing::info!(
            plan_id = %plan.id,
            steps = plan.step_count(),
            groups = plan.groups.len(),
            checkpoints = plan.checkpoints.len(),
            total_ms = plan.total_time_ms,
            "Built execution plan"
        );
        Ok(plan)
    }

    /// Dependencies-first order of every graph node
    fn order(&self, graph: &DependencyGraph, changed: &BTreeMap<String, Vec<FileChange>>) -> Result<Vec<String>> {
        let priority = |id: &str| -> Priority {
            changed
                .get(id)
                .and_then(|c| c.iter().map(|c| c.priority).max())
                .unwrap_or(Priority::Low)
        };

        let mut roots: Vec<&str> = graph.node_ids().collect();
        roots.sort_by(|a, b| {
            let importance = |id: &str| graph.node(id).map(|n| n.importance).unwrap_or(0.0);
            priority(b)
                .cmp(&priority(a))
                .then(importance(b).total_cmp(&importance(a)))
                .then(a.cmp(b))
        });

        let mut marks: HashMap<&str, Mark> = HashMap::new();
        let mut stack: Vec<&str> = Vec::new();
        let mut order = Vec::with_capacity(graph.len());
        for root in roots {
            visit(graph, root, changed, &mut marks, &mut stack, &mut order)?;
        }
        Ok(order)
    }

    /// Greedy packing: each group is seeded by the first unplaced step and
    /// admits later steps that are independent of and conflict-free with every
    /// member, and whose dependencies already sit in earlier groups.
    fn greedy_groups(&self, graph: &DependencyGraph, steps: Vec<ExecutionStep>, cap: usize) -> Vec<ParallelGroup> {
        let mut remaining: VecDeque<ExecutionStep> = steps.into();
        let mut placed: HashMap<String, usize> = HashMap::new();
        let mut groups: Vec<ParallelGroup> = Vec::new();

        while !remaining.is_empty() {
            let index = groups.len();
            let mut members: Vec<ExecutionStep> = Vec::new();
            let mut deferred: VecDeque<ExecutionStep> = VecDeque::new();

            while let Some(step) = remaining.pop_front() {
                let ready = step.dependencies.iter().all(|d| placed.contains_key(d));
                let compatible = members
                    .iter()
                    .all(|m| independent(graph, m, &step) && !steps_conflict(m, &step));
                if members.len() < cap && ready && compatible {
                    members.push(step);
                } else {
                    deferred.push_back(step);
                }
            }

            let mut dependencies: Vec<usize> = members
                .iter()
                .flat_map(|s| s.dependencies.iter().filter_map(|d| placed.get(d).copied()))
                .collect();
            dependencies.sort_unstable();
            dependencies.dedup();

            for step in &members {
                placed.insert(step.node_id.clone(), index);
            }
            groups.push(ParallelGroup::new(index, members, true, dependencies));
            remaining = deferred;
        }

        groups
    }

    fn checkpoints(&self, group_count: usize) -> Vec<CheckpointMarker> {
        if self.checkpoint_frequency == 0 {
            return Vec::new();
        }
        (0..group_count.saturating_sub(1))
            .filter(|i| (i + 1) % self.checkpoint_frequency == 0)
            .map(|i| CheckpointMarker {
                after_group: i,
                label: format!("after-group-{}", i),
            })
            .collect()
    }
}

fn visit<'a>(
    graph: &'a DependencyGraph,
    id: &'a str,
    changed: &BTreeMap<String, Vec<FileChange>>,
    marks: &mut HashMap<&'a str, Mark>,
    stack: &mut Vec<&'a str>,
    order: &mut Vec<String>,
) -> Result<()> {
    match marks.get(id) {
        Some(Mark::Done) => return Ok(()),
        Some(Mark::OnStack) => {
            let start = stack.iter().position(|n| *n == id).unwrap_or(0);
            let mut cycle: Vec<String> = stack[start..].iter().map(|s| s.to_string()).collect();
            cycle.push(id.to_string());
            if cycle.iter().any(|n| changed.contains_key(n)) {
                return Err(CoordinationError::CircularDependency {
                    node: id.to_string(),
                    cycle,
                });
            }
            tracing::warn!(cycle = %cycle.join(" -> "), "Skipping cycle among unchanged files");
            return Ok(());
        }
        None => {}
    }

    marks.insert(id, Mark::OnStack);
    stack.push(id);
    for dep in graph.dependencies_of(id) {
        visit(graph, dep, changed, marks, stack, order)?;
    }
    stack.pop();
    marks.insert(id, Mark::Done);
    order.push(id.to_string());
    Ok(())
}

/// Steps for changed graph nodes in order, then steps for files outside the graph
fn build_steps(
    graph: &DependencyGraph,
    order: &[String],
    declared_order: &[String],
    by_key: &BTreeMap<String, Vec<FileChange>>,
) -> Vec<ExecutionStep> {
    let mut steps: Vec<ExecutionStep> = order
        .iter()
        .filter_map(|id| {
            let changes = by_key.get(id)?;
            let path = graph.node(id).map(|n| n.path.clone()).unwrap_or_else(|| PathBuf::from(id));
            Some(
                ExecutionStep::new(id.clone(), path, changes.clone())
                    .with_dependencies(upstream_steps(graph, id, by_key)),
            )
        })
        .collect();

    for key in declared_order.iter().filter(|k| !graph.contains(k)) {
        if let Some(changes) = by_key.get(key) {
            tracing::debug!(file = %key, "Changed file is not in the dependency graph");
            let path = changes.first().map(|c| c.path.clone()).unwrap_or_else(|| PathBuf::from(key));
            steps.push(ExecutionStep::new(key.clone(), path, changes.clone()));
        }
    }

    steps
}

/// Nearest dependencies that have steps, looking through unchanged files
fn upstream_steps(graph: &DependencyGraph, id: &str, changed: &BTreeMap<String, Vec<FileChange>>) -> Vec<String> {
    let mut found = Vec::new();
    let mut seen: HashSet<&str> = HashSet::from([id]);
    let mut queue: VecDeque<&str> = graph.dependencies_of(id).into();

    while let Some(dep) = queue.pop_front() {
        if !seen.insert(dep) {
            continue;
        }
        if changed.contains_key(dep) {
            found.push(dep.to_string());
        } else {
            queue.extend(graph.dependencies_of(dep));
        }
    }

    found.sort();
    found
}

fn sequential_groups(steps: Vec<ExecutionStep>) -> Vec<ParallelGroup> {
    steps
        .into_iter()
        .enumerate()
        .map(|(i, step)| {
            let dependencies = if i == 0 { Vec::new() } else { vec![i - 1] };
            ParallelGroup::new(i, vec![step], false, dependencies)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changes::{ChangeScope, ChangeType, CodeLocation, Complexity, Operation, OperationType};
    use crate::graph::fixtures::{edge, node};

    fn config(mode: ConcurrencyMode) -> CoordinatorConfig {
        CoordinatorConfig {
            concurrency_mode: mode,
            max_parallel_operations: 8,
            ..Default::default()
        }
    }

    fn modify(path: &str, line: u32) -> FileChange {
        FileChange::modify(path)
            .with_complexity(Complexity::Simple)
            .with_operation(Operation::new(OperationType::Replace, CodeLocation::line(path, line)).with_after("x"))
    }

    fn change_set(changes: Vec<FileChange>) -> ChangeSet {
        changes
            .into_iter()
            .fold(ChangeSet::new(ChangeType::Refactor, ChangeScope::Module), |cs, c| cs.with_change(c))
    }

    fn graph(ids: &[&str], edges: &[(&str, &str)]) -> DependencyGraph {
        DependencyGraph::from_parts(
            ids.iter().map(|id| node(id)).collect(),
            edges.iter().map(|(s, t)| edge(s, t)).collect(),
        )
        .unwrap()
    }

    fn assert_topologically_valid(plan: &ExecutionPlan) {
        for step in plan.steps() {
            let own = plan.group_of(&step.node_id).unwrap();
            for dep in &step.dependencies {
                assert!(plan.group_of(dep).unwrap() < own, "{} must precede {}", dep, step.node_id);
            }
        }
    }

    #[test]
    fn test_independent_files_share_one_parallel_group() {
        let g = graph(&["a.ts", "b.ts"], &[]);
        let cs = change_set(vec![modify("a.ts", 1), modify("b.ts", 1)]);
        let plan = ExecutionPlanner::new(&config(ConcurrencyMode::Parallel)).plan(&g, &cs).unwrap();

        assert_eq!(plan.step_count(), 2);
        assert_eq!(plan.groups.len(), 1);
        assert!(plan.groups[0].parallel);
    }

    #[test]
    fn test_chain_orders_dependencies_first() {
        let g = graph(&["a.ts", "b.ts", "c.ts"], &[("a.ts", "b.ts"), ("b.ts", "c.ts")]);
        let cs = change_set(vec![modify("a.ts", 1), modify("b.ts", 1), modify("c.ts", 1)]);
        let plan = ExecutionPlanner::new(&config(ConcurrencyMode::Parallel)).plan(&g, &cs).unwrap();

        assert_eq!(plan.order, vec!["c.ts", "b.ts", "a.ts"]);
        assert_eq!(plan.groups.len(), 3);
        assert_topologically_valid(&plan);
        assert_eq!(plan.groups[2].dependencies, vec![1]);
    }

    #[test]
    fn test_cycle_among_changed_files_is_fatal() {
        let g = graph(&["a.ts", "b.ts"], &[("a.ts", "b.ts"), ("b.ts", "a.ts")]);
        let cs = change_set(vec![modify("a.ts", 1)]);
        let err = ExecutionPlanner::new(&config(ConcurrencyMode::Parallel))
            .plan(&g, &cs)
            .unwrap_err();
        match err {
            CoordinationError::CircularDependency { cycle, .. } => {
                assert!(cycle.contains(&"a.ts".to_string()));
                assert_eq!(cycle.first(), cycle.last());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_cycle_among_unchanged_files_is_skipped() {
        let g = graph(
            &["a.ts", "x.ts", "y.ts"],
            &[("a.ts", "x.ts"), ("x.ts", "y.ts"), ("y.ts", "x.ts")],
        );
        let cs = change_set(vec![modify("a.ts", 1)]);
        let plan = ExecutionPlanner::new(&config(ConcurrencyMode::Parallel)).plan(&g, &cs).unwrap();
        assert_eq!(plan.order, vec!["a.ts"]);
    }

    #[test]
    fn test_dependencies_look_through_unchanged_files() {
        let g = graph(&["a.ts", "m.ts", "c.ts"], &[("a.ts", "m.ts"), ("m.ts", "c.ts")]);
        let cs = change_set(vec![modify("a.ts", 1), modify("c.ts", 1)]);
        let plan = ExecutionPlanner::new(&config(ConcurrencyMode::Parallel)).plan(&g, &cs).unwrap();

        let a = plan.steps().find(|s| s.node_id == "a.ts").unwrap();
        assert_eq!(a.dependencies, vec!["c.ts"]);
        assert_eq!(plan.groups.len(), 2);
        assert_topologically_valid(&plan);
    }

    #[test]
    fn test_sequential_mode_makes_singleton_chain() {
        let g = graph(&["a.ts", "b.ts", "c.ts"], &[]);
        let cs = change_set(vec![modify("a.ts", 1), modify("b.ts", 1), modify("c.ts", 1)]);
        let plan = ExecutionPlanner::new(&config(ConcurrencyMode::Sequential)).plan(&g, &cs).unwrap();

        assert_eq!(plan.groups.len(), 3);
        assert!(plan.groups.iter().all(|g| g.steps.len() == 1 && !g.parallel));
        assert_eq!(plan.groups[2].dependencies, vec![1]);
    }

    #[test]
    fn test_adaptive_mode_caps_group_size() {
        let g = graph(&["a.ts", "b.ts", "c.ts"], &[]);
        let cs = change_set(vec![modify("a.ts", 1), modify("b.ts", 1), modify("c.ts", 1)]);
        let mut cfg = config(ConcurrencyMode::Adaptive);
        cfg.max_parallel_operations = 2;
        let plan = ExecutionPlanner::new(&cfg).plan(&g, &cs).unwrap();

        assert_eq!(plan.groups.len(), 2);
        assert_eq!(plan.groups[0].steps.len(), 2);
    }

    #[test]
    fn test_conflicting_steps_are_split() {
        let g = graph(&["a.ts"], &[]);
        let copy = FileChange::new("a.ts", crate::changes::ChangeKind::Copy)
            .with_new_path("b.ts")
            .with_operation(Operation::new(OperationType::Replace, CodeLocation::line("b.ts", 2)));
        let cs = change_set(vec![copy, modify("b.ts", 2)]);
        let plan = ExecutionPlanner::new(&config(ConcurrencyMode::Parallel)).plan(&g, &cs).unwrap();

        assert_eq!(plan.groups.len(), 2);
        for group in &plan.groups {
            for (i, x) in group.steps.iter().enumerate() {
                for y in &group.steps[i + 1..] {
                    assert!(!steps_conflict(x, y));
                }
            }
        }
    }

    #[test]
    fn test_disjoint_ranges_in_shared_file_stay_together() {
        let g = graph(&["a.ts"], &[]);
        let copy = FileChange::new("a.ts", crate::changes::ChangeKind::Copy)
            .with_new_path("b.ts")
            .with_operation(Operation::new(OperationType::Replace, CodeLocation::lines("b.ts", 10, 12)));
        let cs = change_set(vec![copy, modify("b.ts", 2)]);
        let plan = ExecutionPlanner::new(&config(ConcurrencyMode::Parallel)).plan(&g, &cs).unwrap();

        assert_eq!(plan.groups.len(), 1);
        assert_eq!(plan.groups[0].steps.len(), 2);
        assert!(plan.groups[0].parallel);
    }

    #[test]
    fn test_files_outside_graph_run_last_without_dependencies() {
        let g = graph(&["a.ts", "b.ts"], &[("a.ts", "b.ts")]);
        let cs = change_set(vec![modify("new.ts", 1), modify("a.ts", 1), modify("b.ts", 1)]);
        let plan = ExecutionPlanner::new(&config(ConcurrencyMode::Parallel)).plan(&g, &cs).unwrap();

        assert_eq!(plan.order.last().map(String::as_str), Some("new.ts"));
        let outside = plan.steps().find(|s| s.node_id == "new.ts").unwrap();
        assert!(outside.dependencies.is_empty());
    }

    #[test]
    fn test_checkpoint_markers_follow_frequency() {
        let g = graph(&["a", "b", "c", "d"], &[]);
        let cs = change_set(vec![modify("a", 1), modify("b", 1), modify("c", 1), modify("d", 1)]);
        let mut cfg = config(ConcurrencyMode::Sequential);
        cfg.checkpoint_frequency = 2;
        let plan = ExecutionPlanner::new(&cfg).plan(&g, &cs).unwrap();

        let after: Vec<usize> = plan.checkpoints.iter().map(|c| c.after_group).collect();
        assert_eq!(after, vec![1]);
        assert_eq!(plan.total_time_ms, 600);
        assert_eq!(plan.parallel_time_ms, 150);
    }

    #[test]
    fn test_empty_change_set() {
        let g = graph(&["a.ts"], &[]);
        let err = ExecutionPlanner::new(&config(ConcurrencyMode::Parallel))
            .plan(&g, &change_set(vec![]))
            .unwrap_err();
        assert!(matches!(err, CoordinationError::EmptyPlan));
    }
}
