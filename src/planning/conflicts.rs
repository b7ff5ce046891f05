//! Conflict and independence checks for parallel grouping
//!
//! Both checks are pairwise and uncached.

use super::plan::ExecutionStep;
use crate::changes::{path_key, Operation};
use crate::graph::DependencyGraph;

/// Steps conflict when they share a file and some pair of their operations on
/// that file has intersecting line ranges
pub fn steps_conflict(a: &ExecutionStep, b: &ExecutionStep) -> bool {
    let b_keys = b.touched_keys();
    let shared: Vec<String> = a.touched_keys().into_iter().filter(|k| b_keys.contains(k)).collect();
    if shared.is_empty() {
        return false;
    }

    shared.iter().any(|key| {
        let b_ops = operations_on(b, key);
        operations_on(a, key)
            .iter()
            .any(|x| b_ops.iter().any(|y| x.overlaps(y)))
    })
}

fn operations_on<'a>(step: &'a ExecutionStep, key: &str) -> Vec<&'a Operation> {
    step.changes
        .iter()
        .filter(|c| path_key(c.operation_target()) == key)
        .flat_map(|c| c.operations.iter())
        .collect()
}

/// Neither step can reach the other through the graph
pub fn independent(graph: &DependencyGraph, a: &ExecutionStep, b: &ExecutionStep) -> bool {
    !graph.reaches(&a.node_id, &b.node_id) && !graph.reaches(&b.node_id, &a.node_id)
}
