//! Cycle detection
//!
//! Depth-first search with an on-stack marker set. Every back-edge found is
//! reported; detection never stops at the first cycle.

use std::collections::HashSet;

use super::types::DependencyGraph;

#[derive(Debug, Clone, Copy, Default)]
pub struct CycleDetector;

impl CycleDetector {
    /// Each cycle is returned closed: `[a, b, a]`
    pub fn find_cycles(graph: &DependencyGraph) -> Vec<Vec<String>> {
        let mut cycles = Vec::new();
        let mut visited = HashSet::new();
        let mut rec_stack = Vec::new();
        let mut on_stack = HashSet::new();

        for id in graph.node_ids() {
            if !visited.contains(id) {
                Self::dfs(graph, id, &mut visited, &mut rec_stack, &mut on_stack, &mut cycles);
            }
        }

        // Same cycle reached from a different entry point
        let mut seen = HashSet::new();
        cycles
            .into_iter()
            .filter(|cycle| seen.insert(Self::normalize(cycle)))
            .collect()
    }

    fn dfs<'a>(
        graph: &'a DependencyGraph,
        node: &'a str,
        visited: &mut HashSet<&'a str>,
        rec_stack: &mut Vec<&'a str>,
        on_stack: &mut HashSet<&'a str>,
        cycles: &mut Vec<Vec<String>>,
    ) {
        visited.insert(node);
        rec_stack.push(node);
        on_stack.insert(node);

        for dep in graph.dependencies_of(node) {
            if !visited.contains(dep) {
                Self::dfs(graph, dep, visited, rec_stack, on_stack, cycles);
            } else if on_stack.contains(dep) {
                let start = rec_stack.iter().position(|n| *n == dep).unwrap_or(0);
                let mut cycle: Vec<String> = rec_stack[start..].iter().map(|s| s.to_string()).collect();
                cycle.push(dep.to_string());
                tracing::debug!(cycle = %cycle.join(" -> "), "Found dependency cycle");
                cycles.push(cycle);
            }
        }

        rec_stack.pop();
        on_stack.remove(node);
    }

    /// Open form rotated to start at the smallest id
    fn normalize(cycle: &[String]) -> Vec<String> {
        let open = match cycle.split_last() {
            Some((_, rest)) if !rest.is_empty() => rest,
            _ => return cycle.to_vec(),
        };
        let min_idx = open
            .iter()
            .enumerate()
            .min_by_key(|(_, v)| *v)
            .map(|(i, _)| i)
            .unwrap_or(0);
        let mut normalized = open[min_idx..].to_vec();
        normalized.extend_from_slice(&open[..min_idx]);
        normalized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::fixtures::{edge, node};

    fn graph(ids: &[&str], edges: &[(&str, &str)]) -> DependencyGraph {
        DependencyGraph::from_parts(
            ids.iter().map(|id| node(id)).collect(),
            edges.iter().map(|(s, t)| edge(s, t)).collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_acyclic_graph() {
        let g = graph(&["a", "b", "c"], &[("a", "b"), ("b", "c"), ("a", "c")]);
        assert!(CycleDetector::find_cycles(&g).is_empty());
    }

    #[test]
    fn test_simple_cycle_is_closed() {
        let g = graph(&["a", "b"], &[("a", "b"), ("b", "a")]);
        let cycles = CycleDetector::find_cycles(&g);
        assert_eq!(cycles, vec![vec!["a".to_string(), "b".to_string(), "a".to_string()]]);
    }

    #[test]
    fn test_reports_every_cycle() {
        let g = graph(
            &["a", "b", "c", "d", "e"],
            &[("a", "b"), ("b", "a"), ("c", "d"), ("d", "e"), ("e", "c")],
        );
        let cycles = CycleDetector::find_cycles(&g);
        assert_eq!(cycles.len(), 2);
        assert!(cycles.iter().any(|c| c.len() == 4 && c.contains(&"e".to_string())));
    }

    #[test]
    fn test_normalize_rotation() {
        let a = CycleDetector::normalize(&["b".into(), "c".into(), "a".into(), "b".into()]);
        let b = CycleDetector::normalize(&["a".into(), "b".into(), "c".into(), "a".into()]);
        assert_eq!(a, b);
    }
}
