//! Dependency graph types
//!
//! An edge `source -> target` means the source file depends on the target file.

use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::unionfind::UnionFind;
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::changes::DependencyType;
use crate::collaborators::{FileCategory, ReferencedSymbol, Symbol};
use crate::error::{CoordinationError, Result};

/// Weight above which two nodes are considered strongly coupled
pub const STRONG_COUPLING_THRESHOLD: f64 = 0.6;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMetrics {
    pub symbol_count: usize,
    pub public_symbols: usize,
    /// Only counted at deep analysis and above
    pub lines_of_code: Option<usize>,
    /// Nodes depending on this one
    pub afferent: usize,
    /// Nodes this one depends on
    pub efferent: usize,
    pub instability: f64,
    pub exposes_interfaces: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    pub id: String,
    pub path: PathBuf,
    pub language: String,
    pub category: FileCategory,
    pub importance: f64,
    pub stability: f64,
    pub symbols: Vec<Symbol>,
    pub metrics: NodeMetrics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeStrength {
    Weak,
    Moderate,
    Strong,
    Critical,
}

impl EdgeStrength {
    pub fn from_weight(weight: f64) -> Self {
        if weight < 0.3 {
            EdgeStrength::Weak
        } else if weight < STRONG_COUPLING_THRESHOLD {
            EdgeStrength::Moderate
        } else if weight < 0.85 {
            EdgeStrength::Strong
        } else {
            EdgeStrength::Critical
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub dependency_type: DependencyType,
    /// 0.0 - 1.0
    pub weight: f64,
    pub critical: bool,
    pub strength: EdgeStrength,
    /// Symbols of `target` that `source` references
    pub symbols: Vec<ReferencedSymbol>,
}

impl GraphEdge {
    pub fn references(&self, name: &str) -> bool {
        self.symbols.iter().any(|s| s.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    pub id: String,
    pub nodes: Vec<String>,
    /// Mean weight of the strong edges holding the cluster together
    pub cohesion: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphMetrics {
    pub node_count: usize,
    pub edge_count: usize,
    pub average_degree: f64,
    /// |E| - |V| + 2
    pub cyclomatic_complexity: i64,
    pub instability: f64,
    pub abstractness: f64,
    pub distance_from_main: f64,
    pub cluster_count: usize,
    pub cycle_count: usize,
}

/// Built once per session, read-only afterwards
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(into = "GraphRecord", try_from = "GraphRecord")]
pub struct DependencyGraph {
    graph: DiGraph<GraphNode, GraphEdge>,
    index: BTreeMap<String, NodeIndex>,
    pub clusters: Vec<Cluster>,
    pub cycles: Vec<Vec<String>>,
    pub metrics: GraphMetrics,
}

/// Serialized form: nodes in id order, edges in insertion order
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphRecord {
    nodes: Vec<GraphNode>,
    edges: Vec<GraphEdge>,
    #[serde(default)]
    clusters: Vec<Cluster>,
    #[serde(default)]
    cycles: Vec<Vec<String>>,
    #[serde(default)]
    metrics: GraphMetrics,
}

impl From<DependencyGraph> for GraphRecord {
    fn from(graph: DependencyGraph) -> Self {
        Self {
            nodes: graph.nodes().cloned().collect(),
            edges: graph.edges().cloned().collect(),
            clusters: graph.clusters,
            cycles: graph.cycles,
            metrics: graph.metrics,
        }
    }
}

impl TryFrom<GraphRecord> for DependencyGraph {
    type Error = CoordinationError;

    fn try_from(record: GraphRecord) -> Result<Self> {
        let mut graph = DependencyGraph::from_parts(record.nodes, record.edges)?;
        graph.clusters = record.clusters;
        graph.cycles = record.cycles;
        graph.metrics = record.metrics;
        Ok(graph)
    }
}

impl PartialEq for DependencyGraph {
    fn eq(&self, other: &Self) -> bool {
        self.nodes().eq(other.nodes())
            && self.edges().eq(other.edges())
            && self.clusters == other.clusters
            && self.cycles == other.cycles
            && self.metrics == other.metrics
    }
}

impl DependencyGraph {
    /// Graph with nodes and no edges. A repeated id replaces the earlier node.
    pub fn with_nodes(mut nodes: Vec<GraphNode>) -> Self {
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        let mut graph = Self::default();
        for node in nodes {
            match graph.index.get(&node.id) {
                Some(&idx) => graph.graph[idx] = node,
                None => {
                    let id = node.id.clone();
                    let idx = graph.graph.add_node(node);
                    graph.index.insert(id, idx);
                }
            }
        }
        graph
    }

    /// Assemble a graph, rejecting edges whose endpoints are not nodes
    pub fn from_parts(nodes: Vec<GraphNode>, edges: Vec<GraphEdge>) -> Result<Self> {
        let mut graph = Self::with_nodes(nodes);
        for edge in edges {
            graph.insert_edge(edge)?;
        }
        Ok(graph)
    }

    pub fn insert_edge(&mut self, edge: GraphEdge) -> Result<()> {
        let endpoints = (self.index.get(&edge.source).copied(), self.index.get(&edge.target).copied());
        let (source, target) = match endpoints {
            (Some(s), Some(t)) => (s, t),
            _ => {
                let unknown = if endpoints.0.is_none() { &edge.source } else { &edge.target };
                return Err(CoordinationError::InvalidGraph(format!(
                    "edge {} -> {} references unknown node {}",
                    edge.source, edge.target, unknown
                )));
            }
        };
        self.graph.add_edge(source, target, edge);
        Ok(())
    }

    pub fn edge_mut(&mut self, source: &str, target: &str) -> Option<&mut GraphEdge> {
        let source = *self.index.get(source)?;
        let target = *self.index.get(target)?;
        let edge = self.graph.find_edge(source, target)?;
        self.graph.edge_weight_mut(edge)
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.index.get(id).map(|&idx| &self.graph[idx])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Node ids in sorted order
    pub fn node_ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.index.keys().map(String::as_str)
    }

    /// Nodes in id order
    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> + '_ {
        self.index.values().map(move |&idx| &self.graph[idx])
    }

    pub(crate) fn nodes_mut(&mut self) -> impl Iterator<Item = &mut GraphNode> + '_ {
        self.graph.node_weights_mut()
    }

    pub fn edges(&self) -> impl Iterator<Item = &GraphEdge> + '_ {
        self.graph.raw_edges().iter().map(|e| &e.weight)
    }

    pub fn outgoing<'a>(&'a self, id: &str) -> impl Iterator<Item = &'a GraphEdge> + 'a {
        self.directed(id, Direction::Outgoing)
    }

    pub fn incoming<'a>(&'a self, id: &str) -> impl Iterator<Item = &'a GraphEdge> + 'a {
        self.directed(id, Direction::Incoming)
    }

    fn directed<'a>(&'a self, id: &str, direction: Direction) -> impl Iterator<Item = &'a GraphEdge> + 'a {
        self.index
            .get(id)
            .copied()
            .into_iter()
            .flat_map(move |idx| self.graph.edges_directed(idx, direction).map(|e| e.weight()))
    }

    /// Nodes `id` depends on, sorted
    pub fn dependencies_of<'a>(&'a self, id: &str) -> Vec<&'a str> {
        let Some(&idx) = self.index.get(id) else {
            return Vec::new();
        };
        let mut deps: Vec<&'a str> = self
            .graph
            .neighbors_directed(idx, Direction::Outgoing)
            .map(|n| self.graph[n].id.as_str())
            .collect();
        deps.sort_unstable();
        deps.dedup();
        deps
    }

    /// Whether `to` is reachable from `from` by following dependencies
    pub fn reaches(&self, from: &str, to: &str) -> bool {
        if from == to {
            return false;
        }
        match (self.index.get(from), self.index.get(to)) {
            (Some(&a), Some(&b)) => has_path_connecting(&self.graph, a, b, None),
            _ => false,
        }
    }

    /// Weakly connected components over edges accepted by `keep`. Members
    /// are sorted and components are ordered by their smallest id.
    pub fn components(&self, keep: impl Fn(&GraphEdge) -> bool) -> Vec<Vec<String>> {
        let mut sets = UnionFind::new(self.graph.node_count());
        for edge in self.graph.edge_references().filter(|e| keep(e.weight())) {
            sets.union(edge.source().index(), edge.target().index());
        }

        let mut by_root: BTreeMap<usize, Vec<String>> = BTreeMap::new();
        let mut order: Vec<usize> = Vec::new();
        for (id, &idx) in &self.index {
            let root = sets.find(idx.index());
            let members = by_root.entry(root).or_default();
            if members.is_empty() {
                order.push(root);
            }
            members.push(id.clone());
        }
        order.into_iter().filter_map(|root| by_root.remove(&root)).collect()
    }

    pub fn has_cycles(&self) -> bool {
        !self.cycles.is_empty()
    }
}
