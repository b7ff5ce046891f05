//! Dependency graph construction
//!
//! One node per target file. Edges come from the dependency resolver plus any
//! dependencies declared on the change set. Symbol extraction and resolution for
//! all targets run concurrently.

use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::cycles::CycleDetector;
use super::types::{
    Cluster, DependencyGraph, EdgeStrength, GraphEdge, GraphMetrics, GraphNode, NodeMetrics,
    STRONG_COUPLING_THRESHOLD,
};
use crate::changes::{path_key, DependencyType, FileChange};
use crate::collaborators::{
    Collaborators, DependencyResolver, FileClassifier, FileStateStore, ReferencedSymbol, ResolvedDependency,
    SymbolExtractor, Visibility,
};
use crate::config::AnalysisDepth;
use crate::error::Result;

const BASE_WEIGHT: f64 = 0.1;
const VALUE_REFERENCE_WEIGHT: f64 = 0.1;
const TYPE_REFERENCE_WEIGHT: f64 = 0.2;
const INHERITANCE_WEIGHT: f64 = 0.3;

/// Edge weight from referenced symbols; monotonic in count and kind
pub fn edge_weight(symbols: &[ReferencedSymbol]) -> f64 {
    let weight = symbols.iter().fold(BASE_WEIGHT, |acc, s| {
        acc + if s.via_inheritance {
            INHERITANCE_WEIGHT
        } else if s.kind.is_type_like() {
            TYPE_REFERENCE_WEIGHT
        } else {
            VALUE_REFERENCE_WEIGHT
        }
    });
    weight.clamp(0.0, 1.0)
}

pub fn is_critical(symbols: &[ReferencedSymbol]) -> bool {
    symbols.iter().any(|s| s.via_inheritance || s.kind.is_type_like())
}

pub struct GraphBuilder {
    classifier: Arc<dyn FileClassifier>,
    symbols: Arc<dyn SymbolExtractor>,
    resolver: Arc<dyn DependencyResolver>,
    state: Arc<dyn FileStateStore>,
    depth: AnalysisDepth,
    declared: Vec<FileChange>,
}

impl GraphBuilder {
    pub fn new(collaborators: &Collaborators, depth: AnalysisDepth) -> Self {
        Self {
            classifier: collaborators.classifier.clone(),
            symbols: collaborators.symbols.clone(),
            resolver: collaborators.resolver.clone(),
            state: collaborators.state.clone(),
            depth,
            declared: Vec::new(),
        }
    }

    /// Also add the dependencies declared on these changes as edges
    pub fn with_declared_dependencies(mut self, changes: &[FileChange]) -> Self {
        self.declared = changes.to_vec();
        self
    }

    pub async fn build(&self, root: &Path, targets: &[PathBuf]) -> Result<DependencyGraph> {
        let mut seen = HashSet::new();
        let targets: Vec<PathBuf> = targets.iter().filter(|t| seen.insert(path_key(t))).cloned().collect();

        let nodes = join_all(targets.iter().map(|path| self.build_node(root, path))).await;

        let candidates = &targets;
        let resolved = join_all(candidates.iter().map(|path| async move {
            match self.resolver.resolve_dependencies(root, path, candidates).await {
                Ok(deps) => (path_key(path), deps),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Dependency resolution failed");
                    (path_key(path), Vec::new())
                }
            }
        }))
        .await;

        let mut graph = DependencyGraph::with_nodes(nodes);
        for (source, deps) in resolved {
            for dep in deps {
                add_edge(&mut graph, &source, dep)?;
            }
        }
        for change in &self.declared {
            for declared in &change.dependencies {
                add_edge(&mut graph, &change.key(), declared_to_resolved(declared))?;
            }
        }

        compute_node_metrics(&mut graph);
        graph.cycles = CycleDetector::find_cycles(&graph);
        graph.clusters = detect_clusters(&graph);
        graph.metrics = compute_graph_metrics(&graph);

        tracing::info!(
            nodes = graph.metrics.node_count,
            edges = graph.metrics.edge_count,
            clusters = graph.metrics.cluster_count,
            cycles = graph.metrics.cycle_count,
            "Built dependency graph"
        );
        Ok(graph)
    }

    async fn build_node(&self, root: &Path, path: &Path) -> GraphNode {
        let classification = self.classifier.classify(path);

        let symbols = if self.depth == AnalysisDepth::Shallow {
            Vec::new()
        } else {
            match self.symbols.extract_symbols(root, path).await {
                Ok(symbols) => symbols,
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "Symbol extraction failed");
                    Vec::new()
                }
            }
        };

        let lines_of_code = if self.depth >= AnalysisDepth::Deep {
            match self.state.capture(root, path).await {
                Ok(state) => Some(
                    state
                        .content
                        .as_deref()
                        .map(|c| c.lines().filter(|l| !l.trim().is_empty()).count())
                        .unwrap_or(0),
                ),
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "Could not count lines");
                    None
                }
            }
        } else {
            None
        };

        GraphNode {
            id: path_key(path),
            path: path.to_path_buf(),
            language: classification.language,
            category: classification.category,
            importance: classification.importance,
            stability: classification.stability,
            metrics: NodeMetrics {
                symbol_count: symbols.len(),
                public_symbols: symbols.iter().filter(|s| s.visibility == Visibility::Public).count(),
                lines_of_code,
                exposes_interfaces: symbols
                    .iter()
                    .any(|s| s.kind.is_type_like() && s.visibility != Visibility::Private),
                ..Default::default()
            },
            symbols,
        }
    }
}

fn declared_to_resolved(declared: &crate::changes::FileDependency) -> ResolvedDependency {
    let symbols = declared
        .symbols
        .iter()
        .map(|name| match declared.dependency_type {
            DependencyType::Inheritance => ReferencedSymbol::inherited(name),
            DependencyType::TypeReference => ReferencedSymbol::typed(name),
            _ => ReferencedSymbol::value(name),
        })
        .collect();
    ResolvedDependency {
        target: declared.target.clone(),
        kind: declared.dependency_type,
        symbols,
        strength: None,
        critical: None,
    }
}

/// Add or merge an edge; self-references and unknown targets are dropped
fn add_edge(graph: &mut DependencyGraph, source: &str, dep: ResolvedDependency) -> Result<()> {
    let target = path_key(&dep.target);
    if target == source || !graph.contains(&target) || !graph.contains(source) {
        return Ok(());
    }

    if let Some(existing) = graph.edge_mut(source, &target) {
        for symbol in dep.symbols {
            if !existing.symbols.iter().any(|s| s.name == symbol.name) {
                existing.symbols.push(symbol);
            }
        }
        let computed = edge_weight(&existing.symbols);
        existing.weight = dep.strength.map(|s| s.clamp(0.0, 1.0)).unwrap_or(computed).max(existing.weight);
        existing.critical = existing.critical || dep.critical.unwrap_or_else(|| is_critical(&existing.symbols));
        existing.strength = EdgeStrength::from_weight(existing.weight);
        return Ok(());
    }

    let weight = dep
        .strength
        .map(|s| s.clamp(0.0, 1.0))
        .unwrap_or_else(|| edge_weight(&dep.symbols));
    let critical = dep.critical.unwrap_or_else(|| is_critical(&dep.symbols));
    graph.insert_edge(GraphEdge {
        source: source.to_string(),
        target,
        dependency_type: dep.kind,
        weight,
        critical,
        strength: EdgeStrength::from_weight(weight),
        symbols: dep.symbols,
    })
}

fn compute_node_metrics(graph: &mut DependencyGraph) {
    let degrees: HashMap<String, (usize, usize)> = graph
        .node_ids()
        .map(|id| (id.to_string(), (graph.incoming(id).count(), graph.outgoing(id).count())))
        .collect();

    for node in graph.nodes_mut() {
        let (ca, ce) = degrees.get(&node.id).copied().unwrap_or((0, 0));
        node.metrics.afferent = ca;
        node.metrics.efferent = ce;
        node.metrics.instability = if ca + ce == 0 {
            0.0
        } else {
            ce as f64 / (ca + ce) as f64
        };
    }
}

/// Components over strong edges, ignoring direction. Produces a partition.
pub fn detect_clusters(graph: &DependencyGraph) -> Vec<Cluster> {
    let strong = |e: &GraphEdge| e.weight > STRONG_COUPLING_THRESHOLD;

    graph
        .components(strong)
        .into_iter()
        .enumerate()
        .map(|(i, members)| {
            let internal: Vec<f64> = members
                .iter()
                .flat_map(|id| graph.outgoing(id))
                .filter(|e| strong(e) && members.contains(&e.target))
                .map(|e| e.weight)
                .collect();
            let cohesion = if internal.is_empty() {
                0.0
            } else {
                internal.iter().sum::<f64>() / internal.len() as f64
            };
            Cluster {
                id: format!("cluster-{}", i),
                nodes: members,
                cohesion,
            }
        })
        .collect()
}

pub fn compute_graph_metrics(graph: &DependencyGraph) -> GraphMetrics {
    let v = graph.len();
    let e = graph.edge_count();
    if v == 0 {
        return GraphMetrics::default();
    }

    let instability = graph.nodes().map(|n| n.metrics.instability).sum::<f64>() / v as f64;
    let abstractness = graph.nodes().filter(|n| n.metrics.exposes_interfaces).count() as f64 / v as f64;

    GraphMetrics {
        node_count: v,
        edge_count: e,
        average_degree: (2 * e) as f64 / v as f64,
        cyclomatic_complexity: e as i64 - v as i64 + 2,
        instability,
        abstractness,
        distance_from_main: (abstractness + instability - 1.0).abs(),
        cluster_count: graph.clusters.len(),
        cycle_count: graph.cycles.len(),
    }
}
