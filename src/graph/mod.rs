//! Dependency graph module
//!
//! Builds a file-level dependency graph for a set of targets and reports the
//! cycles in it.

pub mod builder;
pub mod cycles;
pub mod types;

pub use builder::*;
pub use cycles::*;
pub use types::*;

#[cfg(test)]
pub(crate) mod fixtures {
    use std::path::PathBuf;

    use super::types::{EdgeStrength, GraphEdge, GraphNode, NodeMetrics};
    use crate::changes::DependencyType;
    use crate::collaborators::FileCategory;

    pub fn node(id: &str) -> GraphNode {
        GraphNode {
            id: id.to_string(),
            path: PathBuf::from(id),
            language: "typescript".to_string(),
            category: FileCategory::Source,
            importance: 0.5,
            stability: 0.5,
            symbols: Vec::new(),
            metrics: NodeMetrics::default(),
        }
    }

    /// `source` depends on `target`
    pub fn edge(source: &str, target: &str) -> GraphEdge {
        GraphEdge {
            source: source.to_string(),
            target: target.to_string(),
            dependency_type: DependencyType::Import,
            weight: 0.2,
            critical: false,
            strength: EdgeStrength::Weak,
            symbols: Vec::new(),
        }
    }
}
