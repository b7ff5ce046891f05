//! Workspace drift detection
//!
//! Captures existence and content hash of every file a plan touches when the
//! plan is built, and compares against the workspace right before execution.
//! Files deleted in between are critical; other differences are warnings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::changes::path_key;
use crate::collaborators::FileStateStore;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileFingerprint {
    pub path: PathBuf,
    pub exists: bool,
    pub hash: String,
    pub size: u64,
}

/// Workspace state at a point in time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub files: BTreeMap<String, FileFingerprint>,
    pub captured_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateConflict {
    /// Content changed since the snapshot
    Modified { path: String },
    /// File was deleted since the snapshot
    Deleted { path: String },
    /// File appeared since the snapshot
    Added { path: String },
}

impl StateConflict {
    pub fn description(&self) -> String {
        match self {
            StateConflict::Modified { path } => format!("File modified: {}", path),
            StateConflict::Deleted { path } => format!("File deleted: {}", path),
            StateConflict::Added { path } => format!("New file appeared: {}", path),
        }
    }

    /// Whether this conflict would make operations fail
    pub fn is_critical(&self) -> bool {
        matches!(self, StateConflict::Deleted { .. })
    }

    pub fn path(&self) -> &str {
        match self {
            StateConflict::Modified { path } | StateConflict::Deleted { path } | StateConflict::Added { path } => path,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftReport {
    pub valid: bool,
    pub conflicts: Vec<StateConflict>,
    pub paths_checked: usize,
    pub critical_count: usize,
    pub warning_count: usize,
}

impl DriftReport {
    pub fn critical_paths(&self) -> Vec<PathBuf> {
        self.conflicts
            .iter()
            .filter(|c| c.is_critical())
            .map(|c| PathBuf::from(c.path()))
            .collect()
    }
}

impl StateSnapshot {
    pub async fn capture(store: &dyn FileStateStore, root: &Path, paths: &[PathBuf]) -> Result<Self> {
        let mut files = BTreeMap::new();
        for path in paths {
            let state = store.capture(root, path).await?;
            files.insert(
                path_key(path),
                FileFingerprint {
                    path: path.clone(),
                    exists: state.exists(),
                    hash: state.hash,
                    size: state.metadata.size,
                },
            );
        }
        Ok(Self {
            files,
            captured_at: Some(Utc::now()),
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Compares the current workspace against a snapshot
pub struct StateValidator {
    snapshot: StateSnapshot,
}

impl StateValidator {
    pub fn new(snapshot: StateSnapshot) -> Self {
        Self { snapshot }
    }

    pub async fn validate_current_state(&self, store: &dyn FileStateStore, root: &Path) -> Result<DriftReport> {
        let mut conflicts = Vec::new();

        for (key, before) in &self.snapshot.files {
            let now = store.capture(root, &before.path).await?;
            let conflict = match (before.exists, now.exists()) {
                (true, false) => Some(StateConflict::Deleted { path: key.clone() }),
                (false, true) => Some(StateConflict::Added { path: key.clone() }),
                (true, true) if before.hash != now.hash => Some(StateConflict::Modified { path: key.clone() }),
                _ => None,
            };
            if let Some(conflict) = conflict {
                tracing::debug!(conflict = %conflict.description(), "Workspace drift");
                conflicts.push(conflict);
            }
        }

        let critical_count = conflicts.iter().filter(|c| c.is_critical()).count();
        let warning_count = conflicts.len() - critical_count;

        Ok(DriftReport {
            valid: conflicts.is_empty(),
            conflicts,
            paths_checked: self.snapshot.len(),
            critical_count,
            warning_count,
        })
    }
}
