//! Checkpoint types
//!
//! A checkpoint is an append-only snapshot of file states plus the validation
//! verdict that held when it was captured.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::checksum::hash_content;
use crate::changes::path_key;
use crate::validation::{ValidationResult, ValidationStatus};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub size: u64,
    /// Unix seconds
    pub modified: Option<u64>,
    pub readonly: bool,
}

/// Captured state of one file; `content: None` means the file did not exist
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileState {
    pub path: PathBuf,
    pub content: Option<String>,
    /// Empty when the file did not exist
    pub hash: String,
    pub metadata: FileMetadata,
}

impl FileState {
    pub fn present(path: impl Into<PathBuf>, content: impl Into<String>, metadata: FileMetadata) -> Self {
        let content = content.into();
        Self {
            path: path.into(),
            hash: hash_content(content.as_bytes()),
            metadata: FileMetadata {
                size: content.len() as u64,
                ..metadata
            },
            content: Some(content),
        }
    }

    pub fn missing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            content: None,
            hash: String::new(),
            metadata: FileMetadata::default(),
        }
    }

    pub fn exists(&self) -> bool {
        self.content.is_some()
    }
}

/// Validation flags at capture time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationSnapshot {
    pub syntax_valid: bool,
    pub tests_passing: bool,
    pub dependencies_resolved: bool,
    pub consistency_ok: bool,
}

impl ValidationSnapshot {
    pub fn from_result(result: &ValidationResult) -> Self {
        let not_failed = |s: ValidationStatus| s != ValidationStatus::Failed;
        let clean = |s: ValidationStatus| matches!(s, ValidationStatus::Passed | ValidationStatus::Skipped);
        Self {
            syntax_valid: not_failed(result.syntax.status),
            tests_passing: clean(result.test.status),
            dependencies_resolved: not_failed(result.dependency.status),
            consistency_ok: clean(result.consistency.status),
        }
    }

    /// Every flag set; used for workspace state that predates the change set
    pub fn clean() -> Self {
        Self {
            syntax_valid: true,
            tests_passing: true,
            dependencies_resolved: true,
            consistency_ok: true,
        }
    }

    /// Usable as a full-revert target
    pub fn is_consistent(&self) -> bool {
        self.syntax_valid && self.dependencies_resolved
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackCheckpoint {
    pub id: String,
    pub label: String,
    pub created_at: DateTime<Utc>,
    /// Plan group after which this was taken; `None` for the pre-execution backup
    pub group_index: Option<usize>,
    pub files: Vec<FileState>,
    pub validation: ValidationSnapshot,
}

impl RollbackCheckpoint {
    pub fn new(label: impl Into<String>, files: Vec<FileState>, validation: ValidationSnapshot) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            label: label.into(),
            created_at: Utc::now(),
            group_index: None,
            files,
            validation,
        }
    }

    pub fn after_group(mut self, index: usize) -> Self {
        self.group_index = Some(index);
        self
    }

    pub fn state_for(&self, path: &Path) -> Option<&FileState> {
        let key = path_key(path);
        self.files.iter().find(|f| path_key(&f.path) == key)
    }
}
