//! Per-change-set policies: validation rules, rollback plan and impact

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::entry::{FileChange, OperationType, RiskLevel};
use crate::config::RollbackStrategy;
use crate::validation::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternMode {
    /// Every operation result must match
    Require,
    /// No operation result may match
    Forbid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleKind {
    Pattern { pattern: String, mode: PatternMode },
    /// Named structural check handed to the rule evaluator
    Ast { check: String },
    Custom { check: String },
}

fn enabled_default() -> bool {
    true
}

/// A user-supplied check run by the custom-rules validation group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRule {
    pub id: String,
    pub name: String,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    pub kind: RuleKind,
    /// Falls back to warning
    #[serde(default)]
    pub severity: Option<Severity>,
    /// Regex over the file's path key; all files when absent
    #[serde(default)]
    pub applies_to: Option<String>,
}

impl ValidationRule {
    pub fn pattern(id: impl Into<String>, pattern: impl Into<String>, mode: PatternMode) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            enabled: true,
            kind: RuleKind::Pattern {
                pattern: pattern.into(),
                mode,
            },
            severity: None,
            applies_to: None,
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn effective_severity(&self) -> Severity {
        self.severity.unwrap_or(Severity::Warning)
    }
}

/// One explicit recovery step, executed in list order by partial revert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RollbackProcedure {
    /// Restore from the newest checkpoint that captured this path
    RestoreFile { path: PathBuf },
    RunCommand {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
    RestartService { name: String },
    /// Syntax-check every file touched by the change set
    RunValidation,
}

/// Checks run after any rollback strategy restores state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum RollbackCheck {
    /// Restored files parse
    Syntax,
    /// Restored files hash to the checkpoint's recorded hash
    Integrity,
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackPlan {
    /// Overrides the coordinator's configured strategy
    #[serde(default)]
    pub strategy: Option<RollbackStrategy>,
    #[serde(default)]
    pub procedures: Vec<RollbackProcedure>,
    #[serde(default)]
    pub validation_checks: Vec<RollbackCheck>,
}

impl RollbackPlan {
    pub fn with_strategy(strategy: RollbackStrategy) -> Self {
        Self {
            strategy: Some(strategy),
            ..Default::default()
        }
    }

    pub fn with_procedure(mut self, procedure: RollbackProcedure) -> Self {
        self.procedures.push(procedure);
        self
    }

    pub fn with_check(mut self, check: RollbackCheck) -> Self {
        self.validation_checks.push(check);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpactAssessment {
    pub risk: RiskLevel,
    pub affected_files: usize,
    pub operations: usize,
    /// Removes files or symbols other files may reference
    pub breaking_changes: bool,
}

impl ImpactAssessment {
    pub fn estimate(changes: &[FileChange]) -> Self {
        let risk = changes
            .iter()
            .map(|c| c.complexity.risk())
            .max()
            .unwrap_or_default();
        let breaking_changes = changes.iter().any(|c| {
            c.kind.removes_file()
                || c
                    .operations
                    .iter()
                    .any(|op| matches!(op.op_type, OperationType::Delete | OperationType::Rename))
        });

        Self {
            risk,
            affected_files: changes.len(),
            operations: changes.iter().map(|c| c.operations.len()).sum(),
            breaking_changes,
        }
    }
}
