//! Validation result model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::config::ValidationLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Passed,
    Failed,
    Warning,
    Skipped,
}

impl ValidationStatus {
    /// Reduce group statuses to one verdict: any failed wins, then any warning,
    /// then skipped only when everything was skipped
    pub fn aggregate(statuses: impl IntoIterator<Item = ValidationStatus>) -> Self {
        let statuses: Vec<ValidationStatus> = statuses.into_iter().collect();
        if statuses.contains(&ValidationStatus::Failed) {
            ValidationStatus::Failed
        } else if statuses.contains(&ValidationStatus::Warning) {
            ValidationStatus::Warning
        } else if statuses.iter().all(|s| *s == ValidationStatus::Skipped) {
            ValidationStatus::Skipped
        } else {
            ValidationStatus::Passed
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationStatus::Passed => "passed",
            ValidationStatus::Failed => "failed",
            ValidationStatus::Warning => "warning",
            ValidationStatus::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    #[default]
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKind {
    Syntax,
    Type,
    Dependency,
    Consistency,
    Test,
    Custom,
}

impl GroupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupKind::Syntax => "syntax",
            GroupKind::Type => "type",
            GroupKind::Dependency => "dependency",
            GroupKind::Consistency => "consistency",
            GroupKind::Test => "test",
            GroupKind::Custom => "custom",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    pub id: String,
    pub severity: Severity,
    pub message: String,
    pub file: Option<PathBuf>,
    pub line: Option<u32>,
    /// Rule or edge that produced the issue
    pub source: Option<String>,
    pub suggestion: Option<String>,
}

impl ValidationIssue {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            severity,
            message: message.into(),
            file: None,
            line: None,
            source: None,
            suggestion: None,
        }
    }

    pub fn in_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn at_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    pub fn from_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn suggest(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationGroup {
    pub kind: GroupKind,
    pub status: ValidationStatus,
    pub issues: Vec<ValidationIssue>,
    /// Files or rules examined
    pub checked: usize,
}

impl ValidationGroup {
    /// Status follows the worst issue: error or critical fails, warning warns
    pub fn from_issues(kind: GroupKind, checked: usize, issues: Vec<ValidationIssue>) -> Self {
        let worst = issues.iter().map(|i| i.severity).max();
        let status = match worst {
            Some(Severity::Error | Severity::Critical) => ValidationStatus::Failed,
            Some(Severity::Warning) => ValidationStatus::Warning,
            _ => ValidationStatus::Passed,
        };
        Self::numbered(kind, status, checked, issues)
    }

    /// Like `from_issues` but never worse than warning
    pub fn advisory(kind: GroupKind, checked: usize, issues: Vec<ValidationIssue>) -> Self {
        let status = if issues.iter().any(|i| i.severity >= Severity::Warning) {
            ValidationStatus::Warning
        } else {
            ValidationStatus::Passed
        };
        Self::numbered(kind, status, checked, issues)
    }

    pub fn skipped(kind: GroupKind) -> Self {
        Self {
            kind,
            status: ValidationStatus::Skipped,
            issues: Vec::new(),
            checked: 0,
        }
    }

    fn numbered(kind: GroupKind, status: ValidationStatus, checked: usize, mut issues: Vec<ValidationIssue>) -> Self {
        for (i, issue) in issues.iter_mut().enumerate() {
            issue.id = format!("{}-{}", kind.as_str(), i + 1);
        }
        Self {
            kind,
            status,
            issues,
            checked,
        }
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub level: ValidationLevel,
    pub overall: ValidationStatus,
    pub syntax: ValidationGroup,
    pub type_check: ValidationGroup,
    pub dependency: ValidationGroup,
    pub consistency: ValidationGroup,
    pub test: ValidationGroup,
    pub custom: ValidationGroup,
    pub validated_at: DateTime<Utc>,
}

impl ValidationResult {
    pub fn new(
        level: ValidationLevel,
        syntax: ValidationGroup,
        type_check: ValidationGroup,
        dependency: ValidationGroup,
        consistency: ValidationGroup,
        test: ValidationGroup,
        custom: ValidationGroup,
    ) -> Self {
        let overall = ValidationStatus::aggregate(
            [&syntax, &type_check, &dependency, &consistency, &test, &custom].map(|g| g.status),
        );
        Self {
            level,
            overall,
            syntax,
            type_check,
            dependency,
            consistency,
            test,
            custom,
            validated_at: Utc::now(),
        }
    }

    pub fn groups(&self) -> [&ValidationGroup; 6] {
        [
            &self.syntax,
            &self.type_check,
            &self.dependency,
            &self.consistency,
            &self.test,
            &self.custom,
        ]
    }

    pub fn issues(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.groups().into_iter().flat_map(|g| g.issues.iter())
    }

    pub fn issue_count(&self) -> usize {
        self.groups().iter().map(|g| g.issues.len()).sum()
    }

    /// Error and critical issues
    pub fn error_count(&self) -> usize {
        self.issues().filter(|i| i.severity >= Severity::Error).count()
    }

    pub fn warning_count(&self) -> usize {
        self.issues().filter(|i| i.severity == Severity::Warning).count()
    }

    /// Whether this verdict stops execution
    pub fn blocks(&self, warnings_block: bool) -> bool {
        match self.overall {
            ValidationStatus::Failed => true,
            ValidationStatus::Warning => warnings_block,
            _ => false,
        }
    }
}
