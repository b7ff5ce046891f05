//! Custom rule evaluation

use regex::{Regex, RegexBuilder};
use std::path::Path;

use super::result::{Severity, ValidationIssue};
use crate::changes::{ChangeSet, FileChange, PatternMode, RuleKind, ValidationRule};
use crate::collaborators::RuleEvaluator;
use crate::error::{CoordinationError, Result};

const MAX_PATTERN_LEN: usize = 1024;
const REGEX_SIZE_LIMIT: usize = 1 << 20;

/// Compile a user-supplied pattern with length and size guards
pub fn compile_pattern(pattern: &str) -> Result<Regex> {
    if pattern.len() > MAX_PATTERN_LEN {
        return Err(CoordinationError::Config(format!(
            "pattern is {} bytes, limit is {}",
            pattern.len(),
            MAX_PATTERN_LEN
        )));
    }
    Ok(RegexBuilder::new(pattern).size_limit(REGEX_SIZE_LIMIT).build()?)
}

fn applies(rule: &ValidationRule, change: &FileChange) -> Result<bool> {
    match &rule.applies_to {
        Some(scope) => Ok(compile_pattern(scope)?.is_match(&change.key())),
        None => Ok(true),
    }
}

/// Run every enabled rule against every change it applies to.
/// Returns the issues and the number of enabled rules.
pub async fn evaluate_rules(change_set: &ChangeSet, evaluator: &dyn RuleEvaluator) -> (Vec<ValidationIssue>, usize) {
    let mut issues = Vec::new();
    let enabled: Vec<&ValidationRule> = change_set.validation_rules.iter().filter(|r| r.enabled).collect();

    for rule in &enabled {
        let severity = rule.effective_severity();
        for change in &change_set.changes {
            match applies(rule, change) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    issues.push(invalid_rule(rule, &e.to_string()));
                    break;
                }
            }

            let outcome = match &rule.kind {
                RuleKind::Pattern { pattern, mode } => match compile_pattern(pattern) {
                    Ok(regex) => Ok(pattern_holds(&regex, *mode, change)),
                    Err(e) => {
                        issues.push(invalid_rule(rule, &e.to_string()));
                        break;
                    }
                },
                RuleKind::Ast { check } | RuleKind::Custom { check } => {
                    let content = change.resulting_contents().join("\n");
                    evaluator.evaluate(rule, check, change.operation_target(), &content).await
                }
            };

            match outcome {
                Ok(true) => {}
                Ok(false) => issues.push(rule_failed(rule, severity, change.operation_target())),
                Err(e) => {
                    tracing::warn!(rule = %rule.id, error = %e, "Rule evaluation failed");
                    issues.push(
                        ValidationIssue::new(Severity::Warning, format!("Rule '{}' could not be evaluated: {}", rule.name, e))
                            .in_file(change.operation_target())
                            .from_source(rule.id.clone()),
                    );
                }
            }
        }
    }

    (issues, enabled.len())
}

fn pattern_holds(regex: &Regex, mode: PatternMode, change: &FileChange) -> bool {
    let contents = change.resulting_contents();
    match mode {
        PatternMode::Require => contents.iter().all(|c| regex.is_match(c)),
        PatternMode::Forbid => !contents.iter().any(|c| regex.is_match(c)),
    }
}

fn rule_failed(rule: &ValidationRule, severity: Severity, file: &Path) -> ValidationIssue {
    let detail = match &rule.kind {
        RuleKind::Pattern {
            pattern,
            mode: PatternMode::Require,
        } => format!("content does not match required pattern `{}`", pattern),
        RuleKind::Pattern {
            pattern,
            mode: PatternMode::Forbid,
        } => format!("content matches forbidden pattern `{}`", pattern),
        RuleKind::Ast { check } | RuleKind::Custom { check } => format!("check `{}` failed", check),
    };
    ValidationIssue::new(severity, format!("Rule '{}': {}", rule.name, detail))
        .in_file(file)
        .from_source(rule.id.clone())
}

fn invalid_rule(rule: &ValidationRule, reason: &str) -> ValidationIssue {
    ValidationIssue::new(Severity::Error, format!("Rule '{}' is invalid: {}", rule.name, reason))
        .from_source(rule.id.clone())
        .suggest("Fix or disable the rule")
}
