//! Lightweight syntax, type and rule checkers

use async_trait::async_trait;
use std::path::Path;

use super::{RuleEvaluator, SyntaxChecker, TypeChecker};
use crate::changes::ValidationRule;
use crate::error::Result;

/// Balanced `()[]{}` outside string literals and comments
pub fn delimiters_balanced(content: &str) -> bool {
    let mut stack: Vec<char> = Vec::new();
    let mut chars = content.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' | '\'' | '`' => {
                let quote = c;
                let mut closed = false;
                while let Some(s) = chars.next() {
                    if s == '\\' {
                        chars.next();
                    } else if s == quote {
                        closed = true;
                        break;
                    } else if s == '\n' && quote != '`' {
                        // Unterminated single-line literal; treat as apostrophe text
                        closed = true;
                        break;
                    }
                }
                if !closed {
                    return false;
                }
            }
            '/' if chars.peek() == Some(&'/') => {
                for s in chars.by_ref() {
                    if s == '\n' {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                let mut closed = false;
                for s in chars.by_ref() {
                    if prev == '*' && s == '/' {
                        closed = true;
                        break;
                    }
                    prev = s;
                }
                if !closed {
                    return false;
                }
            }
            '(' | '[' | '{' => stack.push(c),
            ')' | ']' | '}' => {
                let expected = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                if stack.pop() != Some(expected) {
                    return false;
                }
            }
            _ => {}
        }
    }

    stack.is_empty()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DelimiterSyntaxChecker;

#[async_trait]
impl SyntaxChecker for DelimiterSyntaxChecker {
    async fn check_syntax(&self, _path: &Path, content: &str) -> Result<bool> {
        Ok(delimiters_balanced(content))
    }
}

/// Accepts everything; plug in a real checker for typed languages
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptingTypeChecker;

#[async_trait]
impl TypeChecker for AcceptingTypeChecker {
    async fn check_types(&self, _path: &Path, _content: &str) -> Result<bool> {
        Ok(true)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRuleEvaluator;

#[async_trait]
impl RuleEvaluator for NoopRuleEvaluator {
    async fn evaluate(&self, rule: &ValidationRule, check: &str, path: &Path, _content: &str) -> Result<bool> {
        tracing::trace!(rule = %rule.id, check = %check, path = %path.display(), "No rule evaluator installed");
        Ok(true)
    }
}
