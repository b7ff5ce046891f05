//! Line-oriented text edits shared by the filesystem and in-memory appliers.
//!
//! Lines are 1-based. Ranges are closed intervals, as used by conflict detection.

use crate::changes::{contains_identifier, Operation, OperationType};
use crate::error::{CoordinationError, Result};

/// Apply one operation to file content and return the new content
pub fn apply_to_text(content: &str, operation: &Operation) -> Result<String> {
    let trailing_newline = content.ends_with('\n');
    let mut lines: Vec<String> = content.lines().map(str::to_string).collect();
    let (start, end) = operation.affected_lines();

    match operation.op_type {
        OperationType::Insert => {
            let text = required_after(operation)?;
            let at = (start.max(1) as usize - 1).min(lines.len());
            splice(&mut lines, at, at, text);
        }
        OperationType::Delete => {
            let (s, e) = checked_range(&lines, start, end, operation)?;
            verify_before(&lines[s..e], operation)?;
            lines.drain(s..e);
        }
        OperationType::Replace | OperationType::Inline => {
            let (s, e) = checked_range(&lines, start, end, operation)?;
            verify_before(&lines[s..e], operation)?;
            splice(&mut lines, s, e, operation.after.as_deref().unwrap_or(""));
        }
        OperationType::Move => {
            let (s, e) = checked_range(&lines, start, end, operation)?;
            let target = operation.target_line.ok_or_else(|| {
                CoordinationError::Execution(format!("Move operation {} has no target line", operation.id))
            })?;
            let block: Vec<String> = lines.drain(s..e).collect();
            let mut at = target.max(1) as usize - 1;
            if at > s {
                at = at.saturating_sub(block.len());
            }
            let at = at.min(lines.len());
            lines.splice(at..at, block);
        }
        OperationType::Extract => {
            let (s, e) = checked_range(&lines, start, end, operation)?;
            let block: Vec<String> = lines.drain(s..e).collect();
            let replacement = operation.after.as_deref().unwrap_or("");
            let inserted = splice(&mut lines, s, s, replacement);
            let at = match operation.target_line {
                Some(target) => {
                    let mut at = target.max(1) as usize - 1;
                    if at > s {
                        at = (at + inserted).saturating_sub(block.len());
                    }
                    at.min(lines.len())
                }
                None => lines.len(),
            };
            lines.splice(at..at, block);
        }
        OperationType::Rename => {
            let from = operation.symbol.as_deref().ok_or_else(|| {
                CoordinationError::Execution(format!("Rename operation {} names no symbol", operation.id))
            })?;
            let to = required_after(operation)?.trim();
            if !contains_identifier(content, from) {
                return Err(CoordinationError::Execution(format!(
                    "Symbol '{}' not found for rename",
                    from
                )));
            }
            for line in lines.iter_mut() {
                *line = replace_identifier(line, from, to);
            }
        }
        OperationType::Reformat => {
            let (s, e) = checked_range(&lines, start, end, operation)?;
            match operation.after.as_deref() {
                Some(text) => {
                    splice(&mut lines, s, e, text);
                }
                None => {
                    for line in &mut lines[s..e] {
                        *line = line.trim_end().to_string();
                    }
                }
            }
        }
    }

    let mut out = lines.join("\n");
    if trailing_newline && !out.is_empty() {
        out.push('\n');
    }
    Ok(out)
}

fn required_after(operation: &Operation) -> Result<&str> {
    operation.after.as_deref().ok_or_else(|| {
        CoordinationError::Execution(format!(
            "{:?} operation {} has no content",
            operation.op_type, operation.id
        ))
    })
}

/// Zero-based half-open bounds for a closed 1-based range
fn checked_range(lines: &[String], start: u32, end: u32, operation: &Operation) -> Result<(usize, usize)> {
    let s = start.max(1) as usize - 1;
    let e = (end.max(1) as usize).min(lines.len());
    if s >= lines.len() || s >= e {
        return Err(CoordinationError::Execution(format!(
            "Operation {} targets lines {}-{} but the file has {} lines",
            operation.id,
            start,
            end,
            lines.len()
        )));
    }
    Ok((s, e))
}

fn verify_before(existing: &[String], operation: &Operation) -> Result<()> {
    if let Some(expected) = operation.before.as_deref() {
        if existing.join("\n").trim() != expected.trim() {
            return Err(CoordinationError::Execution(format!(
                "Content at the location of operation {} does not match the expected text",
                operation.id
            )));
        }
    }
    Ok(())
}

/// Replace `lines[from..to]` with the lines of `text`; returns how many were inserted
fn splice(lines: &mut Vec<String>, from: usize, to: usize, text: &str) -> usize {
    let new_lines: Vec<String> = if text.is_empty() {
        Vec::new()
    } else {
        text.lines().map(str::to_string).collect()
    };
    let count = new_lines.len();
    lines.splice(from..to, new_lines);
    count
}

fn replace_identifier(line: &str, from: &str, to: &str) -> String {
    let is_ident = |c: char| c.is_alphanumeric() || c == '_' || c == '$';
    let mut out = String::with_capacity(line.len());
    let mut rest = line;
    while let Some(idx) = rest.find(from) {
        let prev = if idx > 0 {
            rest[..idx].chars().next_back()
        } else {
            out.chars().next_back()
        };
        let next = rest[idx + from.len()..].chars().next();
        out.push_str(&rest[..idx]);
        if prev.is_none_or(|c| !is_ident(c)) && next.is_none_or(|c| !is_ident(c)) {
            out.push_str(to);
        } else {
            out.push_str(from);
        }
        rest = &rest[idx + from.len()..];
    }
    out.push_str(rest);
    out
}
