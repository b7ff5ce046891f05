//! SHA-256 content hashes and the state comparison behind integrity checks

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::Metadata;
use std::time::SystemTime;

use super::checkpoint::FileState;

/// Extract modification time from metadata as unix timestamp
pub fn get_mtime(metadata: &Metadata) -> u64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Hex SHA-256 of in-memory content
pub fn hash_content(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Type of checksum mismatch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChecksumMismatch {
    /// File should exist but does not
    Missing,
    /// File should not exist but does
    Unexpected,
    /// File content has changed
    Modified { expected: String, actual: String },
}

/// Compare a recaptured state against the state it was restored from
pub fn compare_states(expected: &FileState, actual: &FileState) -> Option<ChecksumMismatch> {
    match (expected.exists(), actual.exists()) {
        (true, false) => Some(ChecksumMismatch::Missing),
        (false, true) => Some(ChecksumMismatch::Unexpected),
        (false, false) => None,
        (true, true) if expected.hash != actual.hash => Some(ChecksumMismatch::Modified {
            expected: expected.hash.clone(),
            actual: actual.hash.clone(),
        }),
        _ => None,
    }
}
