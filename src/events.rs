//! Lifecycle events
//!
//! The coordinator publishes one event per stage transition and sub-step on a
//! broadcast channel. Subscribers that lag simply miss events; publishing never
//! blocks and never fails when nobody is listening.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::config::RollbackStrategy;

/// Coordination stage an event refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Analysis,
    Planning,
    Validation,
    Execution,
    PostValidation,
    Rollback,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Analysis => "analysis",
            Stage::Planning => "planning",
            Stage::Validation => "validation",
            Stage::Execution => "execution",
            Stage::PostValidation => "post_validation",
            Stage::Rollback => "rollback",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    SessionCreated,
    StatusChanged {
        from: String,
        to: String,
    },
    StageStarted {
        stage: Stage,
    },
    StageCompleted {
        stage: Stage,
        summary: String,
    },
    StageFailed {
        stage: Stage,
        error: String,
    },
    CyclesDetected {
        cycles: Vec<Vec<String>>,
    },
    CheckpointCreated {
        checkpoint_id: String,
        files: usize,
    },
    GroupStarted {
        group_index: usize,
        steps: usize,
    },
    GroupProgress {
        completed_groups: usize,
        total_groups: usize,
        /// Milliseconds
        estimated_remaining: u64,
    },
    DriftDetected {
        critical: usize,
        warnings: usize,
    },
    RollbackStarted {
        strategy: RollbackStrategy,
    },
    RollbackCompleted {
        strategy: RollbackStrategy,
        restored_files: usize,
    },
    RollbackFailed {
        error: String,
    },
    Cancelled,
}

/// One published lifecycle notification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleEvent {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
}

/// Broadcast fan-out of lifecycle events
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LifecycleEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, session_id: &str, kind: EventKind) {
        tracing::debug!(session_id = %session_id, event = ?kind, "Lifecycle event");
        let event = LifecycleEvent {
            session_id: session_id.to_string(),
            timestamp: Utc::now(),
            kind,
        };
        // No receivers is fine
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
