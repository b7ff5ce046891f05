//! Multi-file change coordination
//!
//! Builds a dependency graph over the files a change set touches, orders and
//! groups the changes into a parallel execution plan, validates the result,
//! applies it group by group with checkpoints, and rolls back on failure.
//!
//! ```no_run
//! use change_coordinator::{ChangeScope, ChangeSet, ChangeType, CoordinationContext, Coordinator, FileChange};
//!
//! # async fn run() -> change_coordinator::Result<()> {
//! change_coordinator::init_tracing();
//! let coordinator = Coordinator::from_env()?;
//! let changes = ChangeSet::new(ChangeType::Refactor, ChangeScope::Module).with_change(FileChange::modify("src/a.ts"));
//! let id = coordinator.initiate_coordination(CoordinationContext::new(".", changes)).await?;
//! let result = coordinator.execute_changes(&id).await?;
//! println!("{}", result.status);
//! # Ok(())
//! # }
//! ```

pub mod changes;
pub mod collaborators;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod execution;
pub mod graph;
pub mod planning;
pub mod rollback;
pub mod validation;

pub use changes::{ChangeScope, ChangeSet, ChangeType, FileChange};
pub use config::CoordinatorConfig;
pub use coordinator::{CoordinationContext, CoordinationResult, Coordinator, SessionStatus};
pub use error::{CoordinationError, Result};
pub use events::{EventKind, LifecycleEvent};

use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber filtered by `RUST_LOG`.
/// Default: warn for dependencies, info for this crate. Safe to call more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,change_coordinator=info")),
        )
        .try_init();
}
