//! Rollback support
//!
//! Checkpoints of file state taken before and during execution, SHA-256
//! integrity helpers, and the manager that restores from them.

pub mod checkpoint;
pub mod checksum;
pub mod manager;

pub use checkpoint::*;
pub use checksum::*;
pub use manager::*;
