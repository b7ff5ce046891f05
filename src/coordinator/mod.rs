//! Coordination sessions
//!
//! A session walks one change set through analysis, planning, validation,
//! execution and (when needed) rollback. `Coordinator` is the entry point.

pub mod coordinator;
pub mod session;

#[cfg(test)]
mod tests;

pub use coordinator::*;
pub use session::*;
