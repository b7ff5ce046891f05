//! Execution planning
//!
//! Turns a dependency graph and a change set into ordered, grouped steps.

pub mod conflicts;
pub mod plan;
pub mod planner;

pub use conflicts::*;
pub use plan::*;
pub use planner::*;
