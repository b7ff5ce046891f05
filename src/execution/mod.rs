//! Execution Engine Module
//!
//! Applies a plan's operations group by group through the operation applier.
//!
//! # State Validation
//!
//! The `state_validator` submodule checks that the files a plan touches have
//! not been changed or deleted between planning and execution.

pub mod executor;
pub mod state_validator;

pub use executor::*;
pub use state_validator::*;
