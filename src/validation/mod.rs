//! Change validation
//!
//! Syntax, type, dependency, consistency, test and custom-rule checks over a
//! change set, reduced to one verdict.

pub mod result;
pub mod rules;
pub mod validator;

pub use result::*;
pub use rules::*;
pub use validator::*;
