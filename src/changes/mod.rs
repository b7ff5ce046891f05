//! Change set data model
//!
//! Immutable once a session starts executing; read by every other component.

pub mod entry;
pub mod policy;

pub use entry::*;
pub use policy::*;
