//! Transaction-related types and traits
//!
//! This module provides additional transaction functionality beyond the
//! base `Transaction` trait defined in the connection module.

mod events;
mod savepoint;

pub use events::*;
pub use savepoint::*;
