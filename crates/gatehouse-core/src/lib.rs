//! Shared domain types for the gatehouse access-control gateway.
//!
//! Every other crate in the workspace depends on this one for the card and
//! reader identifiers, the admission outcome, the persisted record shapes and
//! the error taxonomy used at component boundaries.

pub mod constants;
pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::*;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
