//! Shared vocabulary for the medication cabinet workspace.
//!
//! Wire-level constants, validated domain newtypes and the configuration
//! error kind used by every other crate.

pub mod constants;
pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::*;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
