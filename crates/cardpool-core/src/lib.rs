//! Shared building blocks for the cardpool card resource allocator.
//!
//! This crate holds the data every other cardpool crate agrees on: the
//! identity of a matched smart card, the allocation ordering strategies,
//! the service error taxonomy and the configuration defaults.

pub mod constants;
pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::*;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
