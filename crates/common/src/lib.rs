#![deny(missing_docs)]

//! Shared error contracts for TSQ crates.
//!
//! Architecture role:
//! - provides the common [`QueryError`] / [`Result`] contracts used by the
//!   query-language IR, the compiler, the storage layer, and the plan
//!   executor.
//!
//! Key modules:
//! - [`error`]

/// Shared error taxonomy.
pub mod error;

pub use error::{QueryError, Result};
