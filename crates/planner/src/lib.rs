//! Statement compiler for TSQ.
//!
//! Architecture role:
//! - semantic validation of a parsed SELECT statement against the
//!   function catalogue and composition rules
//! - WHERE-clause splitting into a residual predicate and a time range
//! - production of the [`CompiledStatement`] the linker lowers into the
//!   plan graph
//!
//! Key modules:
//! - [`compile`]
//! - [`time_range`]
//! - [`functions`]
//! - [`columns`]
//! - [`options`]

pub mod columns;
pub mod compile;
pub mod functions;
pub mod options;
pub mod time_range;

pub use columns::column_names;
pub use compile::{
    compile, AuxFieldRegistry, CompiledField, CompiledStatement, FieldExpr,
};
pub use options::CompileOptions;
pub use time_range::{split_condition, TimeRange};
