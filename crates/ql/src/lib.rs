//! Query-language IR and runtime contracts for TSQ.
//!
//! Architecture role:
//! - defines the statement tree produced by the (external) SQL-like parser
//! - defines the typed data model: field data types, points, tags
//! - defines the iterator contract consumed and produced by plan nodes
//!
//! Key modules:
//! - [`expr`]
//! - [`statement`]
//! - [`data_type`]
//! - [`point`]
//! - [`iterator`]
//! - [`duration`]

pub mod data_type;
pub mod display;
pub mod duration;
pub mod expr;
pub mod iterator;
pub mod point;
pub mod statement;

pub use data_type::DataType;
pub use duration::format_duration;
pub use expr::{BinaryOp, Call, Expr, Literal, Regex, VarRef};
pub use iterator::{BoxedIterator, Interval, IteratorOptions, PointIterator, MAX_TIME, MIN_TIME};
pub use point::{FieldValue, Point, Tags};
pub use statement::{
    Dimension, Field, Fill, Measurement, MeasurementName, SelectStatement, Source,
};
