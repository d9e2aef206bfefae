//! Plan graph, linker, and executor for TSQ.
//!
//! Architecture role:
//! - models the executable dataflow graph: nodes connected by edges that
//!   carry exactly one lazy iterator each
//! - lowers a [`tsq_planner::CompiledStatement`] onto shard storage
//! - drives the graph to completion in topological waves
//!
//! Key modules:
//! - [`graph`]
//! - [`node`]
//! - [`plan`]
//! - [`optimize`]
//! - [`linker`]

pub mod graph;
pub mod linker;
pub mod node;
pub mod optimize;
pub mod plan;

pub use graph::{EdgeId, NodeId};
pub use linker::{Linked, Linker};
pub use node::Node;
pub use plan::Plan;
