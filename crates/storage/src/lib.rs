//! Storage abstraction consumed by the TSQ linker.
//!
//! Architecture role:
//! - defines the traits the core needs from a storage engine: shard
//!   metadata lookup, shard-group access, and per-measurement iterator
//!   creation
//! - provides the shard-group-backed [`ShardDatabase`] and the default
//!   [`CatalogShardMapper`] composed from a meta client and a shard store
//!
//! Key modules:
//! - [`traits`]
//! - [`database`]
//! - [`multi`]

pub mod database;
pub mod multi;
pub mod traits;

pub use database::{CatalogShardMapper, ShardDatabase};
pub use multi::DatabaseSet;
pub use traits::{Database, MetaClient, SelectOptions, ShardGroup, ShardInfo, ShardMapper, ShardStore};
