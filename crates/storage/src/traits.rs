use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tsq_common::Result;
use tsq_ql::{BoxedIterator, DataType, IteratorOptions, Measurement, Source};

/// A shard identifier handed out by the meta client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardInfo {
    /// Shard id.
    pub id: u64,
}

/// Time bounds used when mapping sources to shards, in inclusive epoch
/// nanoseconds.
#[derive(Debug, Clone, Copy)]
pub struct SelectOptions {
    /// Lower bound.
    pub min_time: i64,
    /// Upper bound.
    pub max_time: i64,
}

/// A group of shards spanning a time range, able to create iterators for
/// a set of measurements.
pub trait ShardGroup: Send + Sync {
    /// Measurement names matching `re`, sorted.
    fn measurements_by_regex(&self, re: &regex::Regex) -> Vec<String>;

    /// Field name/type map and tag dimension set across `measurements`.
    fn field_dimensions(
        &self,
        measurements: &[String],
    ) -> Result<(HashMap<String, DataType>, BTreeSet<String>)>;

    /// Concrete type of `field` in `measurement`; `Unknown` when absent.
    fn map_type(&self, measurement: &str, field: &str) -> DataType;

    /// Create an iterator over one measurement.
    fn create_iterator(&self, measurement: &str, opt: &IteratorOptions) -> Result<BoxedIterator>;
}

/// The per-source storage handle the plan's leaf nodes drive.
pub trait Database: Send + Sync {
    /// Create an iterator spanning every measurement behind this database.
    fn create_iterator(&self, opt: &IteratorOptions) -> Result<BoxedIterator>;

    /// Field name/type map and tag dimension set.
    fn field_dimensions(&self) -> Result<(HashMap<String, DataType>, BTreeSet<String>)>;

    /// Widest observed type of `field`.
    fn map_type(&self, field: &str) -> DataType;

    /// Release the handle.
    fn close(&self) -> Result<()>;
}

/// Resolves a measurement source and a time range to a [`Database`].
pub trait ShardMapper: Send + Sync {
    /// Map `measurement` over the time bounds of `opt`.
    fn map_shards(&self, measurement: &Measurement, opt: &SelectOptions)
        -> Result<Arc<dyn Database>>;
}

/// Metadata catalog: which shards cover a time range.
pub trait MetaClient: Send + Sync {
    /// Shards overlapping `[tmin, tmax]` for `sources`.
    fn shards_by_time_range(
        &self,
        sources: &[Source],
        tmin: i64,
        tmax: i64,
    ) -> Result<Vec<ShardInfo>>;
}

/// Access to shard groups by shard id.
pub trait ShardStore: Send + Sync {
    /// The shard group spanning `ids`.
    fn shard_group(&self, ids: &[u64]) -> Arc<dyn ShardGroup>;
}
