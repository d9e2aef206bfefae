use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tsq_common::Result;
use tsq_ql::{BoxedIterator, DataType, IteratorOptions, Measurement, MeasurementName, Source};
use tsq_runtime::SortedMergeIterator;

use crate::traits::{Database, MetaClient, SelectOptions, ShardGroup, ShardMapper, ShardStore};

/// A [`Database`] over a shard group and a resolved measurement list.
pub struct ShardDatabase {
    measurements: Vec<String>,
    shard: Arc<dyn ShardGroup>,
}

impl ShardDatabase {
    /// Bind `measurements` to `shard`.
    pub fn new(measurements: Vec<String>, shard: Arc<dyn ShardGroup>) -> Self {
        Self {
            measurements,
            shard,
        }
    }
}

impl Database for ShardDatabase {
    fn create_iterator(&self, opt: &IteratorOptions) -> Result<BoxedIterator> {
        let mut itrs = Vec::with_capacity(self.measurements.len());
        for name in &self.measurements {
            match self.shard.create_iterator(name, opt) {
                Ok(itr) => itrs.push(itr),
                Err(e) => {
                    for itr in &mut itrs {
                        itr.close();
                    }
                    return Err(e);
                }
            }
        }
        Ok(Box::new(SortedMergeIterator::new(itrs, opt.ascending)))
    }

    fn field_dimensions(&self) -> Result<(HashMap<String, DataType>, BTreeSet<String>)> {
        self.shard.field_dimensions(&self.measurements)
    }

    fn map_type(&self, field: &str) -> DataType {
        let mut typ = DataType::Unknown;
        for name in &self.measurements {
            typ = typ.merge(self.shard.map_type(name, field));
        }
        typ
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// The default [`ShardMapper`]: resolves shard ids through a [`MetaClient`],
/// fetches the covering group from a [`ShardStore`], and expands
/// regex-named measurements against the group.
pub struct CatalogShardMapper {
    meta: Arc<dyn MetaClient>,
    store: Arc<dyn ShardStore>,
}

impl CatalogShardMapper {
    /// Compose a mapper from catalog halves.
    pub fn new(meta: Arc<dyn MetaClient>, store: Arc<dyn ShardStore>) -> Self {
        Self { meta, store }
    }
}

impl ShardMapper for CatalogShardMapper {
    fn map_shards(
        &self,
        measurement: &Measurement,
        opt: &SelectOptions,
    ) -> Result<Arc<dyn Database>> {
        let sources = vec![Source::Measurement(measurement.clone())];
        let shards = self
            .meta
            .shards_by_time_range(&sources, opt.min_time, opt.max_time)?;
        let ids: Vec<u64> = shards.iter().map(|s| s.id).collect();
        let shard = self.store.shard_group(&ids);

        let measurements = match &measurement.name {
            MeasurementName::Name(name) => vec![name.clone()],
            MeasurementName::Regex(re) => shard.measurements_by_regex(re.matcher()),
        };
        Ok(Arc::new(ShardDatabase::new(measurements, shard)))
    }
}
