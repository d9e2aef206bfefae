//! In-memory catalog and shard-group doubles for linker and executor
//! tests.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use tsq_common::Result;
use tsq_ql::{
    BoxedIterator, DataType, Expr, FieldValue, IteratorOptions, Point, PointIterator, Source, Tags,
};
use tsq_runtime::SliceIterator;
use tsq_storage::{MetaClient, ShardGroup, ShardInfo, ShardStore};

pub const SECOND: i64 = 1_000_000_000;

/// Install the test tracing subscriber once; `RUST_LOG` controls output.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// One stored observation: every field value of a measurement at a
/// timestamp.
#[derive(Clone)]
pub struct Row {
    pub tags: Tags,
    pub time: i64,
    pub fields: BTreeMap<String, FieldValue>,
}

pub fn row(tags: &str, time: i64, field: &str, value: f64) -> Row {
    Row {
        tags: Tags::parse(tags),
        time,
        fields: BTreeMap::from([(field.to_string(), FieldValue::Float(value))]),
    }
}

/// Schema and data for one measurement.
#[derive(Clone, Default)]
pub struct MockMeasurement {
    pub fields: HashMap<String, DataType>,
    pub dimensions: BTreeSet<String>,
    pub rows: Vec<Row>,
}

impl MockMeasurement {
    pub fn with_fields(fields: &[(&str, DataType)]) -> Self {
        Self {
            fields: fields
                .iter()
                .map(|(n, t)| (n.to_string(), *t))
                .collect(),
            ..Default::default()
        }
    }

    pub fn with_rows(mut self, rows: Vec<Row>) -> Self {
        self.rows = rows;
        self
    }
}

/// An in-memory shard group over a set of measurements.
#[derive(Default)]
pub struct MockShardGroup {
    pub measurements: HashMap<String, MockMeasurement>,
}

impl MockShardGroup {
    pub fn new(measurements: Vec<(&str, MockMeasurement)>) -> Self {
        Self {
            measurements: measurements
                .into_iter()
                .map(|(n, m)| (n.to_string(), m))
                .collect(),
        }
    }
}

impl ShardGroup for MockShardGroup {
    fn measurements_by_regex(&self, re: &regex::Regex) -> Vec<String> {
        let mut names: Vec<String> = self
            .measurements
            .keys()
            .filter(|name| re.is_match(name))
            .cloned()
            .collect();
        names.sort();
        names
    }

    fn field_dimensions(
        &self,
        measurements: &[String],
    ) -> Result<(HashMap<String, DataType>, BTreeSet<String>)> {
        let mut fields = HashMap::new();
        let mut dimensions = BTreeSet::new();
        for name in measurements {
            if let Some(m) = self.measurements.get(name) {
                for (field, typ) in &m.fields {
                    let merged = fields
                        .get(field)
                        .copied()
                        .unwrap_or(DataType::Unknown)
                        .merge(*typ);
                    fields.insert(field.clone(), merged);
                }
                dimensions.extend(m.dimensions.iter().cloned());
            }
        }
        Ok((fields, dimensions))
    }

    fn map_type(&self, measurement: &str, field: &str) -> DataType {
        self.measurements
            .get(measurement)
            .and_then(|m| m.fields.get(field))
            .copied()
            .unwrap_or(DataType::Unknown)
    }

    fn create_iterator(&self, measurement: &str, opt: &IteratorOptions) -> Result<BoxedIterator> {
        let Some(m) = self.measurements.get(measurement) else {
            return Ok(tsq_runtime::empty());
        };

        let value_field = match &opt.expr {
            Some(Expr::VarRef(r)) => Some(r.name.clone()),
            _ => None,
        };

        let mut points: Vec<Point> = m
            .rows
            .iter()
            .filter(|r| r.time >= opt.start_time && r.time <= opt.end_time)
            .map(|r| {
                let value = match &value_field {
                    Some(field) => r.fields.get(field).cloned().unwrap_or(FieldValue::Null),
                    None => FieldValue::Null,
                };
                let aux = opt
                    .aux
                    .iter()
                    .map(|var| {
                        if let Some(v) = r.fields.get(&var.name) {
                            v.clone()
                        } else if let Some(tag) = r.tags.get(&var.name) {
                            FieldValue::Str(tag.to_string())
                        } else {
                            FieldValue::Null
                        }
                    })
                    .collect();
                Point {
                    name: measurement.to_string(),
                    tags: r.tags.clone(),
                    time: r.time,
                    value,
                    aux,
                    aggregated: 0,
                }
            })
            .collect();
        points.sort_by(|a, b| (a.tags.id(), a.time).cmp(&(b.tags.id(), b.time)));
        Ok(Box::new(SliceIterator::new(points)))
    }
}

/// Meta client handing out one shard for any time range.
pub struct MockMeta;

impl MetaClient for MockMeta {
    fn shards_by_time_range(
        &self,
        _sources: &[Source],
        _tmin: i64,
        _tmax: i64,
    ) -> Result<Vec<ShardInfo>> {
        Ok(vec![ShardInfo { id: 1 }])
    }
}

/// Meta client with no shards covering any range.
pub struct EmptyMeta;

impl MetaClient for EmptyMeta {
    fn shards_by_time_range(
        &self,
        _sources: &[Source],
        _tmin: i64,
        _tmax: i64,
    ) -> Result<Vec<ShardInfo>> {
        Ok(vec![])
    }
}

/// Shard store returning one shared group for any id set.
pub struct MockStore {
    pub group: Arc<MockShardGroup>,
}

impl ShardStore for MockStore {
    fn shard_group(&self, _ids: &[u64]) -> Arc<dyn ShardGroup> {
        Arc::clone(&self.group) as Arc<dyn ShardGroup>
    }
}

/// Drain an optional iterator into a vector.
pub fn read_all(itr: Option<BoxedIterator>) -> Result<Vec<Point>> {
    let Some(mut itr) = itr else {
        return Ok(Vec::new());
    };
    let mut out = Vec::new();
    while let Some(p) = itr.next()? {
        out.push(p);
    }
    itr.close();
    Ok(out)
}
