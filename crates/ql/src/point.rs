use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A typed field value attached to a point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// 64-bit float.
    Float(f64),
    /// 64-bit signed integer.
    Integer(i64),
    /// 64-bit unsigned integer.
    Unsigned(u64),
    /// Boolean.
    Boolean(bool),
    /// String.
    Str(String),
    /// Absent value (unmatched auxiliary field, empty window).
    Null,
}

impl FieldValue {
    /// Numeric view as f64, when the value is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Float(v) => Some(*v),
            FieldValue::Integer(v) => Some(*v as f64),
            FieldValue::Unsigned(v) => Some(*v as f64),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Float(v) => write!(f, "{v}"),
            FieldValue::Integer(v) => write!(f, "{v}"),
            FieldValue::Unsigned(v) => write!(f, "{v}"),
            FieldValue::Boolean(v) => write!(f, "{v}"),
            FieldValue::Str(v) => write!(f, "{v}"),
            FieldValue::Null => write!(f, "null"),
        }
    }
}

/// An ordered tag set. Identity (and therefore series identity) is the
/// ordered `k=v` rendering.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Tags(BTreeMap<String, String>);

impl Tags {
    /// An empty tag set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from key/value pairs.
    pub fn from_pairs<K: Into<String>, V: Into<String>>(
        pairs: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Parse a `k=v,k=v` rendering. Malformed entries are skipped.
    pub fn parse(s: &str) -> Self {
        Self(
            s.split(',')
                .filter_map(|kv| kv.split_once('='))
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    /// Look up one tag value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(|v| v.as_str())
    }

    /// Project onto a subset of keys. Missing keys are dropped.
    pub fn subset(&self, keys: &[String]) -> Tags {
        Tags(
            keys.iter()
                .filter_map(|k| self.0.get(k).map(|v| (k.clone(), v.clone())))
                .collect(),
        )
    }

    /// Stable series identity string (`host=A,region=west`).
    pub fn id(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Returns true when no tags are present.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Tags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

/// A single time-stamped observation flowing through the plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Measurement name.
    pub name: String,
    /// Tag set.
    pub tags: Tags,
    /// Timestamp in epoch nanoseconds.
    pub time: i64,
    /// Primary value.
    pub value: FieldValue,
    /// Auxiliary values, positionally matched to the requested aux fields.
    pub aux: Vec<FieldValue>,
    /// Number of source points folded into this one by aggregation.
    pub aggregated: u64,
}

impl Point {
    /// A float point with no auxiliary values.
    pub fn float(name: impl Into<String>, tags: Tags, time: i64, value: f64) -> Self {
        Self {
            name: name.into(),
            tags,
            time,
            value: FieldValue::Float(value),
            aux: Vec::new(),
            aggregated: 0,
        }
    }

    /// An integer point with no auxiliary values.
    pub fn integer(name: impl Into<String>, tags: Tags, time: i64, value: i64) -> Self {
        Self {
            name: name.into(),
            tags,
            time,
            value: FieldValue::Integer(value),
            aux: Vec::new(),
            aggregated: 0,
        }
    }
}
