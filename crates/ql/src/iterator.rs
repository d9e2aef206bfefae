use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tsq_common::Result;

use crate::expr::{Expr, VarRef};
use crate::point::Point;

/// Smallest representable point timestamp, in epoch nanoseconds.
///
/// The two lowest values are reserved so strict lower bounds can shift by
/// one nanosecond without wrapping.
pub const MIN_TIME: i64 = i64::MIN + 2;

/// Largest representable point timestamp, in epoch nanoseconds.
pub const MAX_TIME: i64 = i64::MAX - 1;

/// A lazy, finite, forward-only sequence of points.
///
/// Iterators are closable; closing is idempotent and releases any
/// resources held by the source. Dropping without closing is allowed but
/// skips orderly shutdown of shared sources.
pub trait PointIterator: Send {
    /// Produce the next point, or `None` at end of stream.
    fn next(&mut self) -> Result<Option<Point>>;

    /// Release underlying resources.
    fn close(&mut self) {}
}

/// The standard "iterator you can put on an edge".
pub type BoxedIterator = Box<dyn PointIterator>;

/// A `GROUP BY time(duration, offset)` window, in nanoseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    /// Window width.
    pub duration: i64,
    /// Window phase offset.
    pub offset: i64,
}

impl Interval {
    /// Returns true when no time grouping was requested.
    pub fn is_zero(&self) -> bool {
        self.duration == 0
    }
}

/// Options handed to the storage layer and the iterator runtime when
/// creating iterators. The time range is expressed as inclusive
/// nanosecond bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IteratorOptions {
    /// Expression the iterator evaluates (a variable reference for leaf
    /// creation, a call for the aggregate runtime).
    pub expr: Option<Expr>,
    /// Auxiliary fields attached to every point.
    pub aux: Vec<VarRef>,
    /// Dimensions the output is grouped on.
    pub dimensions: Vec<String>,
    /// Tags retained on output points without grouping.
    pub group_by: BTreeSet<String>,
    /// Inclusive lower time bound.
    pub start_time: i64,
    /// Inclusive upper time bound.
    pub end_time: i64,
    /// Ascending time order.
    pub ascending: bool,
    /// Aggregate window.
    pub interval: Interval,
    /// Per-series point limit (0 = unlimited).
    pub limit: usize,
    /// Per-series point offset.
    pub offset: usize,
}

impl Default for IteratorOptions {
    fn default() -> Self {
        Self {
            expr: None,
            aux: Vec::new(),
            dimensions: Vec::new(),
            group_by: BTreeSet::new(),
            start_time: MIN_TIME,
            end_time: MAX_TIME,
            ascending: true,
            interval: Interval::default(),
            limit: 0,
            offset: 0,
        }
    }
}

impl IteratorOptions {
    /// Bucket start for a timestamp under this interval, or the start of
    /// the full range when no interval is set.
    pub fn window_start(&self, time: i64) -> i64 {
        if self.interval.is_zero() {
            return self.start_time;
        }
        let shifted = time - self.interval.offset;
        let base = shifted.div_euclid(self.interval.duration) * self.interval.duration;
        base + self.interval.offset
    }
}
