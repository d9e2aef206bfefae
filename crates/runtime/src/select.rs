use std::collections::{HashMap, HashSet};

use tsq_common::{QueryError, Result};
use tsq_ql::{BoxedIterator, IteratorOptions, Point, PointIterator};

/// Distinct-values filter.
///
/// Values dedupe per dimension-projected series over the full time range;
/// survivors keep first-occurrence order and are stamped with time zero.
pub struct DistinctIterator {
    input: Option<BoxedIterator>,
    opt: IteratorOptions,
    out: std::vec::IntoIter<Point>,
}

impl DistinctIterator {
    /// Wrap `input` with a distinct filter.
    pub fn new(input: BoxedIterator, opt: IteratorOptions) -> Self {
        Self {
            input: Some(input),
            opt,
            out: Vec::new().into_iter(),
        }
    }

    fn materialize(&mut self) -> Result<()> {
        let mut input = self.input.take().expect("distinct materialized twice");
        let mut seen: HashSet<String> = HashSet::new();
        let mut out = Vec::new();

        loop {
            let point = match input.next() {
                Ok(Some(p)) => p,
                Ok(None) => break,
                Err(e) => {
                    input.close();
                    return Err(e);
                }
            };
            let tags = point.tags.subset(&self.opt.dimensions);
            let key = format!("{}\u{0}{}\u{0}{:?}", point.name, tags.id(), point.value);
            if seen.insert(key) {
                out.push(Point {
                    name: point.name,
                    tags,
                    time: 0,
                    value: point.value,
                    aux: Vec::new(),
                    aggregated: 0,
                });
            }
        }
        input.close();
        self.out = out.into_iter();
        Ok(())
    }
}

impl PointIterator for DistinctIterator {
    fn next(&mut self) -> Result<Option<Point>> {
        if self.input.is_some() {
            self.materialize()?;
        }
        Ok(self.out.next())
    }

    fn close(&mut self) {
        if let Some(input) = &mut self.input {
            input.close();
        }
    }
}

/// `top`/`bottom` selector: keeps the `limit` extreme points per
/// dimension-projected series.
///
/// Output order is by extremity (descending values for `top`, ascending
/// for `bottom`), with earlier timestamps winning ties.
pub struct TopBottomIterator {
    input: Option<BoxedIterator>,
    opt: IteratorOptions,
    limit: usize,
    is_top: bool,
    out: std::vec::IntoIter<Point>,
}

impl TopBottomIterator {
    /// Select the `limit` largest points.
    pub fn top(input: BoxedIterator, opt: IteratorOptions, limit: usize) -> Self {
        Self::new(input, opt, limit, true)
    }

    /// Select the `limit` smallest points.
    pub fn bottom(input: BoxedIterator, opt: IteratorOptions, limit: usize) -> Self {
        Self::new(input, opt, limit, false)
    }

    fn new(input: BoxedIterator, opt: IteratorOptions, limit: usize, is_top: bool) -> Self {
        Self {
            input: Some(input),
            opt,
            limit,
            is_top,
            out: Vec::new().into_iter(),
        }
    }

    fn materialize(&mut self) -> Result<()> {
        let mut input = self.input.take().expect("selector materialized twice");
        let mut groups: HashMap<String, Vec<Point>> = HashMap::new();
        let mut order: Vec<String> = Vec::new();

        loop {
            let point = match input.next() {
                Ok(Some(p)) => p,
                Ok(None) => break,
                Err(e) => {
                    input.close();
                    return Err(e);
                }
            };
            if point.value.as_f64().is_none() {
                input.close();
                return Err(QueryError::Execution(format!(
                    "unsupported value type for selector: {}",
                    point.value
                )));
            }
            let key = format!("{}\u{0}{}", point.name, point.tags.subset(&self.opt.dimensions));
            if !groups.contains_key(&key) {
                order.push(key.clone());
            }
            groups.entry(key).or_default().push(point);
        }
        input.close();

        let mut out = Vec::new();
        for key in order {
            let mut points = groups.remove(&key).unwrap_or_default();
            points.sort_by(|a, b| {
                let va = a.value.as_f64().unwrap_or(f64::NAN);
                let vb = b.value.as_f64().unwrap_or(f64::NAN);
                let by_value = if self.is_top {
                    vb.partial_cmp(&va)
                } else {
                    va.partial_cmp(&vb)
                };
                by_value
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.time.cmp(&b.time))
            });
            points.truncate(self.limit);
            out.extend(points);
        }
        self.out = out.into_iter();
        Ok(())
    }
}

impl PointIterator for TopBottomIterator {
    fn next(&mut self) -> Result<Option<Point>> {
        if self.input.is_some() {
            self.materialize()?;
        }
        Ok(self.out.next())
    }

    fn close(&mut self) {
        if let Some(input) = &mut self.input {
            input.close();
        }
    }
}

/// Per-series limit and offset.
///
/// Each series (full tag identity) skips its first `offset` points and
/// then passes through at most `limit` more. A zero limit is unlimited.
pub struct LimitIterator {
    input: BoxedIterator,
    limit: usize,
    offset: usize,
    seen: HashMap<String, usize>,
}

impl LimitIterator {
    /// Wrap `input` with a limit/offset window per series.
    pub fn new(input: BoxedIterator, limit: usize, offset: usize) -> Self {
        Self {
            input,
            limit,
            offset,
            seen: HashMap::new(),
        }
    }
}

impl PointIterator for LimitIterator {
    fn next(&mut self) -> Result<Option<Point>> {
        loop {
            let Some(point) = self.input.next()? else {
                return Ok(None);
            };
            let key = format!("{}\u{0}{}", point.name, point.tags.id());
            let rank = self.seen.entry(key).or_insert(0);
            *rank += 1;
            let position = *rank;

            if position <= self.offset {
                continue;
            }
            if self.limit > 0 && position > self.offset + self.limit {
                continue;
            }
            return Ok(Some(point));
        }
    }

    fn close(&mut self) {
        self.input.close();
    }
}

#[cfg(test)]
mod tests {
    use super::{DistinctIterator, LimitIterator, TopBottomIterator};
    use tsq_common::Result;
    use tsq_ql::{FieldValue, IteratorOptions, Point, PointIterator, Tags};

    use crate::source::SliceIterator;

    fn drain(mut it: impl PointIterator) -> Result<Vec<Point>> {
        let mut out = Vec::new();
        while let Some(p) = it.next()? {
            out.push(p);
        }
        Ok(out)
    }

    #[test]
    fn distinct_dedupes_in_first_occurrence_order() {
        let input = SliceIterator::new(vec![
            Point::float("cpu", Tags::new(), 0, 2.0),
            Point::float("cpu", Tags::new(), 1, 1.0),
            Point::float("cpu", Tags::new(), 2, 2.0),
        ]);
        let got = drain(DistinctIterator::new(
            Box::new(input),
            IteratorOptions::default(),
        ))
        .unwrap();
        let values: Vec<FieldValue> = got.iter().map(|p| p.value.clone()).collect();
        assert_eq!(values, vec![FieldValue::Float(2.0), FieldValue::Float(1.0)]);
        assert!(got.iter().all(|p| p.time == 0));
    }

    #[test]
    fn top_keeps_largest_with_time_tiebreak() {
        let input = SliceIterator::new(vec![
            Point::float("cpu", Tags::new(), 0, 1.0),
            Point::float("cpu", Tags::new(), 10, 5.0),
            Point::float("cpu", Tags::new(), 20, 5.0),
            Point::float("cpu", Tags::new(), 30, 3.0),
        ]);
        let got = drain(TopBottomIterator::top(
            Box::new(input),
            IteratorOptions::default(),
            2,
        ))
        .unwrap();
        let picks: Vec<(i64, FieldValue)> = got.into_iter().map(|p| (p.time, p.value)).collect();
        assert_eq!(
            picks,
            vec![(10, FieldValue::Float(5.0)), (20, FieldValue::Float(5.0))]
        );
    }

    #[test]
    fn limit_applies_per_series() {
        let a = Tags::parse("host=A");
        let b = Tags::parse("host=B");
        let input = SliceIterator::new(vec![
            Point::float("cpu", a.clone(), 0, 1.0),
            Point::float("cpu", a.clone(), 1, 2.0),
            Point::float("cpu", a.clone(), 2, 3.0),
            Point::float("cpu", b.clone(), 0, 4.0),
            Point::float("cpu", b.clone(), 1, 5.0),
        ]);
        let got = drain(LimitIterator::new(Box::new(input), 1, 1)).unwrap();
        let picks: Vec<(String, i64)> = got.into_iter().map(|p| (p.tags.id(), p.time)).collect();
        assert_eq!(
            picks,
            vec![("host=A".to_string(), 1), ("host=B".to_string(), 1)]
        );
    }
}
