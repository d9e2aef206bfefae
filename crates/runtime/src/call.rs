use std::cmp::Ordering;
use std::collections::BTreeMap;

use tsq_common::{QueryError, Result};
use tsq_ql::{BoxedIterator, FieldValue, IteratorOptions, Point, PointIterator, Tags};

/// Windowed aggregation over one input stream.
///
/// Points are grouped by measurement, dimension-projected tags, and time
/// window; one output point per group carries the reduced value, the
/// window start as its timestamp, and the number of consumed points in
/// `aggregated`. Output is ordered by `(name, tag identity, window)`.
pub struct CallIterator {
    input: Option<BoxedIterator>,
    name: String,
    opt: IteratorOptions,
    out: std::vec::IntoIter<Point>,
}

impl CallIterator {
    /// Wrap `input` with the reducer named by `name` (`min`, `max`, `sum`,
    /// `count`, `first`, `last`, `mean`).
    pub fn new(input: BoxedIterator, name: &str, opt: IteratorOptions) -> Result<Self> {
        match name {
            "min" | "max" | "sum" | "count" | "first" | "last" | "mean" => Ok(Self {
                input: Some(input),
                name: name.to_string(),
                opt,
                out: Vec::new().into_iter(),
            }),
            other => Err(QueryError::Execution(format!(
                "unsupported aggregate in call iterator: {other}"
            ))),
        }
    }

    fn reduce(&mut self) -> Result<()> {
        let mut input = self.input.take().expect("call iterator reduced twice");
        let mut groups: BTreeMap<(String, Tags, i64), AggState> = BTreeMap::new();

        loop {
            let point = match input.next() {
                Ok(Some(p)) => p,
                Ok(None) => break,
                Err(e) => {
                    input.close();
                    return Err(e);
                }
            };
            if point.time < self.opt.start_time || point.time > self.opt.end_time {
                continue;
            }
            let tags = point.tags.subset(&self.opt.dimensions);
            let window = self.opt.window_start(point.time);
            let state = groups
                .entry((point.name.clone(), tags, window))
                .or_insert_with(AggState::new);
            state.update(&self.name, &point)?;
        }
        input.close();

        let mut out = Vec::with_capacity(groups.len());
        for ((name, tags, window), state) in groups {
            out.push(state.finish(&self.name, name, tags, window)?);
        }
        self.out = out.into_iter();
        Ok(())
    }
}

impl PointIterator for CallIterator {
    fn next(&mut self) -> Result<Option<Point>> {
        if self.input.is_some() {
            self.reduce()?;
        }
        Ok(self.out.next())
    }

    fn close(&mut self) {
        if let Some(input) = &mut self.input {
            input.close();
        }
    }
}

/// Running state for one group.
struct AggState {
    weight: u64,
    chosen: Option<Point>,
    sum_f: f64,
    sum_i: i64,
    all_integer: bool,
    mean_num: f64,
}

impl AggState {
    fn new() -> Self {
        Self {
            weight: 0,
            chosen: None,
            sum_f: 0.0,
            sum_i: 0,
            all_integer: true,
            mean_num: 0.0,
        }
    }

    fn update(&mut self, func: &str, point: &Point) -> Result<()> {
        // A pre-aggregated input point stands for several source points.
        let w = point.aggregated.max(1);
        self.weight += w;

        match func {
            "count" => {}
            "sum" | "mean" => {
                let v = numeric(func, &point.value)?;
                self.mean_num += v * w as f64;
                self.sum_f += v;
                match point.value {
                    FieldValue::Integer(i) => self.sum_i += i,
                    _ => self.all_integer = false,
                }
            }
            "min" | "max" => {
                let replace = match &self.chosen {
                    None => true,
                    Some(current) => {
                        let ord = compare(func, &point.value, &current.value)?;
                        if func == "min" {
                            ord == Ordering::Less
                        } else {
                            ord == Ordering::Greater
                        }
                    }
                };
                if replace {
                    self.chosen = Some(point.clone());
                }
            }
            "first" | "last" => {
                let replace = match &self.chosen {
                    None => true,
                    Some(current) => {
                        if func == "first" {
                            point.time < current.time
                        } else {
                            point.time >= current.time
                        }
                    }
                };
                if replace {
                    self.chosen = Some(point.clone());
                }
            }
            _ => unreachable!("validated in CallIterator::new"),
        }
        Ok(())
    }

    fn finish(self, func: &str, name: String, tags: Tags, window: i64) -> Result<Point> {
        let value = match func {
            "count" => FieldValue::Integer(self.weight as i64),
            "sum" => {
                if self.all_integer {
                    FieldValue::Integer(self.sum_i)
                } else {
                    FieldValue::Float(self.sum_f)
                }
            }
            "mean" => FieldValue::Float(self.mean_num / self.weight as f64),
            "min" | "max" | "first" | "last" => {
                self.chosen.map(|p| p.value).unwrap_or(FieldValue::Null)
            }
            _ => unreachable!("validated in CallIterator::new"),
        };
        Ok(Point {
            name,
            tags,
            time: window,
            value,
            aux: Vec::new(),
            aggregated: self.weight,
        })
    }
}

fn numeric(func: &str, value: &FieldValue) -> Result<f64> {
    value.as_f64().ok_or_else(|| {
        QueryError::Execution(format!("unsupported value type for {func}(): {value}"))
    })
}

fn compare(func: &str, a: &FieldValue, b: &FieldValue) -> Result<Ordering> {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x
            .partial_cmp(&y)
            .ok_or_else(|| QueryError::Execution(format!("incomparable values in {func}()"))),
        _ => match (a, b) {
            (FieldValue::Str(x), FieldValue::Str(y)) => Ok(x.cmp(y)),
            (FieldValue::Boolean(x), FieldValue::Boolean(y)) => Ok(x.cmp(y)),
            _ => Err(QueryError::Execution(format!(
                "unsupported value type for {func}(): {a}"
            ))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::CallIterator;
    use tsq_ql::{FieldValue, Interval, IteratorOptions, Point, PointIterator, Tags};

    use crate::source::SliceIterator;

    fn opts(dims: &[&str], duration: i64, start: i64, end: i64) -> IteratorOptions {
        IteratorOptions {
            dimensions: dims.iter().map(|s| s.to_string()).collect(),
            interval: Interval {
                duration,
                offset: 0,
            },
            start_time: start,
            end_time: end,
            ..Default::default()
        }
    }

    const SECOND: i64 = 1_000_000_000;

    #[test]
    fn min_groups_by_dimension_and_window() {
        let input = SliceIterator::new(vec![
            Point::float("cpu", Tags::parse("region=west,host=A"), 0, 20.0),
            Point::float("cpu", Tags::parse("region=west,host=A"), 11 * SECOND, 3.0),
            Point::float("cpu", Tags::parse("region=east,host=A"), 9 * SECOND, 19.0),
            Point::float("cpu", Tags::parse("region=west,host=B"), 5 * SECOND, 10.0),
        ]);
        let mut itr = CallIterator::new(
            Box::new(input),
            "min",
            opts(&["host"], 10 * SECOND, 0, 86_400 * SECOND),
        )
        .unwrap();

        let mut got = Vec::new();
        while let Some(p) = itr.next().unwrap() {
            got.push((p.tags.id(), p.time / SECOND, p.value, p.aggregated));
        }
        assert_eq!(
            got,
            vec![
                ("host=A".to_string(), 0, FieldValue::Float(19.0), 2),
                ("host=A".to_string(), 10, FieldValue::Float(3.0), 1),
                ("host=B".to_string(), 0, FieldValue::Float(10.0), 1),
            ]
        );
    }

    #[test]
    fn mean_weights_preaggregated_inputs() {
        let mut lhs = Point::float("cpu", Tags::new(), 0, 10.0);
        lhs.aggregated = 3;
        let mut rhs = Point::float("cpu", Tags::new(), 1, 20.0);
        rhs.aggregated = 1;

        let mut itr = CallIterator::new(
            Box::new(SliceIterator::new(vec![lhs, rhs])),
            "mean",
            opts(&[], 0, 0, 100),
        )
        .unwrap();
        let p = itr.next().unwrap().unwrap();
        assert_eq!(p.value, FieldValue::Float(12.5));
        assert_eq!(p.aggregated, 4);
        assert!(itr.next().unwrap().is_none());
    }

    #[test]
    fn count_emits_integers() {
        let input = SliceIterator::new(vec![
            Point::float("cpu", Tags::new(), 0, 1.0),
            Point::float("cpu", Tags::new(), 1, 2.0),
        ]);
        let mut itr =
            CallIterator::new(Box::new(input), "count", opts(&[], 0, 0, 100)).unwrap();
        assert_eq!(
            itr.next().unwrap().unwrap().value,
            FieldValue::Integer(2)
        );
    }
}
