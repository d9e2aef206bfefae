use std::collections::HashMap;

use tsq_common::{QueryError, Result};
use tsq_ql::{BinaryOp, BoxedIterator, FieldValue, Point, PointIterator};

/// Arithmetic between two point streams.
///
/// The right side is materialized into a `(name, tags, time)` map; the
/// left side streams through and joins against it. Points without a
/// partner on the other side are dropped.
pub struct BinaryTransformIterator {
    lhs: BoxedIterator,
    rhs: Option<BoxedIterator>,
    op: BinaryOp,
    right: HashMap<(String, String, i64), FieldValue>,
}

impl BinaryTransformIterator {
    /// Combine `lhs` and `rhs` under the arithmetic operator `op`.
    pub fn new(lhs: BoxedIterator, rhs: BoxedIterator, op: BinaryOp) -> Result<Self> {
        if !op.is_arithmetic() {
            return Err(QueryError::Execution(format!(
                "unsupported operator in binary expression: {op}"
            )));
        }
        Ok(Self {
            lhs,
            rhs: Some(rhs),
            op,
            right: HashMap::new(),
        })
    }

    fn materialize_rhs(&mut self) -> Result<()> {
        let mut rhs = self.rhs.take().expect("rhs materialized twice");
        loop {
            match rhs.next() {
                Ok(Some(p)) => {
                    self.right
                        .insert((p.name.clone(), p.tags.id(), p.time), p.value);
                }
                Ok(None) => break,
                Err(e) => {
                    rhs.close();
                    return Err(e);
                }
            }
        }
        rhs.close();
        Ok(())
    }

    fn apply(&self, l: &FieldValue, r: &FieldValue) -> Result<FieldValue> {
        if let (FieldValue::Integer(a), FieldValue::Integer(b)) = (l, r) {
            if self.op != BinaryOp::Div {
                let v = match self.op {
                    BinaryOp::Add => a.wrapping_add(*b),
                    BinaryOp::Sub => a.wrapping_sub(*b),
                    BinaryOp::Mul => a.wrapping_mul(*b),
                    BinaryOp::Mod => {
                        if *b == 0 {
                            0
                        } else {
                            a % b
                        }
                    }
                    _ => unreachable!("validated in new"),
                };
                return Ok(FieldValue::Integer(v));
            }
        }

        let (Some(a), Some(b)) = (l.as_f64(), r.as_f64()) else {
            return Err(QueryError::Execution(format!(
                "unsupported operand types in binary expression: {l} {} {r}",
                self.op
            )));
        };
        let v = match self.op {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => {
                if b == 0.0 {
                    0.0
                } else {
                    a / b
                }
            }
            BinaryOp::Mod => {
                if b == 0.0 {
                    0.0
                } else {
                    a % b
                }
            }
            _ => unreachable!("validated in new"),
        };
        Ok(FieldValue::Float(v))
    }
}

impl PointIterator for BinaryTransformIterator {
    fn next(&mut self) -> Result<Option<Point>> {
        if self.rhs.is_some() {
            self.materialize_rhs()?;
        }
        loop {
            let Some(mut point) = self.lhs.next()? else {
                return Ok(None);
            };
            let key = (point.name.clone(), point.tags.id(), point.time);
            let Some(partner) = self.right.get(&key) else {
                continue;
            };
            point.value = self.apply(&point.value, partner)?;
            point.aggregated = 0;
            return Ok(Some(point));
        }
    }

    fn close(&mut self) {
        self.lhs.close();
        if let Some(rhs) = &mut self.rhs {
            rhs.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::BinaryTransformIterator;
    use tsq_ql::{BinaryOp, FieldValue, Point, PointIterator, Tags};

    use crate::source::SliceIterator;

    #[test]
    fn joins_on_series_and_time() {
        let lhs = SliceIterator::new(vec![
            Point::float("cpu", Tags::new(), 0, 10.0),
            Point::float("cpu", Tags::new(), 10, 30.0),
            Point::float("cpu", Tags::new(), 20, 50.0),
        ]);
        let rhs = SliceIterator::new(vec![
            Point::float("cpu", Tags::new(), 0, 2.0),
            Point::float("cpu", Tags::new(), 10, 3.0),
        ]);
        let mut itr =
            BinaryTransformIterator::new(Box::new(lhs), Box::new(rhs), BinaryOp::Div).unwrap();

        assert_eq!(itr.next().unwrap().unwrap().value, FieldValue::Float(5.0));
        assert_eq!(itr.next().unwrap().unwrap().value, FieldValue::Float(10.0));
        // t=20 has no partner on the right side.
        assert!(itr.next().unwrap().is_none());
    }

    #[test]
    fn integer_arithmetic_stays_integer_except_div() {
        let lhs = SliceIterator::new(vec![Point::integer("m", Tags::new(), 0, 7)]);
        let rhs = SliceIterator::new(vec![Point::integer("m", Tags::new(), 0, 2)]);
        let mut itr =
            BinaryTransformIterator::new(Box::new(lhs), Box::new(rhs), BinaryOp::Sub).unwrap();
        assert_eq!(itr.next().unwrap().unwrap().value, FieldValue::Integer(5));

        let lhs = SliceIterator::new(vec![Point::integer("m", Tags::new(), 0, 7)]);
        let rhs = SliceIterator::new(vec![Point::integer("m", Tags::new(), 0, 2)]);
        let mut itr =
            BinaryTransformIterator::new(Box::new(lhs), Box::new(rhs), BinaryOp::Div).unwrap();
        assert_eq!(itr.next().unwrap().unwrap().value, FieldValue::Float(3.5));
    }
}
