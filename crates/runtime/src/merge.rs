use tsq_common::Result;
use tsq_ql::{BoxedIterator, Point, PointIterator};

/// K-way merge of sorted point streams.
///
/// Inputs must each be ordered by `(name, tag identity, time)`; the merge
/// picks the smallest head on every pull, so disorder between inputs is
/// tolerated but disorder within one input is not repaired.
pub struct SortedMergeIterator {
    inputs: Vec<BoxedIterator>,
    heads: Vec<Option<Point>>,
    primed: bool,
    ascending: bool,
}

impl SortedMergeIterator {
    /// Merge `inputs` in ascending or descending point order.
    pub fn new(inputs: Vec<BoxedIterator>, ascending: bool) -> Self {
        let heads = inputs.iter().map(|_| None).collect();
        Self {
            inputs,
            heads,
            primed: false,
            ascending,
        }
    }

    fn prime(&mut self) -> Result<()> {
        for (input, head) in self.inputs.iter_mut().zip(self.heads.iter_mut()) {
            *head = input.next()?;
        }
        self.primed = true;
        Ok(())
    }

    fn key(p: &Point) -> (String, String, i64) {
        (p.name.clone(), p.tags.id(), p.time)
    }
}

impl PointIterator for SortedMergeIterator {
    fn next(&mut self) -> Result<Option<Point>> {
        if !self.primed {
            self.prime()?;
        }

        let mut best: Option<usize> = None;
        for (i, head) in self.heads.iter().enumerate() {
            let Some(candidate) = head else { continue };
            match best {
                None => best = Some(i),
                Some(j) => {
                    let current = self.heads[j].as_ref().expect("best head present");
                    let ahead = if self.ascending {
                        Self::key(candidate) < Self::key(current)
                    } else {
                        Self::key(candidate) > Self::key(current)
                    };
                    if ahead {
                        best = Some(i);
                    }
                }
            }
        }

        let Some(i) = best else { return Ok(None) };
        let out = self.heads[i].take();
        self.heads[i] = self.inputs[i].next()?;
        Ok(out)
    }

    fn close(&mut self) {
        for input in &mut self.inputs {
            input.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::SortedMergeIterator;
    use tsq_common::Result;
    use tsq_ql::{Point, PointIterator, Tags};

    use crate::source::SliceIterator;

    fn drain(mut it: impl PointIterator) -> Result<Vec<Point>> {
        let mut out = Vec::new();
        while let Some(p) = it.next()? {
            out.push(p);
        }
        Ok(out)
    }

    #[test]
    fn merges_by_series_then_time() {
        let a = Tags::parse("host=A");
        let b = Tags::parse("host=B");
        let lhs = SliceIterator::new(vec![
            Point::float("cpu", a.clone(), 0, 1.0),
            Point::float("cpu", a.clone(), 20, 3.0),
        ]);
        let rhs = SliceIterator::new(vec![
            Point::float("cpu", a.clone(), 10, 2.0),
            Point::float("cpu", b.clone(), 0, 4.0),
        ]);

        let merged = SortedMergeIterator::new(vec![Box::new(lhs), Box::new(rhs)], true);
        let times: Vec<(String, i64)> = drain(merged)
            .unwrap()
            .into_iter()
            .map(|p| (p.tags.id(), p.time))
            .collect();
        assert_eq!(
            times,
            vec![
                ("host=A".to_string(), 0),
                ("host=A".to_string(), 10),
                ("host=A".to_string(), 20),
                ("host=B".to_string(), 0),
            ]
        );
    }
}
