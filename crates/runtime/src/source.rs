use tsq_common::Result;
use tsq_ql::{BoxedIterator, Point, PointIterator};

/// An iterator over an in-memory point slice, optionally bounded by an
/// inclusive time range.
pub struct SliceIterator {
    points: std::vec::IntoIter<Point>,
}

impl SliceIterator {
    /// Iterate all points in order.
    pub fn new(points: Vec<Point>) -> Self {
        Self {
            points: points.into_iter(),
        }
    }

    /// Iterate points inside `[start, end]`, preserving order.
    pub fn bounded(points: Vec<Point>, start: i64, end: i64) -> Self {
        Self::new(
            points
                .into_iter()
                .filter(|p| p.time >= start && p.time <= end)
                .collect(),
        )
    }
}

impl PointIterator for SliceIterator {
    fn next(&mut self) -> Result<Option<Point>> {
        Ok(self.points.next())
    }
}

/// An iterator that is immediately exhausted.
pub fn empty() -> BoxedIterator {
    Box::new(SliceIterator::new(Vec::new()))
}
