use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tsq_common::Result;
use tsq_ql::{BoxedIterator, FieldValue, Point, PointIterator};

/// Fans one source stream out to per-consumer auxiliary outputs, plus an
/// optional pass-through main output.
///
/// Each output is bound to a position in the source's auxiliary value
/// vector; two outputs may share a position and still consume
/// independently. Consumption is demand-driven: whichever output is
/// polled pulls the shared source, and produced points queue for every
/// other output, so outputs may drain in any order.
pub struct AuxSplitter {
    shared: Arc<Mutex<Shared>>,
    has_main: bool,
}

struct Shared {
    input: Option<BoxedIterator>,
    /// Auxiliary-vector position consumed by each output.
    slots: Vec<usize>,
    queues: Vec<VecDeque<Point>>,
    main: VecDeque<Point>,
    finished: bool,
}

impl AuxSplitter {
    /// Split `input` into one output per entry of `slots`; output `i`
    /// yields the auxiliary value at position `slots[i]` of every source
    /// point.
    pub fn new(input: BoxedIterator, slots: Vec<usize>) -> Self {
        let queues = slots.iter().map(|_| VecDeque::new()).collect();
        Self {
            shared: Arc::new(Mutex::new(Shared {
                input: Some(input),
                slots,
                queues,
                main: VecDeque::new(),
                finished: false,
            })),
            has_main: false,
        }
    }

    /// Enable the pass-through main output (used when a selector consumes
    /// the source alongside auxiliary fields).
    pub fn with_main(mut self) -> Self {
        self.has_main = true;
        self
    }

    /// The iterator for output `index`.
    pub fn output(&self, index: usize) -> BoxedIterator {
        Box::new(AuxOutput {
            shared: Arc::clone(&self.shared),
            index: Some(index),
            has_main: self.has_main,
        })
    }

    /// The pass-through main iterator. Only meaningful after
    /// [`Self::with_main`].
    pub fn main(&self) -> BoxedIterator {
        Box::new(AuxOutput {
            shared: Arc::clone(&self.shared),
            index: None,
            has_main: true,
        })
    }
}

struct AuxOutput {
    shared: Arc<Mutex<Shared>>,
    /// `None` reads the main queue.
    index: Option<usize>,
    has_main: bool,
}

impl Shared {
    /// Pull one point from the source and demultiplex it.
    fn pump(&mut self, has_main: bool) -> Result<bool> {
        let Some(input) = self.input.as_mut() else {
            return Ok(false);
        };
        let point = match input.next() {
            Ok(Some(p)) => p,
            Ok(None) => {
                if let Some(mut input) = self.input.take() {
                    input.close();
                }
                self.finished = true;
                return Ok(false);
            }
            Err(e) => {
                if let Some(mut input) = self.input.take() {
                    input.close();
                }
                self.finished = true;
                return Err(e);
            }
        };

        for (queue, &slot) in self.queues.iter_mut().zip(self.slots.iter()) {
            let value = point.aux.get(slot).cloned().unwrap_or(FieldValue::Null);
            queue.push_back(Point {
                name: point.name.clone(),
                tags: point.tags.clone(),
                time: point.time,
                value,
                aux: Vec::new(),
                aggregated: 0,
            });
        }
        if has_main {
            self.main.push_back(point);
        }
        Ok(true)
    }
}

impl PointIterator for AuxOutput {
    fn next(&mut self) -> Result<Option<Point>> {
        let mut shared = self.shared.lock().expect("aux splitter lock poisoned");
        loop {
            let queued = match self.index {
                Some(i) => shared.queues[i].pop_front(),
                None => shared.main.pop_front(),
            };
            if let Some(point) = queued {
                return Ok(Some(point));
            }
            if shared.finished {
                return Ok(None);
            }
            if !shared.pump(self.has_main)? {
                return Ok(None);
            }
        }
    }

    fn close(&mut self) {
        let mut shared = self.shared.lock().expect("aux splitter lock poisoned");
        match self.index {
            Some(i) => shared.queues[i].clear(),
            None => shared.main.clear(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::AuxSplitter;
    use tsq_ql::{FieldValue, Point, PointIterator, Tags};

    use crate::source::SliceIterator;

    #[test]
    fn outputs_drain_in_any_order() {
        let mut p1 = Point::float("cpu", Tags::new(), 0, 1.0);
        p1.aux = vec![FieldValue::Float(10.0), FieldValue::Str("A".to_string())];
        let mut p2 = Point::float("cpu", Tags::new(), 1, 2.0);
        p2.aux = vec![FieldValue::Float(20.0), FieldValue::Str("B".to_string())];

        let splitter = AuxSplitter::new(Box::new(SliceIterator::new(vec![p1, p2])), vec![0, 1]);
        let mut value = splitter.output(0);
        let mut host = splitter.output(1);

        assert_eq!(value.next().unwrap().unwrap().value, FieldValue::Float(10.0));
        assert_eq!(
            host.next().unwrap().unwrap().value,
            FieldValue::Str("A".to_string())
        );
        assert_eq!(value.next().unwrap().unwrap().value, FieldValue::Float(20.0));
        assert_eq!(
            host.next().unwrap().unwrap().value,
            FieldValue::Str("B".to_string())
        );
        assert!(value.next().unwrap().is_none());
        assert!(host.next().unwrap().is_none());
    }

    #[test]
    fn shared_slot_feeds_independent_outputs() {
        let mut p = Point::float("cpu", Tags::new(), 0, 1.0);
        p.aux = vec![FieldValue::Float(10.0)];

        let splitter = AuxSplitter::new(Box::new(SliceIterator::new(vec![p])), vec![0, 0]);
        let mut first = splitter.output(0);
        let mut second = splitter.output(1);
        assert_eq!(first.next().unwrap().unwrap().value, FieldValue::Float(10.0));
        assert_eq!(second.next().unwrap().unwrap().value, FieldValue::Float(10.0));
    }

    #[test]
    fn main_output_passes_source_points_through() {
        let mut p = Point::float("cpu", Tags::new(), 0, 1.0);
        p.aux = vec![FieldValue::Str("A".to_string())];

        let splitter =
            AuxSplitter::new(Box::new(SliceIterator::new(vec![p])), vec![0]).with_main();
        let mut main = splitter.main();
        let got = main.next().unwrap().unwrap();
        assert_eq!(got.value, FieldValue::Float(1.0));
        assert_eq!(got.aux.len(), 1);
    }
}
