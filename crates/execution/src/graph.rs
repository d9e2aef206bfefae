//! Arena-backed edges for the plan graph.
//!
//! Nodes hold integer handles rather than pointers, so structural
//! rewrites (edge insertion) are pure index manipulation. Each edge
//! carries exactly one iterator behind a write-once latch.

use std::sync::RwLock;

use tsq_ql::BoxedIterator;

/// Handle of a node in the plan arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Index into the plan's node arena.
    pub fn index(self) -> usize {
        self.0
    }
}

/// Handle of an edge in the plan arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EdgeId(pub(crate) usize);

impl EdgeId {
    /// Index into the plan's edge arena.
    pub fn index(self) -> usize {
        self.0
    }
}

/// One edge: a producer/consumer pair and the latched iterator slot.
///
/// `None` in a ready slot is the dry-run sentinel ("nil iterator"): the
/// edge fired but carries no stream.
pub(crate) struct EdgeSlot {
    pub(crate) producer: Option<NodeId>,
    pub(crate) consumer: Option<NodeId>,
    latch: RwLock<Latch>,
}

struct Latch {
    ready: bool,
    taken: bool,
    iterator: Option<BoxedIterator>,
}

impl EdgeSlot {
    pub(crate) fn new() -> Self {
        Self {
            producer: None,
            consumer: None,
            latch: RwLock::new(Latch {
                ready: false,
                taken: false,
                iterator: None,
            }),
        }
    }

    /// Latch the edge ready with `iterator`. Setting a ready edge again
    /// is a programmer error and aborts.
    pub(crate) fn set_iterator(&self, iterator: Option<BoxedIterator>) {
        let mut latch = self.latch.write().expect("edge latch poisoned");
        if latch.ready {
            panic!("unable to set an iterator on the same edge twice");
        }
        latch.iterator = iterator;
        latch.ready = true;
    }

    /// Observe readiness without blocking on the iterator.
    pub(crate) fn ready(&self) -> bool {
        self.latch.read().expect("edge latch poisoned").ready
    }

    /// Consume the latched iterator. Reading before the edge is ready, or
    /// reading twice, is a programmer error and aborts.
    pub(crate) fn take_iterator(&self) -> Option<BoxedIterator> {
        let mut latch = self.latch.write().expect("edge latch poisoned");
        if !latch.ready {
            panic!("attempted to retrieve an iterator from an edge before it was ready");
        }
        if latch.taken {
            panic!("attempted to retrieve an iterator from an edge twice");
        }
        latch.taken = true;
        latch.iterator.take()
    }

    /// Remove the iterator if one is latched and unconsumed (abort
    /// cleanup path). Never panics.
    pub(crate) fn take_if_set(&self) -> Option<BoxedIterator> {
        let mut latch = self.latch.write().expect("edge latch poisoned");
        if latch.ready && !latch.taken {
            latch.taken = true;
            latch.iterator.take()
        } else {
            None
        }
    }
}
