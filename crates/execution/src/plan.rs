//! The plan container and its wave executor.

use tracing::{debug, trace, warn};
use tsq_common::{QueryError, Result};
use tsq_ql::BoxedIterator;

use crate::graph::{EdgeId, EdgeSlot, NodeId};
use crate::node::Node;

/// The executable dataflow graph: nodes and edges in index arenas, plus
/// the dry-run flag. Edges latch iterators behind interior mutability,
/// so executing a node needs only a shared borrow of the plan.
pub struct Plan {
    nodes: Vec<Node>,
    edges: Vec<EdgeSlot>,
    dry_run: bool,
}

impl Plan {
    /// An empty plan.
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
            dry_run: false,
        }
    }

    /// Switch every node to producing the nil-iterator sentinel instead of
    /// touching storage (plan-structure validation).
    pub fn set_dry_run(&mut self, dry_run: bool) {
        self.dry_run = dry_run;
    }

    /// Returns true in dry-run mode.
    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    /// Number of nodes in the plan.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Add a node to the arena.
    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    /// Shared access to a node.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    /// Exclusive access to a node (graph construction and optimization).
    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    /// Allocate an unwired edge slot.
    pub fn new_edge(&mut self) -> EdgeId {
        let id = EdgeId(self.edges.len());
        self.edges.push(EdgeSlot::new());
        id
    }

    /// Set the node producing onto `edge`.
    pub fn wire(&mut self, edge: EdgeId, producer: NodeId) {
        self.edges[edge.0].producer = Some(producer);
    }

    /// Set the node consuming `edge`.
    pub fn connect(&mut self, edge: EdgeId, consumer: NodeId) {
        self.edges[edge.0].consumer = Some(consumer);
    }

    /// Complete a dangling edge with its consumer and open a fresh
    /// dangling edge produced by that consumer.
    pub fn append(&mut self, edge: EdgeId, consumer: NodeId) -> EdgeId {
        self.connect(edge, consumer);
        let next = self.new_edge();
        self.wire(next, consumer);
        next
    }

    /// Split `edge` so `node` sits between its producer and its old
    /// consumer, and return the fresh edge from `node` to that consumer.
    ///
    /// The old consumer's input handle is rewritten in place; `node`'s own
    /// input/output fields are the caller's responsibility. No iterator
    /// may be in flight on `edge`.
    pub fn insert(&mut self, edge: EdgeId, node: NodeId) -> EdgeId {
        assert!(
            !self.edges[edge.0].ready(),
            "unable to insert a node into an edge that already carries an iterator"
        );
        let downstream = self.edges[edge.0].consumer;
        let new_edge = self.new_edge();
        self.edges[new_edge.0].producer = Some(node);
        self.edges[new_edge.0].consumer = downstream;
        self.edges[edge.0].consumer = Some(node);
        if let Some(consumer) = downstream {
            self.nodes[consumer.0].replace_input(edge, new_edge);
        }
        new_edge
    }

    /// The node consuming `edge`, when wired.
    pub fn consumer(&self, edge: EdgeId) -> Option<NodeId> {
        self.edges[edge.0].consumer
    }

    /// Latch `edge` ready with an iterator (or the nil sentinel).
    pub fn set_iterator(&self, edge: EdgeId, iterator: Option<BoxedIterator>) {
        self.edges[edge.0].set_iterator(iterator);
    }

    /// Observe edge readiness.
    pub fn edge_ready(&self, edge: EdgeId) -> bool {
        self.edges[edge.0].ready()
    }

    /// Consume the iterator latched on `edge`. Aborts when the edge is
    /// not ready or was already consumed.
    pub fn take_iterator(&self, edge: EdgeId) -> Option<BoxedIterator> {
        self.edges[edge.0].take_iterator()
    }

    /// Consume the ready iterators of a sink node, in input order.
    pub fn sink_iterators(&self, sink: NodeId) -> Vec<Option<BoxedIterator>> {
        self.nodes[sink.0]
            .inputs()
            .into_iter()
            .map(|edge| self.take_iterator(edge))
            .collect()
    }

    /// Give every optimizable node its single rewrite pass.
    pub fn optimize(&mut self) {
        crate::optimize::optimize(self);
    }

    /// Execute the plan in topological waves: repeatedly fire any node
    /// whose inputs are all ready until every node has finished.
    ///
    /// On a node error the plan closes every iterator already latched and
    /// returns the error unchanged. Running out of executable nodes while
    /// some are unfinished is an invariant violation the linker must
    /// never produce.
    pub fn execute(&mut self) -> Result<()> {
        let mut finished = vec![false; self.nodes.len()];
        loop {
            let Some(next) = self.find_work(&finished) else {
                break;
            };
            let node = &self.nodes[next.0];
            trace!(node = %node.description(), "executing plan node");
            if let Err(e) = node.execute(self) {
                warn!(node = %node.description(), error = %e, "plan execution aborted");
                self.close_all();
                return Err(e);
            }
            finished[next.0] = true;
        }

        let unfinished = finished.iter().filter(|f| !**f).count();
        if unfinished > 0 {
            self.close_all();
            return Err(QueryError::Execution(format!(
                "no executable node found with {unfinished} nodes unfinished"
            )));
        }
        debug!(nodes = self.nodes.len(), "plan executed");
        Ok(())
    }

    fn find_work(&self, finished: &[bool]) -> Option<NodeId> {
        self.nodes.iter().enumerate().find_map(|(i, node)| {
            if finished[i] {
                return None;
            }
            let ready = node.inputs().iter().all(|&edge| self.edge_ready(edge));
            ready.then_some(NodeId(i))
        })
    }

    /// Close every latched, unconsumed iterator (abort path).
    fn close_all(&self) {
        for edge in &self.edges {
            if let Some(mut itr) = edge.take_if_set() {
                itr.close();
            }
        }
    }

    /// Render the plan as one line per node with its input producers.
    pub fn explain(&self) -> String {
        let mut out = String::new();
        for (i, node) in self.nodes.iter().enumerate() {
            let inputs: Vec<String> = node
                .inputs()
                .iter()
                .filter_map(|&edge| self.edges[edge.0].producer)
                .map(|p| format!("{}", p.0))
                .collect();
            if inputs.is_empty() {
                out.push_str(&format!("[{i}] {}\n", node.description()));
            } else {
                out.push_str(&format!(
                    "[{i}] {} <- [{}]\n",
                    node.description(),
                    inputs.join(", ")
                ));
            }
        }
        out
    }
}

impl Default for Plan {
    fn default() -> Self {
        Self::new()
    }
}
