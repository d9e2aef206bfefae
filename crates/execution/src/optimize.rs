//! Node-local rewrites applied after plan construction and before
//! execution. Each optimizable node receives exactly one pass.

use tracing::debug;

use crate::graph::NodeId;
use crate::node::{FunctionCall, Node};
use crate::plan::Plan;

/// Aggregates whose partials can run on each merge input and recombine
/// afterwards. `count` partials emit counts, so the downstream call is
/// rewritten to `sum`.
fn partial_aggregate(name: &str) -> bool {
    matches!(
        name,
        "min" | "max" | "sum" | "first" | "last" | "mean" | "count"
    )
}

/// Run the single optimization pass over every node in the plan.
pub(crate) fn optimize(plan: &mut Plan) {
    for i in 0..plan.node_count() {
        let id = NodeId(i);
        if matches!(plan.node(id), Node::Merge(m) if !m.optimized) {
            push_down_partials(plan, id);
        }
    }
}

/// Partial-aggregation pushdown: when a merge feeds a partialable
/// aggregate, run the aggregate on every merge input and recombine the
/// partials downstream.
fn push_down_partials(plan: &mut Plan, merge_id: NodeId) {
    let Node::Merge(merge) = plan.node(merge_id) else {
        return;
    };
    let output = merge.output;
    let inputs = merge.inputs.clone();

    let Some(downstream_id) = plan.consumer(output) else {
        return;
    };
    let Node::FunctionCall(downstream) = plan.node(downstream_id) else {
        return;
    };
    if !partial_aggregate(&downstream.name) {
        return;
    }

    let template = FunctionCall {
        name: downstream.name.clone(),
        dimensions: downstream.dimensions.clone(),
        tags: downstream.tags.clone(),
        interval: downstream.interval,
        start_time: downstream.start_time,
        end_time: downstream.end_time,
        input: output,
        output,
    };
    debug!(
        aggregate = %template.name,
        inputs = inputs.len(),
        "pushing partial aggregation through merge"
    );

    for edge in inputs {
        let call_id = plan.add_node(Node::FunctionCall(FunctionCall {
            name: template.name.clone(),
            dimensions: template.dimensions.clone(),
            tags: template.tags.clone(),
            interval: template.interval,
            start_time: template.start_time,
            end_time: template.end_time,
            input: edge,
            output: edge,
        }));
        // Split the merge input so the partial call sits on it; the
        // merge's own input handle is rewritten by the insertion.
        let call_output = plan.insert(edge, call_id);
        if let Node::FunctionCall(call) = plan.node_mut(call_id) {
            call.input = edge;
            call.output = call_output;
        }
    }

    // Partial counts recombine by summation.
    if let Node::FunctionCall(downstream) = plan.node_mut(downstream_id) {
        if downstream.name == "count" {
            downstream.name = "sum".to_string();
        }
    }
    if let Node::Merge(merge) = plan.node_mut(merge_id) {
        merge.optimized = true;
    }
}
