//! Plan graph unit behavior: edge latching, insertion, dry runs, and
//! executor invariants.

mod support;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use support::{read_all, MockMeasurement, MockMeta, MockShardGroup, MockStore};
use tsq_execution::node::{FunctionCall, Merge, Node};
use tsq_execution::{Linker, Plan};
use tsq_planner::{compile, CompileOptions};
use tsq_ql::{DataType, Expr, Field, Interval, Measurement, SelectStatement, Source};
use tsq_runtime::SliceIterator;

fn now() -> DateTime<Utc> {
    "2000-01-01T00:00:00Z".parse().unwrap()
}

fn merge_only_plan() -> (Plan, tsq_execution::EdgeId) {
    let mut plan = Plan::new();
    let out = plan.new_edge();
    let id = plan.add_node(Node::Merge(Merge {
        inputs: vec![],
        output: out,
        optimized: false,
    }));
    plan.wire(out, id);
    (plan, out)
}

#[test]
#[should_panic(expected = "unable to set an iterator on the same edge twice")]
fn double_set_aborts() {
    let (plan, edge) = merge_only_plan();
    plan.set_iterator(edge, Some(Box::new(SliceIterator::new(vec![]))));
    plan.set_iterator(edge, None);
}

#[test]
#[should_panic(expected = "before it was ready")]
fn take_before_ready_aborts() {
    let (plan, edge) = merge_only_plan();
    let _ = plan.take_iterator(edge);
}

#[test]
fn readiness_is_observable_without_consuming() {
    let (plan, edge) = merge_only_plan();
    assert!(!plan.edge_ready(edge));
    plan.set_iterator(edge, None);
    assert!(plan.edge_ready(edge));
    assert!(plan.take_iterator(edge).is_none());
}

#[test]
fn insert_splits_an_edge_in_place() {
    let mut plan = Plan::new();
    // merge -> function call, then insert a second call on the edge.
    let merge_out = plan.new_edge();
    let merge_id = plan.add_node(Node::Merge(Merge {
        inputs: vec![],
        output: merge_out,
        optimized: false,
    }));
    plan.wire(merge_out, merge_id);

    let call_out = plan.new_edge();
    let call_id = plan.add_node(Node::FunctionCall(FunctionCall {
        name: "sum".to_string(),
        dimensions: vec![],
        tags: Default::default(),
        interval: Interval::default(),
        start_time: 0,
        end_time: 100,
        input: merge_out,
        output: call_out,
    }));
    plan.connect(merge_out, call_id);
    plan.wire(call_out, call_id);

    // Interpose a partial call on the merge output.
    let partial_id = plan.add_node(Node::FunctionCall(FunctionCall {
        name: "sum".to_string(),
        dimensions: vec![],
        tags: Default::default(),
        interval: Interval::default(),
        start_time: 0,
        end_time: 100,
        input: merge_out,
        output: merge_out,
    }));
    let inserted_out = plan.insert(merge_out, partial_id);
    if let Node::FunctionCall(partial) = plan.node_mut(partial_id) {
        partial.output = inserted_out;
    }

    // The old producer/consumer pair is preserved around the insertion:
    // the merge still writes `merge_out`, the downstream call now reads
    // from the inserted node's output.
    assert_eq!(plan.consumer(merge_out), Some(partial_id));
    assert_eq!(plan.consumer(inserted_out), Some(call_id));
    match plan.node(call_id) {
        Node::FunctionCall(c) => assert_eq!(c.input, inserted_out),
        _ => unreachable!(),
    }
}

#[test]
fn append_completes_a_dangling_edge() {
    let (mut plan, merge_out) = merge_only_plan();
    let call_id = plan.add_node(Node::FunctionCall(FunctionCall {
        name: "sum".to_string(),
        dimensions: vec![],
        tags: Default::default(),
        interval: Interval::default(),
        start_time: 0,
        end_time: 100,
        input: merge_out,
        output: merge_out,
    }));
    let call_out = plan.append(merge_out, call_id);
    if let Node::FunctionCall(call) = plan.node_mut(call_id) {
        call.output = call_out;
    }
    assert_eq!(plan.consumer(merge_out), Some(call_id));
    assert_eq!(plan.consumer(call_out), None);
}

#[test]
fn dry_run_validates_placeholder_plans() {
    let stmt = SelectStatement {
        fields: vec![Field::new(Expr::call("median", vec![Expr::var("value")]))],
        sources: vec![Source::Measurement(Measurement::named("cpu"))],
        ..Default::default()
    };
    let compiled = compile(&stmt, CompileOptions::at(now())).unwrap();
    let linker = Linker::from_catalog(
        Arc::new(MockMeta),
        Arc::new(MockStore {
            group: Arc::new(MockShardGroup::new(vec![(
                "cpu",
                MockMeasurement::with_fields(&[("value", DataType::Float)]),
            )])),
        }),
    );

    let mut linked = linker.link(&compiled).expect("link");
    linked.plan.set_dry_run(true);
    linked.plan.execute().expect("dry run");
    let iterators = linked.plan.sink_iterators(linked.sinks[0]);
    assert!(iterators.into_iter().all(|i| i.is_none()));

    // The same plan refuses to execute for real.
    let mut linked = linker.link(&compiled).expect("link");
    let err = linked.plan.execute().unwrap_err();
    assert_eq!(err.to_string(), "execution error: unimplemented");
}

#[test]
fn executor_detects_missing_progress() {
    let mut plan = Plan::new();
    // A call whose input edge has no producer can never become ready.
    let dangling = plan.new_edge();
    let out = plan.new_edge();
    let id = plan.add_node(Node::FunctionCall(FunctionCall {
        name: "sum".to_string(),
        dimensions: vec![],
        tags: Default::default(),
        interval: Interval::default(),
        start_time: 0,
        end_time: 100,
        input: dangling,
        output: out,
    }));
    plan.connect(dangling, id);
    plan.wire(out, id);

    let err = plan.execute().unwrap_err();
    assert!(
        err.to_string().contains("no executable node found"),
        "unexpected error: {err}"
    );
}

#[test]
fn merge_with_no_inputs_yields_the_nil_sentinel() {
    let (mut plan, edge) = merge_only_plan();
    plan.execute().expect("execute");
    assert!(read_all(plan.take_iterator(edge)).unwrap().is_empty());
}
