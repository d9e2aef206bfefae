//! End-to-end: compile, link against the in-memory catalog, execute, and
//! read the sink iterators.

mod support;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use support::{read_all, row, MockMeasurement, MockMeta, MockShardGroup, MockStore, SECOND};
use tsq_execution::{Linked, Linker};
use tsq_planner::{compile, CompileOptions};
use tsq_ql::{
    BinaryOp, DataType, Dimension, Expr, Field, FieldValue, Fill, Measurement, SelectStatement,
    Source,
};

fn now() -> DateTime<Utc> {
    "2000-01-01T00:00:00Z".parse().unwrap()
}

fn select(fields: Vec<Field>, sources: Vec<&str>) -> SelectStatement {
    SelectStatement {
        fields,
        sources: sources
            .into_iter()
            .map(|s| Source::Measurement(Measurement::named(s)))
            .collect(),
        ..Default::default()
    }
}

fn link(stmt: &SelectStatement, group: MockShardGroup) -> Linked {
    support::init_tracing();
    let compiled = compile(stmt, CompileOptions::at(now())).expect("compile");
    let linker = Linker::from_catalog(
        Arc::new(MockMeta),
        Arc::new(MockStore {
            group: Arc::new(group),
        }),
    );
    linker.link(&compiled).expect("link")
}

fn time_range(min: &str, max: &str) -> Expr {
    Expr::binary(
        BinaryOp::And,
        Expr::binary(BinaryOp::GtEq, Expr::var("time"), Expr::string(min)),
        Expr::binary(BinaryOp::Lt, Expr::var("time"), Expr::string(max)),
    )
}

/// The metadata used by the column-name scenarios.
fn two_float_fields() -> MockShardGroup {
    MockShardGroup::new(vec![(
        "cpu",
        MockMeasurement::with_fields(&[
            ("field1", DataType::Float),
            ("field2", DataType::Float),
        ]),
    )])
}

#[test]
fn min_grouped_by_window_and_host() {
    let group = MockShardGroup::new(vec![(
        "cpu",
        MockMeasurement::with_fields(&[("value", DataType::Float)]).with_rows(vec![
            row("region=west,host=A", 0, "value", 20.0),
            row("region=west,host=A", 11 * SECOND, "value", 3.0),
            row("region=west,host=A", 31 * SECOND, "value", 100.0),
            row("region=east,host=A", 9 * SECOND, "value", 19.0),
            row("region=east,host=A", 10 * SECOND, "value", 2.0),
            row("region=west,host=B", 5 * SECOND, "value", 10.0),
        ]),
    )]);

    let mut stmt = select(
        vec![Field::new(Expr::call("min", vec![Expr::var("value")]))],
        vec!["cpu"],
    );
    stmt.condition = Some(time_range("1970-01-01T00:00:00Z", "1970-01-02T00:00:00Z"));
    stmt.dimensions = vec![
        Dimension::new(Expr::call("time", vec![Expr::duration(10 * SECOND)])),
        Dimension::new(Expr::var("host")),
    ];
    stmt.fill = Fill::None;

    let mut linked = link(&stmt, group);
    assert_eq!(linked.columns, vec!["time", "min"]);

    linked.plan.optimize();
    linked.plan.execute().expect("execute");

    let mut iterators = linked.plan.sink_iterators(linked.sinks[0]);
    let points = read_all(iterators.remove(0)).expect("read");
    let got: Vec<(String, i64, FieldValue, u64)> = points
        .into_iter()
        .map(|p| (p.tags.id(), p.time / SECOND, p.value, p.aggregated))
        .collect();
    assert_eq!(
        got,
        vec![
            ("host=A".to_string(), 0, FieldValue::Float(19.0), 2),
            ("host=A".to_string(), 10, FieldValue::Float(2.0), 2),
            ("host=A".to_string(), 30, FieldValue::Float(100.0), 1),
            ("host=B".to_string(), 0, FieldValue::Float(10.0), 1),
        ]
    );
}

#[test]
fn column_aliasing() {
    let stmt = select(
        vec![
            Field::new(Expr::var("field1")),
            Field::aliased(Expr::var("total"), "field1"),
            Field::new(Expr::var("field1")),
        ],
        vec!["cpu"],
    );
    let linked = link(&stmt, two_float_fields());
    assert_eq!(
        linked.columns,
        vec!["time", "field1_1", "field1", "field1_2"]
    );
}

#[test]
fn wildcard_aggregate_expansion() {
    let stmt = select(
        vec![Field::new(Expr::call("mean", vec![Expr::Wildcard]))],
        vec!["cpu"],
    );
    let linked = link(&stmt, two_float_fields());
    assert_eq!(linked.columns, vec!["time", "mean_field1", "mean_field2"]);
    assert_eq!(linked.sinks.len(), 2);
}

#[test]
fn raw_wildcard_expansion() {
    let stmt = select(vec![Field::new(Expr::Wildcard)], vec!["cpu"]);
    let linked = link(&stmt, two_float_fields());
    assert_eq!(linked.columns, vec!["time", "field1", "field2"]);
}

#[test]
fn time_alias_renames_leading_column() {
    let stmt = select(
        vec![
            Field::aliased(Expr::var("time"), "timestamp"),
            Field::new(Expr::var("field1")),
        ],
        vec!["cpu"],
    );
    let linked = link(&stmt, two_float_fields());
    assert_eq!(linked.columns, vec!["timestamp", "field1"]);
}

#[test]
fn raw_fields_flow_through_aux_splitter() {
    let group = MockShardGroup::new(vec![(
        "cpu",
        MockMeasurement {
            fields: [("value".to_string(), DataType::Float)].into_iter().collect(),
            dimensions: ["host".to_string()].into_iter().collect(),
            rows: vec![
                row("host=A", 0, "value", 1.0),
                row("host=A", SECOND, "value", 2.0),
                row("host=B", 0, "value", 3.0),
            ],
        },
    )]);

    let stmt = select(
        vec![
            Field::new(Expr::var("value")),
            Field::new(Expr::var("host")),
        ],
        vec!["cpu"],
    );
    let mut linked = link(&stmt, group);
    assert_eq!(linked.columns, vec!["time", "value", "host"]);

    linked.plan.execute().expect("execute");

    let values = read_all(
        linked
            .plan
            .sink_iterators(linked.sinks[0])
            .remove(0),
    )
    .expect("read values");
    let hosts = read_all(
        linked
            .plan
            .sink_iterators(linked.sinks[1])
            .remove(0),
    )
    .expect("read hosts");

    assert_eq!(
        values.iter().map(|p| p.value.clone()).collect::<Vec<_>>(),
        vec![
            FieldValue::Float(1.0),
            FieldValue::Float(2.0),
            FieldValue::Float(3.0)
        ]
    );
    assert_eq!(
        hosts.iter().map(|p| p.value.clone()).collect::<Vec<_>>(),
        vec![
            FieldValue::Str("A".to_string()),
            FieldValue::Str("A".to_string()),
            FieldValue::Str("B".to_string())
        ]
    );
}

#[test]
fn binary_projection_divides_fields() {
    let group = MockShardGroup::new(vec![(
        "cpu",
        MockMeasurement {
            fields: [
                ("value".to_string(), DataType::Float),
                ("total".to_string(), DataType::Float),
            ]
            .into_iter()
            .collect(),
            dimensions: Default::default(),
            rows: vec![
                support::Row {
                    tags: tsq_ql::Tags::new(),
                    time: 0,
                    fields: [
                        ("value".to_string(), FieldValue::Float(10.0)),
                        ("total".to_string(), FieldValue::Float(20.0)),
                    ]
                    .into_iter()
                    .collect(),
                },
                support::Row {
                    tags: tsq_ql::Tags::new(),
                    time: SECOND,
                    fields: [
                        ("value".to_string(), FieldValue::Float(1.0)),
                        ("total".to_string(), FieldValue::Float(4.0)),
                    ]
                    .into_iter()
                    .collect(),
                },
            ],
        },
    )]);

    let stmt = select(
        vec![Field::new(Expr::binary(
            BinaryOp::Div,
            Expr::var("value"),
            Expr::var("total"),
        ))],
        vec!["cpu"],
    );
    let mut linked = link(&stmt, group);
    assert_eq!(linked.columns, vec!["time", "value_total"]);

    linked.plan.execute().expect("execute");
    let points = read_all(
        linked
            .plan
            .sink_iterators(linked.sinks[0])
            .remove(0),
    )
    .expect("read");
    assert_eq!(
        points.into_iter().map(|p| p.value).collect::<Vec<_>>(),
        vec![FieldValue::Float(0.5), FieldValue::Float(0.25)]
    );
}

#[test]
fn partial_aggregation_pushdown_preserves_counts() {
    let measurements = || {
        MockShardGroup::new(vec![
            (
                "cpu",
                MockMeasurement::with_fields(&[("value", DataType::Float)]).with_rows(vec![
                    row("", 0, "value", 1.0),
                    row("", 5 * SECOND, "value", 2.0),
                    row("", 12 * SECOND, "value", 3.0),
                ]),
            ),
            (
                "cpu2",
                MockMeasurement::with_fields(&[("value", DataType::Float)]).with_rows(vec![
                    row("", SECOND, "value", 10.0),
                    row("", 14 * SECOND, "value", 11.0),
                ]),
            ),
        ])
    };

    let mut stmt = select(
        vec![Field::new(Expr::call("count", vec![Expr::var("value")]))],
        vec!["cpu", "cpu2"],
    );
    stmt.condition = Some(time_range("1970-01-01T00:00:00Z", "1970-01-01T01:00:00Z"));
    stmt.dimensions = vec![Dimension::new(Expr::call(
        "time",
        vec![Expr::duration(10 * SECOND)],
    ))];
    stmt.fill = Fill::None;

    let mut plain = link(&stmt, measurements());
    plain.plan.execute().expect("execute plain");
    let expected = read_all(plain.plan.sink_iterators(plain.sinks[0]).remove(0)).unwrap();

    let mut optimized = link(&stmt, measurements());
    optimized.plan.optimize();
    let explain = optimized.plan.explain();
    assert!(
        explain.contains("sum()"),
        "count was not rewritten to sum:\n{explain}"
    );
    assert_eq!(
        explain.matches("count()").count(),
        2,
        "expected one partial count per merge input:\n{explain}"
    );

    optimized.plan.execute().expect("execute optimized");
    let got = read_all(
        optimized
            .plan
            .sink_iterators(optimized.sinks[0])
            .remove(0),
    )
    .unwrap();

    let shape = |points: &[tsq_ql::Point]| {
        points
            .iter()
            .map(|p| (p.name.clone(), p.time / SECOND, p.value.clone()))
            .collect::<Vec<_>>()
    };
    assert_eq!(shape(&got), shape(&expected));
    assert_eq!(
        shape(&expected),
        vec![
            ("cpu".to_string(), 0, FieldValue::Integer(2)),
            ("cpu".to_string(), 10, FieldValue::Integer(1)),
            ("cpu2".to_string(), 0, FieldValue::Integer(1)),
            ("cpu2".to_string(), 10, FieldValue::Integer(1)),
        ]
    );
}

#[test]
fn partial_min_pushdown_preserves_values() {
    let measurements = || {
        MockShardGroup::new(vec![
            (
                "cpu",
                MockMeasurement::with_fields(&[("value", DataType::Float)]).with_rows(vec![
                    row("host=A", 0, "value", 20.0),
                    row("host=A", 9 * SECOND, "value", 19.0),
                    row("host=A", 11 * SECOND, "value", 3.0),
                ]),
            ),
            (
                "cpu2",
                MockMeasurement::with_fields(&[("value", DataType::Float)]).with_rows(vec![
                    row("host=A", 5 * SECOND, "value", 10.0),
                ]),
            ),
        ])
    };

    let mut stmt = select(
        vec![Field::new(Expr::call("min", vec![Expr::var("value")]))],
        vec!["cpu", "cpu2"],
    );
    stmt.condition = Some(time_range("1970-01-01T00:00:00Z", "1970-01-01T01:00:00Z"));
    stmt.dimensions = vec![Dimension::new(Expr::call(
        "time",
        vec![Expr::duration(10 * SECOND)],
    ))];
    stmt.fill = Fill::None;

    let mut plain = link(&stmt, measurements());
    plain.plan.execute().expect("execute plain");
    let expected = read_all(plain.plan.sink_iterators(plain.sinks[0]).remove(0)).unwrap();

    let mut optimized = link(&stmt, measurements());
    optimized.plan.optimize();
    optimized.plan.execute().expect("execute optimized");
    let got = read_all(
        optimized
            .plan
            .sink_iterators(optimized.sinks[0])
            .remove(0),
    )
    .unwrap();

    assert_eq!(got, expected);
}

#[test]
fn optimize_twice_is_idempotent() {
    let mut stmt = select(
        vec![Field::new(Expr::call("min", vec![Expr::var("value")]))],
        vec!["cpu", "cpu2"],
    );
    stmt.condition = Some(time_range("1970-01-01T00:00:00Z", "1970-01-01T01:00:00Z"));
    stmt.dimensions = vec![Dimension::new(Expr::call(
        "time",
        vec![Expr::duration(10 * SECOND)],
    ))];
    stmt.fill = Fill::None;

    let group = || {
        MockShardGroup::new(vec![
            ("cpu", MockMeasurement::with_fields(&[("value", DataType::Float)])),
            ("cpu2", MockMeasurement::with_fields(&[("value", DataType::Float)])),
        ])
    };
    let mut linked = link(&stmt, group());
    linked.plan.optimize();
    let once = linked.plan.explain();
    linked.plan.optimize();
    assert_eq!(once, linked.plan.explain());
}

#[test]
fn zero_shards_produce_empty_iterators() {
    let stmt = select(vec![Field::new(Expr::var("value"))], vec!["cpu"]);
    let compiled = compile(&stmt, CompileOptions::at(now())).unwrap();
    let linker = Linker::from_catalog(
        Arc::new(support::EmptyMeta),
        Arc::new(MockStore {
            group: Arc::new(MockShardGroup::default()),
        }),
    );
    let mut linked = linker.link(&compiled).expect("link");
    linked.plan.execute().expect("execute");
    let points = read_all(
        linked
            .plan
            .sink_iterators(linked.sinks[0])
            .remove(0),
    )
    .expect("read");
    assert!(points.is_empty());
}

#[test]
fn limit_and_offset_wrap_each_series() {
    let group = MockShardGroup::new(vec![(
        "cpu",
        MockMeasurement::with_fields(&[("value", DataType::Float)]).with_rows(vec![
            row("host=A", 0, "value", 1.0),
            row("host=A", SECOND, "value", 2.0),
            row("host=A", 2 * SECOND, "value", 3.0),
        ]),
    )]);

    let mut stmt = select(vec![Field::new(Expr::var("value"))], vec!["cpu"]);
    stmt.limit = Some(1);
    stmt.offset = Some(1);

    let mut linked = link(&stmt, group);
    linked.plan.execute().expect("execute");
    let points = read_all(
        linked
            .plan
            .sink_iterators(linked.sinks[0])
            .remove(0),
    )
    .expect("read");
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].value, FieldValue::Float(2.0));
}

#[test]
fn selector_with_tag_column() {
    let group = MockShardGroup::new(vec![(
        "cpu",
        MockMeasurement {
            fields: [("value".to_string(), DataType::Float)].into_iter().collect(),
            dimensions: ["host".to_string()].into_iter().collect(),
            rows: vec![
                row("host=A", 0, "value", 5.0),
                row("host=A", SECOND, "value", 9.0),
                row("host=B", 0, "value", 7.0),
            ],
        },
    )]);

    let stmt = select(
        vec![
            Field::new(Expr::call("max", vec![Expr::var("value")])),
            Field::new(Expr::var("host")),
        ],
        vec!["cpu"],
    );
    let mut linked = link(&stmt, group);
    assert_eq!(linked.columns, vec!["time", "max", "host"]);

    linked.plan.execute().expect("execute");
    let maxes = read_all(
        linked
            .plan
            .sink_iterators(linked.sinks[0])
            .remove(0),
    )
    .expect("read");
    // No dimensions: one point with the overall maximum.
    assert_eq!(maxes.len(), 1);
    assert_eq!(maxes[0].value, FieldValue::Float(9.0));
}
