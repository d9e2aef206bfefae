//! The plan node catalogue.
//!
//! A closed enum over every processing node; the shared node surface
//! (`description`, `inputs`, `outputs`, `execute`) is reached by
//! exhaustive match so the optimizer can reason about kinds directly.

use std::collections::BTreeSet;
use std::sync::Arc;

use tsq_common::{QueryError, Result};
use tsq_ql::{
    format_duration, BinaryOp, Expr, Interval, IteratorOptions, VarRef, MAX_TIME, MIN_TIME,
};
use tsq_runtime::{
    AuxSplitter, BinaryTransformIterator, CallIterator, DistinctIterator, LimitIterator,
    SortedMergeIterator, TopBottomIterator,
};
use tsq_storage::Database;

use crate::graph::EdgeId;
use crate::plan::Plan;

/// Leaf node: creates a per-source iterator from the storage layer.
pub struct IteratorCreator {
    /// Variable reference the iterator evaluates; `None` for pure
    /// auxiliary access.
    pub expr: Option<VarRef>,
    /// Auxiliary fields attached to each point.
    pub aux: Vec<VarRef>,
    /// Storage handle, shared read-only across the plan.
    pub database: Arc<dyn Database>,
    /// Grouping dimensions.
    pub dimensions: Vec<String>,
    /// Tags retained without grouping.
    pub tags: BTreeSet<String>,
    /// Inclusive time bounds.
    pub start_time: i64,
    /// Inclusive time bounds.
    pub end_time: i64,
    /// Output edge.
    pub output: EdgeId,
}

/// K-way sorted merge of sibling inputs.
pub struct Merge {
    /// Input edges, one per sibling source.
    pub inputs: Vec<EdgeId>,
    /// Output edge.
    pub output: EdgeId,
    /// Partial-aggregation pushdown already applied.
    pub optimized: bool,
}

/// Wraps the input with an aggregate call iterator.
pub struct FunctionCall {
    /// Aggregate name.
    pub name: String,
    /// Grouping dimensions.
    pub dimensions: Vec<String>,
    /// Tags retained without grouping.
    pub tags: BTreeSet<String>,
    /// Window interval.
    pub interval: Interval,
    /// Inclusive time bounds.
    pub start_time: i64,
    /// Inclusive time bounds.
    pub end_time: i64,
    /// Input edge.
    pub input: EdgeId,
    /// Output edge.
    pub output: EdgeId,
}

/// `top`/`bottom` selector with a positive limit.
pub struct TopBottomSelector {
    /// `top` or `bottom`.
    pub name: String,
    /// Number of points kept per series.
    pub limit: usize,
    /// Grouping dimensions.
    pub dimensions: Vec<String>,
    /// Window interval.
    pub interval: Interval,
    /// Inclusive time bounds.
    pub start_time: i64,
    /// Inclusive time bounds.
    pub end_time: i64,
    /// Input edge.
    pub input: EdgeId,
    /// Output edge.
    pub output: EdgeId,
}

/// Distinct-values filter over the full time range.
pub struct Distinct {
    /// Grouping dimensions.
    pub dimensions: Vec<String>,
    /// Input edge.
    pub input: EdgeId,
    /// Output edge.
    pub output: EdgeId,
}

/// Shares one source iterator among auxiliary field consumers.
pub struct AuxiliaryFields {
    /// Deduplicated auxiliary references, in registration order.
    pub refs: Vec<VarRef>,
    /// Source edge.
    pub input: EdgeId,
    /// Pass-through output consumed by a selector, when present.
    pub main: Option<EdgeId>,
    /// Per-consumer output edges.
    pub outputs: Vec<EdgeId>,
    /// Auxiliary-vector position consumed by each output.
    pub slots: Vec<usize>,
}

impl AuxiliaryFields {
    /// Register an auxiliary consumer for `var`, deduplicating equal
    /// references, and bind it to `edge`.
    pub fn register(&mut self, var: &VarRef, edge: EdgeId) {
        let slot = match self.refs.iter().position(|r| r == var) {
            Some(i) => i,
            None => {
                self.refs.push(var.clone());
                self.refs.len() - 1
            }
        };
        self.outputs.push(edge);
        self.slots.push(slot);
    }
}

/// Combines two inputs under an arithmetic operator.
pub struct BinaryExpr {
    /// Operator.
    pub op: BinaryOp,
    /// Rendered expression for the description.
    pub desc: String,
    /// Left input edge.
    pub lhs: EdgeId,
    /// Right input edge.
    pub rhs: EdgeId,
    /// Output edge.
    pub output: EdgeId,
}

/// Enforces point-level limit and offset per series.
pub struct Limit {
    /// Maximum points per series (0 = unlimited).
    pub limit: usize,
    /// Points skipped per series.
    pub offset: usize,
    /// Input edge.
    pub input: EdgeId,
    /// Output edge.
    pub output: EdgeId,
}

/// Terminal node holding the ready iterators for one output column.
pub struct Sink {
    /// Rendered field expression.
    pub desc: String,
    /// Ordered input edges.
    pub inputs: Vec<EdgeId>,
}

/// Input/output pair shared by the parameterless placeholder nodes.
pub struct Unary {
    /// Input edge.
    pub input: EdgeId,
    /// Output edge.
    pub output: EdgeId,
}

/// `percentile(field, N)` placeholder.
pub struct Percentile {
    /// Percentile argument.
    pub number: f64,
    /// Input edge.
    pub input: EdgeId,
    /// Output edge.
    pub output: EdgeId,
}

/// `sample(field, N)` placeholder.
pub struct Sample {
    /// Window size.
    pub size: i64,
    /// Input edge.
    pub input: EdgeId,
    /// Output edge.
    pub output: EdgeId,
}

/// `derivative` family placeholder.
pub struct Derivative {
    /// Unit duration, nanoseconds.
    pub duration: i64,
    /// Clamp negative results.
    pub non_negative: bool,
    /// Input edge.
    pub input: EdgeId,
    /// Output edge.
    pub output: EdgeId,
}

/// `elapsed` placeholder.
pub struct Elapsed {
    /// Unit duration, nanoseconds.
    pub duration: i64,
    /// Input edge.
    pub input: EdgeId,
    /// Output edge.
    pub output: EdgeId,
}

/// `difference` family placeholder.
pub struct Difference {
    /// Clamp negative results.
    pub non_negative: bool,
    /// Input edge.
    pub input: EdgeId,
    /// Output edge.
    pub output: EdgeId,
}

/// `moving_average` placeholder.
pub struct MovingAverage {
    /// Window size.
    pub window: i64,
    /// Input edge.
    pub input: EdgeId,
    /// Output edge.
    pub output: EdgeId,
}

/// `integral` placeholder.
pub struct Integral {
    /// Unit duration, nanoseconds.
    pub duration: i64,
    /// Input edge.
    pub input: EdgeId,
    /// Output edge.
    pub output: EdgeId,
}

/// `holt_winters` placeholder.
pub struct HoltWinters {
    /// Points to forecast.
    pub n: i64,
    /// Seasonal pattern length.
    pub s: i64,
    /// Include fitted values.
    pub with_fit: bool,
    /// Input edge.
    pub input: EdgeId,
    /// Output edge.
    pub output: EdgeId,
}

/// A processing node of the plan graph.
pub enum Node {
    /// Storage leaf.
    IteratorCreator(IteratorCreator),
    /// Sorted merge.
    Merge(Merge),
    /// Aggregate call.
    FunctionCall(FunctionCall),
    /// `top`/`bottom` selector.
    TopBottom(TopBottomSelector),
    /// Distinct filter.
    Distinct(Distinct),
    /// Auxiliary-field splitter.
    AuxiliaryFields(AuxiliaryFields),
    /// Binary arithmetic.
    BinaryExpr(BinaryExpr),
    /// Limit/offset.
    Limit(Limit),
    /// Terminal sink.
    Sink(Sink),
    /// `median` placeholder.
    Median(Unary),
    /// `mode` placeholder.
    Mode(Unary),
    /// `stddev` placeholder.
    Stddev(Unary),
    /// `spread` placeholder.
    Spread(Unary),
    /// `percentile` placeholder.
    Percentile(Percentile),
    /// `sample` placeholder.
    Sample(Sample),
    /// `derivative` placeholder.
    Derivative(Derivative),
    /// `elapsed` placeholder.
    Elapsed(Elapsed),
    /// `difference` placeholder.
    Difference(Difference),
    /// `moving_average` placeholder.
    MovingAverage(MovingAverage),
    /// `cumulative_sum` placeholder.
    CumulativeSum(Unary),
    /// `integral` placeholder.
    Integral(Integral),
    /// `holt_winters` placeholder.
    HoltWinters(HoltWinters),
}

impl Node {
    /// One-line description of what the node will do.
    pub fn description(&self) -> String {
        match self {
            Node::IteratorCreator(n) => {
                let mut desc = "create iterator".to_string();
                if let Some(expr) = &n.expr {
                    desc.push_str(&format!(" for {}", expr.name));
                }
                if !n.aux.is_empty() {
                    let names: Vec<&str> = n.aux.iter().map(|r| r.name.as_str()).collect();
                    desc.push_str(&format!(" [{}]", names.join(", ")));
                }
                desc
            }
            Node::Merge(n) => format!("merge {} nodes", n.inputs.len()),
            Node::FunctionCall(n) => format!("{}()", n.name),
            Node::TopBottom(n) => format!("{}({})", n.name, n.limit),
            Node::Distinct(_) => "find distinct values".to_string(),
            Node::AuxiliaryFields(_) => "access auxiliary fields".to_string(),
            Node::BinaryExpr(n) => n.desc.clone(),
            Node::Limit(n) => match (n.limit, n.offset) {
                (l, o) if l > 0 && o > 0 => format!("limit {l}/offset {o}"),
                (l, 0) if l > 0 => format!("limit {l}"),
                (0, o) if o > 0 => format!("offset {o}"),
                _ => "limit 0/offset 0".to_string(),
            },
            Node::Sink(n) => n.desc.clone(),
            Node::Median(_) => "median()".to_string(),
            Node::Mode(_) => "mode()".to_string(),
            Node::Stddev(_) => "stddev()".to_string(),
            Node::Spread(_) => "spread()".to_string(),
            Node::Percentile(n) => format!("percentile({:.0})", n.number),
            Node::Sample(n) => format!("sample({})", n.size),
            Node::Derivative(n) => {
                if n.non_negative {
                    format!("non_negative_derivative({})", format_duration(n.duration))
                } else {
                    format!("derivative({})", format_duration(n.duration))
                }
            }
            Node::Elapsed(n) => format!("elapsed({})", format_duration(n.duration)),
            Node::Difference(n) => {
                if n.non_negative {
                    "non_negative_difference()".to_string()
                } else {
                    "difference()".to_string()
                }
            }
            Node::MovingAverage(n) => format!("moving_average({})", n.window),
            Node::CumulativeSum(_) => "cumulative_sum()".to_string(),
            Node::Integral(n) => format!("integral({})", format_duration(n.duration)),
            Node::HoltWinters(n) => {
                if n.with_fit {
                    format!("holt_winters_with_fit({}, {})", n.n, n.s)
                } else {
                    format!("holt_winters({}, {})", n.n, n.s)
                }
            }
        }
    }

    /// Edges whose iterators this node consumes.
    pub fn inputs(&self) -> Vec<EdgeId> {
        match self {
            Node::IteratorCreator(_) => vec![],
            Node::Merge(n) => n.inputs.clone(),
            Node::FunctionCall(n) => vec![n.input],
            Node::TopBottom(n) => vec![n.input],
            Node::Distinct(n) => vec![n.input],
            Node::AuxiliaryFields(n) => vec![n.input],
            Node::BinaryExpr(n) => vec![n.lhs, n.rhs],
            Node::Limit(n) => vec![n.input],
            Node::Sink(n) => n.inputs.clone(),
            Node::Median(n) | Node::Mode(n) | Node::Stddev(n) | Node::Spread(n)
            | Node::CumulativeSum(n) => vec![n.input],
            Node::Percentile(n) => vec![n.input],
            Node::Sample(n) => vec![n.input],
            Node::Derivative(n) => vec![n.input],
            Node::Elapsed(n) => vec![n.input],
            Node::Difference(n) => vec![n.input],
            Node::MovingAverage(n) => vec![n.input],
            Node::Integral(n) => vec![n.input],
            Node::HoltWinters(n) => vec![n.input],
        }
    }

    /// Edges this node produces iterators onto.
    pub fn outputs(&self) -> Vec<EdgeId> {
        match self {
            Node::IteratorCreator(n) => vec![n.output],
            Node::Merge(n) => vec![n.output],
            Node::FunctionCall(n) => vec![n.output],
            Node::TopBottom(n) => vec![n.output],
            Node::Distinct(n) => vec![n.output],
            Node::AuxiliaryFields(n) => {
                let mut outputs = Vec::with_capacity(n.outputs.len() + 1);
                if let Some(main) = n.main {
                    outputs.push(main);
                }
                outputs.extend(n.outputs.iter().copied());
                outputs
            }
            Node::BinaryExpr(n) => vec![n.output],
            Node::Limit(n) => vec![n.output],
            Node::Sink(_) => vec![],
            Node::Median(n) | Node::Mode(n) | Node::Stddev(n) | Node::Spread(n)
            | Node::CumulativeSum(n) => vec![n.output],
            Node::Percentile(n) => vec![n.output],
            Node::Sample(n) => vec![n.output],
            Node::Derivative(n) => vec![n.output],
            Node::Elapsed(n) => vec![n.output],
            Node::Difference(n) => vec![n.output],
            Node::MovingAverage(n) => vec![n.output],
            Node::Integral(n) => vec![n.output],
            Node::HoltWinters(n) => vec![n.output],
        }
    }

    /// Rewire one input edge handle (edge-insertion support).
    pub(crate) fn replace_input(&mut self, old: EdgeId, new: EdgeId) {
        let replace = |edge: &mut EdgeId| {
            if *edge == old {
                *edge = new;
            }
        };
        match self {
            Node::IteratorCreator(_) => {}
            Node::Merge(n) => n.inputs.iter_mut().for_each(replace),
            Node::FunctionCall(n) => replace(&mut n.input),
            Node::TopBottom(n) => replace(&mut n.input),
            Node::Distinct(n) => replace(&mut n.input),
            Node::AuxiliaryFields(n) => replace(&mut n.input),
            Node::BinaryExpr(n) => {
                replace(&mut n.lhs);
                replace(&mut n.rhs);
            }
            Node::Limit(n) => replace(&mut n.input),
            Node::Sink(n) => n.inputs.iter_mut().for_each(replace),
            Node::Median(n) | Node::Mode(n) | Node::Stddev(n) | Node::Spread(n)
            | Node::CumulativeSum(n) => replace(&mut n.input),
            Node::Percentile(n) => replace(&mut n.input),
            Node::Sample(n) => replace(&mut n.input),
            Node::Derivative(n) => replace(&mut n.input),
            Node::Elapsed(n) => replace(&mut n.input),
            Node::Difference(n) => replace(&mut n.input),
            Node::MovingAverage(n) => replace(&mut n.input),
            Node::Integral(n) => replace(&mut n.input),
            Node::HoltWinters(n) => replace(&mut n.input),
        }
    }

    /// Execute the node: consume ready input iterators and latch output
    /// edges. In dry-run mode every output latches the nil sentinel.
    pub fn execute(&self, plan: &Plan) -> Result<()> {
        if plan.dry_run() {
            for output in self.outputs() {
                plan.set_iterator(output, None);
            }
            return Ok(());
        }

        match self {
            Node::IteratorCreator(n) => {
                let opt = IteratorOptions {
                    expr: n.expr.clone().map(Expr::VarRef),
                    aux: n.aux.clone(),
                    dimensions: n.dimensions.clone(),
                    group_by: n.tags.clone(),
                    start_time: n.start_time,
                    end_time: n.end_time,
                    ascending: true,
                    ..Default::default()
                };
                let itr = n.database.create_iterator(&opt)?;
                plan.set_iterator(n.output, Some(itr));
                Ok(())
            }
            Node::Merge(n) => {
                if n.inputs.is_empty() {
                    plan.set_iterator(n.output, None);
                    return Ok(());
                }
                if n.inputs.len() == 1 {
                    let input = plan.take_iterator(n.inputs[0]);
                    plan.set_iterator(n.output, input);
                    return Ok(());
                }
                let inputs: Vec<_> = n
                    .inputs
                    .iter()
                    .filter_map(|&e| plan.take_iterator(e))
                    .collect();
                plan.set_iterator(
                    n.output,
                    Some(Box::new(SortedMergeIterator::new(inputs, true))),
                );
                Ok(())
            }
            Node::FunctionCall(n) => {
                let Some(input) = plan.take_iterator(n.input) else {
                    plan.set_iterator(n.output, None);
                    return Ok(());
                };
                let opt = IteratorOptions {
                    dimensions: n.dimensions.clone(),
                    group_by: n.tags.clone(),
                    interval: n.interval,
                    start_time: n.start_time,
                    end_time: n.end_time,
                    ..Default::default()
                };
                let itr = CallIterator::new(input, &n.name, opt)?;
                plan.set_iterator(n.output, Some(Box::new(itr)));
                Ok(())
            }
            Node::TopBottom(n) => {
                let Some(input) = plan.take_iterator(n.input) else {
                    plan.set_iterator(n.output, None);
                    return Ok(());
                };
                let opt = IteratorOptions {
                    dimensions: n.dimensions.clone(),
                    interval: n.interval,
                    start_time: n.start_time,
                    end_time: n.end_time,
                    ..Default::default()
                };
                let itr = if n.name == "top" {
                    TopBottomIterator::top(input, opt, n.limit)
                } else {
                    TopBottomIterator::bottom(input, opt, n.limit)
                };
                plan.set_iterator(n.output, Some(Box::new(itr)));
                Ok(())
            }
            Node::Distinct(n) => {
                let Some(input) = plan.take_iterator(n.input) else {
                    plan.set_iterator(n.output, None);
                    return Ok(());
                };
                let opt = IteratorOptions {
                    dimensions: n.dimensions.clone(),
                    start_time: MIN_TIME,
                    end_time: MAX_TIME,
                    ..Default::default()
                };
                plan.set_iterator(n.output, Some(Box::new(DistinctIterator::new(input, opt))));
                Ok(())
            }
            Node::AuxiliaryFields(n) => {
                let Some(input) = plan.take_iterator(n.input) else {
                    if let Some(main) = n.main {
                        plan.set_iterator(main, None);
                    }
                    for &output in &n.outputs {
                        plan.set_iterator(output, None);
                    }
                    return Ok(());
                };
                let mut splitter = AuxSplitter::new(input, n.slots.clone());
                if n.main.is_some() {
                    splitter = splitter.with_main();
                }
                for (i, &output) in n.outputs.iter().enumerate() {
                    plan.set_iterator(output, Some(splitter.output(i)));
                }
                if let Some(main) = n.main {
                    plan.set_iterator(main, Some(splitter.main()));
                }
                Ok(())
            }
            Node::BinaryExpr(n) => {
                let lhs = plan.take_iterator(n.lhs);
                let rhs = plan.take_iterator(n.rhs);
                match (lhs, rhs) {
                    (Some(lhs), Some(rhs)) => {
                        let itr = BinaryTransformIterator::new(lhs, rhs, n.op)?;
                        plan.set_iterator(n.output, Some(Box::new(itr)));
                    }
                    (lhs, rhs) => {
                        for mut itr in [lhs, rhs].into_iter().flatten() {
                            itr.close();
                        }
                        plan.set_iterator(n.output, None);
                    }
                }
                Ok(())
            }
            Node::Limit(n) => {
                let Some(input) = plan.take_iterator(n.input) else {
                    plan.set_iterator(n.output, None);
                    return Ok(());
                };
                plan.set_iterator(
                    n.output,
                    Some(Box::new(LimitIterator::new(input, n.limit, n.offset))),
                );
                Ok(())
            }
            Node::Sink(_) => Ok(()),
            Node::Median(_)
            | Node::Mode(_)
            | Node::Stddev(_)
            | Node::Spread(_)
            | Node::Percentile(_)
            | Node::Sample(_)
            | Node::Derivative(_)
            | Node::Elapsed(_)
            | Node::Difference(_)
            | Node::MovingAverage(_)
            | Node::CumulativeSum(_)
            | Node::Integral(_)
            | Node::HoltWinters(_) => {
                Err(QueryError::Execution("unimplemented".to_string()))
            }
        }
    }
}
