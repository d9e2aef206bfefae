//! Lowers a [`CompiledStatement`] into the plan graph: resolves sources
//! through the shard mapper, expands wildcards against shard metadata,
//! and builds one node chain per output field.

use std::sync::Arc;

use tracing::debug;
use tsq_common::{QueryError, Result};
use tsq_planner::{column_names, CompiledField, CompiledStatement, FieldExpr};
use tsq_ql::{DataType, Literal, VarRef};
use tsq_storage::{
    CatalogShardMapper, Database, DatabaseSet, MetaClient, SelectOptions, ShardMapper, ShardStore,
};

use crate::graph::{EdgeId, NodeId};
use crate::node::{
    AuxiliaryFields, BinaryExpr, Derivative, Difference, Distinct, Elapsed, FunctionCall,
    HoltWinters, Integral, IteratorCreator, Limit, Merge, MovingAverage, Node, Percentile, Sample,
    Sink, TopBottomSelector, Unary,
};
use crate::plan::Plan;

const SECOND: i64 = 1_000_000_000;

/// A linked statement: the plan, its terminal sinks in field order, and
/// the resolved output column names.
pub struct Linked {
    /// The executable plan graph.
    pub plan: Plan,
    /// One sink node per output field, in positional order.
    pub sinks: Vec<NodeId>,
    /// Final column names, including the leading time column.
    pub columns: Vec<String>,
}

/// Binds compiled statements to shard storage.
pub struct Linker {
    mapper: Arc<dyn ShardMapper>,
}

impl Linker {
    /// Link through an explicit shard mapper.
    pub fn new(mapper: Arc<dyn ShardMapper>) -> Self {
        Self { mapper }
    }

    /// Link through the default catalog-backed mapper.
    pub fn from_catalog(meta: Arc<dyn MetaClient>, store: Arc<dyn ShardStore>) -> Self {
        Self::new(Arc::new(CatalogShardMapper::new(meta, store)))
    }

    /// Resolve sources, expand wildcard fields, and build the plan graph.
    pub fn link(&self, compiled: &CompiledStatement) -> Result<Linked> {
        let mut set = DatabaseSet::new();
        for source in &compiled.sources {
            match source {
                tsq_ql::Source::Measurement(m) => {
                    let opt = SelectOptions {
                        min_time: compiled.time_range.min_ns(),
                        max_time: compiled.time_range.max_ns(),
                    };
                    set.push(self.mapper.map_shards(m, &opt)?);
                }
                tsq_ql::Source::Subquery(_) => {
                    return Err(QueryError::Unsupported(
                        "subquery sources cannot be linked".to_string(),
                    ))
                }
            }
        }

        let fields = expand_fields(compiled, &set)?;
        let columns = column_names(&fields, compiled.time_alias.as_deref(), compiled.omit_time);
        debug!(fields = fields.len(), columns = ?columns, "linking statement");

        let mut builder = Builder {
            compiled,
            set: &set,
            plan: Plan::new(),
            aux: None,
            main_edge: None,
        };
        builder.prepare_aux(&fields)?;

        let mut sinks = Vec::with_capacity(fields.len());
        for field in &fields {
            let edge = builder.build_expr(&field.expr)?;
            let edge = builder.apply_limit(edge);
            let desc = match &field.alias {
                Some(alias) => format!("{} AS {}", field.expr, alias),
                None => format!("{}", field.expr),
            };
            let sink = builder.plan.add_node(Node::Sink(Sink {
                desc,
                inputs: vec![edge],
            }));
            builder.plan.connect(edge, sink);
            sinks.push(sink);
        }

        Ok(Linked {
            plan: builder.plan,
            sinks,
            columns,
        })
    }
}

/// Expand wildcard and regex fields against the merged shard metadata
/// and resolve every reference's concrete type.
fn expand_fields(compiled: &CompiledStatement, set: &DatabaseSet) -> Result<Vec<CompiledField>> {
    let (field_types, dimensions) = set.field_dimensions()?;

    let mut sorted_fields: Vec<&String> = field_types.keys().collect();
    sorted_fields.sort();

    let mut out = Vec::with_capacity(compiled.fields.len());
    for field in &compiled.fields {
        match &field.expr {
            FieldExpr::Wildcard | FieldExpr::Regex(_) => {
                // Raw expansion covers fields and tag dimensions.
                let mut names: Vec<(String, DataType)> = field_types
                    .iter()
                    .map(|(name, typ)| (name.clone(), *typ))
                    .chain(dimensions.iter().map(|d| (d.clone(), DataType::Tag)))
                    .collect();
                names.sort_by(|a, b| a.0.cmp(&b.0));
                if let FieldExpr::Regex(re) = &field.expr {
                    names.retain(|(name, _)| re.matcher().is_match(name));
                }
                for (name, typ) in names {
                    out.push(CompiledField {
                        expr: FieldExpr::VarRef(VarRef::typed(name, typ)),
                        alias: None,
                    });
                }
            }
            FieldExpr::Call { name, args }
                if matches!(
                    args.first(),
                    Some(FieldExpr::Wildcard) | Some(FieldExpr::Regex(_))
                ) =>
            {
                // Aggregate expansion covers fields only, with the stable
                // `name_field` alias for column naming.
                let mut names: Vec<&String> = sorted_fields.clone();
                if let Some(FieldExpr::Regex(re)) = args.first() {
                    names.retain(|n| re.matcher().is_match(n));
                }
                for field_name in names {
                    let typ = field_types[field_name];
                    let mut new_args =
                        vec![FieldExpr::VarRef(VarRef::typed(field_name.clone(), typ))];
                    new_args.extend(args[1..].iter().cloned());
                    out.push(CompiledField {
                        expr: FieldExpr::Call {
                            name: name.clone(),
                            args: new_args,
                        },
                        alias: Some(format!("{name}_{field_name}")),
                    });
                }
            }
            _ => out.push(CompiledField {
                expr: resolve_types(&field.expr, set, &dimensions),
                alias: field.alias.clone(),
            }),
        }
    }
    Ok(out)
}

fn resolve_types(
    expr: &FieldExpr,
    set: &DatabaseSet,
    dimensions: &std::collections::BTreeSet<String>,
) -> FieldExpr {
    match expr {
        FieldExpr::VarRef(r) => {
            let mut typ = r.data_type;
            if typ == DataType::Unknown {
                typ = set.map_type(&r.name);
            }
            if typ == DataType::Unknown && dimensions.contains(&r.name) {
                typ = DataType::Tag;
            }
            FieldExpr::VarRef(VarRef::typed(r.name.clone(), typ))
        }
        FieldExpr::Call { name, args } => FieldExpr::Call {
            name: name.clone(),
            args: args
                .iter()
                .map(|a| resolve_types(a, set, dimensions))
                .collect(),
        },
        FieldExpr::Binary { op, lhs, rhs } => FieldExpr::Binary {
            op: *op,
            lhs: Box::new(resolve_types(lhs, set, dimensions)),
            rhs: Box::new(resolve_types(rhs, set, dimensions)),
        },
        other => other.clone(),
    }
}

struct Builder<'a> {
    compiled: &'a CompiledStatement,
    set: &'a DatabaseSet,
    plan: Plan,
    aux: Option<NodeId>,
    /// Pass-through output of the splitter, consumed by the statement's
    /// single selector call when auxiliary fields are present.
    main_edge: Option<EdgeId>,
}

impl Builder<'_> {
    /// Create the shared auxiliary-field chain when the expanded field
    /// list projects raw references.
    fn prepare_aux(&mut self, fields: &[CompiledField]) -> Result<()> {
        let mut refs: Vec<VarRef> = Vec::new();
        for field in fields {
            collect_raw_refs(&field.expr, &mut refs);
        }
        if refs.is_empty() {
            return Ok(());
        }
        // Dedup by structural equality, preserving first-seen order.
        let mut deduped: Vec<VarRef> = Vec::new();
        for r in refs {
            if !deduped.contains(&r) {
                deduped.push(r);
            }
        }

        // A single selector may ride along with raw fields; its source
        // flows through the splitter's main output.
        let selector_ref = fields.iter().find_map(|f| selector_source(&f.expr));

        let source = self.resolve_ref(selector_ref.clone(), deduped.clone())?;
        let aux_id = self.plan.add_node(Node::AuxiliaryFields(AuxiliaryFields {
            refs: deduped,
            input: source,
            main: None,
            outputs: Vec::new(),
            slots: Vec::new(),
        }));
        self.plan.connect(source, aux_id);

        if selector_ref.is_some() {
            let main = self.plan.new_edge();
            self.plan.wire(main, aux_id);
            if let Node::AuxiliaryFields(node) = self.plan.node_mut(aux_id) {
                node.main = Some(main);
            }
            self.main_edge = Some(main);
        }
        self.aux = Some(aux_id);
        Ok(())
    }

    fn build_expr(&mut self, expr: &FieldExpr) -> Result<EdgeId> {
        match expr {
            FieldExpr::VarRef(r) => {
                if let Some(aux_id) = self.aux {
                    let edge = self.plan.new_edge();
                    self.plan.wire(edge, aux_id);
                    if let Node::AuxiliaryFields(node) = self.plan.node_mut(aux_id) {
                        node.register(r, edge);
                    }
                    Ok(edge)
                } else {
                    self.resolve_ref(Some(r.clone()), Vec::new())
                }
            }
            FieldExpr::Call { name, args } => self.build_call(name, args),
            FieldExpr::Binary { op, lhs, rhs } => {
                let lhs_edge = self.build_expr(lhs)?;
                let rhs_edge = self.build_expr(rhs)?;
                let out = self.plan.new_edge();
                let id = self.plan.add_node(Node::BinaryExpr(BinaryExpr {
                    op: *op,
                    desc: format!("{expr}"),
                    lhs: lhs_edge,
                    rhs: rhs_edge,
                    output: out,
                }));
                self.plan.connect(lhs_edge, id);
                self.plan.connect(rhs_edge, id);
                self.plan.wire(out, id);
                Ok(out)
            }
            FieldExpr::Literal(_) => Err(QueryError::Unsupported(
                "literal operands in field expressions are not executable".to_string(),
            )),
            FieldExpr::Wildcard | FieldExpr::Regex(_) => Err(QueryError::Plan(
                "wildcard survived link-time expansion".to_string(),
            )),
        }
    }

    fn build_call(&mut self, name: &str, args: &[FieldExpr]) -> Result<EdgeId> {
        match name {
            "count" | "min" | "max" | "sum" | "first" | "last" | "mean" => {
                let input = match &args[0] {
                    FieldExpr::Call {
                        name: inner,
                        args: inner_args,
                    } if inner == "distinct" => {
                        let source = self.argument_source(&inner_args[0])?;
                        let dimensions = self.compiled.dimensions.clone();
                        self.unary(source, |input, output| {
                            Node::Distinct(Distinct {
                                dimensions,
                                input,
                                output,
                            })
                        })
                    }
                    arg => self.argument_source(arg)?,
                };
                Ok(self.function_call(name, input))
            }
            "distinct" => {
                let source = self.argument_source(&args[0])?;
                let dimensions = self.compiled.dimensions.clone();
                Ok(self.unary(source, |input, output| {
                    Node::Distinct(Distinct {
                        dimensions,
                        input,
                        output,
                    })
                }))
            }
            "top" | "bottom" => {
                let limit = match args.last() {
                    Some(FieldExpr::Literal(Literal::Integer(n))) => *n as usize,
                    _ => {
                        return Err(QueryError::Plan(format!(
                            "missing limit argument in {name}()"
                        )))
                    }
                };
                let source = self.argument_source(&args[0])?;
                let compiled = self.compiled;
                Ok(self.unary(source, |input, output| {
                    Node::TopBottom(TopBottomSelector {
                        name: name.to_string(),
                        limit,
                        dimensions: compiled.dimensions.clone(),
                        interval: compiled.interval,
                        start_time: compiled.time_range.min_ns(),
                        end_time: compiled.time_range.max_ns(),
                        input,
                        output,
                    })
                }))
            }
            "median" | "mode" | "stddev" | "spread" | "cumulative_sum" => {
                let source = self.argument_source(&args[0])?;
                Ok(self.unary(source, |input, output| {
                    let unary = Unary { input, output };
                    match name {
                        "median" => Node::Median(unary),
                        "mode" => Node::Mode(unary),
                        "stddev" => Node::Stddev(unary),
                        "spread" => Node::Spread(unary),
                        _ => Node::CumulativeSum(unary),
                    }
                }))
            }
            "percentile" => {
                let number = match args.get(1) {
                    Some(FieldExpr::Literal(Literal::Number(n))) => *n,
                    Some(FieldExpr::Literal(Literal::Integer(n))) => *n as f64,
                    _ => {
                        return Err(QueryError::Plan(
                            "missing percentile argument".to_string(),
                        ))
                    }
                };
                let source = self.argument_source(&args[0])?;
                Ok(self.unary(source, |input, output| {
                    Node::Percentile(Percentile {
                        number,
                        input,
                        output,
                    })
                }))
            }
            "sample" => {
                let size = match args.get(1) {
                    Some(FieldExpr::Literal(Literal::Integer(n))) => *n,
                    _ => return Err(QueryError::Plan("missing sample window".to_string())),
                };
                let source = self.argument_source(&args[0])?;
                Ok(self.unary(source, |input, output| {
                    Node::Sample(Sample {
                        size,
                        input,
                        output,
                    })
                }))
            }
            "derivative" | "non_negative_derivative" => {
                let duration = duration_arg(args.get(1)).unwrap_or(SECOND);
                let non_negative = name == "non_negative_derivative";
                let source = self.argument_source(&args[0])?;
                Ok(self.unary(source, |input, output| {
                    Node::Derivative(Derivative {
                        duration,
                        non_negative,
                        input,
                        output,
                    })
                }))
            }
            "elapsed" => {
                let duration = duration_arg(args.get(1)).unwrap_or(1);
                let source = self.argument_source(&args[0])?;
                Ok(self.unary(source, |input, output| {
                    Node::Elapsed(Elapsed {
                        duration,
                        input,
                        output,
                    })
                }))
            }
            "difference" | "non_negative_difference" => {
                let non_negative = name == "non_negative_difference";
                let source = self.argument_source(&args[0])?;
                Ok(self.unary(source, |input, output| {
                    Node::Difference(Difference {
                        non_negative,
                        input,
                        output,
                    })
                }))
            }
            "moving_average" => {
                let window = match args.get(1) {
                    Some(FieldExpr::Literal(Literal::Integer(n))) => *n,
                    _ => {
                        return Err(QueryError::Plan(
                            "missing moving_average window".to_string(),
                        ))
                    }
                };
                let source = self.argument_source(&args[0])?;
                Ok(self.unary(source, |input, output| {
                    Node::MovingAverage(MovingAverage {
                        window,
                        input,
                        output,
                    })
                }))
            }
            "integral" => {
                let duration = duration_arg(args.get(1)).unwrap_or(SECOND);
                let source = self.argument_source(&args[0])?;
                Ok(self.unary(source, |input, output| {
                    Node::Integral(Integral {
                        duration,
                        input,
                        output,
                    })
                }))
            }
            "holt_winters" | "holt_winters_with_fit" => {
                let (n, s) = match (args.get(1), args.get(2)) {
                    (
                        Some(FieldExpr::Literal(Literal::Integer(n))),
                        Some(FieldExpr::Literal(Literal::Integer(s))),
                    ) => (*n, *s),
                    _ => {
                        return Err(QueryError::Plan(
                            "missing holt_winters arguments".to_string(),
                        ))
                    }
                };
                let with_fit = name == "holt_winters_with_fit";
                let source = self.argument_source(&args[0])?;
                Ok(self.unary(source, |input, output| {
                    Node::HoltWinters(HoltWinters {
                        n,
                        s,
                        with_fit,
                        input,
                        output,
                    })
                }))
            }
            other => Err(QueryError::Plan(format!(
                "no plan node for function {other}()"
            ))),
        }
    }

    /// Resolve a call argument to its source edge: a reference reads from
    /// storage (or the splitter's main output), a nested call builds its
    /// own chain.
    fn argument_source(&mut self, arg: &FieldExpr) -> Result<EdgeId> {
        match arg {
            FieldExpr::VarRef(r) => {
                if let Some(main) = self.main_edge.take() {
                    return Ok(main);
                }
                self.resolve_ref(Some(r.clone()), Vec::new())
            }
            FieldExpr::Call { name, args } => self.build_call(name, args),
            other => Err(QueryError::Plan(format!(
                "unexpected argument expression: {other}"
            ))),
        }
    }

    fn function_call(&mut self, name: &str, input: EdgeId) -> EdgeId {
        let compiled = self.compiled;
        self.unary(input, |input, output| {
            Node::FunctionCall(FunctionCall {
                name: name.to_string(),
                dimensions: compiled.dimensions.clone(),
                tags: compiled.tags.clone(),
                interval: compiled.interval,
                start_time: compiled.time_range.min_ns(),
                end_time: compiled.time_range.max_ns(),
                input,
                output,
            })
        })
    }

    /// Wire a single-input, single-output node onto `input` and return
    /// its output edge.
    fn unary(&mut self, input: EdgeId, mk: impl FnOnce(EdgeId, EdgeId) -> Node) -> EdgeId {
        let out = self.plan.new_edge();
        let id = self.plan.add_node(mk(input, out));
        self.plan.connect(input, id);
        self.plan.wire(out, id);
        out
    }

    /// Resolve a variable reference against the statement's storage set:
    /// one creator per database, merged when the set spans several.
    fn resolve_ref(&mut self, expr: Option<VarRef>, aux: Vec<VarRef>) -> Result<EdgeId> {
        let databases: Vec<Arc<dyn Database>> = self.set.databases().to_vec();
        if databases.len() == 1 {
            return Ok(self.creator_edge(databases.into_iter().next().unwrap(), expr, aux));
        }

        let out = self.plan.new_edge();
        let merge_id = self.plan.add_node(Node::Merge(Merge {
            inputs: Vec::new(),
            output: out,
            optimized: false,
        }));
        self.plan.wire(out, merge_id);
        for db in databases {
            let edge = self.creator_edge(db, expr.clone(), aux.clone());
            self.plan.connect(edge, merge_id);
            if let Node::Merge(merge) = self.plan.node_mut(merge_id) {
                merge.inputs.push(edge);
            }
        }
        Ok(out)
    }

    fn creator_edge(
        &mut self,
        database: Arc<dyn Database>,
        expr: Option<VarRef>,
        aux: Vec<VarRef>,
    ) -> EdgeId {
        let out = self.plan.new_edge();
        let id = self.plan.add_node(Node::IteratorCreator(IteratorCreator {
            expr,
            aux,
            database,
            dimensions: self.compiled.dimensions.clone(),
            tags: self.compiled.tags.clone(),
            start_time: self.compiled.time_range.min_ns(),
            end_time: self.compiled.time_range.max_ns(),
            output: out,
        }));
        self.plan.wire(out, id);
        out
    }

    /// Interpose the limit/offset node in front of a sink.
    fn apply_limit(&mut self, edge: EdgeId) -> EdgeId {
        let limit = self.compiled.limit.unwrap_or(0);
        let offset = self.compiled.offset.unwrap_or(0);
        if limit == 0 && offset == 0 {
            return edge;
        }
        self.unary(edge, |input, output| {
            Node::Limit(Limit {
                limit,
                offset,
                input,
                output,
            })
        })
    }
}

/// Raw references projected outside any call, in field order.
fn collect_raw_refs(expr: &FieldExpr, out: &mut Vec<VarRef>) {
    match expr {
        FieldExpr::VarRef(r) => out.push(r.clone()),
        FieldExpr::Binary { lhs, rhs, .. } => {
            collect_raw_refs(lhs, out);
            collect_raw_refs(rhs, out);
        }
        _ => {}
    }
}

/// The source reference of a selector call riding along with raw fields.
fn selector_source(expr: &FieldExpr) -> Option<VarRef> {
    match expr {
        FieldExpr::Call { args, .. } => match args.first() {
            Some(FieldExpr::VarRef(r)) => Some(r.clone()),
            _ => None,
        },
        FieldExpr::Binary { lhs, rhs, .. } => {
            selector_source(lhs).or_else(|| selector_source(rhs))
        }
        _ => None,
    }
}

fn duration_arg(arg: Option<&FieldExpr>) -> Option<i64> {
    match arg {
        Some(FieldExpr::Literal(Literal::Duration(d))) => Some(*d),
        _ => None,
    }
}
