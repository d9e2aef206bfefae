use std::collections::{BTreeSet, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use tsq_common::{QueryError, Result};
use tsq_ql::{
    BinaryOp, Expr, Fill, Interval, Literal, Regex, SelectStatement, Source, VarRef,
};

use crate::options::CompileOptions;
use crate::time_range::{split_condition, TimeRange};

/// One node of a compiled field's expression tree. Wildcards and regexes
/// survive compilation and expand at link time against shard metadata.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldExpr {
    /// A field or tag reference.
    VarRef(VarRef),
    /// A validated function application.
    Call {
        /// Function name.
        name: String,
        /// Validated arguments.
        args: Vec<FieldExpr>,
    },
    /// Arithmetic between compiled fields.
    Binary {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        lhs: Box<FieldExpr>,
        /// Right operand.
        rhs: Box<FieldExpr>,
    },
    /// `*`, expanded at link time.
    Wildcard,
    /// `/pattern/`, expanded at link time.
    Regex(Regex),
    /// A literal operand inside field arithmetic.
    Literal(Literal),
}

impl FieldExpr {
    /// Returns true when the tree references at least one variable,
    /// function, or expansion.
    pub fn has_variable(&self) -> bool {
        match self {
            FieldExpr::VarRef(_) | FieldExpr::Call { .. } | FieldExpr::Wildcard
            | FieldExpr::Regex(_) => true,
            FieldExpr::Binary { lhs, rhs, .. } => lhs.has_variable() || rhs.has_variable(),
            FieldExpr::Literal(_) => false,
        }
    }

    /// Returns true when the tree still needs link-time expansion.
    pub fn needs_expansion(&self) -> bool {
        match self {
            FieldExpr::Wildcard | FieldExpr::Regex(_) => true,
            FieldExpr::Call { args, .. } => args.iter().any(FieldExpr::needs_expansion),
            FieldExpr::Binary { lhs, rhs, .. } => lhs.needs_expansion() || rhs.needs_expansion(),
            _ => false,
        }
    }
}

impl fmt::Display for FieldExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldExpr::VarRef(r) => write!(f, "{}", r.name),
            FieldExpr::Call { name, args } => {
                write!(f, "{name}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
            FieldExpr::Binary { op, lhs, rhs } => write!(f, "{lhs} {op} {rhs}"),
            FieldExpr::Wildcard => write!(f, "*"),
            FieldExpr::Regex(re) => write!(f, "{re}"),
            FieldExpr::Literal(lit) => write!(f, "{lit}"),
        }
    }
}

/// A compiled output column.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledField {
    /// Compiled expression tree.
    pub expr: FieldExpr,
    /// `AS` alias from the source statement (also set by wildcard
    /// expansion for aggregate expansions like `mean_field1`).
    pub alias: Option<String>,
}

impl CompiledField {
    /// The derived column name before conflict resolution: the alias when
    /// set, otherwise the variable or function name, with binary
    /// expressions joining their operand names with underscores.
    pub fn name(&self) -> String {
        if let Some(alias) = &self.alias {
            return alias.clone();
        }
        derived_name(&self.expr)
    }
}

fn derived_name(expr: &FieldExpr) -> String {
    match expr {
        FieldExpr::VarRef(r) => r.name.clone(),
        FieldExpr::Call { name, .. } => name.clone(),
        FieldExpr::Binary { lhs, rhs, .. } => {
            let mut parts = Vec::new();
            collect_names(lhs, &mut parts);
            collect_names(rhs, &mut parts);
            parts.join("_")
        }
        FieldExpr::Wildcard => "*".to_string(),
        FieldExpr::Regex(_) | FieldExpr::Literal(_) => String::new(),
    }
}

fn collect_names(expr: &FieldExpr, out: &mut Vec<String>) {
    match expr {
        FieldExpr::VarRef(r) => out.push(r.name.clone()),
        FieldExpr::Call { name, .. } => out.push(name.clone()),
        FieldExpr::Binary { lhs, rhs, .. } => {
            collect_names(lhs, out);
            collect_names(rhs, out);
        }
        _ => {}
    }
}

/// The deduplicated auxiliary-field registry: insertion-ordered, with a
/// lookup map keyed by structural equality of the reference.
#[derive(Debug, Clone, Default)]
pub struct AuxFieldRegistry {
    refs: Vec<VarRef>,
    index: HashMap<VarRef, usize>,
}

impl AuxFieldRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a reference, returning its output slot. An equal
    /// reference reuses its existing slot.
    pub fn register(&mut self, var: &VarRef) -> usize {
        if let Some(&i) = self.index.get(var) {
            return i;
        }
        let i = self.refs.len();
        self.refs.push(var.clone());
        self.index.insert(var.clone(), i);
        i
    }

    /// Registered references in insertion order.
    pub fn refs(&self) -> &[VarRef] {
        &self.refs
    }

    /// Number of distinct references.
    pub fn len(&self) -> usize {
        self.refs.len()
    }

    /// Returns true when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }
}

/// The validated output of [`compile`], consumed by the linker.
#[derive(Debug, Clone)]
pub struct CompiledStatement {
    /// Compiled output fields in statement order.
    pub fields: Vec<CompiledField>,
    /// Residual WHERE predicate with time conditions removed.
    pub condition: Option<Expr>,
    /// Extracted time range; the upper bound defaults to `now - 1ns`.
    pub time_range: TimeRange,
    /// Tag dimension names in GROUP BY order.
    pub dimensions: Vec<String>,
    /// Tag dimension set.
    pub tags: BTreeSet<String>,
    /// `GROUP BY time(...)` window, zero when absent.
    pub interval: Interval,
    /// The interval came from an enclosing statement.
    pub inherited_interval: bool,
    /// Fill mode.
    pub fill: Fill,
    /// Point-level limit.
    pub limit: Option<usize>,
    /// Point-level offset.
    pub offset: Option<usize>,
    /// Series-level limit.
    pub slimit: Option<usize>,
    /// Series-level offset.
    pub soffset: Option<usize>,
    /// Alias for the leading time column.
    pub time_alias: Option<String>,
    /// Suppress the leading time column (subqueries).
    pub omit_time: bool,
    /// The statement projects at least one bare field, tag, wildcard, or
    /// regex alongside or instead of function calls.
    pub has_aux_fields: bool,
    /// Deduplicated auxiliary references for raw projections.
    pub aux_fields: AuxFieldRegistry,
    /// Statement sources (measurements and subqueries).
    pub sources: Vec<Source>,
    /// Compiled nested sub-selects, in source order.
    pub subqueries: Vec<CompiledStatement>,
    /// Resolved compile-time `now`, epoch nanoseconds.
    pub now: i64,
}

/// Compile and validate a SELECT statement.
///
/// All diagnostics carry canonical text; on failure no partial result is
/// returned. Compiling the same statement with the same
/// [`CompileOptions::now`] is deterministic.
pub fn compile(stmt: &SelectStatement, options: CompileOptions) -> Result<CompiledStatement> {
    let now = options.resolve_now();
    let now_ns = now.timestamp_nanos_opt().ok_or_else(|| {
        QueryError::Compile("compile-time now overflows the representable time range".to_string())
    })?;

    let mut compiler = Compiler::new(now, now_ns);
    compiler.compile_statement(stmt)?;
    Ok(compiler.into_compiled(stmt))
}

/// Per-statement compilation state. Composition counters accumulate while
/// fields compile and are checked as a whole in [`Compiler::validate_fields`].
pub(crate) struct Compiler {
    pub(crate) now: DateTime<Utc>,
    pub(crate) now_ns: i64,
    pub(crate) time_range: TimeRange,
    pub(crate) condition: Option<Expr>,
    pub(crate) dimensions: Vec<String>,
    pub(crate) tags: BTreeSet<String>,
    pub(crate) interval: Interval,
    pub(crate) inherited_interval: bool,
    pub(crate) fill: Fill,
    pub(crate) limit: Option<usize>,
    pub(crate) offset: Option<usize>,
    pub(crate) slimit: Option<usize>,
    pub(crate) soffset: Option<usize>,
    pub(crate) time_alias: Option<String>,
    pub(crate) fields: Vec<CompiledField>,
    pub(crate) function_calls: usize,
    pub(crate) only_selectors: bool,
    pub(crate) has_distinct: bool,
    pub(crate) top_bottom_function: Option<String>,
    pub(crate) has_aux_fields: bool,
    pub(crate) aux: AuxFieldRegistry,
    pub(crate) subqueries: Vec<CompiledStatement>,
}

impl Compiler {
    fn new(now: DateTime<Utc>, now_ns: i64) -> Self {
        Self {
            now,
            now_ns,
            time_range: TimeRange::default(),
            condition: None,
            dimensions: Vec::new(),
            tags: BTreeSet::new(),
            interval: Interval::default(),
            inherited_interval: false,
            fill: Fill::Null,
            limit: None,
            offset: None,
            slimit: None,
            soffset: None,
            time_alias: None,
            fields: Vec::new(),
            function_calls: 0,
            only_selectors: true,
            has_distinct: false,
            top_bottom_function: None,
            has_aux_fields: false,
            aux: AuxFieldRegistry::new(),
            subqueries: Vec::new(),
        }
    }

    fn compile_statement(&mut self, stmt: &SelectStatement) -> Result<()> {
        self.preprocess(stmt)?;
        self.compile_fields(stmt)?;
        self.validate_fields()?;

        // Subqueries compile after the outer statement because they
        // inherit its time range and grouping interval.
        for source in &stmt.sources {
            if let Source::Subquery(sub) = source {
                self.subquery(sub)?;
            }
        }
        Ok(())
    }

    fn preprocess(&mut self, stmt: &SelectStatement) -> Result<()> {
        self.fill = stmt.fill;
        self.limit = stmt.limit;
        self.offset = stmt.offset;
        self.slimit = stmt.slimit;
        self.soffset = stmt.soffset;

        if let Some(cond) = &stmt.condition {
            let (residual, range) = split_condition(cond, self.now)?;
            self.condition = residual;
            self.time_range = range;
        }

        for dim in &stmt.dimensions {
            self.compile_dimension(&dim.expr)?;
        }
        Ok(())
    }

    fn compile_dimension(&mut self, expr: &Expr) -> Result<()> {
        match expr {
            Expr::VarRef(r) => {
                if r.name == "time" {
                    return Err(QueryError::Compile(
                        "time() is a function and expects at least one argument".to_string(),
                    ));
                }
                self.dimensions.push(r.name.clone());
                self.tags.insert(r.name.clone());
                Ok(())
            }
            Expr::Call(call) => {
                if call.name != "time" {
                    return Err(QueryError::Compile(
                        "only time() calls allowed in dimensions".to_string(),
                    ));
                }
                if call.args.is_empty() || call.args.len() > 2 {
                    return Err(QueryError::Compile(
                        "time dimension expected 1 or 2 arguments".to_string(),
                    ));
                }
                let Expr::Literal(Literal::Duration(duration)) = &call.args[0] else {
                    return Err(QueryError::Compile(
                        "time dimension must have duration argument".to_string(),
                    ));
                };
                if !self.interval.is_zero() {
                    return Err(QueryError::Compile(
                        "multiple time dimensions not allowed".to_string(),
                    ));
                }
                self.interval.duration = *duration;

                if call.args.len() == 2 {
                    self.interval.offset = self.time_offset(&call.args[1], *duration)?;
                }
                Ok(())
            }
            _ => Err(QueryError::Compile(
                "only time and tag dimensions allowed".to_string(),
            )),
        }
    }

    fn time_offset(&self, expr: &Expr, duration: i64) -> Result<i64> {
        match expr {
            Expr::Literal(Literal::Duration(offset)) => Ok(*offset),
            Expr::Literal(Literal::String(s)) => match crate::time_range::parse_timestamp(s) {
                Ok(t) => Ok(t.rem_euclid(duration)),
                Err(_) => Err(QueryError::Compile(
                    "time dimension offset must be duration or now()".to_string(),
                )),
            },
            Expr::Call(call) => {
                if call.name != "now" {
                    return Err(QueryError::Compile(
                        "time dimension offset function must be now()".to_string(),
                    ));
                }
                if !call.args.is_empty() {
                    return Err(QueryError::Compile(
                        "time dimension offset now() function requires no arguments".to_string(),
                    ));
                }
                Ok(self.now_ns.rem_euclid(duration))
            }
            _ => Err(QueryError::Compile(
                "time dimension offset must be duration or now()".to_string(),
            )),
        }
    }

    fn compile_fields(&mut self, stmt: &SelectStatement) -> Result<()> {
        for field in &stmt.fields {
            // A bare time projection renames the implicit column instead of
            // producing an output field.
            if let Expr::VarRef(r) = &field.expr {
                if r.name == "time" {
                    if self.time_alias.is_none() {
                        self.time_alias = field.alias.clone();
                    }
                    continue;
                }
            }

            let compiled = self.compile_field_expr(&field.expr)?;
            if !compiled.has_variable() {
                return Err(QueryError::Compile(
                    "field must contain at least one variable".to_string(),
                ));
            }
            self.fields.push(CompiledField {
                expr: compiled,
                alias: field.alias.clone(),
            });
        }
        Ok(())
    }

    /// Composition validation over the whole select list. The order of
    /// these checks is part of the diagnostic contract.
    fn validate_fields(&self) -> Result<()> {
        if self.fields.is_empty() {
            return Err(QueryError::Compile(
                "at least 1 non-time field must be queried".to_string(),
            ));
        }

        if let Some(name) = &self.top_bottom_function {
            if self.function_calls > 1 {
                return Err(QueryError::Compile(format!(
                    "selector function {name}() cannot be combined with other functions"
                )));
            }
        } else if self.function_calls == 0 {
            match self.fill {
                Fill::None => {
                    return Err(QueryError::Compile(
                        "fill(none) must be used with a function".to_string(),
                    ))
                }
                Fill::Linear => {
                    return Err(QueryError::Compile(
                        "fill(linear) must be used with a function".to_string(),
                    ))
                }
                _ => {}
            }
            if !self.interval.is_zero() && !self.inherited_interval {
                return Err(QueryError::Compile(
                    "GROUP BY requires at least one aggregate function".to_string(),
                ));
            }
        }

        if self.has_distinct && (self.function_calls != 1 || self.has_aux_fields) {
            return Err(QueryError::Compile(
                "aggregate function distinct() cannot be combined with other functions or fields"
                    .to_string(),
            ));
        }

        if self.has_aux_fields && self.function_calls > 0 {
            if !self.only_selectors {
                return Err(QueryError::Compile(
                    "mixing aggregate and non-aggregate queries is not supported".to_string(),
                ));
            } else if self.function_calls > 1 {
                return Err(QueryError::Compile(
                    "mixing multiple selector functions with tags or fields is not supported"
                        .to_string(),
                ));
            }
        }

        if !self.interval.is_zero() && self.function_calls > 0 && self.time_range.min.is_none() {
            return Err(QueryError::Compile(
                "aggregate functions with GROUP BY time require a WHERE time clause with a lower limit"
                    .to_string(),
            ));
        }
        Ok(())
    }

    fn subquery(&mut self, stmt: &SelectStatement) -> Result<()> {
        let mut sub = Compiler::new(self.now, self.now_ns);
        sub.preprocess(stmt)?;

        // The subquery's range intersects the parent's; an unset inner
        // range inherits the outer bounds outright.
        sub.time_range = sub.time_range.intersect(&self.time_range);

        // Inherit the grouping interval when the subquery has none.
        if !self.interval.is_zero() && sub.interval.is_zero() {
            sub.interval = self.interval;
            sub.inherited_interval = true;
        }

        sub.compile_fields(stmt)?;
        sub.validate_fields()?;
        for source in &stmt.sources {
            if let Source::Subquery(nested) = source {
                sub.subquery(nested)?;
            }
        }

        let mut compiled = sub.into_compiled(stmt);
        compiled.omit_time = true;
        // A null fill wastes work inside a subquery; downgrade it after
        // validation so raw inner projections still pass the fill check.
        if compiled.fill == Fill::Null {
            compiled.fill = Fill::None;
        }
        self.subqueries.push(compiled);
        Ok(())
    }

    fn into_compiled(self, stmt: &SelectStatement) -> CompiledStatement {
        let mut time_range = self.time_range;
        // The default upper bound excludes points at or after now.
        if time_range.max.is_none() {
            time_range.max = Some(self.now_ns - 1);
        }

        CompiledStatement {
            fields: self.fields,
            condition: self.condition,
            time_range,
            dimensions: self.dimensions,
            tags: self.tags,
            interval: self.interval,
            inherited_interval: self.inherited_interval,
            fill: self.fill,
            limit: self.limit,
            offset: self.offset,
            slimit: self.slimit,
            soffset: self.soffset,
            time_alias: self.time_alias,
            omit_time: stmt.omit_time,
            has_aux_fields: self.has_aux_fields,
            aux_fields: self.aux,
            sources: stmt.sources.clone(),
            subqueries: self.subqueries,
            now: self.now_ns,
        }
    }
}
