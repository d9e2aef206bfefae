//! The function catalogue: per-function arity, argument-kind, and
//! composition validation for compiled field expressions.

use tsq_common::{QueryError, Result};
use tsq_ql::{format_duration, Call, Expr, Literal, VarRef};

use crate::compile::{Compiler, FieldExpr};

/// Selector functions may combine with bare fields and tags; everything
/// else in the catalogue is a plain aggregate or transformation.
fn is_selector(name: &str) -> bool {
    matches!(name, "min" | "max" | "first" | "last")
}

/// Literal-kind wording used by argument-type diagnostics.
fn argument_kind(expr: &Expr) -> String {
    match expr {
        Expr::Literal(lit) => lit.kind().to_string(),
        Expr::VarRef(_) => "identifier".to_string(),
        Expr::Call(_) => "function call".to_string(),
        other => format!("{other}"),
    }
}

impl Compiler {
    /// Compile one projected expression, updating the statement's
    /// composition state as calls and raw references are encountered.
    pub(crate) fn compile_field_expr(&mut self, expr: &Expr) -> Result<FieldExpr> {
        match expr {
            Expr::VarRef(r) => {
                self.has_aux_fields = true;
                self.aux.register(r);
                Ok(FieldExpr::VarRef(r.clone()))
            }
            Expr::Wildcard => {
                self.has_aux_fields = true;
                Ok(FieldExpr::Wildcard)
            }
            Expr::Regex(re) => {
                self.has_aux_fields = true;
                Ok(FieldExpr::Regex(re.clone()))
            }
            Expr::Literal(lit) => Ok(FieldExpr::Literal(lit.clone())),
            Expr::Paren(inner) => self.compile_field_expr(inner),
            Expr::Distinct(name) => {
                let args = [Expr::VarRef(VarRef::new(name.clone()))];
                self.compile_distinct(&args, false)
            }
            Expr::Call(call) => self.compile_call(call),
            Expr::Binary { op, lhs, rhs } => {
                let lhs = self.compile_field_expr(lhs)?;
                let rhs = self.compile_field_expr(rhs)?;
                Ok(FieldExpr::Binary {
                    op: *op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                })
            }
        }
    }

    pub(crate) fn compile_call(&mut self, call: &Call) -> Result<FieldExpr> {
        match call.name.as_str() {
            "count" | "min" | "max" | "sum" | "first" | "last" | "mean" | "median" | "mode"
            | "stddev" | "spread" => self.compile_function(&call.name, &call.args),
            "distinct" => self.compile_distinct(&call.args, false),
            "top" | "bottom" => self.compile_top_bottom(&call.name, &call.args),
            "percentile" => self.compile_percentile(&call.args),
            "sample" => self.compile_sample(&call.args),
            "derivative" | "non_negative_derivative" | "difference"
            | "non_negative_difference" | "cumulative_sum" | "moving_average" | "elapsed" => {
                self.compile_transformation(&call.name, &call.args)
            }
            "integral" => self.compile_integral(&call.args),
            "holt_winters" | "holt_winters_with_fit" => {
                self.compile_holt_winters(&call.name, &call.args)
            }
            name => Err(QueryError::Compile(format!("undefined function {name}()"))),
        }
    }

    /// Single-argument aggregates and selectors (`count` through `spread`).
    fn compile_function(&mut self, name: &str, args: &[Expr]) -> Result<FieldExpr> {
        if args.len() != 1 {
            return Err(QueryError::Compile(format!(
                "invalid number of arguments for {name}, expected 1, got {}",
                args.len()
            )));
        }
        self.function_calls += 1;
        if !is_selector(name) {
            self.only_selectors = false;
        }

        let arg = match &args[0] {
            Expr::VarRef(r) => FieldExpr::VarRef(r.clone()),
            Expr::Wildcard => FieldExpr::Wildcard,
            Expr::Regex(re) => FieldExpr::Regex(re.clone()),
            Expr::Distinct(field) if name == "count" => {
                let inner = [Expr::VarRef(VarRef::new(field.clone()))];
                self.compile_distinct(&inner, true)?
            }
            Expr::Call(inner) if inner.name == "distinct" && name == "count" => {
                self.compile_distinct(&inner.args, true)?
            }
            _ => {
                return Err(QueryError::Compile(format!(
                    "expected field argument in {name}()"
                )))
            }
        };
        Ok(FieldExpr::Call {
            name: name.to_string(),
            args: vec![arg],
        })
    }

    pub(crate) fn compile_distinct(&mut self, args: &[Expr], nested: bool) -> Result<FieldExpr> {
        if args.is_empty() {
            return Err(QueryError::Compile(
                "distinct function requires at least one argument".to_string(),
            ));
        }
        if args.len() > 1 {
            return Err(QueryError::Compile(
                "distinct function can only have one argument".to_string(),
            ));
        }
        let Expr::VarRef(r) = &args[0] else {
            return Err(QueryError::Compile(
                "expected field argument in distinct()".to_string(),
            ));
        };
        self.has_distinct = true;
        if !nested {
            self.function_calls += 1;
        }
        Ok(FieldExpr::Call {
            name: "distinct".to_string(),
            args: vec![FieldExpr::VarRef(r.clone())],
        })
    }

    fn compile_top_bottom(&mut self, name: &str, args: &[Expr]) -> Result<FieldExpr> {
        if let Some(existing) = &self.top_bottom_function {
            return Err(QueryError::Compile(format!(
                "selector function {existing}() cannot be combined with other functions"
            )));
        }
        self.top_bottom_function = Some(name.to_string());
        self.function_calls += 1;

        if args.len() < 2 {
            return Err(QueryError::Compile(format!(
                "invalid number of arguments for {name}, expected at least 2, got {}",
                args.len()
            )));
        }

        let last = args.last().expect("arity checked above");
        let Expr::Literal(Literal::Integer(limit)) = last else {
            return Err(QueryError::Compile(format!(
                "expected integer as last argument in {name}(), found {last}"
            )));
        };
        if *limit < 1 {
            return Err(QueryError::Compile(format!(
                "limit ({limit}) in {name} function must be at least 1"
            )));
        }

        let Expr::VarRef(field) = &args[0] else {
            return Err(QueryError::Compile(format!(
                "expected first argument to be a field in {name}(), found {}",
                args[0]
            )));
        };

        let mut compiled = vec![FieldExpr::VarRef(field.clone())];
        for arg in &args[1..args.len() - 1] {
            let Expr::VarRef(tag) = arg else {
                return Err(QueryError::Compile(format!(
                    "only fields or tags are allowed in {name}(), found {arg}"
                )));
            };
            compiled.push(FieldExpr::VarRef(tag.clone()));
        }
        compiled.push(FieldExpr::Literal(Literal::Integer(*limit)));
        Ok(FieldExpr::Call {
            name: name.to_string(),
            args: compiled,
        })
    }

    fn compile_percentile(&mut self, args: &[Expr]) -> Result<FieldExpr> {
        if args.len() != 2 {
            return Err(QueryError::Compile(format!(
                "invalid number of arguments for percentile, expected 2, got {}",
                args.len()
            )));
        }
        self.function_calls += 1;

        let number = match &args[1] {
            Expr::Literal(Literal::Integer(n)) => Literal::Number(*n as f64),
            Expr::Literal(Literal::Number(n)) => Literal::Number(*n),
            _ => {
                return Err(QueryError::Compile(
                    "expected float argument in percentile()".to_string(),
                ))
            }
        };
        let field = self.field_only_argument("percentile", &args[0])?;
        Ok(FieldExpr::Call {
            name: "percentile".to_string(),
            args: vec![field, FieldExpr::Literal(number)],
        })
    }

    fn compile_sample(&mut self, args: &[Expr]) -> Result<FieldExpr> {
        if args.len() != 2 {
            return Err(QueryError::Compile(format!(
                "invalid number of arguments for sample, expected 2, got {}",
                args.len()
            )));
        }
        self.function_calls += 1;

        let Expr::Literal(Literal::Integer(window)) = &args[1] else {
            return Err(QueryError::Compile(
                "expected integer argument in sample()".to_string(),
            ));
        };
        if *window <= 1 {
            return Err(QueryError::Compile(format!(
                "sample window must be greater than 1, got {window}"
            )));
        }
        let field = self.field_only_argument("sample", &args[0])?;
        Ok(FieldExpr::Call {
            name: "sample".to_string(),
            args: vec![field, FieldExpr::Literal(Literal::Integer(*window))],
        })
    }

    /// Transformations over an inner aggregate (`derivative` and
    /// relatives). With a GROUP BY interval the argument must itself be an
    /// aggregate call; without one, an aggregate argument is rejected for
    /// missing its interval.
    fn compile_transformation(&mut self, name: &str, args: &[Expr]) -> Result<FieldExpr> {
        let (min_args, max_args) = match name {
            "derivative" | "non_negative_derivative" | "elapsed" => (1, 2),
            "moving_average" => (2, 2),
            _ => (1, 1),
        };
        if args.len() < min_args || args.len() > max_args {
            if min_args == max_args {
                return Err(QueryError::Compile(format!(
                    "invalid number of arguments for {name}, expected {min_args}, got {}",
                    args.len()
                )));
            }
            return Err(QueryError::Compile(format!(
                "invalid number of arguments for {name}, expected at least {min_args} but no more than {max_args}, got {}",
                args.len()
            )));
        }
        self.function_calls += 1;
        self.only_selectors = false;

        let mut compiled_args = Vec::with_capacity(args.len());
        if args.len() == 2 {
            match name {
                "moving_average" => {
                    let Expr::Literal(Literal::Integer(window)) = &args[1] else {
                        return Err(QueryError::Compile(format!(
                            "second argument for moving_average must be an integer, got {}",
                            argument_kind(&args[1])
                        )));
                    };
                    if *window <= 1 {
                        return Err(QueryError::Compile(format!(
                            "moving_average window must be greater than 1, got {window}"
                        )));
                    }
                }
                _ => {
                    let Expr::Literal(Literal::Duration(duration)) = &args[1] else {
                        return Err(QueryError::Compile(format!(
                            "second argument to {name} must be a duration, got {}",
                            argument_kind(&args[1])
                        )));
                    };
                    if *duration <= 0 {
                        return Err(QueryError::Compile(format!(
                            "duration argument must be positive, got {}",
                            format_duration(*duration)
                        )));
                    }
                }
            }
        }

        let inner = self.aggregate_argument(name, &args[0])?;
        compiled_args.push(inner);
        if args.len() == 2 {
            if let Expr::Literal(lit) = &args[1] {
                compiled_args.push(FieldExpr::Literal(lit.clone()));
            }
        }
        Ok(FieldExpr::Call {
            name: name.to_string(),
            args: compiled_args,
        })
    }

    fn compile_integral(&mut self, args: &[Expr]) -> Result<FieldExpr> {
        if args.is_empty() || args.len() > 2 {
            return Err(QueryError::Compile(format!(
                "invalid number of arguments for integral, expected at least 1 but no more than 2, got {}",
                args.len()
            )));
        }
        self.function_calls += 1;
        self.only_selectors = false;

        if args.len() == 2 {
            let Expr::Literal(Literal::Duration(duration)) = &args[1] else {
                return Err(QueryError::Compile(
                    "second argument must be a duration".to_string(),
                ));
            };
            if *duration <= 0 {
                return Err(QueryError::Compile(format!(
                    "duration argument must be positive, got {}",
                    format_duration(*duration)
                )));
            }
        }

        let field = self.field_only_argument("integral", &args[0])?;
        let mut compiled = vec![field];
        if args.len() == 2 {
            if let Expr::Literal(lit) = &args[1] {
                compiled.push(FieldExpr::Literal(lit.clone()));
            }
        }
        Ok(FieldExpr::Call {
            name: "integral".to_string(),
            args: compiled,
        })
    }

    fn compile_holt_winters(&mut self, name: &str, args: &[Expr]) -> Result<FieldExpr> {
        if args.len() != 3 {
            return Err(QueryError::Compile(format!(
                "invalid number of arguments for {name}, expected 3, got {}",
                args.len()
            )));
        }
        self.function_calls += 1;
        self.only_selectors = false;

        let Expr::Call(inner) = &args[0] else {
            return Err(QueryError::Compile(format!(
                "must use aggregate function with {name}"
            )));
        };
        let compiled_inner = self.compile_call(inner)?;
        if self.interval.is_zero() {
            return Err(QueryError::Compile(format!(
                "{name} aggregate requires a GROUP BY interval"
            )));
        }

        let Expr::Literal(Literal::Integer(n)) = &args[1] else {
            return Err(QueryError::Compile(format!(
                "expected integer argument as second arg in {name}"
            )));
        };
        if *n <= 0 {
            return Err(QueryError::Compile(format!(
                "second arg to {name} must be greater than 0, got {n}"
            )));
        }
        let Expr::Literal(Literal::Integer(s)) = &args[2] else {
            return Err(QueryError::Compile(format!(
                "expected integer argument as third arg in {name}"
            )));
        };
        if *s < 0 {
            return Err(QueryError::Compile(format!(
                "third arg to {name} cannot be negative, got {s}"
            )));
        }

        Ok(FieldExpr::Call {
            name: name.to_string(),
            args: vec![
                compiled_inner,
                FieldExpr::Literal(Literal::Integer(*n)),
                FieldExpr::Literal(Literal::Integer(*s)),
            ],
        })
    }

    /// First-argument analysis shared by the transformation family: an
    /// aggregate call requires a grouping interval, a bare reference
    /// forbids one.
    fn aggregate_argument(&mut self, name: &str, arg: &Expr) -> Result<FieldExpr> {
        match arg {
            Expr::Call(inner) => {
                let compiled = self.compile_call(inner)?;
                if self.interval.is_zero() {
                    return Err(QueryError::Compile(format!(
                        "{name} aggregate requires a GROUP BY interval"
                    )));
                }
                Ok(compiled)
            }
            Expr::VarRef(r) => {
                if !self.interval.is_zero() {
                    return Err(QueryError::Compile(format!(
                        "aggregate function required inside the call to {name}"
                    )));
                }
                Ok(FieldExpr::VarRef(r.clone()))
            }
            Expr::Wildcard => {
                if !self.interval.is_zero() {
                    return Err(QueryError::Compile(format!(
                        "aggregate function required inside the call to {name}"
                    )));
                }
                Ok(FieldExpr::Wildcard)
            }
            Expr::Regex(re) => {
                if !self.interval.is_zero() {
                    return Err(QueryError::Compile(format!(
                        "aggregate function required inside the call to {name}"
                    )));
                }
                Ok(FieldExpr::Regex(re.clone()))
            }
            _ => Err(QueryError::Compile(format!(
                "expected field argument in {name}()"
            ))),
        }
    }

    /// Field-reference-or-expansion argument used by `percentile`,
    /// `sample`, and `integral`.
    fn field_only_argument(&mut self, name: &str, arg: &Expr) -> Result<FieldExpr> {
        match arg {
            Expr::VarRef(r) => Ok(FieldExpr::VarRef(r.clone())),
            Expr::Wildcard => Ok(FieldExpr::Wildcard),
            Expr::Regex(re) => Ok(FieldExpr::Regex(re.clone())),
            _ => Err(QueryError::Compile(format!(
                "expected field argument in {name}()"
            ))),
        }
    }
}
