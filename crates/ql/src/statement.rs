use serde::{Deserialize, Serialize};

use crate::expr::{Expr, Regex};

/// A projected output column with an optional alias.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    /// Projected expression.
    pub expr: Expr,
    /// `AS` alias, if present.
    pub alias: Option<String>,
}

impl Field {
    /// A field with no alias.
    pub fn new(expr: Expr) -> Self {
        Self { expr, alias: None }
    }

    /// An aliased field.
    pub fn aliased(expr: Expr, alias: impl Into<String>) -> Self {
        Self {
            expr,
            alias: Some(alias.into()),
        }
    }

    /// The derived column name: the alias if set, the variable or function
    /// name otherwise, and variable names of a binary expression joined
    /// with underscores.
    pub fn name(&self) -> String {
        if let Some(alias) = &self.alias {
            return alias.clone();
        }
        expr_name(&self.expr)
    }
}

fn expr_name(expr: &Expr) -> String {
    match expr {
        Expr::VarRef(ref_) => ref_.name.clone(),
        Expr::Call(call) => call.name.clone(),
        Expr::Distinct(_) => "distinct".to_string(),
        Expr::Paren(inner) => expr_name(inner),
        Expr::Binary { lhs, rhs, .. } => {
            let mut names = Vec::new();
            collect_var_names(lhs, &mut names);
            collect_var_names(rhs, &mut names);
            names.join("_")
        }
        _ => String::new(),
    }
}

fn collect_var_names(expr: &Expr, out: &mut Vec<String>) {
    match expr {
        Expr::VarRef(ref_) => out.push(ref_.name.clone()),
        Expr::Call(call) => out.push(call.name.clone()),
        Expr::Paren(inner) => collect_var_names(inner, out),
        Expr::Binary { lhs, rhs, .. } => {
            collect_var_names(lhs, out);
            collect_var_names(rhs, out);
        }
        _ => {}
    }
}

/// A measurement source name: literal or regex.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MeasurementName {
    /// A literal measurement name.
    Name(String),
    /// A regex over measurement names, expanded by the shard mapper.
    Regex(Regex),
}

/// A measurement source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Measurement name or regex.
    pub name: MeasurementName,
}

impl Measurement {
    /// A literal-named measurement.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: MeasurementName::Name(name.into()),
        }
    }

    /// A regex-named measurement.
    pub fn regex(re: Regex) -> Self {
        Self {
            name: MeasurementName::Regex(re),
        }
    }
}

/// A FROM-clause source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Source {
    /// A measurement, possibly regex-named.
    Measurement(Measurement),
    /// A nested sub-select.
    Subquery(Box<SelectStatement>),
}

/// A GROUP BY element: a tag reference or a `time(...)` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    /// Dimension expression.
    pub expr: Expr,
}

impl Dimension {
    /// A dimension from any expression.
    pub fn new(expr: Expr) -> Self {
        Self { expr }
    }
}

/// Fill policy for empty aggregate windows.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Fill {
    /// Emit null values (parser default).
    Null,
    /// Skip empty windows.
    None,
    /// Emit a constant.
    Number(f64),
    /// Repeat the previous window's value.
    Previous,
    /// Linearly interpolate between windows.
    Linear,
}

impl Default for Fill {
    fn default() -> Self {
        Fill::Null
    }
}

/// A parsed SELECT statement, as produced by the front-end parser.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SelectStatement {
    /// Projected fields.
    pub fields: Vec<Field>,
    /// FROM sources.
    pub sources: Vec<Source>,
    /// WHERE expression.
    pub condition: Option<Expr>,
    /// GROUP BY dimensions.
    pub dimensions: Vec<Dimension>,
    /// FILL mode.
    pub fill: Fill,
    /// Point-level LIMIT.
    pub limit: Option<usize>,
    /// Point-level OFFSET.
    pub offset: Option<usize>,
    /// Series-level LIMIT.
    pub slimit: Option<usize>,
    /// Series-level OFFSET.
    pub soffset: Option<usize>,
    /// Suppress the implicit leading time column (set on subqueries).
    pub omit_time: bool,
}
