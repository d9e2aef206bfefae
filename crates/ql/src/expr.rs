use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::data_type::DataType;

/// A reference to a field or tag by name, with the type resolved so far
/// (`Unknown` until the linker maps it against shard metadata).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VarRef {
    /// Referenced field or tag name.
    pub name: String,
    /// Resolved type, `Unknown` before linking.
    pub data_type: DataType,
}

impl VarRef {
    /// An untyped reference (the usual parser output).
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: DataType::Unknown,
        }
    }

    /// A reference with a known type.
    pub fn typed(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// A function application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    /// Function name, lower-case.
    pub name: String,
    /// Positional arguments.
    pub args: Vec<Expr>,
}

/// Binary operators of the statement language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
    /// `=`
    Eq,
    /// `!=`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    LtEq,
    /// `>`
    Gt,
    /// `>=`
    GtEq,
    /// `AND`
    And,
    /// `OR`
    Or,
    /// `=~`
    EqRegex,
    /// `!~`
    NotEqRegex,
}

impl BinaryOp {
    /// Returns true for `+ - * / %`.
    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod
        )
    }

    /// Returns true for the comparison operators.
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::NotEq
                | BinaryOp::Lt
                | BinaryOp::LtEq
                | BinaryOp::Gt
                | BinaryOp::GtEq
                | BinaryOp::EqRegex
                | BinaryOp::NotEqRegex
        )
    }
}

/// Literal values carried by the parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    /// Signed integer literal.
    Integer(i64),
    /// Float literal.
    Number(f64),
    /// Single-quoted string literal.
    String(String),
    /// Boolean literal.
    Boolean(bool),
    /// Duration literal, in nanoseconds.
    Duration(i64),
}

impl Literal {
    /// Human-readable literal kind for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Literal::Integer(_) => "integer",
            Literal::Number(_) => "number",
            Literal::String(_) => "string",
            Literal::Boolean(_) => "boolean",
            Literal::Duration(_) => "duration",
        }
    }
}

/// A compiled regular expression literal.
///
/// Equality and hashing go through the source pattern so IR trees stay
/// comparable.
#[derive(Debug, Clone)]
pub struct Regex(regex::Regex);

impl Regex {
    /// Compile a regex literal.
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self(regex::Regex::new(pattern)?))
    }

    /// The source pattern.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// The compiled matcher.
    pub fn matcher(&self) -> &regex::Regex {
        &self.0
    }
}

impl PartialEq for Regex {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Serialize for Regex {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Regex {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let pattern = String::deserialize(deserializer)?;
        Regex::new(&pattern).map_err(serde::de::Error::custom)
    }
}

/// An expression in the statement tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Field or tag reference.
    VarRef(VarRef),
    /// Function application.
    Call(Call),
    /// Binary operation.
    Binary {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        lhs: Box<Expr>,
        /// Right operand.
        rhs: Box<Expr>,
    },
    /// Parenthesized sub-expression. Preserved so residual conditions
    /// render with their original grouping.
    Paren(Box<Expr>),
    /// The `distinct field` projection sugar.
    Distinct(String),
    /// `*` projection or argument.
    Wildcard,
    /// `/pattern/` projection or argument.
    Regex(Regex),
    /// Literal value.
    Literal(Literal),
}

impl Expr {
    /// An untyped variable reference.
    pub fn var(name: impl Into<String>) -> Expr {
        Expr::VarRef(VarRef::new(name))
    }

    /// A function call.
    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Expr {
        Expr::Call(Call {
            name: name.into(),
            args,
        })
    }

    /// A binary expression.
    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// An integer literal.
    pub fn integer(v: i64) -> Expr {
        Expr::Literal(Literal::Integer(v))
    }

    /// A float literal.
    pub fn number(v: f64) -> Expr {
        Expr::Literal(Literal::Number(v))
    }

    /// A string literal.
    pub fn string(v: impl Into<String>) -> Expr {
        Expr::Literal(Literal::String(v.into()))
    }

    /// A duration literal from nanoseconds.
    pub fn duration(ns: i64) -> Expr {
        Expr::Literal(Literal::Duration(ns))
    }
}
