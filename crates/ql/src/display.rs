//! Surface-syntax rendering of the statement IR.
//!
//! Compile diagnostics embed expression text (`found max(foo)`), so the
//! rendering here is part of the diagnostic contract: numbers print with
//! three decimal places, strings single-quoted, regexes slash-delimited.

use std::fmt;

use crate::duration::format_duration;
use crate::expr::{BinaryOp, Call, Expr, Literal, Regex, VarRef};
use crate::statement::{Measurement, MeasurementName};

impl fmt::Display for VarRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl fmt::Display for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{arg}")?;
        }
        write!(f, ")")
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::EqRegex => "=~",
            BinaryOp::NotEqRegex => "!~",
        };
        write!(f, "{token}")
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Integer(v) => write!(f, "{v}"),
            Literal::Number(v) => write!(f, "{v:.3}"),
            Literal::String(v) => write!(f, "'{v}'"),
            Literal::Boolean(v) => write!(f, "{v}"),
            Literal::Duration(ns) => write!(f, "{}", format_duration(*ns)),
        }
    }
}

impl fmt::Display for Regex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/", self.as_str())
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::VarRef(v) => write!(f, "{v}"),
            Expr::Call(c) => write!(f, "{c}"),
            Expr::Binary { op, lhs, rhs } => write!(f, "{lhs} {op} {rhs}"),
            Expr::Paren(inner) => write!(f, "({inner})"),
            Expr::Distinct(name) => write!(f, "distinct({name})"),
            Expr::Wildcard => write!(f, "*"),
            Expr::Regex(re) => write!(f, "{re}"),
            Expr::Literal(lit) => write!(f, "{lit}"),
        }
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            MeasurementName::Name(name) => write!(f, "{name}"),
            MeasurementName::Regex(re) => write!(f, "{re}"),
        }
    }
}
