//! WHERE-clause analysis: splitting a condition into a residual predicate
//! and an absolute time range.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use tsq_common::{QueryError, Result};
use tsq_ql::{BinaryOp, Expr, Literal, MAX_TIME, MIN_TIME};

/// A half-open interval of absolute timestamps, in epoch nanoseconds.
/// Unset bounds are open ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    /// Inclusive lower bound.
    pub min: Option<i64>,
    /// Inclusive upper bound.
    pub max: Option<i64>,
}

impl TimeRange {
    /// Returns true when neither bound is set.
    pub fn is_zero(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }

    /// Tighten with another range: lower bounds take the maximum, upper
    /// bounds the minimum. Unset bounds inherit the other side.
    pub fn intersect(&self, other: &TimeRange) -> TimeRange {
        let min = match (self.min, other.min) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        let max = match (self.max, other.max) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        TimeRange { min, max }
    }

    /// Resolved lower bound.
    pub fn min_ns(&self) -> i64 {
        self.min.unwrap_or(MIN_TIME)
    }

    /// Resolved upper bound.
    pub fn max_ns(&self) -> i64 {
        self.max.unwrap_or(MAX_TIME)
    }
}

/// Split a WHERE expression into a residual predicate and the time range
/// it implies. `now` resolves `now()` arithmetic.
///
/// Time predicates are comparisons with the identifier `time` on one
/// side. Bounds tighten through AND; OR across a time predicate is
/// rejected; strict inequalities shift by one nanosecond.
pub fn split_condition(
    expr: &Expr,
    now: DateTime<Utc>,
) -> Result<(Option<Expr>, TimeRange)> {
    match expr {
        Expr::Binary { op, lhs, rhs } => match op {
            BinaryOp::And => {
                let (lc, lt) = split_condition(lhs, now)?;
                let (rc, rt) = split_condition(rhs, now)?;
                let cond = match (lc, rc) {
                    (Some(l), Some(r)) => Some(Expr::binary(BinaryOp::And, l, r)),
                    (l, r) => l.or(r),
                };
                Ok((cond, lt.intersect(&rt)))
            }
            BinaryOp::Or => {
                let (lc, lt) = split_condition(lhs, now)?;
                let (rc, rt) = split_condition(rhs, now)?;
                if !lt.is_zero() || !rt.is_zero() {
                    return Err(QueryError::Compile(
                        "cannot use OR with time conditions".to_string(),
                    ));
                }
                let cond = match (lc, rc) {
                    (Some(l), Some(r)) => Some(Expr::binary(BinaryOp::Or, l, r)),
                    (l, r) => l.or(r),
                };
                Ok((cond, TimeRange::default()))
            }
            _ => {
                if is_time_ref(lhs) {
                    let range = time_condition(*op, rhs, now)?;
                    Ok((None, range))
                } else if is_time_ref(rhs) {
                    let range = time_condition(flip(*op), lhs, now)?;
                    Ok((None, range))
                } else {
                    // Any other binary expression stays in the residual
                    // predicate untouched.
                    Ok((Some(expr.clone()), TimeRange::default()))
                }
            }
        },
        Expr::Paren(inner) => {
            let (cond, range) = split_condition(inner, now)?;
            Ok((cond.map(|c| Expr::Paren(Box::new(c))), range))
        }
        other => Err(QueryError::Compile(format!(
            "invalid condition expression: {other}"
        ))),
    }
}

fn is_time_ref(expr: &Expr) -> bool {
    matches!(expr, Expr::VarRef(r) if r.name == "time")
}

/// Mirror a comparison so the time reference reads on the left.
fn flip(op: BinaryOp) -> BinaryOp {
    match op {
        BinaryOp::Lt => BinaryOp::Gt,
        BinaryOp::LtEq => BinaryOp::GtEq,
        BinaryOp::Gt => BinaryOp::Lt,
        BinaryOp::GtEq => BinaryOp::LtEq,
        other => other,
    }
}

fn time_condition(op: BinaryOp, value: &Expr, now: DateTime<Utc>) -> Result<TimeRange> {
    let t = eval_time(value, now)?;
    match op {
        BinaryOp::Eq => Ok(TimeRange {
            min: Some(t),
            max: Some(t),
        }),
        BinaryOp::Gt => Ok(TimeRange {
            min: Some(t + 1),
            max: None,
        }),
        BinaryOp::GtEq => Ok(TimeRange {
            min: Some(t),
            max: None,
        }),
        BinaryOp::Lt => Ok(TimeRange {
            min: None,
            max: Some(t - 1),
        }),
        BinaryOp::LtEq => Ok(TimeRange {
            min: None,
            max: Some(t),
        }),
        other => Err(QueryError::Compile(format!(
            "invalid time comparison operator: {other}"
        ))),
    }
}

/// Reduce a time operand to epoch nanoseconds, resolving `now()`
/// arithmetic against the compile-time reference instant.
fn eval_time(expr: &Expr, now: DateTime<Utc>) -> Result<i64> {
    match expr {
        Expr::Literal(Literal::String(s)) => parse_timestamp(s),
        Expr::Literal(Literal::Duration(d)) => Ok(*d),
        Expr::Literal(Literal::Integer(i)) => Ok(*i),
        Expr::Literal(Literal::Number(f)) => Ok(*f as i64),
        Expr::Literal(lit) => Err(QueryError::Compile(format!(
            "invalid operation: time and {} literal are not compatible",
            lit.kind()
        ))),
        Expr::Call(call) if call.name == "now" && call.args.is_empty() => now
            .timestamp_nanos_opt()
            .ok_or_else(|| QueryError::Compile("now() overflows time literal".to_string())),
        Expr::Paren(inner) => eval_time(inner, now),
        Expr::Binary { op, lhs, rhs } => {
            let l = eval_time(lhs, now)?;
            let r = eval_time(rhs, now)?;
            let result = match op {
                BinaryOp::Add => l.checked_add(r),
                BinaryOp::Sub => l.checked_sub(r),
                _ => {
                    return Err(QueryError::Compile(format!(
                        "invalid operation: time and {op} are not compatible"
                    )))
                }
            };
            result.ok_or_else(|| {
                QueryError::Compile("time expression overflows time literal".to_string())
            })
        }
        Expr::VarRef(r) => Err(QueryError::Compile(format!(
            "invalid operation: time and identifier {} are not compatible",
            r.name
        ))),
        other => Err(QueryError::Compile(format!(
            "invalid operation: time and {other} are not compatible"
        ))),
    }
}

/// Parse a timestamp literal: RFC3339 (with or without fractional
/// seconds) or `YYYY-MM-DD HH:MM:SS` treated as UTC.
pub(crate) fn parse_timestamp(s: &str) -> Result<i64> {
    let parsed: Option<DateTime<Utc>> = DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
                .ok()
                .map(|naive| Utc.from_utc_datetime(&naive))
        });
    let Some(dt) = parsed else {
        return Err(QueryError::Compile(
            "invalid operation: time and string literal are not compatible".to_string(),
        ));
    };

    match dt.timestamp_nanos_opt() {
        Some(ns) => Ok(ns),
        None => {
            let rendered = dt.to_rfc3339_opts(SecondsFormat::Secs, true);
            if dt.timestamp() < 0 {
                Err(QueryError::Compile(format!(
                    "time {rendered} underflows time literal"
                )))
            } else {
                Err(QueryError::Compile(format!(
                    "time {rendered} overflows time literal"
                )))
            }
        }
    }
}
