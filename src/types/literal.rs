use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::condition::CompareOp;

/// The right-hand side of a `VALUE(field) op literal` condition.
///
/// Row data is always text; the literal decides how the raw row value is
/// coerced before the comparison runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    /// A 64-bit signed integer.
    Int(i64),
    /// A 64-bit floating-point number.
    Float(f64),
    /// A UTF-8 string.
    String(String),
}

impl Literal {
    /// Coerce `raw` to this literal's type and compare with `op`.
    ///
    /// Returns `None` when the raw value cannot be coerced, which callers treat
    /// as "not satisfied".
    #[must_use]
    pub fn compare_raw(&self, raw: &str, op: CompareOp) -> Option<bool> {
        let coerced = match self {
            Literal::Int(_) => Literal::Int(raw.trim().parse().ok()?),
            Literal::Float(_) => Literal::Float(raw.trim().parse().ok()?),
            Literal::String(_) => Literal::String(raw.to_owned()),
        };
        coerced.compare(op, self)
    }

    /// Compare this literal to another using the given operator.
    /// Returns `None` for incompatible types.
    #[must_use]
    pub fn compare(&self, op: CompareOp, other: &Literal) -> Option<bool> {
        let ord = self.partial_cmp_literal(other)?;
        Some(match op {
            CompareOp::Eq => ord == Ordering::Equal,
            CompareOp::Neq => ord != Ordering::Equal,
            CompareOp::Gt => ord == Ordering::Greater,
            CompareOp::Gte => ord != Ordering::Less,
            CompareOp::Lt => ord == Ordering::Less,
            CompareOp::Lte => ord != Ordering::Greater,
        })
    }

    #[allow(clippy::cast_precision_loss)]
    fn partial_cmp_literal(&self, other: &Literal) -> Option<Ordering> {
        match (self, other) {
            (Literal::Int(a), Literal::Int(b)) => a.partial_cmp(b),
            (Literal::Float(a), Literal::Float(b)) => a.partial_cmp(b),
            (Literal::Int(a), Literal::Float(b)) => (*a as f64).partial_cmp(b),
            (Literal::Float(a), Literal::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Literal::String(a), Literal::String(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

impl From<i64> for Literal {
    fn from(v: i64) -> Self {
        Literal::Int(v)
    }
}

impl From<f64> for Literal {
    fn from(v: f64) -> Self {
        Literal::Float(v)
    }
}

impl From<&str> for Literal {
    fn from(v: &str) -> Self {
        Literal::String(v.to_owned())
    }
}

impl From<String> for Literal {
    fn from(v: String) -> Self {
        Literal::String(v)
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Int(v) => write!(f, "{v}"),
            Literal::Float(v) => write!(f, "{v}"),
            Literal::String(v) => write!(f, "'{v}'"),
        }
    }
}
