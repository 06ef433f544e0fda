use std::fmt;
use std::ops::Not;

use serde::{Deserialize, Serialize};

use super::{Literal, Span};

/// Comparison operators supported in `VALUE(field) op literal` conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeOp {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConditionKind {
    True,
    False,
    Null(String),
    NotNull(String),
    Expression {
        field_id: String,
        op: CompareOp,
        value: Literal,
    },
    Node {
        op: NodeOp,
        left: Box<Condition>,
        right: Box<Condition>,
    },
}

/// A boolean condition over one data row. `negated` inverts the result of the
/// whole node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub kind: ConditionKind,
    pub negated: bool,
    pub span: Span,
}

impl Condition {
    #[must_use]
    pub fn new(kind: ConditionKind) -> Self {
        Self {
            kind,
            negated: false,
            span: Span::default(),
        }
    }

    #[must_use]
    pub fn always() -> Self {
        Self::new(ConditionKind::True)
    }

    #[must_use]
    pub fn never() -> Self {
        Self::new(ConditionKind::False)
    }

    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    #[must_use]
    pub fn and(self, other: Condition) -> Condition {
        Condition::new(ConditionKind::Node {
            op: NodeOp::And,
            left: Box::new(self),
            right: Box::new(other),
        })
    }

    #[must_use]
    pub fn or(self, other: Condition) -> Condition {
        Condition::new(ConditionKind::Node {
            op: NodeOp::Or,
            left: Box::new(self),
            right: Box::new(other),
        })
    }

    /// Every field id this condition reads, in source order, with duplicates.
    #[must_use]
    pub fn field_ids(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_field_ids(&mut out);
        out
    }

    fn collect_field_ids<'a>(&'a self, out: &mut Vec<&'a str>) {
        match &self.kind {
            ConditionKind::True | ConditionKind::False => {}
            ConditionKind::Null(id) | ConditionKind::NotNull(id) => out.push(id),
            ConditionKind::Expression { field_id, .. } => out.push(field_id),
            ConditionKind::Node { left, right, .. } => {
                left.collect_field_ids(out);
                right.collect_field_ids(out);
            }
        }
    }

    /// Apply `f` to every field id in place.
    pub fn map_field_ids(&mut self, f: &mut impl FnMut(&mut String)) {
        match &mut self.kind {
            ConditionKind::True | ConditionKind::False => {}
            ConditionKind::Null(id) | ConditionKind::NotNull(id) => f(id),
            ConditionKind::Expression { field_id, .. } => f(field_id),
            ConditionKind::Node { left, right, .. } => {
                left.map_field_ids(f);
                right.map_field_ids(f);
            }
        }
    }
}

impl Default for Condition {
    fn default() -> Self {
        Self::always()
    }
}

impl Not for Condition {
    type Output = Condition;

    fn not(mut self) -> Condition {
        self.negated = !self.negated;
        self
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompareOp::Eq => write!(f, "="),
            CompareOp::Neq => write!(f, "!="),
            CompareOp::Gt => write!(f, ">"),
            CompareOp::Gte => write!(f, ">="),
            CompareOp::Lt => write!(f, "<"),
            CompareOp::Lte => write!(f, "<="),
        }
    }
}

impl fmt::Display for NodeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeOp::And => write!(f, "AND"),
            NodeOp::Or => write!(f, "OR"),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negated {
            write!(f, "^")?;
        }
        match &self.kind {
            ConditionKind::True => write!(f, "TRUE"),
            ConditionKind::False => write!(f, "FALSE"),
            ConditionKind::Null(id) => write!(f, "NULL({id})"),
            ConditionKind::NotNull(id) => write!(f, "NOTNULL({id})"),
            ConditionKind::Expression { field_id, op, value } => {
                write!(f, "VALUE({field_id}) {op} {value}")
            }
            ConditionKind::Node { op, left, right } => write!(f, "({left} {op} {right})"),
        }
    }
}

/// Intermediate builder for comparison conditions.
/// Created by [`value()`]; requires a comparison method to produce a [`Condition`].
#[derive(Debug, Clone)]
pub struct FieldCondition {
    field_id: String,
}

impl FieldCondition {
    fn build(self, op: CompareOp, value: Literal) -> Condition {
        Condition::new(ConditionKind::Expression {
            field_id: self.field_id,
            op,
            value,
        })
    }

    #[must_use]
    pub fn eq(self, value: impl Into<Literal>) -> Condition {
        self.build(CompareOp::Eq, value.into())
    }

    #[must_use]
    pub fn neq(self, value: impl Into<Literal>) -> Condition {
        self.build(CompareOp::Neq, value.into())
    }

    #[must_use]
    pub fn gt(self, value: impl Into<Literal>) -> Condition {
        self.build(CompareOp::Gt, value.into())
    }

    #[must_use]
    pub fn gte(self, value: impl Into<Literal>) -> Condition {
        self.build(CompareOp::Gte, value.into())
    }

    #[must_use]
    pub fn lt(self, value: impl Into<Literal>) -> Condition {
        self.build(CompareOp::Lt, value.into())
    }

    #[must_use]
    pub fn lte(self, value: impl Into<Literal>) -> Condition {
        self.build(CompareOp::Lte, value.into())
    }
}

#[must_use]
pub fn value(field_id: &str) -> FieldCondition {
    FieldCondition {
        field_id: field_id.to_owned(),
    }
}

#[must_use]
pub fn null(field_id: &str) -> Condition {
    Condition::new(ConditionKind::Null(field_id.to_owned()))
}

#[must_use]
pub fn not_null(field_id: &str) -> Condition {
    Condition::new(ConditionKind::NotNull(field_id.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_eq_int() {
        let cond = value("pat_sex").eq(1_i64);
        assert_eq!(
            cond.kind,
            ConditionKind::Expression {
                field_id: "pat_sex".to_owned(),
                op: CompareOp::Eq,
                value: Literal::Int(1),
            }
        );
        assert!(!cond.negated);
    }

    #[test]
    fn value_eq_str() {
        let cond = value("status").eq("active");
        match cond.kind {
            ConditionKind::Expression { value, .. } => {
                assert_eq!(value, Literal::String("active".to_owned()));
            }
            other => panic!("expected Expression, got {other:?}"),
        }
    }

    #[test]
    fn not_toggles_negation() {
        let cond = !not_null("dob");
        assert!(cond.negated);
        let cond = !cond;
        assert!(!cond.negated);
    }

    #[test]
    fn and_or_build_nodes() {
        let cond = null("a").and(not_null("b")).or(value("c").gt(2_i64));
        match &cond.kind {
            ConditionKind::Node { op: NodeOp::Or, left, .. } => match &left.kind {
                ConditionKind::Node { op: NodeOp::And, .. } => {}
                other => panic!("expected inner And, got {other:?}"),
            },
            other => panic!("expected outer Or, got {other:?}"),
        }
    }

    #[test]
    fn field_ids_in_source_order() {
        let cond = null("a").and(not_null("b").or(value("a").eq(1_i64)));
        assert_eq!(cond.field_ids(), vec!["a", "b", "a"]);
        assert!(Condition::always().field_ids().is_empty());
    }

    #[test]
    fn map_field_ids_rewrites_leaves() {
        let mut cond = null("x_${i}").and(value("y_${i}").eq(1_i64));
        cond.map_field_ids(&mut |id| *id = id.replace("${i}", "2"));
        assert_eq!(cond.field_ids(), vec!["x_2", "y_2"]);
    }

    #[test]
    fn display() {
        let cond = !value("age").gte(18_i64).and(null("dob"));
        assert_eq!(cond.to_string(), "^(VALUE(age) >= 18 AND NULL(dob))");
        assert_eq!(CompareOp::Neq.to_string(), "!=");
    }

    #[test]
    fn all_compare_ops() {
        let ops = vec![
            (value("f").eq(1_i64), CompareOp::Eq),
            (value("f").neq(1_i64), CompareOp::Neq),
            (value("f").gt(1_i64), CompareOp::Gt),
            (value("f").gte(1_i64), CompareOp::Gte),
            (value("f").lt(1_i64), CompareOp::Lt),
            (value("f").lte(1_i64), CompareOp::Lte),
        ];
        for (cond, expected_op) in ops {
            match cond.kind {
                ConditionKind::Expression { op, .. } => assert_eq!(op, expected_op),
                other => panic!("expected Expression, got {other:?}"),
            }
        }
    }
}
