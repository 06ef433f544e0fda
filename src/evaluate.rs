use std::borrow::Cow;

use crate::row::Row;
use crate::schema::Schema;
use crate::types::{Condition, ConditionKind, NodeOp};

impl Condition {
    /// Evaluate against one row without schema knowledge.
    #[must_use]
    pub fn evaluate(&self, row: &Row) -> bool {
        eval(self, row, None)
    }
}

/// Evaluate `condition` against one row, using `schema` for multi-select
/// `NOTNULL` checks.
///
/// Missing or empty values never match and never fail.
#[must_use]
pub fn evaluate(condition: &Condition, row: &Row, schema: &Schema) -> bool {
    eval(condition, row, Some(schema))
}

pub(crate) fn eval(condition: &Condition, row: &Row, schema: Option<&Schema>) -> bool {
    let result = match &condition.kind {
        ConditionKind::True => true,
        ConditionKind::False => false,
        ConditionKind::Null(field_id) => !is_present(field_id, row, schema),
        ConditionKind::NotNull(field_id) => is_present(field_id, row, schema),
        ConditionKind::Expression {
            field_id,
            op,
            value,
        } => raw_value(field_id, row)
            .filter(|raw| !raw.is_empty())
            .and_then(|raw| value.compare_raw(&raw, *op))
            .unwrap_or(false),
        ConditionKind::Node {
            op: NodeOp::And,
            left,
            right,
        } => eval(left, row, schema) && eval(right, row, schema),
        ConditionKind::Node {
            op: NodeOp::Or,
            left,
            right,
        } => eval(left, row, schema) || eval(right, row, schema),
    };
    result != condition.negated
}

pub(crate) fn is_present(field_id: &str, row: &Row, schema: Option<&Schema>) -> bool {
    match schema.and_then(|s| s.field(field_id)) {
        Some(field) if field.is_multi_select() => field
            .options()
            .iter()
            .any(|o| row.get(o.field_id()).is_some_and(|v| !v.is_empty() && v != "0")),
        _ => row.non_empty(field_id).is_some(),
    }
}

/// Row value for `field_id`. An absent `x___n` reads as `"1"` when `x` holds
/// `n` and `"0"` otherwise.
fn raw_value<'r>(field_id: &str, row: &'r Row) -> Option<Cow<'r, str>> {
    if let Some(v) = row.get(field_id) {
        return Some(Cow::Borrowed(v));
    }
    let (base, code) = field_id.split_once("___")?;
    let selected = row.non_empty(base)?;
    Some(Cow::Borrowed(if selected == code { "1" } else { "0" }))
}
