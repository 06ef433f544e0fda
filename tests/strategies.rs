use proptest::prelude::*;
use redmatch::types::{not_null, null, value, Condition};
use redmatch::Row;

// --- Fixed field set ---
// x, y : integer-like text, sometimes empty or absent
// s    : one of a few words

const WORDS: &[&str] = &["", "a", "b", "abc"];
const NUMBERS: &[&str] = &["", "0", "1", "2", "3", "x"];

fn arb_cell(choices: &'static [&'static str]) -> impl Strategy<Value = Option<&'static str>> {
    prop::option::of(prop::sample::select(choices))
}

/// Generate a row over the fixed field set. A `None` cell is absent.
pub fn arb_row() -> impl Strategy<Value = Row> {
    (arb_cell(NUMBERS), arb_cell(NUMBERS), arb_cell(WORDS)).prop_map(|(x, y, s)| {
        let mut row = Row::new();
        for (id, cell) in [("x", x), ("y", y), ("s", s)] {
            if let Some(v) = cell {
                row.insert(id, v);
            }
        }
        row
    })
}

fn arb_leaf() -> impl Strategy<Value = Condition> {
    prop_oneof![
        Just(Condition::always()),
        Just(Condition::never()),
        prop::sample::select(&["x", "y", "s"][..]).prop_map(null),
        prop::sample::select(&["x", "y", "s"][..]).prop_map(not_null),
        (prop::sample::select(&["x", "y"][..]), 0_i64..4, 0_u8..6).prop_map(|(f, v, op)| {
            let f = value(f);
            match op {
                0 => f.eq(v),
                1 => f.neq(v),
                2 => f.gt(v),
                3 => f.gte(v),
                4 => f.lt(v),
                _ => f.lte(v),
            }
        }),
        prop::sample::select(&WORDS[1..]).prop_map(|w| value("s").eq(w)),
    ]
}

/// Generate a condition tree of AND, OR and negation over the fixed fields.
pub fn arb_condition() -> impl Strategy<Value = Condition> {
    arb_leaf().prop_recursive(4, 24, 2, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone()).prop_map(|(a, b)| a.and(b)),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| a.or(b)),
            inner.prop_map(|c| !c),
        ]
    })
}

/// A chain of resources, each optionally referencing an earlier one, and
/// optionally reading row data. Rendered as rule text.
pub fn arb_resource_chain() -> impl Strategy<Value = String> {
    prop::collection::vec((any::<bool>(), prop::option::of(0_usize..8)), 1..8).prop_map(|specs| {
        let mut rules = Vec::new();
        for (i, (reads_data, target)) in specs.iter().enumerate() {
            let mut attrs = Vec::new();
            if *reads_data {
                attrs.push("* valueString = VALUE(s)".to_owned());
            } else {
                attrs.push("* status = CODE_LITERAL(final)".to_owned());
            }
            if let Some(t) = target.filter(|t| *t < i) {
                attrs.push(format!("* hasMember = REF(Observation<o{t}>)"));
            }
            rules.push(format!("TRUE {{ Observation<o{i}>: {} }}", attrs.join(" ")));
        }
        rules.join("\n")
    })
}
