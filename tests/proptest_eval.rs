mod strategies;

use proptest::prelude::*;
use redmatch::{compile, resolve_graph, Row};
use strategies::{arb_condition, arb_resource_chain, arb_row};

proptest! {
    /// AND is the conjunction of its operands, row by row.
    #[test]
    fn and_is_conjunction(a in arb_condition(), b in arb_condition(), row in arb_row()) {
        let expected = a.evaluate(&row) && b.evaluate(&row);
        prop_assert_eq!(a.and(b).evaluate(&row), expected);
    }

    /// OR is the disjunction of its operands, row by row.
    #[test]
    fn or_is_disjunction(a in arb_condition(), b in arb_condition(), row in arb_row()) {
        let expected = a.evaluate(&row) || b.evaluate(&row);
        prop_assert_eq!(a.or(b).evaluate(&row), expected);
    }

    /// Negation inverts the final result.
    #[test]
    fn negation_inverts(c in arb_condition(), row in arb_row()) {
        let plain = c.evaluate(&row);
        prop_assert_eq!((!c).evaluate(&row), !plain);
    }

    /// NULL and NOTNULL are complementary for every field.
    #[test]
    fn null_complements_not_null(row in arb_row(), field in prop::sample::select(&["x", "y", "s", "q"][..])) {
        prop_assert_ne!(
            redmatch::types::null(field).evaluate(&row),
            redmatch::types::not_null(field).evaluate(&row)
        );
    }

    /// An empty row never satisfies a comparison.
    #[test]
    fn empty_row_never_matches_comparisons(v in any::<i64>()) {
        let row = Row::new();
        prop_assert!(!redmatch::types::value("x").eq(v).evaluate(&row));
        prop_assert!(!redmatch::types::value("x").neq(v).evaluate(&row));
    }

    /// Evaluation never panics on arbitrary row text.
    #[test]
    fn eval_never_panics(c in arb_condition(), x in ".{0,12}", s in ".{0,12}") {
        let row = Row::new().set("x", x).set("s", s);
        let _ = c.evaluate(&row);
    }

    /// REPEAT(start..end) yields one sibling rule per bound value.
    #[test]
    fn repeat_yields_one_rule_per_value(start in 0_i64..6, end in 0_i64..6) {
        let doc = compile(&format!(
            "REPEAT({start}..{end}: x) NOTNULL(dx_${{x}}) {{ Condition<c${{x}}>: * code = CONCEPT(dx_${{x}}) }}"
        ));
        let expected = usize::try_from((end - start + 1).max(0)).unwrap();
        prop_assert_eq!(doc.rules.len(), expected);
    }

    /// Resolution is deterministic and puts targets before referencing resources.
    #[test]
    fn resolution_is_deterministic_and_ordered(source in arb_resource_chain()) {
        let doc = compile(&source);
        prop_assert!(!doc.has_errors(), "{:?}", doc.diagnostics);
        let first = resolve_graph(&doc);
        let second = resolve_graph(&doc);
        prop_assert!(!first.is_fatal());
        prop_assert_eq!(&first, &second);
        for resource in doc.resources() {
            let from = first.order.iter().position(|k| *k == resource.key()).unwrap();
            for target in resource.references() {
                let to = first.order.iter().position(|k| *k == target).unwrap();
                prop_assert!(to < from);
            }
        }
    }
}
