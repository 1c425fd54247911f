//! Property-based tests for the path predicate parser and evaluator.

use proptest::prelude::*;
use serde_json::json;

use super::parser::MAX_NESTING;
use super::PathPredicate;
use crate::error::StorageError;

proptest! {
    /// Arbitrary text over the predicate alphabet parses or fails, never panics.
    #[test]
    fn prop_parse_never_panics(query in "[()!$.a-z0-9 =<>&|\"\\[\\]*]{0,300}") {
        let _ = PathPredicate::parse(&query);
    }

    #[test]
    fn prop_negations_flip_the_result(
        negations in 0usize..MAX_NESTING,
        field in 0i64..4,
        literal in 0i64..4,
    ) {
        let query = format!("{}($.a == {literal})", "!".repeat(negations));
        let predicate = PathPredicate::parse(&query).unwrap();
        let expected = (field == literal) ^ (negations % 2 == 1);
        prop_assert_eq!(predicate.matches(&json!({ "a": field })), expected);
    }

    #[test]
    fn prop_nesting_past_the_bound_is_rejected(depth in (MAX_NESTING + 1)..2_000) {
        let query = format!("{}$.a == 1{}", "(".repeat(depth), ")".repeat(depth));
        let is_invalid = matches!(
            PathPredicate::parse(&query),
            Err(StorageError::InvalidPathQuery { .. })
        );
        prop_assert!(is_invalid);
    }

    #[test]
    fn prop_conjunction_holds_when_every_term_holds(
        excluded in prop::collection::vec(0i64..6, 1..200),
        field in 0i64..6,
    ) {
        let query = excluded
            .iter()
            .map(|k| format!("$.a != {k}"))
            .collect::<Vec<_>>()
            .join(" && ");
        let predicate = PathPredicate::parse(&query).unwrap();
        prop_assert_eq!(
            predicate.matches(&json!({ "a": field })),
            !excluded.contains(&field)
        );
    }

    #[test]
    fn prop_disjunction_holds_when_any_term_holds(
        allowed in prop::collection::vec(0i64..6, 1..200),
        field in 0i64..6,
    ) {
        let query = allowed
            .iter()
            .map(|k| format!("$.a == {k}"))
            .collect::<Vec<_>>()
            .join(" || ");
        let predicate = PathPredicate::parse(&query).unwrap();
        prop_assert_eq!(
            predicate.matches(&json!({ "a": field })),
            allowed.contains(&field)
        );
    }
}
