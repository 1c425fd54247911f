//! Path predicate engine for the in-memory backend.
//!
//! Evaluates the subset of the SQL/JSON path predicate language the loader
//! emits, with PostgreSQL's lax-mode semantics for `@@`:
//!
//! ```text
//! $."@type"[*] == "Biosample" && $.donor == "d-1" && $.status != "deleted"
//! ```
//!
//! - member access (`.key`, `."quoted key"`, `.*`) unwraps arrays one level
//! - `[*]` and `[n]` select array elements; on a non-array `[*]`/`[0]` yield the item
//! - comparisons are existential over both operand sequences
//! - comparing incompatible types yields *unknown*, which `@@` treats as no match
//!
//! Unbound `$variables` are rejected at parse time; interpolation must have
//! replaced them.

mod eval;
mod parser;

#[cfg(test)]
mod jsonpath_proptest;

use serde_json::Value;

use crate::error::{StorageError, StorageResult};

pub(crate) use eval::Truth;

/// A path member or element selector.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Accessor {
    Member(String),
    AnyMember,
    Element(usize),
    AnyElement,
}

/// A path rooted at `$`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Path {
    pub accessors: Vec<Accessor>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Operand {
    Path(Path),
    Literal(Value),
    Variable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Predicate {
    Compare(Operand, CmpOp, Operand),
    Exists(Path),
    /// A bare path; true only when it selects exactly one `true`.
    PathValue(Path),
    Literal(bool),
    Not(Box<Predicate>),
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
}

impl Predicate {
    fn first_variable(&self) -> Option<&str> {
        match self {
            Predicate::Compare(lhs, _, rhs) => [lhs, rhs].into_iter().find_map(|op| match op {
                Operand::Variable(name) => Some(name.as_str()),
                _ => None,
            }),
            Predicate::Not(inner) => inner.first_variable(),
            Predicate::And(lhs, rhs) | Predicate::Or(lhs, rhs) => {
                lhs.first_variable().or_else(|| rhs.first_variable())
            }
            Predicate::Exists(_) | Predicate::PathValue(_) | Predicate::Literal(_) => None,
        }
    }
}

/// A parsed path predicate.
#[derive(Debug, Clone)]
pub struct PathPredicate {
    predicate: Predicate,
}

impl PathPredicate {
    /// Parses a path predicate.
    pub fn parse(source: &str) -> StorageResult<Self> {
        let predicate =
            parser::parse_predicate(source).map_err(|message| StorageError::InvalidPathQuery {
                query: source.to_string(),
                message,
            })?;

        if let Some(name) = predicate.first_variable() {
            return Err(StorageError::InvalidPathQuery {
                query: source.to_string(),
                message: format!("unbound variable ${name}"),
            });
        }

        Ok(Self { predicate })
    }

    /// Returns true if the predicate holds for `value` (`value @@ predicate`).
    pub fn matches(&self, value: &Value) -> bool {
        eval::evaluate(&self.predicate, value) == Truth::True
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn matches(query: &str, value: Value) -> bool {
        PathPredicate::parse(query).unwrap().matches(&value)
    }

    #[test]
    fn test_equality_on_member() {
        assert!(matches(r#"$.status == "released""#, json!({"status": "released"})));
        assert!(!matches(r#"$.status == "released""#, json!({"status": "deleted"})));
    }

    #[test]
    fn test_quoted_member_and_wildcard() {
        let doc = json!({"@type": ["Biosample", "Item"]});
        assert!(matches(r#"$."@type"[*] == "Item""#, doc.clone()));
        assert!(!matches(r#"$."@type"[*] == "File""#, doc));
    }

    #[test]
    fn test_lax_comparison_unwraps_arrays() {
        let keys = json!({"accession": ["X1", "X2"]});
        assert!(matches(r#"$."accession"=="X2""#, keys.clone()));
        assert!(!matches(r#"$."accession"=="X3""#, keys));
    }

    #[test]
    fn test_missing_member_is_no_match_for_any_operator() {
        let doc = json!({"a": 1});
        assert!(!matches(r#"$.status == "x""#, doc.clone()));
        assert!(!matches(r#"$.status != "x""#, doc));
    }

    #[test]
    fn test_logical_operators() {
        let doc = json!({"a": 1, "b": "x", "status": "released"});
        assert!(matches(r#"$.a == 1 && $.b == "x""#, doc.clone()));
        assert!(matches(r#"$.a == 2 || $.b == "x""#, doc.clone()));
        assert!(matches(r#"!($.a == 2)"#, doc.clone()));
        assert!(matches(
            r#"$.status != "deleted" && $.status != "replaced""#,
            doc
        ));
    }

    #[test]
    fn test_type_mismatch_is_unknown_not_false() {
        let doc = json!({"a": "1"});
        assert!(!matches("$.a == 1", doc.clone()));
        // NOT unknown is still unknown
        assert!(!matches("!($.a == 1)", doc));
    }

    #[test]
    fn test_numeric_ordering() {
        let doc = json!({"n": 5});
        assert!(matches("$.n > 4", doc.clone()));
        assert!(matches("$.n <= 5", doc.clone()));
        assert!(!matches("$.n < 5", doc));
    }

    #[test]
    fn test_exists_and_element_index() {
        let doc = json!({"files": [{"id": "f1"}, {"id": "f2"}]});
        assert!(matches("exists($.files[1].id)", doc.clone()));
        assert!(!matches("exists($.files[2])", doc.clone()));
        assert!(matches(r#"$.files.id == "f2""#, doc));
    }

    #[test]
    fn test_null_literal() {
        assert!(matches("$.a == null", json!({"a": null})));
        assert!(!matches("$.a == null", json!({"a": 1})));
    }

    #[test]
    fn test_unbound_variable_is_rejected() {
        let err = PathPredicate::parse("$.donor == $uuid").unwrap_err();
        assert!(err.to_string().contains("unbound variable $uuid"));
    }

    #[test]
    fn test_syntax_error_is_rejected() {
        assert!(matches!(
            PathPredicate::parse("$.a == "),
            Err(StorageError::InvalidPathQuery { .. })
        ));
        assert!(PathPredicate::parse("").is_err());
    }

    #[test]
    fn test_deep_nesting_is_an_invalid_query() {
        let query = format!("{}$.a == 1{}", "(".repeat(3_000), ")".repeat(3_000));
        match PathPredicate::parse(&query) {
            Err(StorageError::InvalidPathQuery { message, .. }) => {
                assert!(message.contains("nesting"), "{message}");
            }
            other => panic!("expected InvalidPathQuery, got {other:?}"),
        }
    }

    #[test]
    fn test_long_conjunction_evaluates() {
        let query = vec![r#"$.status != "deleted""#; 5_000].join(" && ");
        assert!(matches(&query, json!({"status": "released"})));
        assert!(!matches(&query, json!({"status": "deleted"})));
    }

    #[test]
    fn test_escaped_strings() {
        assert!(matches(r#"$.name == "a \"b\"""#, json!({"name": "a \"b\""})));
        assert!(matches(r#"$.name == "\u00e9""#, json!({"name": "é"})));
    }
}
