//! Canonical lookup keys.

use serde_json::Value;

/// Unique-key predicate for `namespace`/`name`, evaluated against an item's
/// unique keys: `$."accession"=="ENCSR000AAA"`.
///
/// Both parts are JSON encoded, so the same pair always yields the same text
/// and arbitrary characters cannot break out of the string literals.
pub fn unique_key_query(namespace: &str, name: &str) -> String {
    format!(
        "$.{}=={}",
        Value::String(namespace.to_string()),
        Value::String(name.to_string())
    )
}
