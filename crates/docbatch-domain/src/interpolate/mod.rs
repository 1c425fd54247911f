//! Variable interpolation for path queries.
//!
//! Placeholders are `$name` or positional `$0`, `$1`, ... and are replaced by
//! the JSON serialization of the matching variable, so
//!
//! ```text
//! $.donor == $uuid      with {"uuid": "d-1"}   =>   $.donor == "d-1"
//! ```
//!
//! The root `$` of a path (`$.field`, `$."@type"`) is never a placeholder.
//! Every occurrence is replaced; a variable that does not exist becomes
//! `null`. The output is used verbatim as the path-query cache key.

mod interpolate_proptest;

use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::Value;

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*|[0-9]+)").expect("placeholder pattern is valid")
    })
}

/// Substitutes variables into `path`.
///
/// `variables` is an object (looked up by name), an array (looked up by
/// position) or a scalar, which acts as a one-element array.
pub fn interpolate(path: &str, variables: &Value) -> String {
    placeholder()
        .replace_all(path, |caps: &Captures<'_>| {
            lookup(variables, &caps[1]).map_or_else(|| "null".to_string(), Value::to_string)
        })
        .into_owned()
}

fn lookup<'a>(variables: &'a Value, name: &str) -> Option<&'a Value> {
    match variables {
        Value::Object(map) => map.get(name),
        Value::Array(items) => name.parse::<usize>().ok().and_then(|i| items.get(i)),
        scalar => (name == "0").then_some(scalar),
    }
}
