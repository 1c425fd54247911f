//! DocumentStore and DocumentReader trait definitions.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StorageResult;

/// Principal whose view permission makes a document visible to everyone.
pub const EVERYONE_PRINCIPAL: &str = "system.Everyone";

/// Status values that hide a document from every kind of lookup.
pub const HIDDEN_STATUSES: [&str; 2] = ["deleted", "replaced"];

/// A stored document.
///
/// The payload is an opaque JSON value shared behind an `Arc`, so cloning a
/// document out of a cache is cheap. Typed field access belongs to the schema
/// layer; only the handful of fields lookups depend on get accessors here.
#[derive(Debug, Clone, PartialEq)]
pub struct Document(Arc<Value>);

impl Document {
    /// Wraps a JSON value.
    pub fn new(value: Value) -> Self {
        Self(Arc::new(value))
    }

    /// The raw JSON value.
    pub fn value(&self) -> &Value {
        &self.0
    }

    /// Looks up a top-level field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// The document's `uuid` field, when present and a string.
    pub fn uuid(&self) -> Option<&str> {
        self.get("uuid").and_then(Value::as_str)
    }

    /// Type names listed in the `@type` array.
    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.get("@type")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
    }

    /// Returns true if `@type` lists `type_name`.
    pub fn has_type(&self, type_name: &str) -> bool {
        self.types().any(|t| t == type_name)
    }

    /// The lifecycle status, if any.
    pub fn status(&self) -> Option<&str> {
        self.get("status").and_then(Value::as_str)
    }

    /// Returns false for `deleted` and `replaced` documents.
    pub fn has_visible_status(&self) -> bool {
        self.status()
            .map_or(true, |status| !HIDDEN_STATUSES.contains(&status))
    }
}

impl From<Value> for Document {
    fn from(value: Value) -> Self {
        Self::new(value)
    }
}

/// A path query together with its requested ordering.
///
/// Serialized as `{"path": ..., "orderBy": ...}`, the shape the batched
/// statement reads from its JSON payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathQuerySpec {
    /// Concrete (already interpolated) path predicate.
    pub path: String,
    /// Dot-separated field path to order matches by.
    #[serde(rename = "orderBy", default, skip_serializing_if = "Option::is_none")]
    pub order_by: Option<String>,
}

impl PathQuerySpec {
    pub fn new(path: impl Into<String>, order_by: Option<String>) -> Self {
        Self {
            path: path.into(),
            order_by,
        }
    }
}

/// One snapshot of pending lookups, executed as a single round trip.
///
/// Row indexes for unique-key and path-query results refer to positions in
/// `unique_keys` and `path_queries` respectively.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchQuery {
    /// Identifiers to fetch.
    #[serde(rename = "id")]
    pub ids: Vec<String>,
    /// Unique-key path predicates, evaluated against each item's unique keys.
    #[serde(rename = "uk")]
    pub unique_keys: Vec<String>,
    /// Path predicates evaluated against each item's object.
    #[serde(rename = "jp")]
    pub path_queries: Vec<PathQuerySpec>,
}

impl BatchQuery {
    /// Total number of lookups in the batch.
    pub fn len(&self) -> usize {
        self.ids.len() + self.unique_keys.len() + self.path_queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A result row of a batched query, tagged by the kind of lookup it answers.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchRow {
    /// A document matched a requested identifier.
    Document { id: String, document: Document },
    /// A document matched the unique key at `index`.
    UniqueKey {
        index: usize,
        id: String,
        document: Document,
    },
    /// Ordered identifiers matching the path query at `index`. Always present,
    /// possibly empty.
    PathQuery { index: usize, ids: Vec<String> },
}

/// Access policy applied to every lookup kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPolicy {
    principal: String,
}

impl AccessPolicy {
    pub fn new(principal: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
        }
    }

    /// Policy admitting documents viewable by everyone.
    pub fn everyone() -> Self {
        Self::new(EVERYONE_PRINCIPAL)
    }

    pub fn principal(&self) -> &str {
        &self.principal
    }

    /// Path predicate evaluated against an item's `allowed` value.
    pub fn view_predicate(&self) -> String {
        format!("$.view[*] == {}", Value::String(self.principal.clone()))
    }
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self::everyone()
    }
}

/// Executes batched reads against one snapshot.
///
/// Implementations must apply the access policy and hide deleted or replaced
/// documents for all three lookup kinds.
#[async_trait]
pub trait DocumentReader: Send + Sync + 'static {
    /// Executes every lookup of `query` in one round trip.
    ///
    /// Any failure aborts the whole batch; no partial rows are returned.
    async fn fetch_batch(&self, query: &BatchQuery) -> StorageResult<Vec<BatchRow>>;
}

/// A pool of snapshot connections.
///
/// `acquire` hands out a connection inside a read-only transaction;
/// `release` always rolls it back.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    type Connection: DocumentReader;

    /// Acquires a connection and begins a read-only snapshot transaction.
    ///
    /// The snapshot is fixed before this returns: writes committed after
    /// `acquire` are never visible through the connection.
    async fn acquire(&self) -> StorageResult<Self::Connection>;

    /// Rolls back and releases a connection. An `erred` connection is
    /// discarded instead of being returned to the pool.
    async fn release(&self, connection: &Self::Connection, erred: bool) -> StorageResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_document_accessors() {
        let doc = Document::new(json!({
            "uuid": "a",
            "@type": ["Biosample", "Item"],
            "status": "released",
        }));
        assert_eq!(doc.uuid(), Some("a"));
        assert!(doc.has_type("Item"));
        assert!(!doc.has_type("File"));
        assert!(doc.has_visible_status());
    }

    #[test]
    fn test_deleted_and_replaced_are_hidden() {
        for status in HIDDEN_STATUSES {
            let doc = Document::new(json!({ "status": status }));
            assert!(!doc.has_visible_status(), "{status} should be hidden");
        }
        assert!(Document::new(json!({})).has_visible_status());
    }

    #[test]
    fn test_batch_query_payload_shape() {
        let query = BatchQuery {
            ids: vec!["a".to_string()],
            unique_keys: vec![r#"$."accession"=="X1""#.to_string()],
            path_queries: vec![
                PathQuerySpec::new("$.x == 1", None),
                PathQuerySpec::new("$.y == 2", Some("date".to_string())),
            ],
        };
        let payload = serde_json::to_value(&query).unwrap();
        assert_eq!(
            payload,
            json!({
                "id": ["a"],
                "uk": ["$.\"accession\"==\"X1\""],
                "jp": [{"path": "$.x == 1"}, {"path": "$.y == 2", "orderBy": "date"}],
            })
        );
        assert_eq!(query.len(), 4);
    }

    #[test]
    fn test_view_predicate_quotes_principal() {
        assert_eq!(
            AccessPolicy::everyone().view_predicate(),
            r#"$.view[*] == "system.Everyone""#
        );
        assert_eq!(
            AccessPolicy::new("group \"x\"").view_predicate(),
            r#"$.view[*] == "group \"x\"""#
        );
    }
}
