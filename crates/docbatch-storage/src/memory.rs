//! In-memory storage implementation for testing.
//!
//! Items live in a copy-on-write `BTreeMap` keyed by identifier. `acquire`
//! hands out the current map behind an `Arc`, so a connection sees a frozen
//! snapshot: items inserted afterwards are invisible to it, as they would be
//! to a repeatable-read transaction.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use tracing::{debug, instrument};

use crate::error::{StorageError, StorageResult};
use crate::jsonpath::PathPredicate;
use crate::traits::{
    AccessPolicy, BatchQuery, BatchRow, Document, DocumentReader, DocumentStore, PathQuerySpec,
    HIDDEN_STATUSES,
};

/// One row of the item table.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredItem {
    /// Primary identifier.
    pub id: String,
    /// The document body.
    pub object: Value,
    /// Namespaced unique keys, `{namespace: [names]}`.
    pub unique_keys: Value,
    /// Access control lists, `{"view": [principals]}`.
    pub allowed: Value,
}

impl StoredItem {
    /// Creates an item viewable by everyone, with no unique keys.
    pub fn new(id: impl Into<String>, object: Value) -> Self {
        Self {
            id: id.into(),
            object,
            unique_keys: Value::Object(Map::new()),
            allowed: json!({ "view": [AccessPolicy::everyone().principal()] }),
        }
    }

    /// Adds a unique key under `namespace`.
    pub fn with_unique_key(mut self, namespace: &str, name: &str) -> Self {
        if !self.unique_keys.is_object() {
            self.unique_keys = Value::Object(Map::new());
        }
        if let Value::Object(keys) = &mut self.unique_keys {
            let names = keys
                .entry(namespace.to_string())
                .or_insert_with(|| Value::Array(Vec::new()));
            if let Value::Array(names) = names {
                names.push(Value::String(name.to_string()));
            }
        }
        self
    }

    /// Replaces the access control lists.
    pub fn with_allowed(mut self, allowed: Value) -> Self {
        self.allowed = allowed;
        self
    }
}

/// In-memory implementation of DocumentStore.
///
/// Counts every `fetch_batch` call across all of its connections so tests can
/// assert on round trips.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    items: RwLock<Arc<BTreeMap<String, StoredItem>>>,
    policy: AccessPolicy,
    round_trips: Arc<AtomicUsize>,
}

impl MemoryDocumentStore {
    /// Creates a new empty store using the everyone-can-view policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store admitting documents viewable by `policy`'s principal.
    pub fn with_policy(policy: AccessPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    /// Inserts or replaces an item. Existing snapshots are unaffected.
    pub fn insert(&self, item: StoredItem) {
        let mut items = self.items.write();
        Arc::make_mut(&mut items).insert(item.id.clone(), item);
    }

    /// Number of batches executed so far by all connections.
    pub fn round_trips(&self) -> usize {
        self.round_trips.load(AtomicOrdering::SeqCst)
    }

    /// Number of stored items.
    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    type Connection = MemorySnapshot;

    async fn acquire(&self) -> StorageResult<MemorySnapshot> {
        let view = PathPredicate::parse(&self.policy.view_predicate())?;
        Ok(MemorySnapshot {
            items: Arc::clone(&self.items.read()),
            view,
            round_trips: Arc::clone(&self.round_trips),
            released: AtomicBool::new(false),
        })
    }

    async fn release(&self, connection: &MemorySnapshot, _erred: bool) -> StorageResult<()> {
        connection.released.store(true, AtomicOrdering::SeqCst);
        Ok(())
    }
}

/// A frozen view of a [`MemoryDocumentStore`].
#[derive(Debug)]
pub struct MemorySnapshot {
    items: Arc<BTreeMap<String, StoredItem>>,
    view: PathPredicate,
    round_trips: Arc<AtomicUsize>,
    released: AtomicBool,
}

impl MemorySnapshot {
    fn is_visible(&self, item: &StoredItem) -> bool {
        let hidden = item
            .object
            .get("status")
            .and_then(Value::as_str)
            .is_some_and(|status| HIDDEN_STATUSES.contains(&status));
        !hidden && self.view.matches(&item.allowed)
    }

    fn path_query_ids(&self, spec: &PathQuerySpec, predicate: &PathPredicate) -> Vec<String> {
        let mut matched: Vec<&StoredItem> = self
            .items
            .values()
            .filter(|item| self.is_visible(item) && predicate.matches(&item.object))
            .collect();

        if let Some(order_by) = &spec.order_by {
            matched.sort_by(|a, b| {
                compare_jsonb(
                    field_path(&a.object, order_by),
                    field_path(&b.object, order_by),
                )
                .then_with(|| a.id.cmp(&b.id))
            });
        }

        matched.into_iter().map(|item| item.id.clone()).collect()
    }
}

#[async_trait]
impl DocumentReader for MemorySnapshot {
    #[instrument(skip(self, query), fields(keys = query.len()))]
    async fn fetch_batch(&self, query: &BatchQuery) -> StorageResult<Vec<BatchRow>> {
        if self.released.load(AtomicOrdering::SeqCst) {
            return Err(StorageError::TransactionError {
                message: "connection already released".to_string(),
            });
        }
        self.round_trips.fetch_add(1, AtomicOrdering::SeqCst);

        // Parse everything up front so a malformed query fails the whole batch.
        let unique_keys = query
            .unique_keys
            .iter()
            .map(|q| PathPredicate::parse(q))
            .collect::<StorageResult<Vec<_>>>()?;
        let path_queries = query
            .path_queries
            .iter()
            .map(|spec| PathPredicate::parse(&spec.path).map(|p| (spec, p)))
            .collect::<StorageResult<Vec<_>>>()?;

        let mut rows = Vec::new();

        for id in &query.ids {
            if let Some(item) = self.items.get(id).filter(|item| self.is_visible(item)) {
                rows.push(BatchRow::Document {
                    id: item.id.clone(),
                    document: Document::new(item.object.clone()),
                });
            }
        }

        for (index, predicate) in unique_keys.iter().enumerate() {
            for item in self.items.values() {
                if self.is_visible(item) && predicate.matches(&item.unique_keys) {
                    rows.push(BatchRow::UniqueKey {
                        index,
                        id: item.id.clone(),
                        document: Document::new(item.object.clone()),
                    });
                }
            }
        }

        for (index, (spec, predicate)) in path_queries.iter().enumerate() {
            rows.push(BatchRow::PathQuery {
                index,
                ids: self.path_query_ids(spec, predicate),
            });
        }

        debug!(rows = rows.len(), "memory batch executed");
        Ok(rows)
    }
}

/// Follows a dot-separated field path (`object #> '{a,b}'`).
fn field_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Orders values the way PostgreSQL orders `jsonb`, with SQL NULL (a missing
/// field) sorting last.
fn compare_jsonb(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(value: &Value) -> u8 {
        match value {
            Value::Null => 0,
            Value::String(_) => 1,
            Value::Number(_) => 2,
            Value::Bool(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => match (a, b) {
            (Value::String(x), Value::String(y)) => x.cmp(y),
            (Value::Number(x), Value::Number(y)) => x
                .as_f64()
                .partial_cmp(&y.as_f64())
                .unwrap_or(Ordering::Equal),
            (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
            (Value::Array(x), Value::Array(y)) => x.len().cmp(&y.len()).then_with(|| {
                x.iter()
                    .zip(y)
                    .map(|(l, r)| compare_jsonb(Some(l), Some(r)))
                    .find(|o| o.is_ne())
                    .unwrap_or(Ordering::Equal)
            }),
            (Value::Object(x), Value::Object(y)) => x
                .len()
                .cmp(&y.len())
                .then_with(|| a.to_string().cmp(&b.to_string())),
            _ => rank(a).cmp(&rank(b)),
        },
    }
}
