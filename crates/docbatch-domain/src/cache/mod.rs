//! Per-request result caches and pending lookup sets.
//!
//! One [`LoaderCache`] lives as long as one loader, i.e. one unit of work.
//! Entries are never evicted or overwritten: within a snapshot transaction a
//! lookup always has the same answer, so the first answer is kept.
//!
//! # Key Design
//!
//! - identifiers are cached as given
//! - unique keys are cached by their canonical predicate text
//!   (see [`crate::keys::unique_key_query`]) and map to an identifier
//! - path queries are cached by `(interpolated text, order_by)`
//!
//! Negative answers are cached too, so asking again for a missing document
//! does not cost another round trip.

use std::collections::HashMap;
use std::sync::Arc;

use docbatch_storage::{BatchQuery, BatchRow, Document, PathQuerySpec};
use indexmap::IndexSet;
use tracing::warn;

/// A lookup waiting for a batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PendingKey {
    Id(String),
    UniqueKey(String),
    PathQuery(PathQuerySpec),
}

/// Insertion-ordered sets of lookups that have not been resolved yet.
#[derive(Debug, Clone, Default)]
pub struct PendingSet {
    ids: IndexSet<String>,
    unique_keys: IndexSet<String>,
    path_queries: IndexSet<PathQuerySpec>,
}

impl PendingSet {
    /// Adds a key. Returns false if it was already pending.
    pub fn insert(&mut self, key: &PendingKey) -> bool {
        match key {
            PendingKey::Id(id) => self.ids.insert(id.clone()),
            PendingKey::UniqueKey(query) => self.unique_keys.insert(query.clone()),
            PendingKey::PathQuery(spec) => self.path_queries.insert(spec.clone()),
        }
    }

    pub fn contains(&self, key: &PendingKey) -> bool {
        match key {
            PendingKey::Id(id) => self.ids.contains(id),
            PendingKey::UniqueKey(query) => self.unique_keys.contains(query),
            PendingKey::PathQuery(spec) => self.path_queries.contains(spec),
        }
    }

    /// Total number of pending lookups.
    pub fn len(&self) -> usize {
        self.ids.len() + self.unique_keys.len() + self.path_queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Puts `earlier` in front of the current keys, keeping its order.
    pub fn prepend(&mut self, earlier: PendingSet) {
        let later = std::mem::replace(self, earlier);
        self.ids.extend(later.ids);
        self.unique_keys.extend(later.unique_keys);
        self.path_queries.extend(later.path_queries);
    }

    /// Builds the store query. Row indexes refer to positions in this set.
    pub fn to_query(&self) -> BatchQuery {
        BatchQuery {
            ids: self.ids.iter().cloned().collect(),
            unique_keys: self.unique_keys.iter().cloned().collect(),
            path_queries: self.path_queries.iter().cloned().collect(),
        }
    }
}

/// Resolved lookups of one loader.
#[derive(Debug, Default)]
pub struct LoaderCache {
    /// `None` records a confirmed absence.
    documents: HashMap<String, Option<Document>>,
    /// Unique-key predicate → identifier of the matching document.
    unique_keys: HashMap<String, Option<String>>,
    path_queries: HashMap<PathQuerySpec, Arc<[String]>>,
}

impl LoaderCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached answer for an identifier: `Some(None)` if known to be absent.
    pub fn document(&self, id: &str) -> Option<Option<Document>> {
        self.documents.get(id).cloned()
    }

    /// Cached answer for a unique-key predicate.
    pub fn unique_key(&self, query: &str) -> Option<Option<Document>> {
        self.unique_keys.get(query).map(|id| {
            id.as_ref()
                .and_then(|id| self.documents.get(id).cloned().flatten())
        })
    }

    /// Cached identifiers for a path query.
    pub fn path_query(&self, spec: &PathQuerySpec) -> Option<Arc<[String]>> {
        self.path_queries.get(spec).cloned()
    }

    /// Stores the rows of a batch built from `snapshot`.
    ///
    /// Every key of the snapshot gets an entry: keys without a row are
    /// recorded as absent (or as an empty path-query result).
    pub fn apply(&mut self, snapshot: &PendingSet, rows: Vec<BatchRow>) {
        for row in rows {
            match row {
                BatchRow::Document { id, document } => {
                    self.documents.entry(id).or_insert(Some(document));
                }
                BatchRow::UniqueKey {
                    index,
                    id,
                    document,
                } => {
                    let Some(query) = snapshot.unique_keys.get_index(index) else {
                        warn!(index, "unique key row with out of range index");
                        continue;
                    };
                    match self.unique_keys.get(query) {
                        Some(Some(existing)) if *existing != id => {
                            warn!(
                                query = %query,
                                kept = %existing,
                                ignored = %id,
                                "unique key matched more than one document"
                            );
                            continue;
                        }
                        Some(Some(_)) => {}
                        _ => {
                            self.unique_keys.insert(query.clone(), Some(id.clone()));
                        }
                    }
                    self.documents.entry(id).or_insert(Some(document));
                }
                BatchRow::PathQuery { index, ids } => {
                    let Some(spec) = snapshot.path_queries.get_index(index) else {
                        warn!(index, "path query row with out of range index");
                        continue;
                    };
                    self.path_queries
                        .entry(spec.clone())
                        .or_insert_with(|| ids.into());
                }
            }
        }

        for id in &snapshot.ids {
            self.documents.entry(id.clone()).or_insert(None);
        }
        for query in &snapshot.unique_keys {
            self.unique_keys.entry(query.clone()).or_insert(None);
        }
        for spec in &snapshot.path_queries {
            self.path_queries
                .entry(spec.clone())
                .or_insert_with(|| Arc::from(Vec::new()));
        }
    }
}
