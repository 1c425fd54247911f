//! Request-scoped document loader.
//!
//! A [`DocumentLoader`] sits on one snapshot connection for the duration of
//! one unit of work. Field resolvers call its accessors freely and
//! concurrently; lookups that miss the cache within one scheduling window
//! travel to the store together in a single round trip.
//!
//! # Architecture Decisions
//!
//! - **Coalescing**: a batch leader yields `coalesce_yields` times before
//!   snapshotting the pending sets, so lookups started by `join_all` siblings
//!   or freshly spawned tasks land in the same batch.
//!
//! - **One batch in flight**: the connection is used by a single query at a
//!   time. Lookups registered while a batch runs wait for the next one.
//!
//! - **Failure poisons**: the transaction behind a failed batch is unusable,
//!   so every later cache miss returns the first failure instead of retrying.
//!
//! - **Cloneable**: clones share one cache and one connection, so a loader
//!   can be handed to spawned tasks.

mod config;
mod scheduler;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use docbatch_storage::{Document, DocumentReader, PathQuerySpec};
use serde_json::Value;

use crate::cache::{LoaderCache, PendingKey};
use crate::error::LoaderResult;
use crate::interpolate::interpolate;
use crate::keys::unique_key_query;

pub use config::LoaderConfig;
use scheduler::Scheduler;

/// Batching, caching document loader over one snapshot connection.
pub struct DocumentLoader<R> {
    scheduler: Arc<Scheduler<R>>,
}

impl<R> Clone for DocumentLoader<R> {
    fn clone(&self) -> Self {
        Self {
            scheduler: Arc::clone(&self.scheduler),
        }
    }
}

impl<R: DocumentReader> DocumentLoader<R> {
    /// Creates a loader with the default configuration.
    pub fn new(reader: R) -> Self {
        Self::with_config(reader, LoaderConfig::default())
    }

    pub fn with_config(reader: R, config: LoaderConfig) -> Self {
        Self {
            scheduler: Arc::new(Scheduler::new(reader, config)),
        }
    }

    /// The connection this loader reads through.
    pub fn reader(&self) -> &R {
        self.scheduler.reader()
    }

    /// Number of batches completed so far, failed ones included.
    pub fn completed_batches(&self) -> u64 {
        self.scheduler.completed_batches()
    }

    /// Fetches a document by identifier.
    ///
    /// Returns `Ok(None)` if no visible document has that identifier.
    pub async fn get_by_uuid(&self, id: &str) -> LoaderResult<Option<Document>> {
        self.resolve(PendingKey::Id(id.to_string()), |cache| cache.document(id))
            .await
    }

    /// Fetches a document by one of its namespaced unique keys.
    ///
    /// A match also answers later [`get_by_uuid`](Self::get_by_uuid) calls
    /// for the same document.
    pub async fn get_by_unique_key(
        &self,
        namespace: &str,
        name: &str,
    ) -> LoaderResult<Option<Document>> {
        let query = unique_key_query(namespace, name);
        self.resolve(PendingKey::UniqueKey(query.clone()), |cache| {
            cache.unique_key(&query)
        })
        .await
    }

    /// Identifiers of visible documents matching a path query.
    ///
    /// `variables` are interpolated into `path` first; see
    /// [`interpolate`](crate::interpolate::interpolate). Results are ordered
    /// by the dot-separated `order_by` field, ties and the default order by
    /// identifier. No match yields an empty slice, never an error.
    pub async fn query_json_path(
        &self,
        path: &str,
        variables: &Value,
        order_by: Option<&str>,
    ) -> LoaderResult<Arc<[String]>> {
        let spec = PathQuerySpec::new(interpolate(path, variables), order_by.map(str::to_string));
        self.resolve(PendingKey::PathQuery(spec.clone()), |cache| {
            cache.path_query(&spec)
        })
        .await
    }

    /// Answers from the cache, or queues `key` and waits for batches until
    /// the cache has the answer.
    async fn resolve<T, F>(&self, key: PendingKey, lookup: F) -> LoaderResult<T>
    where
        F: Fn(&LoaderCache) -> Option<T>,
    {
        loop {
            let target = {
                let mut state = self.scheduler.lock();
                if let Some(hit) = lookup(&state.cache) {
                    return Ok(hit);
                }
                if let Some(err) = state.poisoned() {
                    return Err(err.clone());
                }
                state.enqueue(&key)
            };
            self.scheduler.await_batch(target).await?;
        }
    }
}
