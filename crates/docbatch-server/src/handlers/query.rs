//! Query-root resolvers.

use docbatch_domain::{DocumentLoader, LoaderResult};
use docbatch_storage::{Document, DocumentReader};
use futures::future::try_join_all;
use serde_json::Value;
use tracing::instrument;

/// Namespace that addresses documents by identifier rather than unique key.
pub const UUID_NAMESPACE: &str = "uuid";

/// Top-level lookups of one unit of work.
pub struct QueryHandler<R> {
    loader: DocumentLoader<R>,
}

impl<R> Clone for QueryHandler<R> {
    fn clone(&self) -> Self {
        Self {
            loader: self.loader.clone(),
        }
    }
}

impl<R: DocumentReader> QueryHandler<R> {
    pub fn new(loader: DocumentLoader<R>) -> Self {
        Self { loader }
    }

    pub fn loader(&self) -> &DocumentLoader<R> {
        &self.loader
    }

    #[instrument(skip(self))]
    pub async fn get_by_uuid(&self, uuid: &str) -> LoaderResult<Option<Document>> {
        self.loader.get_by_uuid(uuid).await
    }

    /// Looks a document up by `namespace:name`, optionally requiring `@type`
    /// to list `type_name`.
    #[instrument(skip(self))]
    pub async fn get_by_unique_key(
        &self,
        namespace: &str,
        name: &str,
        type_name: Option<&str>,
    ) -> LoaderResult<Option<Document>> {
        let doc = if namespace == UUID_NAMESPACE {
            self.loader.get_by_uuid(name).await?
        } else {
            self.loader.get_by_unique_key(namespace, name).await?
        };
        Ok(doc.filter(|doc| type_name.map_or(true, |t| doc.has_type(t))))
    }

    /// Documents matching a path query, in query order.
    #[instrument(skip(self, variables))]
    pub async fn query_json_path(
        &self,
        path: &str,
        variables: &Value,
        order_by: Option<&str>,
    ) -> LoaderResult<Vec<Document>> {
        let ids = self.loader.query_json_path(path, variables, order_by).await?;
        fetch_all(&self.loader, ids.iter().map(String::as_str)).await
    }
}

/// Fetches every identifier concurrently so the misses share one batch.
///
/// Identifiers that resolve to nothing are skipped.
pub(crate) async fn fetch_all<'a, R, I>(
    loader: &DocumentLoader<R>,
    ids: I,
) -> LoaderResult<Vec<Document>>
where
    R: DocumentReader,
    I: IntoIterator<Item = &'a str>,
{
    let docs = try_join_all(ids.into_iter().map(|id| loader.get_by_uuid(id))).await?;
    Ok(docs.into_iter().flatten().collect())
}
