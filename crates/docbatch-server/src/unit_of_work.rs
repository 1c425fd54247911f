//! Unit-of-work bracket around a loader.
//!
//! One request gets one snapshot connection and one [`DocumentLoader`]. The
//! connection is always rolled back afterwards; a failed unit of work also
//! discards it instead of returning it to the pool.

use std::future::Future;

use docbatch_domain::{DocumentLoader, LoaderConfig, LoaderError};
use docbatch_storage::{DocumentStore, StorageError};
use thiserror::Error;
use tracing::{instrument, warn};

/// Errors from running a unit of work.
#[derive(Debug, Error)]
pub enum UnitOfWorkError {
    /// No snapshot connection could be opened.
    #[error("failed to acquire a snapshot connection: {0}")]
    Acquire(#[source] StorageError),

    /// The work itself failed.
    #[error(transparent)]
    Loader(#[from] LoaderError),

    /// The work succeeded but the connection could not be released cleanly.
    #[error("failed to release the snapshot connection: {0}")]
    Release(#[source] StorageError),
}

/// Runs `work` with a fresh loader over a snapshot connection from `store`.
///
/// The loader handed to `work` may be cloned into spawned tasks, but those
/// tasks must finish before `work` returns: the connection is released as
/// soon as it does.
#[instrument(skip_all, fields(coalesce_yields = config.coalesce_yields))]
pub async fn with_loader<S, F, Fut, T>(
    store: &S,
    config: LoaderConfig,
    work: F,
) -> Result<T, UnitOfWorkError>
where
    S: DocumentStore,
    F: FnOnce(DocumentLoader<S::Connection>) -> Fut,
    Fut: Future<Output = Result<T, LoaderError>>,
{
    let connection = store.acquire().await.map_err(UnitOfWorkError::Acquire)?;
    let loader = DocumentLoader::with_config(connection, config);

    let result = work(loader.clone()).await;
    let released = store.release(loader.reader(), result.is_err()).await;

    match (result, released) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(UnitOfWorkError::Release(e)),
        (Err(e), Ok(())) => Err(e.into()),
        (Err(e), Err(release_error)) => {
            warn!(error = %release_error, "release failed after unit of work error");
            Err(e.into())
        }
    }
}
