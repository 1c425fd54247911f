//! Loader error types.

use std::sync::Arc;

use docbatch_storage::StorageError;
use thiserror::Error;

/// Errors surfaced by loader accessors.
///
/// Cloned to every waiter of a batch, so the storage cause is shared.
#[derive(Debug, Clone, Error)]
pub enum LoaderError {
    /// The batch this lookup depended on failed. Once a batch fails every
    /// later cache miss reports the same failure.
    #[error("batch {batch} failed: {source}")]
    BatchFailed {
        batch: u64,
        #[source]
        source: Arc<StorageError>,
    },
}

impl LoaderError {
    /// The storage error behind this failure.
    pub fn storage_error(&self) -> &StorageError {
        match self {
            LoaderError::BatchFailed { source, .. } => source,
        }
    }

    /// Returns true if the backing connection should be discarded.
    pub fn is_transaction_error(&self) -> bool {
        self.storage_error().is_transaction_error()
    }
}

/// Result type for loader operations.
pub type LoaderResult<T> = Result<T, LoaderError>;
