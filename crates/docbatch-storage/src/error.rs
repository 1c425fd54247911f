//! Storage error types.

use std::time::Duration;

use thiserror::Error;

/// Storage-specific errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database connection error (acquire, pool exhausted, connection closed).
    #[error("database connection error: {message}")]
    ConnectionError { message: String },

    /// Database query error.
    #[error("database query error: {message}")]
    QueryError { message: String },

    /// Query exceeded its timeout.
    #[error("query timeout: {operation} exceeded {timeout:?}")]
    QueryTimeout {
        operation: String,
        timeout: Duration,
    },

    /// Failure to begin or roll back the snapshot transaction.
    #[error("transaction error: {message}")]
    TransactionError { message: String },

    /// Path query could not be parsed or evaluated.
    #[error("invalid path query '{query}': {message}")]
    InvalidPathQuery { query: String, message: String },

    /// Serialization error.
    #[error("serialization error: {message}")]
    SerializationError { message: String },

    /// Internal error.
    #[error("internal storage error: {message}")]
    InternalError { message: String },
}

impl StorageError {
    /// Returns true for errors that end the whole unit of work rather than one batch.
    pub fn is_transaction_error(&self) -> bool {
        matches!(
            self,
            StorageError::ConnectionError { .. } | StorageError::TransactionError { .. }
        )
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
