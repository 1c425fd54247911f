//! docbatch-storage: Document store abstraction layer
//!
//! This crate provides the read side of the JSON item table, including:
//! - DocumentStore / DocumentReader traits for snapshot connections and batched reads
//! - In-memory implementation for testing
//! - PostgreSQL implementation for production
//! - A path predicate engine evaluating the store's query language in memory
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              docbatch-storage               │
//! ├─────────────────────────────────────────────┤
//! │  traits.rs   - Store/reader traits, rows    │
//! │  memory.rs   - In-memory implementation     │
//! │  postgres.rs - PostgreSQL implementation    │
//! │  jsonpath/   - Path predicate engine        │
//! └─────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod jsonpath;
pub mod memory;
pub mod postgres;
pub mod traits;

// Re-export commonly used types
pub use error::{StorageError, StorageResult};
pub use jsonpath::PathPredicate;
pub use memory::{MemoryDocumentStore, MemorySnapshot, StoredItem};
pub use postgres::{PostgresConfig, PostgresConnection, PostgresDocumentStore};
pub use traits::{
    AccessPolicy, BatchQuery, BatchRow, Document, DocumentReader, DocumentStore, PathQuerySpec,
    EVERYONE_PRINCIPAL,
};
