//! docbatch-domain: Request-scoped batching document loader
//!
//! This crate contains the data-access core used by field resolvers:
//! - Path-query variable interpolation
//! - Per-request result caches and pending lookup sets
//! - The coalescing batch scheduler and its accessors
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               docbatch-domain               │
//! ├─────────────────────────────────────────────┤
//! │  interpolate/ - Path-query variables        │
//! │  keys.rs      - Canonical lookup keys       │
//! │  cache/       - Caches and pending sets     │
//! │  loader/      - Scheduler and accessors     │
//! └─────────────────────────────────────────────┘
//! ```

pub mod cache;
pub mod error;
pub mod interpolate;
pub mod keys;
pub mod loader;

// Re-export commonly used types at the crate root
pub use error::{LoaderError, LoaderResult};
pub use interpolate::interpolate;
pub use keys::unique_key_query;
pub use loader::{DocumentLoader, LoaderConfig};
