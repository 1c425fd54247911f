//! docbatch-server: Service layer over the docbatch loader
//!
//! This crate wires the loader into request handling:
//! - Layered configuration (defaults, YAML, `DOCBATCH_` environment)
//! - Structured logging setup
//! - Building the configured store (memory or PostgreSQL)
//! - The unit-of-work bracket owning one snapshot connection per request
//! - Query-root and link resolvers
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              docbatch-server                │
//! ├─────────────────────────────────────────────┤
//! │  config.rs        - ServerConfig loading    │
//! │  observability/   - Logging setup           │
//! │  store.rs         - Backend selection       │
//! │  unit_of_work.rs  - Acquire/run/release     │
//! │  handlers/        - Query and link resolvers│
//! ├─────────────────────────────────────────────┤
//! │  docbatch-domain  - DocumentLoader          │
//! │  docbatch-storage - Memory / PostgreSQL     │
//! └─────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod handlers;
pub mod observability;
pub mod store;
pub mod unit_of_work;

pub use config::{ConfigLoadError, ServerConfig};
pub use handlers::QueryHandler;
pub use store::{ConfiguredConnection, ConfiguredStore, StoreBuildError};
pub use unit_of_work::{with_loader, UnitOfWorkError};
