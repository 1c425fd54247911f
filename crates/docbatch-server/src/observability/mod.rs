//! Observability for docbatch: structured logging setup.
//!
//! Metrics are recorded through the `metrics` facade by the loader and the
//! storage backends; installing an exporter is left to the embedding service.

mod logging;

pub use logging::{capture_json_subscriber, init_logging, LoggingConfig};
