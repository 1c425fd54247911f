//! Tests for the document loader.
//!
//! Organized by functionality:
//! - Cache hits and negative caching
//! - Coalescing of concurrent lookups
//! - Batch ordering while a batch is in flight
//! - Failure propagation and poisoning
//! - Abandoned batches

mod mocks;
