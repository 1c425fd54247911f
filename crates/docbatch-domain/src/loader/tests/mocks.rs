//! Mock readers for loader testing.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use docbatch_storage::{
    BatchQuery, BatchRow, DocumentReader, DocumentStore, MemoryDocumentStore, MemorySnapshot,
    StorageError, StorageResult, StoredItem,
};
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::{Notify, Semaphore};

pub const DONOR: &str = "d-1";
pub const SAMPLE_A: &str = "s-a";
pub const SAMPLE_B: &str = "s-b";
pub const SAMPLE_DELETED: &str = "s-deleted";

/// A store with one donor and three of its biosamples, one deleted.
pub fn fixture_store() -> MemoryDocumentStore {
    let store = MemoryDocumentStore::new();
    store.insert(
        StoredItem::new(
            DONOR,
            json!({"uuid": DONOR, "@type": ["Donor", "Item"], "accession": "DON001"}),
        )
        .with_unique_key("accession", "DON001"),
    );
    for (id, accession, status) in [
        (SAMPLE_A, "SMP00A", "released"),
        (SAMPLE_B, "SMP00B", "in progress"),
        (SAMPLE_DELETED, "SMP00D", "deleted"),
    ] {
        store.insert(
            StoredItem::new(
                id,
                json!({
                    "uuid": id,
                    "@type": ["Biosample", "Item"],
                    "accession": accession,
                    "donor": DONOR,
                    "status": status,
                }),
            )
            .with_unique_key("accession", accession),
        );
    }
    store
}

/// Reader that records every batch it receives and can hold batches until
/// released.
pub struct RecordingReader {
    inner: MemorySnapshot,
    queries: Mutex<Vec<BatchQuery>>,
    gate: Option<Semaphore>,
    pub entered: Notify,
}

impl RecordingReader {
    pub async fn new(store: &MemoryDocumentStore) -> Self {
        Self {
            inner: store.acquire().await.unwrap(),
            queries: Mutex::new(Vec::new()),
            gate: None,
            entered: Notify::new(),
        }
    }

    /// Like `new`, but every batch waits for a permit from [`release`](Self::release).
    pub async fn gated(store: &MemoryDocumentStore) -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::new(store).await
        }
    }

    pub fn release(&self, batches: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(batches);
        }
    }

    pub fn queries(&self) -> Vec<BatchQuery> {
        self.queries.lock().clone()
    }

    pub fn round_trips(&self) -> usize {
        self.queries.lock().len()
    }
}

#[async_trait]
impl DocumentReader for RecordingReader {
    async fn fetch_batch(&self, query: &BatchQuery) -> StorageResult<Vec<BatchRow>> {
        self.queries.lock().push(query.clone());
        self.entered.notify_one();
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        self.inner.fetch_batch(query).await
    }
}

/// Reader whose every batch fails.
#[derive(Default)]
pub struct FailingReader {
    calls: AtomicUsize,
}

impl FailingReader {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentReader for FailingReader {
    async fn fetch_batch(&self, _query: &BatchQuery) -> StorageResult<Vec<BatchRow>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(StorageError::QueryError {
            message: "connection reset by peer".to_string(),
        })
    }
}
