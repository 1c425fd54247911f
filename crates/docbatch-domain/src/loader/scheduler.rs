//! Batch scheduling: coalesce pending lookups into one store round trip.
//!
//! At most one batch is in flight per loader. The caller that finds the slot
//! empty becomes the leader: it yields so sibling lookups can register, takes
//! the pending sets, runs the query and broadcasts the outcome. Everyone else
//! subscribes to the leader's channel and waits.
//!
//! Batches are numbered when their snapshot is taken. A lookup records the
//! number of the batch its key will travel in and waits until that batch has
//! completed, leading a batch itself whenever the slot is free.

use std::sync::Arc;

use docbatch_storage::{BatchRow, DocumentReader, StorageResult};
use parking_lot::{Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::config::LoaderConfig;
use crate::cache::{LoaderCache, PendingKey, PendingSet};
use crate::error::{LoaderError, LoaderResult};

/// Outcome broadcast to the followers of a batch.
type BatchOutcome = LoaderResult<()>;

/// The batch currently occupying the in-flight slot.
struct InFlight {
    sender: broadcast::Sender<BatchOutcome>,
    /// Assigned when the snapshot is taken; `None` while the leader yields.
    batch: Option<u64>,
    snapshot: PendingSet,
}

/// Mutable loader state. Only ever locked briefly, never across an await.
pub(crate) struct LoaderState {
    pub(crate) cache: LoaderCache,
    pending: PendingSet,
    /// Number the next snapshot will get.
    sequence: u64,
    /// Number of the last completed batch.
    completed: u64,
    in_flight: Option<InFlight>,
    /// Set by the first failed batch.
    poisoned: Option<LoaderError>,
}

impl LoaderState {
    fn new() -> Self {
        Self {
            cache: LoaderCache::new(),
            pending: PendingSet::default(),
            sequence: 1,
            completed: 0,
            in_flight: None,
            poisoned: None,
        }
    }

    pub(crate) fn poisoned(&self) -> Option<&LoaderError> {
        self.poisoned.as_ref()
    }

    /// Registers a lookup and returns the number of the batch that will
    /// answer it.
    pub(crate) fn enqueue(&mut self, key: &PendingKey) -> u64 {
        if let Some(InFlight {
            batch: Some(batch),
            snapshot,
            ..
        }) = &self.in_flight
        {
            if snapshot.contains(key) {
                return *batch;
            }
        }
        self.pending.insert(key);
        self.sequence
    }
}

enum Role {
    Leader,
    Follower(broadcast::Receiver<BatchOutcome>),
}

/// Owns the connection and the state of one loader.
pub(crate) struct Scheduler<R> {
    reader: R,
    config: LoaderConfig,
    state: Mutex<LoaderState>,
}

impl<R: DocumentReader> Scheduler<R> {
    pub(crate) fn new(reader: R, config: LoaderConfig) -> Self {
        Self {
            reader,
            config,
            state: Mutex::new(LoaderState::new()),
        }
    }

    pub(crate) fn reader(&self) -> &R {
        &self.reader
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, LoaderState> {
        self.state.lock()
    }

    pub(crate) fn completed_batches(&self) -> u64 {
        self.state.lock().completed
    }

    /// Waits until batch `target` has completed, leading batches as needed.
    pub(crate) async fn await_batch(&self, target: u64) -> LoaderResult<()> {
        loop {
            let role = {
                let mut state = self.state.lock();
                if state.completed >= target {
                    return Ok(());
                }
                if let Some(err) = &state.poisoned {
                    return Err(err.clone());
                }
                match &state.in_flight {
                    Some(in_flight) => Role::Follower(in_flight.sender.subscribe()),
                    None => {
                        let (sender, _rx) = broadcast::channel(1);
                        state.in_flight = Some(InFlight {
                            sender,
                            batch: None,
                            snapshot: PendingSet::default(),
                        });
                        Role::Leader
                    }
                }
            };

            match role {
                Role::Leader => self.drive().await?,
                Role::Follower(mut rx) => match rx.recv().await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => return Err(err),
                    // The leader was dropped before finishing; its keys are
                    // pending again and the next pass picks a new leader.
                    Err(_) => {}
                },
            }
        }
    }

    /// Runs one batch. The caller has already claimed the in-flight slot.
    async fn drive(&self) -> LoaderResult<()> {
        let mut guard = BatchGuard::new(self);

        for _ in 0..self.config.coalesce_yields {
            tokio::task::yield_now().await;
        }

        let (batch, query) = {
            let mut state = self.state.lock();
            let batch = state.sequence;
            state.sequence += 1;
            let snapshot = std::mem::take(&mut state.pending);
            let query = snapshot.to_query();
            if let Some(in_flight) = state.in_flight.as_mut() {
                in_flight.batch = Some(batch);
                in_flight.snapshot = snapshot;
            }
            (batch, query)
        };

        let result = if query.is_empty() {
            Ok(Vec::new())
        } else {
            debug!(
                batch,
                ids = query.ids.len(),
                unique_keys = query.unique_keys.len(),
                path_queries = query.path_queries.len(),
                "executing batch"
            );
            metrics::histogram!("docbatch_loader_batch_keys").record(query.len() as f64);
            let result = self.reader.fetch_batch(&query).await;
            metrics::counter!(
                "docbatch_loader_batches_total",
                "status" => if result.is_ok() { "success" } else { "error" }
            )
            .increment(1);
            result
        };

        guard.disarm();
        self.finish(batch, result)
    }

    /// Applies a batch result, frees the slot and wakes the followers.
    fn finish(&self, batch: u64, result: StorageResult<Vec<BatchRow>>) -> LoaderResult<()> {
        let (sender, outcome) = {
            let mut state = self.state.lock();
            let in_flight = state.in_flight.take();
            let outcome = match result {
                Ok(rows) => {
                    if let Some(in_flight) = &in_flight {
                        state.cache.apply(&in_flight.snapshot, rows);
                    }
                    Ok(())
                }
                Err(source) => {
                    warn!(batch, error = %source, "batch failed");
                    let err = LoaderError::BatchFailed {
                        batch,
                        source: Arc::new(source),
                    };
                    state.poisoned = Some(err.clone());
                    Err(err)
                }
            };
            state.completed = batch;
            (in_flight.map(|in_flight| in_flight.sender), outcome)
        };

        if let Some(sender) = sender {
            // No receivers just means nobody else was waiting.
            let _ = sender.send(outcome.clone());
        }
        outcome
    }
}

/// RAII guard that frees the in-flight slot if the leader is dropped.
///
/// The abandoned snapshot is put back in front of the pending keys. Dropping
/// the slot drops its sender, so followers wake with a closed channel and
/// retry.
struct BatchGuard<'a, R> {
    scheduler: &'a Scheduler<R>,
    armed: bool,
}

impl<'a, R> BatchGuard<'a, R> {
    fn new(scheduler: &'a Scheduler<R>) -> Self {
        Self {
            scheduler,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl<R> Drop for BatchGuard<'_, R> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.scheduler.state.lock();
        if let Some(in_flight) = state.in_flight.take() {
            warn!(
                batch = ?in_flight.batch,
                keys = in_flight.snapshot.len(),
                "batch abandoned before completion"
            );
            state.pending.prepend(in_flight.snapshot);
        }
    }
}
