//! In-memory storage backend.
//!
//! Enforces the same two uniqueness constraints as the durable backends.
//! Also carries test hooks for failure injection, a max-global override to
//! reproduce the stale-read race deterministically, and an I/O call counter.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Result, StorageBackend, StorageError, StoredBatch};

#[derive(Default)]
struct State {
    batches: Vec<StoredBatch>,
    global_index: HashSet<u64>,
    aggregate_index: HashSet<(String, u64)>,
}

/// In-memory storage backend.
#[derive(Default)]
pub struct MemoryStorage {
    state: RwLock<State>,
    fail_on_insert: RwLock<bool>,
    max_global_override: RwLock<Option<u64>>,
    io_calls: AtomicUsize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_insert(&self, fail: bool) {
        *self.fail_on_insert.write().await = fail;
    }

    /// Report `max` from `max_global_sequence_number` instead of the real value.
    pub async fn set_max_global_override(&self, max: Option<u64>) {
        *self.max_global_override.write().await = max;
    }

    /// Number of backend calls made so far.
    pub fn io_calls(&self) -> usize {
        self.io_calls.load(Ordering::SeqCst)
    }

    /// Number of stored batches.
    pub async fn batch_count(&self) -> usize {
        self.state.read().await.batches.len()
    }

    fn record_io(&self) {
        self.io_calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn insert_batch(&self, batch: StoredBatch) -> Result<()> {
        self.record_io();
        if *self.fail_on_insert.read().await {
            return Err(StorageError::Backend("simulated insert failure".to_string()));
        }

        let mut state = self.state.write().await;

        // Check every key before touching the indexes so a rejected batch
        // leaves no trace.
        let mut globals = HashSet::new();
        let mut keys = HashSet::new();
        for event in &batch.events {
            let global = event.global_sequence_number;
            if state.global_index.contains(&global) || !globals.insert(global) {
                return Err(StorageError::DuplicateKey(format!(
                    "global_sequence_number {}",
                    global
                )));
            }
            let key = (event.aggregate_id.clone(), event.sequence_number);
            if state.aggregate_index.contains(&key) || !keys.insert(key) {
                return Err(StorageError::DuplicateKey(format!(
                    "aggregate {} sequence_number {}",
                    event.aggregate_id, event.sequence_number
                )));
            }
        }

        state.global_index.extend(globals);
        state.aggregate_index.extend(keys);
        state.batches.push(batch);
        Ok(())
    }

    async fn max_global_sequence_number(&self) -> Result<Option<u64>> {
        self.record_io();
        if let Some(max) = *self.max_global_override.read().await {
            return Ok(Some(max));
        }
        Ok(self.state.read().await.global_index.iter().max().copied())
    }

    async fn max_sequence_number(&self, aggregate_id: &str) -> Result<Option<u64>> {
        self.record_io();
        let state = self.state.read().await;
        Ok(state
            .aggregate_index
            .iter()
            .filter(|(id, _)| id == aggregate_id)
            .map(|(_, seq)| *seq)
            .max())
    }

    async fn scan_from_global(&self, offset: u64) -> Result<Vec<StoredBatch>> {
        self.record_io();
        let state = self.state.read().await;
        Ok(state
            .batches
            .iter()
            .filter(|b| b.events.iter().any(|e| e.global_sequence_number >= offset))
            .cloned()
            .collect())
    }

    async fn scan_aggregate(
        &self,
        aggregate_id: &str,
        first_sequence_number: u64,
    ) -> Result<Vec<StoredBatch>> {
        self.record_io();
        let state = self.state.read().await;
        Ok(state
            .batches
            .iter()
            .filter(|b| {
                b.events.iter().any(|e| {
                    e.aggregate_id == aggregate_id && e.sequence_number >= first_sequence_number
                })
            })
            .cloned()
            .collect())
    }
}
