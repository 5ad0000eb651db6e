//! StorageBackend trait definition.

use async_trait::async_trait;

use super::{Result, StoredBatch};

/// Durable record set underneath the event store.
///
/// One stored record per batch. Implementations must enforce two
/// uniqueness constraints across all batches:
/// - the global sequence number of every event;
/// - the `(aggregate_id, sequence_number)` pair of every event.
///
/// A violation must reject the whole batch with
/// [`StorageError::DuplicateKey`](super::StorageError::DuplicateKey) and
/// leave the store unchanged.
///
/// Scans may return batches in any order, and may trim a batch down to
/// its matching events; callers filter and re-sort by global sequence
/// number.
///
/// Implementations:
/// - `MemoryStorage`: in-process storage, also used for testing
/// - `SqliteStorage`: SQLite storage
/// - `MongoStorage`: MongoDB storage
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Atomically insert one batch.
    async fn insert_batch(&self, batch: StoredBatch) -> Result<()>;

    /// Highest global sequence number stored, if any.
    async fn max_global_sequence_number(&self) -> Result<Option<u64>>;

    /// Highest per-aggregate sequence number stored for `aggregate_id`, if any.
    async fn max_sequence_number(&self, aggregate_id: &str) -> Result<Option<u64>>;

    /// Batches holding at least one event with global sequence number >= `offset`.
    async fn scan_from_global(&self, offset: u64) -> Result<Vec<StoredBatch>>;

    /// Batches holding at least one event of `aggregate_id` with sequence
    /// number >= `first_sequence_number`.
    async fn scan_aggregate(
        &self,
        aggregate_id: &str,
        first_sequence_number: u64,
    ) -> Result<Vec<StoredBatch>>;
}
