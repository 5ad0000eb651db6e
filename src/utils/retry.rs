//! Retry utilities: backoff builder and conflict retry for `save`.
//!
//! The event store never retries on its own. A caller that hits a
//! concurrency conflict must rebuild its batch against the new state of the
//! aggregate and try again; [`save_with_retry`] packages that loop using
//! `backon` exponential backoff with jitter.

use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use tracing::warn;
use uuid::Uuid;

use crate::event::EventRecord;
use crate::store::{EventStore, StoreError};

/// Standard backoff for concurrency conflict retries.
///
/// - Min delay: 10ms
/// - Max delay: 2s
/// - Max attempts: 10
/// - Jitter enabled
pub fn conflict_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(10))
        .with_max_delay(Duration::from_secs(2))
        .with_max_times(10)
        .with_jitter()
}

/// Determines if a store error is retryable (concurrency conflict only).
///
/// Validation, codec, and backend failures will not succeed on retry.
pub fn is_retryable(error: &StoreError) -> bool {
    error.is_concurrency_conflict()
}

/// Save a batch for `aggregate_id`, rebuilding and retrying on conflict.
///
/// `make_batch` receives the aggregate's next sequence number and is
/// called again on every attempt. A rejected attempt writes nothing, so the
/// same `batch_id` is reused throughout.
pub async fn save_with_retry<F>(
    store: &EventStore,
    backoff: ExponentialBuilder,
    batch_id: Uuid,
    aggregate_id: &str,
    make_batch: F,
) -> Result<(), StoreError>
where
    F: Fn(u64) -> Vec<EventRecord>,
{
    let make_batch = &make_batch;
    (|| async move {
        let next = store.next_sequence_number(aggregate_id).await?;
        store.save(batch_id, make_batch(next)).await
    })
    .retry(backoff)
    .when(is_retryable)
    .notify(|err: &StoreError, dur: Duration| {
        warn!(%batch_id, aggregate_id, error = %err, delay = ?dur, "Save conflicted, retrying");
    })
    .await
}
