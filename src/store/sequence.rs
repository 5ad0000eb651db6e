//! Sequence allocation.
//!
//! Global sequence numbers are derived from the current store contents,
//! not from a counter: `1 + max(global_sequence_number)`, or `0` when the
//! store is empty. Two writers can read the same maximum; the storage
//! uniqueness constraint on the global sequence number turns that race into
//! a concurrency conflict for the later insert.

use std::ops::Range;

use uuid::Uuid;

use super::{Result, StoreError};
use crate::event::{EventRecord, BATCH_ID_KEY, GLOBAL_SEQUENCE_NUMBER_KEY};
use crate::storage::StorageBackend;

fn successor(scope: &str, last: u64) -> Result<u64> {
    last.checked_add(1).ok_or_else(|| StoreError::SequenceExhausted {
        scope: scope.to_string(),
        last,
    })
}

/// Next free global sequence number as of this read.
pub async fn next_global_sequence_number(backend: &dyn StorageBackend) -> Result<u64> {
    match backend.max_global_sequence_number().await? {
        Some(max) => successor("global", max),
        None => Ok(0),
    }
}

/// Next per-aggregate sequence number, or `base` for an aggregate with no events.
pub async fn next_sequence_number(
    backend: &dyn StorageBackend,
    aggregate_id: &str,
    base: u64,
) -> Result<u64> {
    match backend.max_sequence_number(aggregate_id).await? {
        Some(max) => successor(aggregate_id, max),
        None => Ok(base),
    }
}

/// Assign `start, start + 1, ...` to `events` in order and record the
/// batch id and global position in each event's metadata.
///
/// Returns the allocated range. Fails without touching `events` if the
/// range would run past `u64::MAX`.
pub fn stamp_batch(batch_id: Uuid, events: &mut [EventRecord], start: u64) -> Result<Range<u64>> {
    let end = start
        .checked_add(events.len() as u64)
        .ok_or_else(|| StoreError::SequenceExhausted {
            scope: "global".to_string(),
            last: start,
        })?;

    for (event, global) in events.iter_mut().zip(start..end) {
        event.global_sequence_number = global;
        event.metadata.set(GLOBAL_SEQUENCE_NUMBER_KEY, global);
        event.metadata.set(BATCH_ID_KEY, batch_id);
    }
    Ok(start..end)
}
