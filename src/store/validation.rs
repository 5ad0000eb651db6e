//! Batch integrity checks run before any storage write.
//!
//! These catch malformed batches locally. Races with other writers are
//! caught by the storage uniqueness constraints, not here.

use uuid::Uuid;

use super::{Inconsistency, Result, StoreError};
use crate::event::EventRecord;

/// Aggregate and sequence range covered by a validated batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchShape<'a> {
    pub aggregate_id: &'a str,
    pub first_sequence_number: u64,
    pub len: u64,
}

/// Check that `events` is non-empty, targets one aggregate, and carries
/// contiguous per-aggregate sequence numbers.
pub fn validate(batch_id: Uuid, events: &[EventRecord]) -> Result<BatchShape<'_>> {
    let first = events.first().ok_or(StoreError::EmptyBatch { batch_id })?;

    for (offset, event) in events.iter().enumerate() {
        if event.aggregate_id != first.aggregate_id {
            return Err(StoreError::BatchInconsistent {
                batch_id,
                reason: Inconsistency::MixedAggregates {
                    expected: first.aggregate_id.clone(),
                    found: event.aggregate_id.clone(),
                },
            });
        }

        let expected = first
            .sequence_number
            .checked_add(offset as u64)
            .ok_or(StoreError::BatchInconsistent {
                batch_id,
                reason: Inconsistency::SequenceOverflow {
                    last: first.sequence_number,
                },
            })?;
        if event.sequence_number != expected {
            return Err(StoreError::BatchInconsistent {
                batch_id,
                reason: Inconsistency::NonContiguous {
                    expected,
                    found: event.sequence_number,
                },
            });
        }
    }

    Ok(BatchShape {
        aggregate_id: &first.aggregate_id,
        first_sequence_number: first.sequence_number,
        len: events.len() as u64,
    })
}

/// Check the batch against the aggregate's sequence base and expected next
/// sequence number.
///
/// A batch starting below `base` can never be valid. A batch starting past
/// `expected_next` would leave a gap. Both are rejected. A batch starting
/// at or above `base` but before `expected_next` overlaps persisted events;
/// that is left to the storage constraint so it surfaces as a concurrency
/// conflict.
pub fn check_expected(
    batch_id: Uuid,
    shape: &BatchShape<'_>,
    expected_next: u64,
    base: u64,
) -> Result<()> {
    if shape.first_sequence_number < base {
        return Err(StoreError::BatchInconsistent {
            batch_id,
            reason: Inconsistency::BelowBase {
                aggregate_id: shape.aggregate_id.to_string(),
                base,
                found: shape.first_sequence_number,
            },
        });
    }
    if shape.first_sequence_number > expected_next {
        return Err(StoreError::BatchInconsistent {
            batch_id,
            reason: Inconsistency::Gap {
                aggregate_id: shape.aggregate_id.to_string(),
                expected: expected_next,
                found: shape.first_sequence_number,
            },
        });
    }
    Ok(())
}
