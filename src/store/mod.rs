//! Event store.
//!
//! Orchestrates a write as validate -> allocate -> encode -> insert, and
//! serves reads as lazily decoded streams in ascending global order.
//!
//! The store holds no locks and no session state. Conflicting writers are
//! detected solely by the storage uniqueness constraints and reported as
//! [`StoreError::ConcurrencyConflict`]; retrying is up to the caller.

pub mod sequence;
pub mod validation;

use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::codec::{CodecError, PayloadCodec};
use crate::config::Config;
use crate::event::{EventRecord, Payload};
use crate::storage::{StorageBackend, StorageError, StoredBatch, StoredEvent, StoredPayload};

/// Result type for event store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Lazy, finite stream of events in ascending global sequence order.
pub type EventStream = BoxStream<'static, Result<EventRecord>>;

/// Why a batch failed local validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Inconsistency {
    #[error("batch mixes aggregates: expected {expected}, found {found}")]
    MixedAggregates { expected: String, found: String },

    #[error("sequence numbers not contiguous: expected {expected}, found {found}")]
    NonContiguous { expected: u64, found: u64 },

    #[error("aggregate {aggregate_id} expects sequence {expected}, batch starts at {found}")]
    Gap {
        aggregate_id: String,
        expected: u64,
        found: u64,
    },

    #[error("aggregate {aggregate_id} starts at sequence {base}, batch starts at {found}")]
    BelowBase {
        aggregate_id: String,
        base: u64,
        found: u64,
    },

    #[error("sequence numbers run past u64::MAX after {last}")]
    SequenceOverflow { last: u64 },
}

/// Errors that can occur during event store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Batch {batch_id} contains no events")]
    EmptyBatch { batch_id: Uuid },

    #[error("Batch {batch_id} is inconsistent: {reason}")]
    BatchInconsistent { batch_id: Uuid, reason: Inconsistency },

    #[error("Concurrency conflict saving batch {batch_id} ({} events)", .events.len())]
    ConcurrencyConflict {
        batch_id: Uuid,
        events: Vec<EventRecord>,
    },

    #[error("No sequence numbers left after {last} ({scope})")]
    SequenceExhausted { scope: String, last: u64 },

    #[error("Payload codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl StoreError {
    /// True for conflicts a caller can resolve by recomputing and retrying.
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, StoreError::ConcurrencyConflict { .. })
    }
}

/// Append-only event store over a [`StorageBackend`].
#[derive(Clone)]
pub struct EventStore {
    backend: Arc<dyn StorageBackend>,
    codec: PayloadCodec,
    sequence_base: u64,
}

impl EventStore {
    /// Create a store with the default codec and a per-aggregate base of 0.
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            codec: PayloadCodec::default(),
            sequence_base: 0,
        }
    }

    /// Create a store with codec and sequence settings from configuration.
    pub fn from_config(backend: Arc<dyn StorageBackend>, config: &Config) -> Self {
        Self::new(backend)
            .with_codec(config.codec.codec())
            .with_sequence_base(config.store.sequence_base)
    }

    pub fn with_codec(mut self, codec: PayloadCodec) -> Self {
        self.codec = codec;
        self
    }

    /// First per-aggregate sequence number of every aggregate.
    pub fn with_sequence_base(mut self, base: u64) -> Self {
        self.sequence_base = base;
        self
    }

    pub fn sequence_base(&self) -> u64 {
        self.sequence_base
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// Persist `events` for one aggregate as a single atomic batch.
    ///
    /// Global sequence numbers supplied by the caller are ignored and
    /// replaced by a contiguous block allocated from the current store
    /// maximum. Fails with [`StoreError::ConcurrencyConflict`] if another
    /// writer already holds any of the batch's keys; the store is then
    /// unchanged.
    pub async fn save(&self, batch_id: Uuid, mut events: Vec<EventRecord>) -> Result<()> {
        let shape = validation::validate(batch_id, &events)?;
        let aggregate_id = shape.aggregate_id.to_string();
        let first_sequence_number = shape.first_sequence_number;

        let expected_next = sequence::next_sequence_number(
            self.backend.as_ref(),
            &aggregate_id,
            self.sequence_base,
        )
        .await?;
        validation::check_expected(batch_id, &shape, expected_next, self.sequence_base)?;

        let start = sequence::next_global_sequence_number(self.backend.as_ref()).await?;
        let range = sequence::stamp_batch(batch_id, &mut events, start)?;

        let stored = StoredBatch {
            batch_id,
            events: events
                .iter()
                .map(|event| self.encode_event(event))
                .collect::<std::result::Result<Vec<_>, CodecError>>()?,
        };

        match self.backend.insert_batch(stored).await {
            Ok(()) => {
                info!(
                    %batch_id,
                    aggregate_id = %aggregate_id,
                    first_sequence_number,
                    global_start = range.start,
                    global_end = range.end,
                    "Batch saved"
                );
                Ok(())
            }
            Err(StorageError::DuplicateKey(key)) => {
                warn!(
                    %batch_id,
                    aggregate_id = %aggregate_id,
                    first_sequence_number,
                    global_start = range.start,
                    key = %key,
                    "Concurrency conflict"
                );
                Err(StoreError::ConcurrencyConflict { batch_id, events })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Events with `global_sequence_number >= global_offset`, ascending.
    ///
    /// Calling again with the same offset restarts the read.
    pub fn stream_from(&self, global_offset: u64) -> EventStream {
        debug!(global_offset, "Streaming from global offset");
        let backend = Arc::clone(&self.backend);
        self.stream(
            async move { backend.scan_from_global(global_offset).await },
            move |event| event.global_sequence_number >= global_offset,
        )
    }

    /// Events of `aggregate_id` with `sequence_number >= first_sequence_number`,
    /// ascending by global sequence number.
    pub fn load(&self, aggregate_id: &str, first_sequence_number: u64) -> EventStream {
        debug!(aggregate_id, first_sequence_number, "Loading aggregate");
        let backend = Arc::clone(&self.backend);
        let scan_id = aggregate_id.to_string();
        let filter_id = aggregate_id.to_string();
        self.stream(
            async move {
                backend
                    .scan_aggregate(&scan_id, first_sequence_number)
                    .await
            },
            move |event| {
                event.aggregate_id == filter_id && event.sequence_number >= first_sequence_number
            },
        )
    }

    /// Every event of `aggregate_id` from the sequence base.
    pub fn load_all(&self, aggregate_id: &str) -> EventStream {
        self.load(aggregate_id, self.sequence_base)
    }

    /// Next global sequence number as of this read.
    pub async fn next_global_sequence_number(&self) -> Result<u64> {
        sequence::next_global_sequence_number(self.backend.as_ref()).await
    }

    /// Next per-aggregate sequence number for `aggregate_id` as of this read.
    pub async fn next_sequence_number(&self, aggregate_id: &str) -> Result<u64> {
        sequence::next_sequence_number(self.backend.as_ref(), aggregate_id, self.sequence_base).await
    }

    /// Issue `scan` on first poll, then merge, filter, sort, and decode lazily.
    fn stream<F, P>(&self, scan: F, keep: P) -> EventStream
    where
        F: std::future::Future<Output = std::result::Result<Vec<StoredBatch>, StorageError>>
            + Send
            + 'static,
        P: Fn(&StoredEvent) -> bool + Send + 'static,
    {
        let codec = self.codec;
        stream::once(scan)
            .map_err(StoreError::from)
            .map_ok(move |batches| {
                let mut events: Vec<StoredEvent> = batches
                    .into_iter()
                    .flat_map(|batch| batch.events)
                    .filter(|event| keep(event))
                    .collect();
                events.sort_by_key(|event| event.global_sequence_number);
                stream::iter(events.into_iter().map(Ok::<_, StoreError>))
            })
            .try_flatten()
            .and_then(move |event| async move { decode_event(&codec, event) })
            .boxed()
    }

    fn encode_event(&self, event: &EventRecord) -> std::result::Result<StoredEvent, CodecError> {
        let payload = match &event.payload {
            Payload::Structured(bytes) => StoredPayload::Document(self.codec.encode(bytes)?),
            Payload::Raw(bytes) => StoredPayload::Binary(bytes.clone()),
        };

        Ok(StoredEvent {
            aggregate_id: event.aggregate_id.clone(),
            sequence_number: event.sequence_number,
            global_sequence_number: event.global_sequence_number,
            metadata: event.metadata.clone(),
            payload,
        })
    }
}

fn decode_event(codec: &PayloadCodec, event: StoredEvent) -> Result<EventRecord> {
    let payload = match event.payload {
        StoredPayload::Document(native) => Payload::Structured(codec.decode(&native)?),
        StoredPayload::Binary(bytes) => Payload::Raw(bytes),
    };

    Ok(EventRecord {
        aggregate_id: event.aggregate_id,
        sequence_number: event.sequence_number,
        global_sequence_number: event.global_sequence_number,
        metadata: event.metadata,
        payload,
    })
}
