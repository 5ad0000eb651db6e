//! EventStore interface step definitions.

use cucumber::{gherkin::Step, given, then, when, World};
use eventvault::event::{BATCH_ID_KEY, GLOBAL_SEQUENCE_NUMBER_KEY};
use eventvault::{EventRecord, EventStore, Payload, StoreError};
use futures::TryStreamExt;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::backend::{StorageBackend, StorageContext};

/// Test context for EventStore scenarios.
#[derive(Debug, World)]
#[world(init = Self::new)]
pub struct EventStoreWorld {
    backend: StorageBackend,
    context: Option<StorageContext>,
    last_batch_id: Uuid,
    last_save: Option<Result<(), String>>,
    last_error: Option<StoreError>,
    last_events: Vec<EventRecord>,
    second_events: Vec<EventRecord>,
}

impl EventStoreWorld {
    fn new() -> Self {
        Self {
            backend: StorageBackend::from_env(),
            context: None,
            last_batch_id: Uuid::nil(),
            last_save: None,
            last_error: None,
            last_events: Vec::new(),
            second_events: Vec::new(),
        }
    }

    fn store(&self) -> EventStore {
        let context = self
            .context
            .as_ref()
            .expect("Storage context not initialized");
        EventStore::new(context.backend.clone())
    }

    fn make_event(aggregate_id: &str, seq: u64) -> EventRecord {
        EventRecord::new(
            aggregate_id,
            seq,
            Payload::json(&json!({"$type": format!("Event{}", seq), "seq": seq})),
        )
    }

    async fn save(&mut self, events: Vec<EventRecord>) {
        self.last_batch_id = Uuid::new_v4();
        match self.store().save(self.last_batch_id, events).await {
            Ok(()) => {
                self.last_save = Some(Ok(()));
                self.last_error = None;
            }
            Err(e) => {
                self.last_save = Some(Err(e.to_string()));
                self.last_error = Some(e);
            }
        }
    }

    fn numbers(csv: &str) -> Vec<u64> {
        csv.split(',')
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.trim().parse().expect("Invalid number"))
            .collect()
    }
}

// --- Background ---

#[given("an event store backend")]
async fn given_event_store_backend(world: &mut EventStoreWorld) {
    println!("Using backend: {}", world.backend.name());
    let ctx = StorageContext::new(world.backend).await;
    world.context = Some(ctx);
}

// --- Given steps ---

#[given(expr = "aggregate {string} has a batch of {int} event")]
#[given(expr = "aggregate {string} has a batch of {int} events")]
async fn given_aggregate_batch(world: &mut EventStoreWorld, aggregate_id: String, count: u64) {
    let store = world.store();
    let next = store
        .next_sequence_number(&aggregate_id)
        .await
        .expect("Failed to read next sequence number");

    let events = (next..next + count)
        .map(|seq| EventStoreWorld::make_event(&aggregate_id, seq))
        .collect();

    store
        .save(Uuid::new_v4(), events)
        .await
        .expect("Failed to save batch");
}

// --- When steps ---

#[when(expr = "I save a batch of {int} events for aggregate {string}")]
async fn when_save_batch(world: &mut EventStoreWorld, count: u64, aggregate_id: String) {
    let events = (0..count)
        .map(|seq| EventStoreWorld::make_event(&aggregate_id, seq))
        .collect();
    world.save(events).await;
}

#[when(expr = "I save a batch for aggregate {string} starting at sequence {int} with {int} event")]
#[when(expr = "I save a batch for aggregate {string} starting at sequence {int} with {int} events")]
async fn when_save_batch_at(
    world: &mut EventStoreWorld,
    aggregate_id: String,
    start: u64,
    count: u64,
) {
    let events = (start..start + count)
        .map(|seq| EventStoreWorld::make_event(&aggregate_id, seq))
        .collect();
    world.save(events).await;
}

#[when("I save an empty batch")]
async fn when_save_empty(world: &mut EventStoreWorld) {
    world.save(Vec::new()).await;
}

#[when(expr = "I save a batch mixing aggregates {string} and {string}")]
async fn when_save_mixed(world: &mut EventStoreWorld, first: String, second: String) {
    let events = vec![
        EventStoreWorld::make_event(&first, 0),
        EventStoreWorld::make_event(&second, 1),
    ];
    world.save(events).await;
}

#[when(expr = "I save a structured payload for aggregate {string}:")]
async fn when_save_structured(world: &mut EventStoreWorld, step: &Step, aggregate_id: String) {
    let body = step.docstring.as_ref().expect("Missing docstring");
    let event = EventRecord::new(
        aggregate_id,
        0,
        Payload::Structured(body.trim().as_bytes().to_vec()),
    );
    world.save(vec![event]).await;
}

#[when(expr = "I save a raw payload {string} for aggregate {string}")]
async fn when_save_raw(world: &mut EventStoreWorld, body: String, aggregate_id: String) {
    let event = EventRecord::new(aggregate_id, 0, Payload::Raw(body.into_bytes()));
    world.save(vec![event]).await;
}

#[when(expr = "I load aggregate {string} from sequence {int}")]
async fn when_load(world: &mut EventStoreWorld, aggregate_id: String, first: u64) {
    world.last_events = world
        .store()
        .load(&aggregate_id, first)
        .try_collect()
        .await
        .expect("Failed to load events");
}

#[when(expr = "I stream from global offset {int}")]
async fn when_stream(world: &mut EventStoreWorld, offset: u64) {
    world.last_events = world
        .store()
        .stream_from(offset)
        .try_collect()
        .await
        .expect("Failed to stream events");
}

#[when(expr = "I stream from global offset {int} twice")]
async fn when_stream_twice(world: &mut EventStoreWorld, offset: u64) {
    let store = world.store();
    world.last_events = store
        .stream_from(offset)
        .try_collect()
        .await
        .expect("Failed to stream events");
    world.second_events = store
        .stream_from(offset)
        .try_collect()
        .await
        .expect("Failed to stream events");
}

// --- Then steps ---

#[then("the save succeeds")]
async fn then_save_succeeds(world: &mut EventStoreWorld) {
    assert_eq!(world.last_save, Some(Ok(())));
}

#[then("the save fails with a concurrency conflict")]
async fn then_conflict(world: &mut EventStoreWorld) {
    let err = world.last_error.as_ref().expect("Expected save to fail");
    assert!(err.is_concurrency_conflict(), "Expected conflict, got: {}", err);
}

#[then(expr = "the conflict carries the batch id and {int} event")]
#[then(expr = "the conflict carries the batch id and {int} events")]
async fn then_conflict_carries(world: &mut EventStoreWorld, count: usize) {
    match world.last_error.as_ref() {
        Some(StoreError::ConcurrencyConflict { batch_id, events }) => {
            assert_eq!(*batch_id, world.last_batch_id);
            assert_eq!(events.len(), count);
        }
        other => panic!("Expected concurrency conflict, got: {:?}", other),
    }
}

#[then("the save fails with an empty batch error")]
async fn then_empty_batch(world: &mut EventStoreWorld) {
    assert!(
        matches!(world.last_error, Some(StoreError::EmptyBatch { .. })),
        "Got: {:?}",
        world.last_error
    );
}

#[then("the save fails with an inconsistent batch error")]
async fn then_inconsistent(world: &mut EventStoreWorld) {
    assert!(
        matches!(world.last_error, Some(StoreError::BatchInconsistent { .. })),
        "Got: {:?}",
        world.last_error
    );
}

#[then("the save fails with a codec error")]
async fn then_codec_error(world: &mut EventStoreWorld) {
    assert!(
        matches!(world.last_error, Some(StoreError::Codec(_))),
        "Got: {:?}",
        world.last_error
    );
}

#[then(expr = "I receive {int} event")]
#[then(expr = "I receive {int} events")]
async fn then_receive(world: &mut EventStoreWorld, count: usize) {
    assert_eq!(world.last_events.len(), count);
}

#[then(expr = "the events have sequence numbers {string}")]
async fn then_sequence_numbers(world: &mut EventStoreWorld, expected: String) {
    let actual: Vec<u64> = world.last_events.iter().map(|e| e.sequence_number).collect();
    assert_eq!(actual, EventStoreWorld::numbers(&expected));
}

#[then(expr = "the events have global sequence numbers {string}")]
async fn then_global_numbers(world: &mut EventStoreWorld, expected: String) {
    let actual: Vec<u64> = world
        .last_events
        .iter()
        .map(|e| e.global_sequence_number)
        .collect();
    assert_eq!(actual, EventStoreWorld::numbers(&expected));
}

#[then("global sequence numbers are strictly ascending")]
async fn then_ascending(world: &mut EventStoreWorld) {
    assert!(world
        .last_events
        .windows(2)
        .all(|w| w[0].global_sequence_number < w[1].global_sequence_number));
}

#[then(expr = "the events belong to aggregate {string}")]
async fn then_belong_to(world: &mut EventStoreWorld, aggregate_id: String) {
    assert!(world
        .last_events
        .iter()
        .all(|e| e.aggregate_id == aggregate_id));
}

#[then(expr = "the events belong to aggregates {string}")]
async fn then_belong_to_each(world: &mut EventStoreWorld, expected: String) {
    let actual: Vec<&str> = world
        .last_events
        .iter()
        .map(|e| e.aggregate_id.as_str())
        .collect();
    let expected: Vec<&str> = expected.split(',').map(str::trim).collect();
    assert_eq!(actual, expected);
}

#[then(expr = "the next global sequence number is {int}")]
async fn then_next_global(world: &mut EventStoreWorld, expected: u64) {
    let next = world
        .store()
        .next_global_sequence_number()
        .await
        .expect("Failed to read next global sequence number");
    assert_eq!(next, expected);
}

#[then("both reads return the same events")]
async fn then_same_events(world: &mut EventStoreWorld) {
    assert!(!world.last_events.is_empty());
    assert_eq!(world.last_events, world.second_events);
}

#[then("the payload equals:")]
async fn then_payload_equals(world: &mut EventStoreWorld, step: &Step) {
    let body = step.docstring.as_ref().expect("Missing docstring");
    let expected: Value = serde_json::from_str(body.trim()).expect("Invalid expected JSON");

    assert_eq!(world.last_events.len(), 1);
    assert_eq!(world.last_events[0].payload.to_json(), Some(expected));
}

#[then(expr = "the raw payload equals {string}")]
async fn then_raw_payload(world: &mut EventStoreWorld, expected: String) {
    assert_eq!(world.last_events.len(), 1);
    assert_eq!(
        world.last_events[0].payload,
        Payload::Raw(expected.into_bytes())
    );
}

#[then("each event's metadata records its batch id")]
async fn then_metadata_batch_id(world: &mut EventStoreWorld) {
    assert!(!world.last_events.is_empty());
    for event in &world.last_events {
        assert_eq!(
            event.metadata.get(BATCH_ID_KEY),
            Some(world.last_batch_id.to_string().as_str())
        );
    }
}

#[then("each event's metadata records its global sequence number")]
async fn then_metadata_global(world: &mut EventStoreWorld) {
    for event in &world.last_events {
        assert_eq!(
            event.metadata.get_u64(GLOBAL_SEQUENCE_NUMBER_KEY),
            Some(event.global_sequence_number)
        );
    }
}
