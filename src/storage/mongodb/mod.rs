//! MongoDB storage backend.
//!
//! One document per batch:
//!
//! ```text
//! { _id, batch_id, events: [ { metadata, payload, sequence_number,
//!                              global_sequence_number, aggregate_id } ] }
//! ```
//!
//! Unique multikey indexes on `events.global_sequence_number` and on
//! `(events.aggregate_id, events.sequence_number)` reject conflicting
//! writers. Raw payloads are stored as BSON binary, structured ones as the
//! codec's native value.

use async_trait::async_trait;
use mongodb::bson::spec::BinarySubtype;
use mongodb::bson::{doc, Binary, Bson, Document};
use mongodb::options::{FindOptions, IndexOptions};
use mongodb::{Client, Collection, Database, IndexModel};
use tracing::debug;
use uuid::Uuid;

use super::{
    to_stored_i64, Result, StorageBackend, StorageError, StoredBatch, StoredEvent, StoredPayload,
};
use crate::metadata::Metadata;

/// Server error code for unique index violations.
const DUPLICATE_KEY_CODE: i32 = 11000;

/// MongoDB implementation of StorageBackend.
pub struct MongoStorage {
    database: Database,
    batches: Collection<Document>,
}

impl MongoStorage {
    /// Create a new MongoDB storage backend and ensure its indexes exist.
    pub async fn new(client: &Client, database_name: &str, collection_name: &str) -> Result<Self> {
        let database = client.database(database_name);
        let batches = database.collection(collection_name);

        let storage = Self { database, batches };
        storage.init().await?;

        Ok(storage)
    }

    /// Create the two uniqueness indexes.
    async fn init(&self) -> Result<()> {
        let global_index = IndexModel::builder()
            .keys(doc! { "events.global_sequence_number": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();

        self.batches.create_index(global_index).await?;

        let aggregate_index = IndexModel::builder()
            .keys(doc! { "events.aggregate_id": 1, "events.sequence_number": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();

        self.batches.create_index(aggregate_index).await?;

        Ok(())
    }

    /// Get the database reference.
    pub fn database(&self) -> &Database {
        &self.database
    }

    async fn find_batches(&self, filter: Document) -> Result<Vec<StoredBatch>> {
        let options = FindOptions::builder()
            .sort(doc! { "events.global_sequence_number": 1 })
            .build();

        let mut cursor = self.batches.find(filter).with_options(options).await?;

        let mut batches = Vec::new();
        while cursor.advance().await? {
            let doc = cursor.deserialize_current()?;
            batches.push(batch_from_document(&doc)?);
        }

        Ok(batches)
    }

    /// Fetch the single batch that sorts first under `sort`.
    async fn find_top(&self, filter: Document, sort: Document) -> Result<Option<StoredBatch>> {
        let options = FindOptions::builder().sort(sort).limit(1).build();

        let mut cursor = self.batches.find(filter).with_options(options).await?;

        if cursor.advance().await? {
            let doc = cursor.deserialize_current()?;
            Ok(Some(batch_from_document(&doc)?))
        } else {
            Ok(None)
        }
    }
}

#[async_trait]
impl StorageBackend for MongoStorage {
    async fn insert_batch(&self, batch: StoredBatch) -> Result<()> {
        let doc = batch_to_document(&batch)?;

        // Duplicate key error indicates a concurrent writer claimed a key first
        self.batches.insert_one(doc).await.map_err(|e| {
            if let mongodb::error::ErrorKind::Write(mongodb::error::WriteFailure::WriteError(
                ref write_err,
            )) = *e.kind
            {
                if write_err.code == DUPLICATE_KEY_CODE {
                    return StorageError::DuplicateKey(write_err.message.clone());
                }
            }
            StorageError::from(e)
        })?;

        debug!(batch_id = %batch.batch_id, events = batch.events.len(), "MongoDB batch inserted");
        Ok(())
    }

    async fn max_global_sequence_number(&self) -> Result<Option<u64>> {
        // A descending multikey sort orders documents by their largest element.
        let top = self
            .find_top(doc! {}, doc! { "events.global_sequence_number": -1 })
            .await?;

        Ok(top.and_then(|batch| {
            batch
                .events
                .iter()
                .map(|e| e.global_sequence_number)
                .max()
        }))
    }

    async fn max_sequence_number(&self, aggregate_id: &str) -> Result<Option<u64>> {
        let top = self
            .find_top(
                doc! { "events.aggregate_id": aggregate_id },
                doc! { "events.sequence_number": -1 },
            )
            .await?;

        Ok(top.and_then(|batch| {
            batch
                .events
                .iter()
                .filter(|e| e.aggregate_id == aggregate_id)
                .map(|e| e.sequence_number)
                .max()
        }))
    }

    async fn scan_from_global(&self, offset: u64) -> Result<Vec<StoredBatch>> {
        // Nothing is stored past i64::MAX.
        let Ok(offset) = i64::try_from(offset) else {
            return Ok(Vec::new());
        };
        let filter = doc! { "events.global_sequence_number": { "$gte": offset } };

        self.find_batches(filter).await
    }

    async fn scan_aggregate(
        &self,
        aggregate_id: &str,
        first_sequence_number: u64,
    ) -> Result<Vec<StoredBatch>> {
        let Ok(first_sequence_number) = i64::try_from(first_sequence_number) else {
            return Ok(Vec::new());
        };
        let filter = doc! {
            "events": {
                "$elemMatch": {
                    "aggregate_id": aggregate_id,
                    "sequence_number": { "$gte": first_sequence_number },
                }
            }
        };

        self.find_batches(filter).await
    }
}

fn batch_to_document(batch: &StoredBatch) -> Result<Document> {
    let events: Vec<Bson> = batch
        .events
        .iter()
        .map(|event| event_to_document(event).map(Bson::Document))
        .collect::<Result<_>>()?;

    let batch_id = batch.batch_id.to_string();
    Ok(doc! {
        "_id": batch_id.clone(),
        "batch_id": batch_id,
        "events": events,
    })
}

fn event_to_document(event: &StoredEvent) -> Result<Document> {
    let mut metadata = Document::new();
    for (key, value) in event.metadata.iter() {
        metadata.insert(key, value);
    }

    let payload = match &event.payload {
        StoredPayload::Binary(bytes) => Bson::Binary(Binary {
            subtype: BinarySubtype::Generic,
            bytes: bytes.clone(),
        }),
        StoredPayload::Document(value) => value.clone(),
    };

    let sequence_number = to_stored_i64(event.sequence_number)?;
    let global_sequence_number = to_stored_i64(event.global_sequence_number)?;

    Ok(doc! {
        "metadata": metadata,
        "payload": payload,
        "sequence_number": sequence_number,
        "global_sequence_number": global_sequence_number,
        "aggregate_id": event.aggregate_id.clone(),
    })
}

fn batch_from_document(doc: &Document) -> Result<StoredBatch> {
    let batch_id = doc
        .get_str("batch_id")
        .map_err(|e| corrupt("<unknown>", e))?
        .to_string();

    let events = doc
        .get_array("events")
        .map_err(|e| corrupt(&batch_id, e))?
        .iter()
        .map(|item| match item {
            Bson::Document(event) => event_from_document(&batch_id, event),
            other => Err(corrupt(&batch_id, format!("event is not a document: {other}"))),
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(StoredBatch {
        batch_id: Uuid::parse_str(&batch_id)?,
        events,
    })
}

fn event_from_document(batch_id: &str, doc: &Document) -> Result<StoredEvent> {
    let metadata: Metadata = doc
        .get_document("metadata")
        .map_err(|e| corrupt(batch_id, e))?
        .iter()
        .map(|(key, value)| match value {
            Bson::String(s) => (key.clone(), s.clone()),
            other => (key.clone(), other.to_string()),
        })
        .collect();

    let payload = match doc.get("payload") {
        Some(Bson::Binary(binary)) => StoredPayload::Binary(binary.bytes.clone()),
        Some(value) => StoredPayload::Document(value.clone()),
        None => return Err(corrupt(batch_id, "missing payload")),
    };

    Ok(StoredEvent {
        aggregate_id: doc
            .get_str("aggregate_id")
            .map_err(|e| corrupt(batch_id, e))?
            .to_string(),
        sequence_number: read_u64(batch_id, doc, "sequence_number")?,
        global_sequence_number: read_u64(batch_id, doc, "global_sequence_number")?,
        metadata,
        payload,
    })
}

fn read_u64(batch_id: &str, doc: &Document, key: &str) -> Result<u64> {
    match doc.get(key) {
        Some(Bson::Int64(n)) if *n >= 0 => Ok(*n as u64),
        Some(Bson::Int32(n)) if *n >= 0 => Ok(*n as u64),
        other => Err(corrupt(batch_id, format!("invalid {key}: {other:?}"))),
    }
}

fn corrupt(batch_id: &str, reason: impl ToString) -> StorageError {
    StorageError::CorruptRecord {
        batch_id: batch_id.to_string(),
        reason: reason.to_string(),
    }
}
