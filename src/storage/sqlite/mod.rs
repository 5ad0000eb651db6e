//! SQLite storage backend.
//!
//! Each event is a row tagged with its batch id. The table's two UNIQUE
//! constraints carry the store's uniqueness guarantees, and a batch is
//! written as a single multi-row INSERT inside a transaction so it lands or
//! fails as a whole.

use async_trait::async_trait;
use bson::Document;
use sea_query::{Expr, Order, Query, SelectStatement, SqliteQueryBuilder};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use super::schema::{Events, CREATE_EVENTS_TABLE, PAYLOAD_KIND_BINARY, PAYLOAD_KIND_DOCUMENT};
use super::{
    to_stored_i64, Result, StorageBackend, StorageError, StoredBatch, StoredEvent, StoredPayload,
};
use crate::metadata::Metadata;

/// Field wrapping a document payload so any BSON value can be written as bytes.
const DOCUMENT_FIELD: &str = "v";

/// SQLite implementation of StorageBackend.
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage backend.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the database schema.
    pub async fn init(&self) -> Result<()> {
        sqlx::raw_sql(CREATE_EVENTS_TABLE).execute(&self.pool).await?;
        Ok(())
    }

    fn select_events() -> SelectStatement {
        Query::select()
            .columns([
                Events::BatchId,
                Events::AggregateId,
                Events::SequenceNumber,
                Events::GlobalSequenceNumber,
                Events::Metadata,
                Events::PayloadKind,
                Events::Payload,
            ])
            .from(Events::Table)
            .to_owned()
    }

    async fn fetch_batches(&self, query: String) -> Result<Vec<StoredBatch>> {
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;

        // Rows arrive in global order, so a batch's rows are adjacent.
        let mut batches: Vec<StoredBatch> = Vec::new();
        for row in rows {
            let (batch_id, event) = decode_row(&row)?;
            match batches.last_mut() {
                Some(last) if last.batch_id == batch_id => last.events.push(event),
                _ => batches.push(StoredBatch {
                    batch_id,
                    events: vec![event],
                }),
            }
        }
        Ok(batches)
    }

    async fn fetch_max(&self, query: String) -> Result<Option<u64>> {
        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        let max: Option<i64> = match row {
            Some(row) => row.try_get(0)?,
            None => None,
        };
        max.map(|m| {
            u64::try_from(m)
                .map_err(|_| StorageError::Backend(format!("negative sequence maximum {m}")))
        })
        .transpose()
    }
}

#[async_trait]
impl StorageBackend for SqliteStorage {
    async fn insert_batch(&self, batch: StoredBatch) -> Result<()> {
        let batch_id = batch.batch_id.to_string();

        // The statement is not Send; render it before the first await.
        let query = {
            let mut insert = Query::insert();
            insert.into_table(Events::Table).columns([
                Events::BatchId,
                Events::AggregateId,
                Events::SequenceNumber,
                Events::GlobalSequenceNumber,
                Events::Metadata,
                Events::PayloadKind,
                Events::Payload,
            ]);

            for event in &batch.events {
                let metadata = serde_json::to_string(&event.metadata)?;
                let (kind, payload) = encode_payload(&event.payload)?;
                insert.values_panic([
                    batch_id.clone().into(),
                    event.aggregate_id.clone().into(),
                    to_stored_i64(event.sequence_number)?.into(),
                    to_stored_i64(event.global_sequence_number)?.into(),
                    metadata.into(),
                    kind.into(),
                    payload.into(),
                ]);
            }

            insert.to_string(SqliteQueryBuilder)
        };

        let mut tx = self.pool.begin().await?;

        match sqlx::query(&query).execute(&mut *tx).await {
            Ok(_) => {}
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                // Dropping the transaction rolls it back.
                return Err(StorageError::DuplicateKey(db_err.message().to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        tx.commit().await?;

        debug!(batch_id = %batch_id, events = batch.events.len(), "SQLite batch inserted");
        Ok(())
    }

    async fn max_global_sequence_number(&self) -> Result<Option<u64>> {
        let query = Query::select()
            .expr(Expr::col(Events::GlobalSequenceNumber).max())
            .from(Events::Table)
            .to_string(SqliteQueryBuilder);

        self.fetch_max(query).await
    }

    async fn max_sequence_number(&self, aggregate_id: &str) -> Result<Option<u64>> {
        let query = Query::select()
            .expr(Expr::col(Events::SequenceNumber).max())
            .from(Events::Table)
            .and_where(Expr::col(Events::AggregateId).eq(aggregate_id))
            .to_string(SqliteQueryBuilder);

        self.fetch_max(query).await
    }

    async fn scan_from_global(&self, offset: u64) -> Result<Vec<StoredBatch>> {
        // Nothing is stored past i64::MAX.
        let Ok(offset) = i64::try_from(offset) else {
            return Ok(Vec::new());
        };
        let query = Self::select_events()
            .and_where(Expr::col(Events::GlobalSequenceNumber).gte(offset))
            .order_by(Events::GlobalSequenceNumber, Order::Asc)
            .to_string(SqliteQueryBuilder);

        self.fetch_batches(query).await
    }

    async fn scan_aggregate(
        &self,
        aggregate_id: &str,
        first_sequence_number: u64,
    ) -> Result<Vec<StoredBatch>> {
        let Ok(first_sequence_number) = i64::try_from(first_sequence_number) else {
            return Ok(Vec::new());
        };
        let query = Self::select_events()
            .and_where(Expr::col(Events::AggregateId).eq(aggregate_id))
            .and_where(Expr::col(Events::SequenceNumber).gte(first_sequence_number))
            .order_by(Events::GlobalSequenceNumber, Order::Asc)
            .to_string(SqliteQueryBuilder);

        self.fetch_batches(query).await
    }
}

fn encode_payload(payload: &StoredPayload) -> Result<(&'static str, Vec<u8>)> {
    match payload {
        StoredPayload::Binary(bytes) => Ok((PAYLOAD_KIND_BINARY, bytes.clone())),
        StoredPayload::Document(value) => {
            let mut wrapper = Document::new();
            wrapper.insert(DOCUMENT_FIELD, value.clone());
            let mut bytes = Vec::new();
            wrapper.to_writer(&mut bytes)?;
            Ok((PAYLOAD_KIND_DOCUMENT, bytes))
        }
    }
}

fn decode_row(row: &SqliteRow) -> Result<(Uuid, StoredEvent)> {
    let batch_id: String = row.try_get("batch_id")?;
    let kind: String = row.try_get("payload_kind")?;
    let bytes: Vec<u8> = row.try_get("payload")?;
    let metadata: String = row.try_get("metadata")?;

    let payload = match kind.as_str() {
        PAYLOAD_KIND_BINARY => StoredPayload::Binary(bytes),
        PAYLOAD_KIND_DOCUMENT => {
            let wrapper = Document::from_reader(bytes.as_slice())?;
            let value = wrapper
                .get(DOCUMENT_FIELD)
                .cloned()
                .ok_or_else(|| StorageError::CorruptRecord {
                    batch_id: batch_id.clone(),
                    reason: "missing document field".to_string(),
                })?;
            StoredPayload::Document(value)
        }
        other => {
            return Err(StorageError::CorruptRecord {
                batch_id,
                reason: format!("unknown payload kind {other:?}"),
            })
        }
    };

    let read_u64 = |column: &str| -> Result<u64> {
        let value: i64 = row.try_get(column)?;
        u64::try_from(value).map_err(|_| StorageError::CorruptRecord {
            batch_id: batch_id.clone(),
            reason: format!("negative {column}: {value}"),
        })
    };

    let event = StoredEvent {
        aggregate_id: row.try_get("aggregate_id")?,
        sequence_number: read_u64("sequence_number")?,
        global_sequence_number: read_u64("global_sequence_number")?,
        metadata: serde_json::from_str::<Metadata>(&metadata)?,
        payload,
    };

    Ok((Uuid::parse_str(&batch_id)?, event))
}
