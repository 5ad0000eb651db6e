//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building.

use sea_query::Iden;

/// Events table schema. One row per event; rows of a batch share `batch_id`.
#[derive(Iden)]
pub enum Events {
    Table,
    #[iden = "batch_id"]
    BatchId,
    #[iden = "aggregate_id"]
    AggregateId,
    #[iden = "sequence_number"]
    SequenceNumber,
    #[iden = "global_sequence_number"]
    GlobalSequenceNumber,
    #[iden = "metadata"]
    Metadata,
    #[iden = "payload_kind"]
    PayloadKind,
    #[iden = "payload"]
    Payload,
}

/// `payload_kind` value for raw bytes.
pub const PAYLOAD_KIND_BINARY: &str = "binary";
/// `payload_kind` value for codec documents (BSON bytes).
pub const PAYLOAD_KIND_DOCUMENT: &str = "document";

/// SQL for creating the events table.
pub const CREATE_EVENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    batch_id TEXT NOT NULL,
    aggregate_id TEXT NOT NULL,
    sequence_number INTEGER NOT NULL,
    global_sequence_number INTEGER NOT NULL,
    metadata TEXT NOT NULL,
    payload_kind TEXT NOT NULL,
    payload BLOB NOT NULL,
    UNIQUE (global_sequence_number),
    UNIQUE (aggregate_id, sequence_number)
);

CREATE INDEX IF NOT EXISTS idx_events_batch ON events(batch_id);
"#;
