//! Storage implementations.

use std::sync::Arc;

use bson::Bson;
use tracing::info;
use uuid::Uuid;

use crate::config::{StorageConfig, StorageType};
use crate::metadata::Metadata;

mod backend;
pub mod memory;

#[cfg(feature = "sqlite")]
pub mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "mongodb")]
pub mod mongodb;

pub use backend::StorageBackend;
pub use memory::MemoryStorage;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;

#[cfg(feature = "mongodb")]
pub use mongodb::MongoStorage;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    #[error("Corrupt record in batch {batch_id}: {reason}")]
    CorruptRecord { batch_id: String, reason: String },

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Sequence number {0} exceeds the backend's signed 64-bit range")]
    OutOfRange(u64),

    #[error("Metadata encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("BSON serialization error: {0}")]
    BsonSerialize(#[from] bson::ser::Error),

    #[error("BSON deserialization error: {0}")]
    BsonDeserialize(#[from] bson::de::Error),

    #[error("Invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[cfg(feature = "mongodb")]
    #[error("MongoDB error: {0}")]
    Mongo(#[from] ::mongodb::error::Error),
}

/// Sequence number as the signed 64-bit integer SQL and BSON store.
#[cfg(any(feature = "sqlite", feature = "mongodb"))]
pub(crate) fn to_stored_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| StorageError::OutOfRange(value))
}

/// Event payload in its persisted form.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredPayload {
    /// Raw bytes, stored verbatim.
    Binary(Vec<u8>),
    /// Codec output for structured payloads.
    Document(Bson),
}

/// One event inside a stored batch.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    pub aggregate_id: String,
    pub sequence_number: u64,
    pub global_sequence_number: u64,
    pub metadata: Metadata,
    pub payload: StoredPayload,
}

/// The unit of persistence: every event saved by one `save` call.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredBatch {
    pub batch_id: Uuid,
    pub events: Vec<StoredEvent>,
}

/// Initialize storage based on configuration.
pub async fn init_storage(config: &StorageConfig) -> Result<Arc<dyn StorageBackend>> {
    info!(storage_type = ?config.storage_type, "Initializing storage");

    match config.storage_type {
        StorageType::Memory => Ok(Arc::new(MemoryStorage::new())),
        #[cfg(feature = "sqlite")]
        StorageType::Sqlite => {
            if let Some(parent) = std::path::Path::new(&config.sqlite.path).parent() {
                std::fs::create_dir_all(parent)?;
            }

            let pool =
                sqlx::SqlitePool::connect(&format!("sqlite:{}?mode=rwc", config.sqlite.path))
                    .await?;

            let storage = SqliteStorage::new(pool);
            storage.init().await?;

            Ok(Arc::new(storage))
        }
        #[cfg(not(feature = "sqlite"))]
        StorageType::Sqlite => {
            tracing::error!("SQLite storage requested but 'sqlite' feature is not enabled");
            Err(StorageError::Backend("sqlite feature not enabled".to_string()))
        }
        #[cfg(feature = "mongodb")]
        StorageType::Mongodb => {
            let client = ::mongodb::Client::with_uri_str(&config.mongodb.uri).await?;
            let storage = MongoStorage::new(
                &client,
                &config.mongodb.database,
                &config.mongodb.collection,
            )
            .await?;

            Ok(Arc::new(storage))
        }
        #[cfg(not(feature = "mongodb"))]
        StorageType::Mongodb => {
            tracing::error!("MongoDB storage requested but 'mongodb' feature is not enabled");
            Err(StorageError::Backend("mongodb feature not enabled".to_string()))
        }
    }
}
