//! Storage configuration types.

use serde::Deserialize;

/// Storage type discriminator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    #[default]
    Sqlite,
    Memory,
    Mongodb,
}

/// Storage configuration (discriminated union).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage type discriminator.
    #[serde(rename = "type")]
    pub storage_type: StorageType,
    /// SQLite-specific configuration.
    pub sqlite: SqliteConfig,
    /// MongoDB-specific configuration.
    pub mongodb: MongodbConfig,
}

impl StorageConfig {
    /// In-memory storage, for tests and embedding.
    pub fn memory() -> Self {
        Self {
            storage_type: StorageType::Memory,
            ..Self::default()
        }
    }
}

/// SQLite-specific configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SqliteConfig {
    /// Path to the database file. Created if missing.
    pub path: String,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: "./data/events.db".to_string(),
        }
    }
}

/// MongoDB-specific configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MongodbConfig {
    /// MongoDB connection URI.
    pub uri: String,
    /// Database name.
    pub database: String,
    /// Collection holding one document per batch.
    pub collection: String,
}

impl Default for MongodbConfig {
    fn default() -> Self {
        Self {
            uri: "mongodb://localhost:27017".to_string(),
            database: "eventvault".to_string(),
            collection: DEFAULT_BATCHES_COLLECTION.to_string(),
        }
    }
}

/// Default MongoDB collection name.
pub const DEFAULT_BATCHES_COLLECTION: &str = "event_batches";
