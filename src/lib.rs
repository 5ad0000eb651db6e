//! Eventvault - append-only event store
//!
//! Persists batches of domain events for one aggregate atomically, assigns
//! every event a store-wide global sequence number, and streams events back
//! in global order. Concurrent writers are detected by the storage layer's
//! uniqueness constraints and reported as concurrency conflicts for the
//! caller to retry.
//!
//! ```no_run
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! use eventvault::{init_storage, Config, EventRecord, EventStore, Payload};
//! use futures::TryStreamExt;
//!
//! let config = Config::load(None)?;
//! let store = EventStore::from_config(init_storage(&config.storage).await?, &config);
//!
//! let payload = Payload::json(&serde_json::json!({"$type": "OrderPlaced", "total": 42}));
//! store
//!     .save(uuid::Uuid::new_v4(), vec![EventRecord::new("order-1", 0, payload)])
//!     .await?;
//!
//! let history: Vec<EventRecord> = store.load("order-1", 0).try_collect().await?;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod event;
pub mod metadata;
pub mod storage;
pub mod store;
pub mod utils;
pub mod views;

pub use codec::{CodecError, PayloadCodec};
pub use config::Config;
pub use event::{EventRecord, Payload};
pub use metadata::{DeclaredMetadata, Metadata, MetadataDeclarations};
pub use storage::{init_storage, MemoryStorage, StorageBackend, StorageError};
pub use store::{EventStore, EventStream, Inconsistency, StoreError};
pub use views::{LocatorError, LocatorRegistry, ViewLocator};
