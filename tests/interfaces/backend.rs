//! Backend factory for interface tests.
//!
//! Provides a unified way to create storage backends based on environment configuration.

use std::env;
use std::sync::Arc;

use eventvault::config::{StorageConfig, StorageType};
use eventvault::storage::{init_storage, StorageBackend as Backend};

#[cfg(feature = "mongodb")]
use std::time::Duration;

#[cfg(feature = "mongodb")]
use testcontainers::{
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
    GenericImage, ImageExt,
};

/// Storage backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Sqlite,
    Mongodb,
}

impl StorageBackend {
    pub fn from_env() -> Self {
        match env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "memory".to_string())
            .to_lowercase()
            .as_str()
        {
            "sqlite" => StorageBackend::Sqlite,
            "mongodb" => StorageBackend::Mongodb,
            _ => StorageBackend::Memory,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StorageBackend::Memory => "memory",
            StorageBackend::Sqlite => "sqlite",
            StorageBackend::Mongodb => "mongodb",
        }
    }
}

/// Handles that must outlive the backend (temp files, containers).
#[allow(dead_code)]
#[derive(Debug)]
pub enum ResourceHandle {
    None,
    TempDir(tempfile::TempDir),
    #[cfg(feature = "mongodb")]
    Mongodb(testcontainers::ContainerAsync<GenericImage>),
}

/// Holds the storage backend for one scenario.
pub struct StorageContext {
    pub backend: Arc<dyn Backend>,
    #[allow(dead_code)]
    resource: ResourceHandle,
}

impl std::fmt::Debug for StorageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageContext")
            .field("backend", &"<dyn StorageBackend>")
            .field("resource", &self.resource)
            .finish()
    }
}

impl StorageContext {
    /// Create a storage context for the configured backend.
    pub async fn new(backend: StorageBackend) -> Self {
        match backend {
            StorageBackend::Memory => Self::create_memory().await,
            StorageBackend::Sqlite => Self::create_sqlite().await,
            StorageBackend::Mongodb => Self::create_mongodb().await,
        }
    }

    async fn create_memory() -> Self {
        let backend = init_storage(&StorageConfig::memory())
            .await
            .expect("Failed to create memory storage");

        StorageContext {
            backend,
            resource: ResourceHandle::None,
        }
    }

    async fn create_sqlite() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");

        let mut config = StorageConfig::default();
        config.storage_type = StorageType::Sqlite;
        config.sqlite.path = dir
            .path()
            .join("events.db")
            .to_string_lossy()
            .into_owned();

        let backend = init_storage(&config)
            .await
            .expect("Failed to create SQLite storage");

        StorageContext {
            backend,
            resource: ResourceHandle::TempDir(dir),
        }
    }

    #[cfg(feature = "mongodb")]
    async fn create_mongodb() -> Self {
        let image = GenericImage::new("mongo", "7")
            .with_exposed_port(27017.tcp())
            .with_wait_for(WaitFor::message_on_stdout("Waiting for connections"));

        let container = image
            .with_startup_timeout(Duration::from_secs(60))
            .start()
            .await
            .expect("Failed to start MongoDB container");

        let host_port = container
            .get_host_port_ipv4(27017)
            .await
            .expect("Failed to get port");

        let host = container.get_host().await.expect("Failed to get host");

        let mut config = StorageConfig::default();
        config.storage_type = StorageType::Mongodb;
        config.mongodb.uri = format!("mongodb://{}:{}", host, host_port);
        config.mongodb.database = "interfaces".to_string();

        let backend = init_storage(&config)
            .await
            .expect("Failed to create MongoDB storage");

        StorageContext {
            backend,
            resource: ResourceHandle::Mongodb(container),
        }
    }

    #[cfg(not(feature = "mongodb"))]
    async fn create_mongodb() -> Self {
        panic!("MongoDB feature not enabled. Build with --features mongodb");
    }
}
