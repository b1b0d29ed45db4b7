//! # Parking DB - Lot Registry Persistence
//!
//! Stores lots, spot lists and occupancy results in a key-value store
//! (in-memory or ScyllaDB), and the latest snapshot image of each lot.

pub mod error;
pub mod images;
pub mod kv;
pub mod migrations;
pub mod repository;
pub mod scylla_store;

pub use error::{DbError, DbResult};
pub use images::{FsImageStore, ImageStore, MemoryImageStore, image_file_name};
pub use kv::{KvStore, MemoryStore};
pub use repository::*;
pub use scylla_store::ScyllaStore;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Which key-value backend holds the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Scylla,
}

impl std::str::FromStr for StoreBackend {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "scylla" => Ok(Self::Scylla),
            other => Err(DbError::Configuration(format!("unknown store backend {other:?}"))),
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    pub backend: StoreBackend,
    pub hosts: Vec<String>,
    pub keyspace: String,
    pub replication_factor: u32,
    #[serde(skip, default = "default_connection_timeout")]
    pub connection_timeout: Duration,
}

fn default_replication_factor() -> u32 {
    1
}

fn default_connection_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            hosts: vec!["127.0.0.1:9042".to_string()],
            keyspace: "parking".to_string(),
            replication_factor: default_replication_factor(),
            connection_timeout: default_connection_timeout(),
        }
    }
}

impl DbConfig {
    pub fn from_env() -> DbResult<Self> {
        let mut config = Self::default();

        if let Ok(backend) = std::env::var("PARKING_STORE") {
            config.backend = backend.parse()?;
        }
        if let Ok(hosts) = std::env::var("SCYLLA_HOSTS") {
            config.hosts = hosts.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Ok(keyspace) = std::env::var("SCYLLA_KEYSPACE") {
            config.keyspace = keyspace;
        }

        Ok(config)
    }
}

/// Open the configured key-value store
pub async fn connect_store(config: &DbConfig) -> DbResult<Arc<dyn KvStore>> {
    let store: Arc<dyn KvStore> = match config.backend {
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
        StoreBackend::Scylla => Arc::new(ScyllaStore::connect(config).await?),
    };
    info!(backend = store.backend(), "Registry store ready");
    Ok(store)
}
