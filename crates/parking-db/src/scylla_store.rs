//! ScyllaDB-backed key-value store

use crate::{DbConfig, DbError, DbResult, KvStore, migrations};
use async_trait::async_trait;
use futures::TryStreamExt;
use scylla::{Session, SessionBuilder};
use std::sync::Arc;
use tracing::{info, warn};

/// Registry store over a single `kv_store` table
#[derive(Clone)]
pub struct ScyllaStore {
    session: Arc<Session>,
}

impl ScyllaStore {
    /// Connect to the cluster and prepare the schema
    pub async fn connect(config: &DbConfig) -> DbResult<Self> {
        info!("Connecting to ScyllaDB cluster: {:?}", config.hosts);

        let session = SessionBuilder::new()
            .known_nodes(&config.hosts)
            .connection_timeout(config.connection_timeout)
            .build()
            .await
            .map_err(|e| DbError::Connection(e.to_string()))?;

        migrations::run_all(&session, config).await?;
        info!("Connected to ScyllaDB");

        Ok(Self {
            session: Arc::new(session),
        })
    }

    pub fn session(&self) -> Arc<Session> {
        self.session.clone()
    }
}

#[async_trait]
impl KvStore for ScyllaStore {
    async fn get(&self, key: &str) -> DbResult<Option<String>> {
        let result = self
            .session
            .query_unpaged("SELECT value FROM kv_store WHERE key = ?", (key,))
            .await
            .map_err(|e| DbError::Query(e.to_string()))?;

        let rows = result
            .into_rows_result()
            .map_err(|e| DbError::Query(e.to_string()))?;

        let row = rows
            .maybe_first_row::<(String,)>()
            .map_err(|e| DbError::Serialization(e.to_string()))?;

        Ok(row.map(|(value,)| value))
    }

    async fn set(&self, key: &str, value: String) -> DbResult<()> {
        self.session
            .query_unpaged("INSERT INTO kv_store (key, value) VALUES (?, ?)", (key, value))
            .await
            .map_err(|e| DbError::Query(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> DbResult<bool> {
        let existed = self.get(key).await?.is_some();
        self.session
            .query_unpaged("DELETE FROM kv_store WHERE key = ?", (key,))
            .await
            .map_err(|e| DbError::Query(e.to_string()))?;
        Ok(existed)
    }

    async fn scan_prefix(&self, prefix: &str) -> DbResult<Vec<(String, String)>> {
        let mut rows = self
            .session
            .query_iter("SELECT key, value FROM kv_store", &[])
            .await
            .map_err(|e| DbError::Query(e.to_string()))?
            .rows_stream::<(String, String)>()
            .map_err(|e| DbError::Serialization(e.to_string()))?;

        let mut entries = Vec::new();
        while let Some((key, value)) = rows
            .try_next()
            .await
            .map_err(|e| DbError::Query(e.to_string()))?
        {
            if key.starts_with(prefix) {
                entries.push((key, value));
            }
        }
        Ok(entries)
    }

    async fn health_check(&self) -> DbResult<bool> {
        let result = self
            .session
            .query_unpaged("SELECT now() FROM system.local", &[])
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!("Database health check failed: {}", e);
                Ok(false)
            }
        }
    }

    fn backend(&self) -> &'static str {
        "scylla"
    }
}
