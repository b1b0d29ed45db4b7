//! Key-value store abstraction
//!
//! The registry only relies on single-key atomicity: every operation reads or
//! writes one key, and concurrent writers to the same key are last-write-wins.

use crate::DbResult;
use async_trait::async_trait;
use dashmap::DashMap;

/// String key-value store
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> DbResult<Option<String>>;

    async fn set(&self, key: &str, value: String) -> DbResult<()>;

    /// Remove a key, returning whether it existed
    async fn delete(&self, key: &str) -> DbResult<bool>;

    /// All entries whose key starts with `prefix`, in no particular order
    async fn scan_prefix(&self, prefix: &str) -> DbResult<Vec<(String, String)>>;

    async fn health_check(&self) -> DbResult<bool> {
        Ok(true)
    }

    fn backend(&self) -> &'static str;
}

/// In-process store backed by a concurrent map
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> DbResult<Option<String>> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    async fn set(&self, key: &str, value: String) -> DbResult<()> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> DbResult<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn scan_prefix(&self, prefix: &str) -> DbResult<Vec<(String, String)>> {
        Ok(self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
