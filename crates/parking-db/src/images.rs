//! Snapshot image storage
//!
//! One PNG per lot, overwritten after every successful cycle.

use crate::DbResult;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_core::LotId;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Stores the latest annotated snapshot of each lot
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn put(&self, id: &LotId, png: Vec<u8>) -> DbResult<()>;

    async fn get(&self, id: &LotId) -> DbResult<Option<Vec<u8>>>;

    /// Remove a snapshot, returning whether it existed
    async fn delete(&self, id: &LotId) -> DbResult<bool>;
}

/// File name of a lot's snapshot
pub fn image_file_name(id: &LotId) -> String {
    format!("{id}.png")
}

/// Snapshots as `<dir>/<id>.png`
///
/// Writes go to a temporary file that is renamed over the old image, so
/// readers see either the previous or the new snapshot.
#[derive(Debug, Clone)]
pub struct FsImageStore {
    dir: PathBuf,
}

impl FsImageStore {
    /// Use `dir`, creating it when missing
    pub async fn new(dir: impl Into<PathBuf>) -> DbResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, id: &LotId) -> PathBuf {
        self.dir.join(image_file_name(id))
    }
}

#[async_trait]
impl ImageStore for FsImageStore {
    async fn put(&self, id: &LotId, png: Vec<u8>) -> DbResult<()> {
        let path = self.path_for(id);
        let tmp = self.dir.join(format!(".{id}.png.tmp"));

        tokio::fs::write(&tmp, &png).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!(lot_id = %id, bytes = png.len(), path = %path.display(), "Wrote snapshot");
        Ok(())
    }

    async fn get(&self, id: &LotId) -> DbResult<Option<Vec<u8>>> {
        match tokio::fs::read(self.path_for(id)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, id: &LotId) -> DbResult<bool> {
        match tokio::fs::remove_file(self.path_for(id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-process snapshot store
#[derive(Debug, Default)]
pub struct MemoryImageStore {
    images: DashMap<LotId, Vec<u8>>,
}

impl MemoryImageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ImageStore for MemoryImageStore {
    async fn put(&self, id: &LotId, png: Vec<u8>) -> DbResult<()> {
        self.images.insert(id.clone(), png);
        Ok(())
    }

    async fn get(&self, id: &LotId) -> DbResult<Option<Vec<u8>>> {
        Ok(self.images.get(id).map(|v| v.value().clone()))
    }

    async fn delete(&self, id: &LotId) -> DbResult<bool> {
        Ok(self.images.remove(id).is_some())
    }
}
