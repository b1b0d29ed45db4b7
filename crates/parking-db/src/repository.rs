//! Lot registry over a key-value store
//!
//! Key layout:
//! - `lot:<id>` holds the stream source address
//! - `lot:<id>:spots` holds the spot list as JSON
//! - `lot:<id>:occupancy` holds the latest occupancy result as JSON

use crate::{DbError, DbResult, KvStore};
use parking_core::{Lot, LotId, OccupancyResult, Spot};
use std::sync::Arc;
use tracing::{debug, warn};

const LOT_PREFIX: &str = "lot:";

pub fn lot_key(id: &LotId) -> String {
    format!("{LOT_PREFIX}{id}")
}

pub fn spots_key(id: &LotId) -> String {
    format!("{LOT_PREFIX}{id}:spots")
}

pub fn occupancy_key(id: &LotId) -> String {
    format!("{LOT_PREFIX}{id}:occupancy")
}

/// Repository for lots, their spots and their latest occupancy
#[derive(Clone)]
pub struct LotRepository {
    store: Arc<dyn KvStore>,
}

impl LotRepository {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    pub async fn get_lot(&self, id: &LotId) -> DbResult<Option<Lot>> {
        Ok(self
            .store
            .get(&lot_key(id))
            .await?
            .map(|source| Lot::new(id.clone(), source)))
    }

    pub async fn lot_exists(&self, id: &LotId) -> DbResult<bool> {
        Ok(self.store.get(&lot_key(id)).await?.is_some())
    }

    pub async fn insert_lot(&self, lot: &Lot) -> DbResult<()> {
        self.store
            .set(&lot_key(&lot.id), lot.stream_source.clone())
            .await
    }

    /// All persisted lots
    ///
    /// Only `lot:<id>` keys are lots, the longer keys belong to them.
    pub async fn list_lots(&self) -> DbResult<Vec<Lot>> {
        let mut lots: Vec<Lot> = self
            .store
            .scan_prefix(LOT_PREFIX)
            .await?
            .into_iter()
            .filter_map(|(key, source)| {
                let id = key.strip_prefix(LOT_PREFIX)?;
                (!id.contains(':')).then(|| Lot::new(id, source))
            })
            .collect();

        lots.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        Ok(lots)
    }

    /// Spot list of a lot, empty when none has been set
    ///
    /// An unreadable stored list is a `Serialization` error.
    pub async fn get_spots(&self, id: &LotId) -> DbResult<Vec<Spot>> {
        let Some(raw) = self.store.get(&spots_key(id)).await? else {
            return Ok(Vec::new());
        };

        serde_json::from_str(&raw).map_err(|e| {
            warn!(lot_id = %id, "Unreadable spot list: {}", e);
            DbError::from(e)
        })
    }

    /// Replace the whole spot list
    pub async fn set_spots(&self, id: &LotId, spots: &[Spot]) -> DbResult<()> {
        let value = serde_json::to_string(spots)?;
        self.store.set(&spots_key(id), value).await?;
        debug!(lot_id = %id, spots = spots.len(), "Stored spots");
        Ok(())
    }

    pub async fn get_occupancy(&self, id: &LotId) -> DbResult<Option<OccupancyResult>> {
        match self.store.get(&occupancy_key(id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn set_occupancy(&self, id: &LotId, result: &OccupancyResult) -> DbResult<()> {
        let value = serde_json::to_string(result)?;
        self.store.set(&occupancy_key(id), value).await
    }

    /// Delete every key of a lot, returning whether the lot existed
    ///
    /// The `lot:<id>` key goes last so an interrupted removal leaves a lot
    /// without data rather than data without a lot.
    pub async fn remove_lot(&self, id: &LotId) -> DbResult<bool> {
        self.store.delete(&spots_key(id)).await?;
        self.store.delete(&occupancy_key(id)).await?;
        self.store.delete(&lot_key(id)).await
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use parking_core::OccupancyCounts;

    fn repo() -> (Arc<MemoryStore>, LotRepository) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), LotRepository::new(store))
    }

    #[test]
    fn test_key_layout() {
        let id = LotId::new("L1");
        assert_eq!(lot_key(&id), "lot:L1");
        assert_eq!(spots_key(&id), "lot:L1:spots");
        assert_eq!(occupancy_key(&id), "lot:L1:occupancy");
    }

    #[tokio::test]
    async fn test_lot_roundtrip() {
        let (store, repo) = repo();
        let lot = Lot::new("L1", "rtsp://cam-1");
        repo.insert_lot(&lot).await.unwrap();

        assert_eq!(store.get("lot:L1").await.unwrap().as_deref(), Some("rtsp://cam-1"));
        assert_eq!(repo.get_lot(&LotId::new("L1")).await.unwrap(), Some(lot));
        assert!(!repo.lot_exists(&LotId::new("L2")).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_lots_skips_sub_keys() {
        let (_, repo) = repo();
        repo.insert_lot(&Lot::new("b", "rtsp://b")).await.unwrap();
        repo.insert_lot(&Lot::new("a", "rtsp://a")).await.unwrap();
        repo.set_spots(&LotId::new("a"), &[Spot::rect("A", 0.0, 0.0, 1.0, 1.0)])
            .await
            .unwrap();
        repo.set_occupancy(&LotId::new("a"), &OccupancyResult::failed("down"))
            .await
            .unwrap();

        let lots = repo.list_lots().await.unwrap();
        let ids: Vec<_> = lots.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_spots_replace_whole_set() {
        let (_, repo) = repo();
        let id = LotId::new("L1");
        assert!(repo.get_spots(&id).await.unwrap().is_empty());

        repo.set_spots(&id, &[Spot::rect("A", 0.0, 0.0, 1.0, 1.0), Spot::rect("B", 2.0, 0.0, 3.0, 1.0)])
            .await
            .unwrap();
        repo.set_spots(&id, &[Spot::rect("C", 0.0, 0.0, 5.0, 5.0)]).await.unwrap();

        let spots = repo.get_spots(&id).await.unwrap();
        assert_eq!(spots.len(), 1);
        assert_eq!(spots[0].name, "C");
    }

    #[tokio::test]
    async fn test_unreadable_spots_are_an_error() {
        let (store, repo) = repo();
        let id = LotId::new("L1");
        assert!(repo.get_spots(&id).await.unwrap().is_empty());

        store.set("lot:L1:spots", "not json".into()).await.unwrap();
        let err = repo.get_spots(&id).await.unwrap_err();
        assert!(matches!(err, DbError::Serialization(_)));
    }

    #[tokio::test]
    async fn test_occupancy_overwrite() {
        let (_, repo) = repo();
        let id = LotId::new("L1");
        assert!(repo.get_occupancy(&id).await.unwrap().is_none());

        repo.set_occupancy(&id, &OccupancyResult::available(OccupancyCounts::new(1, 2)))
            .await
            .unwrap();
        repo.set_occupancy(&id, &OccupancyResult::failed("stream unreadable"))
            .await
            .unwrap();

        let stored = repo.get_occupancy(&id).await.unwrap().unwrap();
        assert!(stored.is_failed());
    }

    #[tokio::test]
    async fn test_remove_lot() {
        let (store, repo) = repo();
        let id = LotId::new("L1");
        repo.insert_lot(&Lot::new("L1", "rtsp://x")).await.unwrap();
        repo.set_spots(&id, &[]).await.unwrap();

        assert!(repo.remove_lot(&id).await.unwrap());
        assert!(store.is_empty());
        assert!(!repo.remove_lot(&id).await.unwrap());
    }
}
