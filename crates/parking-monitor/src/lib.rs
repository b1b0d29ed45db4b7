//! # Parking Monitor - Occupancy Supervision
//!
//! Owns one long-lived monitoring task per registered lot. Each task samples
//! the lot's stream on a fixed interval, reduces detections to occupancy and
//! writes the result to the lot registry.
//!
//! ## Guarantees
//! - At most one task per lot id, also across concurrent registrations and
//!   repeated recovery
//! - Registration, spot updates and removal of one lot never interleave
//! - Cycles of one lot are strictly sequential
//! - Cycle failures are recorded in the lot's occupancy and never stop a task

pub mod engine;
pub mod error;
pub mod events;

pub use engine::{CycleEngine, CycleOutcome, EngineStats};
pub use error::{MonitorError, MonitorResult};
pub use events::EventBus;

use parking_core::{Lot, LotEvent, LotId, OccupancyReport, Spot};
use parking_cv::{CvConfig, Detector, FrameSource, OccupancyPipeline, StreamSession};
use parking_db::{ImageStore, LotRepository};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedMutexGuard, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Monitoring configuration
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Sleep between the end of one cycle and the start of the next
    pub cycle_interval: Duration,
    /// Detection, sampling and rendering settings
    pub cv: CvConfig,
    /// Event bus capacity and history length
    pub event_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            cycle_interval: Duration::from_secs(10),
            cv: CvConfig::default(),
            event_capacity: 1024,
        }
    }
}

/// Running task of one lot
struct LotTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
    started_at: DateTime<Utc>,
}

/// Summary of a monitored lot
#[derive(Debug, Clone)]
pub struct ActiveLot {
    pub id: LotId,
    pub started_at: DateTime<Utc>,
}

/// Removes a pending registration when dropped
struct Reservation<'a> {
    pending: &'a Mutex<HashSet<LotId>>,
    id: LotId,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}

type LotLocks = DashMap<LotId, Arc<tokio::sync::Mutex<()>>>;

/// Exclusive access to the registry entries of one lot
///
/// The lock entry is dropped with the last holder.
struct LotGuard<'a> {
    locks: &'a LotLocks,
    id: LotId,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for LotGuard<'_> {
    fn drop(&mut self) {
        // map + this guard
        self.locks.remove_if(&self.id, |_, lock| Arc::strong_count(lock) <= 2);
    }
}

/// Registry of lot monitoring tasks
pub struct MonitorSupervisor {
    config: MonitorConfig,
    repo: LotRepository,
    images: Arc<dyn ImageStore>,
    session: StreamSession,
    engine: Arc<CycleEngine>,
    bus: EventBus,
    tasks: DashMap<LotId, LotTask>,
    /// Ids with a registration in flight
    pending: Mutex<HashSet<LotId>>,
    /// Per-lot locks around registry writes
    lot_locks: LotLocks,
    /// Parent of every task token
    shutdown: CancellationToken,
}

impl MonitorSupervisor {
    /// Create a supervisor, no task runs until lots are registered or recovered
    pub fn new(
        config: MonitorConfig,
        repo: LotRepository,
        images: Arc<dyn ImageStore>,
        frames: Arc<dyn FrameSource>,
        detector: Arc<dyn Detector>,
    ) -> MonitorResult<Self> {
        info!(
            interval_secs = config.cycle_interval.as_secs_f64(),
            warmup_frames = config.cv.stream.warmup_frames,
            "Initializing monitor supervisor"
        );

        let pipeline = Arc::new(OccupancyPipeline::new(detector, config.cv.clone())?);
        let session = StreamSession::new(frames, config.cv.stream.clone());
        let bus = EventBus::new(config.event_capacity);

        let engine = Arc::new(CycleEngine::new(
            repo.clone(),
            images.clone(),
            session.clone(),
            pipeline,
            bus.clone(),
            config.cycle_interval,
        ));

        Ok(Self {
            config,
            repo,
            images,
            session,
            engine,
            bus,
            tasks: DashMap::new(),
            pending: Mutex::new(HashSet::new()),
            lot_locks: DashMap::new(),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn repository(&self) -> &LotRepository {
        &self.repo
    }

    pub fn engine(&self) -> &Arc<CycleEngine> {
        &self.engine
    }

    /// Subscribe to lot events
    pub fn subscribe(&self) -> broadcast::Receiver<LotEvent> {
        self.bus.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    // ========================================================================
    // REGISTRATION
    // ========================================================================

    /// Register a lot and start monitoring it
    ///
    /// The stream is probed before anything is stored. Registering an id
    /// that exists, or that another caller is registering right now, fails
    /// with `AlreadyExists`.
    pub async fn register_lot(&self, id: LotId, stream_source: impl Into<String>) -> MonitorResult<Lot> {
        id.validate()?;
        self.ensure_running()?;
        let stream_source = stream_source.into();

        if !self.pending.lock().insert(id.clone()) {
            return Err(MonitorError::AlreadyExists(id));
        }
        let _reservation = Reservation {
            pending: &self.pending,
            id: id.clone(),
        };
        let _lock = self.lock_lot(&id).await;

        if self.tasks.contains_key(&id) || self.repo.lot_exists(&id).await? {
            return Err(MonitorError::AlreadyExists(id));
        }

        if !self.session.probe(&stream_source).await {
            warn!(lot_id = %id, source = %stream_source, "Rejecting lot, stream unreachable");
            return Err(MonitorError::source_unreachable(id, stream_source));
        }

        // leftovers of an interrupted removal
        self.repo.remove_lot(&id).await?;
        self.images.delete(&id).await?;

        let lot = Lot::new(id, stream_source);
        self.repo.insert_lot(&lot).await?;
        self.spawn_task(lot.clone());

        info!(lot_id = %lot.id, source = %lot.stream_source, "Lot registered");
        self.bus
            .publish(LotEvent::registered(lot.id.clone(), lot.stream_source.clone()));

        Ok(lot)
    }

    /// Start a task for every persisted lot that has none
    ///
    /// Returns the number of tasks started. Safe to call repeatedly.
    pub async fn recover(&self) -> MonitorResult<usize> {
        self.ensure_running()?;
        let lots = self.repo.list_lots().await?;
        let found = lots.len();

        let started = lots
            .into_iter()
            .filter(|lot| self.spawn_task(lot.clone()))
            .count();

        info!(found, started, "Recovered lots from registry");
        Ok(started)
    }

    /// Spawn the monitoring task of a lot unless one is running
    fn spawn_task(&self, lot: Lot) -> bool {
        if self.shutdown.is_cancelled() {
            debug!(lot_id = %lot.id, "Not starting task after shutdown");
            return false;
        }

        let started = match self.tasks.entry(lot.id.clone()) {
            Entry::Occupied(_) => {
                debug!(lot_id = %lot.id, "Task already running");
                false
            }
            Entry::Vacant(slot) => {
                let token = self.shutdown.child_token();
                let handle = tokio::spawn(self.engine.clone().run(lot, token.clone()));
                slot.insert(LotTask {
                    token,
                    handle,
                    started_at: Utc::now(),
                });
                true
            }
        };

        self.engine.set_active_tasks(self.tasks.len());
        started
    }

    fn ensure_running(&self) -> MonitorResult<()> {
        if self.shutdown.is_cancelled() {
            Err(MonitorError::ShutDown)
        } else {
            Ok(())
        }
    }

    async fn lock_lot(&self, id: &LotId) -> LotGuard<'_> {
        let lock = self.lot_locks.entry(id.clone()).or_default().clone();
        LotGuard {
            locks: &self.lot_locks,
            id: id.clone(),
            _guard: lock.lock_owned().await,
        }
    }

    // ========================================================================
    // SPOTS & OCCUPANCY
    // ========================================================================

    /// Replace the whole spot set of a lot
    ///
    /// Takes effect from the next cycle; a cycle already running keeps the
    /// spots it read.
    pub async fn set_spots(&self, id: &LotId, spots: Vec<Spot>) -> MonitorResult<()> {
        let _lock = self.lock_lot(id).await;
        self.require_lot(id).await?;
        self.repo.set_spots(id, &spots).await?;

        info!(lot_id = %id, spots = spots.len(), "Spots updated");
        self.bus.publish(LotEvent::spots_updated(id.clone(), spots.len()));
        Ok(())
    }

    pub async fn get_spots(&self, id: &LotId) -> MonitorResult<Vec<Spot>> {
        self.require_lot(id).await?;
        Ok(self.repo.get_spots(id).await?)
    }

    /// Latest occupancy of a lot, `Pending` until the first cycle finishes
    pub async fn get_occupancy(&self, id: &LotId) -> MonitorResult<OccupancyReport> {
        self.require_lot(id).await?;
        Ok(self.repo.get_occupancy(id).await?.into())
    }

    /// Latest annotated snapshot, `None` until a cycle has succeeded
    pub async fn get_snapshot(&self, id: &LotId) -> MonitorResult<Option<Vec<u8>>> {
        self.require_lot(id).await?;
        Ok(self.images.get(id).await?)
    }

    pub async fn get_lot(&self, id: &LotId) -> MonitorResult<Lot> {
        self.repo
            .get_lot(id)
            .await?
            .ok_or_else(|| MonitorError::NotFound(id.clone()))
    }

    /// Every registered lot, monitored or not
    pub async fn list_lots(&self) -> MonitorResult<Vec<Lot>> {
        Ok(self.repo.list_lots().await?)
    }

    async fn require_lot(&self, id: &LotId) -> MonitorResult<()> {
        if self.repo.lot_exists(id).await? {
            Ok(())
        } else {
            Err(MonitorError::NotFound(id.clone()))
        }
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Stop monitoring a lot, leaving its registration in place
    ///
    /// Returns whether a task was running. Waits for the task to exit.
    pub async fn stop_lot(&self, id: &LotId) -> bool {
        let Some((_, task)) = self.tasks.remove(id) else {
            return false;
        };
        self.engine.set_active_tasks(self.tasks.len());

        task.token.cancel();
        if let Err(e) = task.handle.await {
            warn!(lot_id = %id, "Monitoring task ended abnormally: {}", e);
        }

        info!(lot_id = %id, "Monitoring task stopped");
        true
    }

    /// Stop monitoring a lot and delete its registry entries and snapshot
    pub async fn remove_lot(&self, id: &LotId) -> MonitorResult<()> {
        let _lock = self.lock_lot(id).await;
        self.require_lot(id).await?;
        self.stop_lot(id).await;

        self.repo.remove_lot(id).await?;
        self.images.delete(id).await?;

        info!(lot_id = %id, "Lot removed");
        self.bus.publish(LotEvent::removed(id.clone()));
        Ok(())
    }

    /// Cancel every task and wait for all of them to exit
    ///
    /// Later registrations and recovery fail with `ShutDown`.
    pub async fn shutdown(&self) {
        info!(tasks = self.tasks.len(), "Shutting down monitor supervisor");
        self.shutdown.cancel();

        let ids: Vec<LotId> = self.tasks.iter().map(|t| t.key().clone()).collect();
        for id in ids {
            if let Some((_, task)) = self.tasks.remove(&id) {
                if let Err(e) = task.handle.await {
                    warn!(lot_id = %id, "Monitoring task ended abnormally: {}", e);
                }
            }
        }

        self.engine.set_active_tasks(0);
        info!("Monitor supervisor stopped");
    }

    // ========================================================================
    // INTROSPECTION
    // ========================================================================

    /// Ids of lots with a running task, sorted
    pub fn active_lots(&self) -> Vec<LotId> {
        let mut ids: Vec<LotId> = self.tasks.iter().map(|t| t.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn active_lot_details(&self) -> Vec<ActiveLot> {
        let mut lots: Vec<ActiveLot> = self
            .tasks
            .iter()
            .map(|t| ActiveLot {
                id: t.key().clone(),
                started_at: t.value().started_at,
            })
            .collect();
        lots.sort_by(|a, b| a.id.cmp(&b.id));
        lots
    }

    pub fn is_monitored(&self, id: &LotId) -> bool {
        self.tasks.contains_key(id)
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Get engine statistics
    pub fn stats(&self) -> EngineStats {
        self.engine.get_stats()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use parking_cv::{ScriptedSource, StaticDetector};
    use parking_db::{KvStore, MemoryImageStore, MemoryStore};

    fn supervisor(source: Arc<ScriptedSource>) -> MonitorSupervisor {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        MonitorSupervisor::new(
            MonitorConfig {
                cycle_interval: Duration::from_millis(50),
                cv: CvConfig::fast_sampling(),
                ..Default::default()
            },
            LotRepository::new(store),
            Arc::new(MemoryImageStore::new()),
            source,
            Arc::new(StaticDetector::default()),
        )
        .unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = MonitorConfig::default();
        assert_eq!(config.cycle_interval, Duration::from_secs(10));
        assert_eq!(config.cv.stream.warmup_frames, 15);
    }

    #[tokio::test]
    async fn test_register_rejects_invalid_id() {
        let sup = supervisor(Arc::new(ScriptedSource::new()));
        let err = sup.register_lot(LotId::new("a:b"), "rtsp://x").await.unwrap_err();
        assert!(matches!(err, MonitorError::InvalidLotId(_)));
        assert_eq!(sup.task_count(), 0);
    }

    #[tokio::test]
    async fn test_register_unreachable_stores_nothing() {
        let sup = supervisor(Arc::new(ScriptedSource::new()));
        let err = sup.register_lot(LotId::new("L1"), "rtsp://offline").await.unwrap_err();

        assert!(matches!(err, MonitorError::SourceUnreachable { .. }));
        assert!(sup.list_lots().await.unwrap().is_empty());
        assert_eq!(sup.task_count(), 0);

        // reservation released
        assert!(sup.pending.lock().is_empty());
    }

    #[tokio::test]
    async fn test_stop_lot_keeps_registration() {
        let source = Arc::new(ScriptedSource::new());
        source.add_stream("rtsp://cam-1");
        let sup = supervisor(source);

        sup.register_lot(LotId::new("L1"), "rtsp://cam-1").await.unwrap();
        assert!(sup.stop_lot(&LotId::new("L1")).await);
        assert!(!sup.stop_lot(&LotId::new("L1")).await);

        assert!(!sup.is_monitored(&LotId::new("L1")));
        assert_eq!(sup.list_lots().await.unwrap().len(), 1);

        // recovery restarts it
        assert_eq!(sup.recover().await.unwrap(), 1);
        assert!(sup.is_monitored(&LotId::new("L1")));
        sup.shutdown().await;
    }

    #[tokio::test]
    async fn test_no_new_tasks_after_shutdown() {
        let source = Arc::new(ScriptedSource::new());
        source.add_stream("rtsp://cam-1");
        let sup = supervisor(source);
        sup.register_lot(LotId::new("L1"), "rtsp://cam-1").await.unwrap();

        sup.shutdown().await;

        let err = sup.register_lot(LotId::new("L2"), "rtsp://cam-1").await.unwrap_err();
        assert!(matches!(err, MonitorError::ShutDown));
        assert!(matches!(sup.recover().await, Err(MonitorError::ShutDown)));
        assert!(!sup.spawn_task(Lot::new("L1", "rtsp://cam-1")));

        assert!(!sup.is_monitored(&LotId::new("L1")));
        assert!(!sup.is_monitored(&LotId::new("L2")));
        assert_eq!(sup.task_count(), 0);
        assert_eq!(sup.list_lots().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_lot_locks_are_released() {
        let source = Arc::new(ScriptedSource::new());
        source.add_stream("rtsp://cam-1");
        let sup = supervisor(source);

        sup.register_lot(LotId::new("L1"), "rtsp://cam-1").await.unwrap();
        let _ = sup.set_spots(&LotId::new("ghost"), vec![]).await;
        assert!(sup.lot_locks.is_empty());
        sup.shutdown().await;
    }

    #[tokio::test]
    async fn test_remove_unknown_lot() {
        let sup = supervisor(Arc::new(ScriptedSource::new()));
        let err = sup.remove_lot(&LotId::new("ghost")).await.unwrap_err();
        assert!(matches!(err, MonitorError::NotFound(_)));
    }
}
