//! Monitoring cycle engine
//!
//! One cycle: read the lot's spots, sample the stream, detect and reduce on
//! the blocking pool, then persist the occupancy result and snapshot. Every
//! failure ends the cycle with a recorded result; none of them stop the loop.

use crate::EventBus;
use parking_core::{Lot, LotEvent, OccupancyCounts, OccupancyResult};
use parking_cv::{FrameAnalysis, OccupancyPipeline, StreamSession};
use parking_db::{ImageStore, LotRepository};

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Engine statistics
#[derive(Debug, Default, Clone)]
pub struct EngineStats {
    pub cycles_completed: u64,
    pub cycles_failed: u64,
    pub detections_processed: u64,
    pub snapshots_written: u64,
    pub persist_errors: u64,
    pub last_cycle_ms: f64,
    pub active_tasks: usize,
}

/// How a single cycle ended
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Completed {
        counts: OccupancyCounts,
        detections: usize,
    },
    Failed {
        reason: String,
    },
}

impl CycleOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Runs monitoring cycles, shared by every lot task
pub struct CycleEngine {
    repo: LotRepository,
    images: Arc<dyn ImageStore>,
    session: StreamSession,
    pipeline: Arc<OccupancyPipeline>,
    bus: EventBus,
    stats: Arc<RwLock<EngineStats>>,
    cycle_interval: Duration,
}

impl CycleEngine {
    pub fn new(
        repo: LotRepository,
        images: Arc<dyn ImageStore>,
        session: StreamSession,
        pipeline: Arc<OccupancyPipeline>,
        bus: EventBus,
        cycle_interval: Duration,
    ) -> Self {
        Self {
            repo,
            images,
            session,
            pipeline,
            bus,
            stats: Arc::new(RwLock::new(EngineStats::default())),
            cycle_interval,
        }
    }

    pub fn cycle_interval(&self) -> Duration {
        self.cycle_interval
    }

    /// Get engine statistics
    pub fn get_stats(&self) -> EngineStats {
        self.stats.read().clone()
    }

    /// Monitor a lot until the token is cancelled
    ///
    /// Cycles run back to back with `cycle_interval` of sleep between them,
    /// the first one immediately.
    pub async fn run(self: Arc<Self>, lot: Lot, token: CancellationToken) {
        info!(lot_id = %lot.id, source = %lot.stream_source, "Monitoring started");

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = self.run_cycle(&lot) => {}
            }

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.cycle_interval) => {}
            }
        }

        info!(lot_id = %lot.id, "Monitoring stopped");
    }

    /// Run one cycle for a lot and record its result
    pub async fn run_cycle(&self, lot: &Lot) -> CycleOutcome {
        let start = Instant::now();

        let outcome = match self.analyze(lot).await {
            Ok(analysis) => self.persist_success(lot, analysis).await,
            Err(reason) => self.persist_failure(lot, reason).await,
        };

        let elapsed = start.elapsed().as_secs_f64() * 1000.0;
        {
            let mut stats = self.stats.write();
            match &outcome {
                CycleOutcome::Completed { detections, .. } => {
                    stats.cycles_completed += 1;
                    stats.detections_processed += *detections as u64;
                }
                CycleOutcome::Failed { .. } => stats.cycles_failed += 1,
            }
            stats.last_cycle_ms = elapsed;
        }

        let event = match &outcome {
            CycleOutcome::Completed { counts, detections } => {
                LotEvent::cycle_completed(lot.id.clone(), *counts, *detections)
            }
            CycleOutcome::Failed { reason } => LotEvent::cycle_failed(lot.id.clone(), reason.clone()),
        };
        self.bus.publish(event);

        debug!(lot_id = %lot.id, elapsed_ms = elapsed, ?outcome, "Cycle finished");
        outcome
    }

    /// Sample and process one frame, failures become the recorded reason
    async fn analyze(&self, lot: &Lot) -> Result<FrameAnalysis, String> {
        let spots = self
            .repo
            .get_spots(&lot.id)
            .await
            .map_err(|e| format!("failed to read spots: {e}"))?;

        let frame = self
            .session
            .sample(&lot.stream_source)
            .await
            .map_err(|e| format!("stream sample failed: {e}"))?;

        let pipeline = self.pipeline.clone();
        tokio::task::spawn_blocking(move || pipeline.process(frame, &spots))
            .await
            .map_err(|e| format!("frame processing task failed: {e}"))?
            .map_err(|e| format!("frame processing failed: {e}"))
    }

    async fn persist_success(&self, lot: &Lot, analysis: FrameAnalysis) -> CycleOutcome {
        let counts = analysis.counts;
        let detections = analysis.detections.len();

        if let Err(e) = self
            .repo
            .set_occupancy(&lot.id, &OccupancyResult::available(counts))
            .await
        {
            warn!(lot_id = %lot.id, "Failed to persist occupancy: {}", e);
            self.stats.write().persist_errors += 1;
        }

        match self.images.put(&lot.id, analysis.snapshot_png).await {
            Ok(()) => self.stats.write().snapshots_written += 1,
            Err(e) => {
                warn!(lot_id = %lot.id, "Failed to write snapshot: {}", e);
                self.stats.write().persist_errors += 1;
            }
        }

        info!(
            lot_id = %lot.id,
            occupied = counts.occupied,
            total = counts.total,
            freed = counts.freed,
            "Occupancy updated"
        );

        CycleOutcome::Completed { counts, detections }
    }

    async fn persist_failure(&self, lot: &Lot, reason: String) -> CycleOutcome {
        warn!(lot_id = %lot.id, %reason, "Cycle failed");

        if let Err(e) = self
            .repo
            .set_occupancy(&lot.id, &OccupancyResult::failed(reason.clone()))
            .await
        {
            warn!(lot_id = %lot.id, "Failed to persist failed result: {}", e);
            self.stats.write().persist_errors += 1;
        }

        CycleOutcome::Failed { reason }
    }

    pub(crate) fn set_active_tasks(&self, count: usize) {
        self.stats.write().active_tasks = count;
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use parking_core::{BoundingBox, LotId, Spot, VehicleClass};
    use parking_cv::{CvConfig, RawDetection, ScriptedSource, StaticDetector};
    use parking_db::{KvStore, MemoryImageStore, MemoryStore};

    struct Fixture {
        engine: CycleEngine,
        store: Arc<dyn KvStore>,
        repo: LotRepository,
        images: Arc<MemoryImageStore>,
        source: Arc<ScriptedSource>,
    }

    fn fixture(detections: Vec<RawDetection>) -> Fixture {
        let config = CvConfig::fast_sampling();
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let repo = LotRepository::new(store.clone());
        let images = Arc::new(MemoryImageStore::new());
        let source = Arc::new(ScriptedSource::new());
        let pipeline = OccupancyPipeline::new(Arc::new(StaticDetector::new(detections)), config.clone()).unwrap();

        let engine = CycleEngine::new(
            repo.clone(),
            images.clone(),
            StreamSession::new(source.clone(), config.stream.clone()),
            Arc::new(pipeline),
            EventBus::default(),
            Duration::from_millis(50),
        );

        Fixture {
            engine,
            store,
            repo,
            images,
            source,
        }
    }

    #[tokio::test]
    async fn test_successful_cycle_persists_counts_and_snapshot() {
        let f = fixture(vec![RawDetection::vehicle(
            BoundingBox::new(10.0, 10.0, 20.0, 20.0),
            VehicleClass::Car,
            0.9,
        )]);
        f.source.add_stream("rtsp://cam-1");
        let lot = Lot::new("L1", "rtsp://cam-1");
        f.repo
            .set_spots(&lot.id, &[Spot::rect("A", 0.0, 0.0, 30.0, 30.0), Spot::rect("B", 40.0, 0.0, 60.0, 30.0)])
            .await
            .unwrap();

        let outcome = f.engine.run_cycle(&lot).await;
        assert_eq!(
            outcome,
            CycleOutcome::Completed {
                counts: OccupancyCounts::new(1, 2),
                detections: 1
            }
        );

        let stored = f.repo.get_occupancy(&lot.id).await.unwrap().unwrap();
        assert_eq!(stored.counts(), Some(OccupancyCounts::new(1, 2)));
        assert!(f.images.get(&lot.id).await.unwrap().is_some());

        let stats = f.engine.get_stats();
        assert_eq!(stats.cycles_completed, 1);
        assert_eq!(stats.snapshots_written, 1);
    }

    #[tokio::test]
    async fn test_unreachable_stream_records_failure_without_snapshot() {
        let f = fixture(Vec::new());
        let lot = Lot::new("L1", "rtsp://offline");

        let outcome = f.engine.run_cycle(&lot).await;
        assert!(outcome.is_failed());

        let stored = f.repo.get_occupancy(&lot.id).await.unwrap().unwrap();
        assert!(stored.is_failed());
        assert!(f.images.get(&LotId::new("L1")).await.unwrap().is_none());
        assert_eq!(f.engine.get_stats().cycles_failed, 1);
    }

    #[tokio::test]
    async fn test_unreadable_spots_record_failure() {
        let f = fixture(Vec::new());
        f.source.add_stream("rtsp://cam-1");
        let lot = Lot::new("L1", "rtsp://cam-1");
        f.store.set("lot:L1:spots", "{broken".into()).await.unwrap();

        let outcome = f.engine.run_cycle(&lot).await;
        assert!(outcome.is_failed());

        let stored = f.repo.get_occupancy(&lot.id).await.unwrap().unwrap();
        assert!(stored.is_failed());
        assert_eq!(stored.counts(), None);
        assert_eq!(f.source.open_count(), 0);
    }

    #[tokio::test]
    async fn test_no_spots_means_zero_total() {
        let f = fixture(vec![RawDetection::vehicle(
            BoundingBox::new(10.0, 10.0, 20.0, 20.0),
            VehicleClass::Car,
            0.9,
        )]);
        f.source.add_stream("rtsp://cam-1");
        let lot = Lot::new("L1", "rtsp://cam-1");

        let outcome = f.engine.run_cycle(&lot).await;
        assert_eq!(
            outcome,
            CycleOutcome::Completed {
                counts: OccupancyCounts::new(0, 0),
                detections: 1
            }
        );
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let f = fixture(Vec::new());
        f.source.add_stream("rtsp://cam-1");
        let engine = Arc::new(f.engine);
        let token = CancellationToken::new();

        let handle = tokio::spawn(engine.clone().run(Lot::new("L1", "rtsp://cam-1"), token.clone()));
        tokio::time::sleep(Duration::from_millis(120)).await;
        token.cancel();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("task should stop after cancellation")
            .unwrap();
        assert!(engine.get_stats().cycles_completed >= 1);
    }
}
