//! # Parking CV - Occupancy Vision Module
//!
//! Turns a sampled video frame into parking occupancy.
//! Features:
//! - Stream probing and warm-up aware single-frame sampling
//! - Vehicle detection (car, bus, truck) behind a [`Detector`] trait
//! - Reference-point to spot assignment and occupancy counts
//! - Annotated PNG snapshots
//!
//! Stream capture and YOLO inference use OpenCV and are enabled with the
//! `opencv` feature. Without it the scripted source and static detector are
//! available for demos and tests.

pub mod config;
pub mod detector;
pub mod error;
pub mod frame;
pub mod reducer;
pub mod renderer;
pub mod stream;

#[cfg(feature = "opencv")]
pub mod capture;
#[cfg(feature = "opencv")]
pub mod yolo;

pub use config::{CvConfig, DetectionConfig, RenderingConfig, StreamConfig};
pub use detector::{DetectionStats, Detector, RawDetection, StaticDetector, VehicleDetector};
pub use error::{CvError, CvResult};
pub use frame::Frame;
pub use reducer::{OccupancyReducer, Reduction};
pub use renderer::OverlayRenderer;
pub use stream::{FrameReader, FrameSource, ScriptedSource, ScriptedStream, StreamSession};

#[cfg(feature = "opencv")]
pub use capture::OpenCvSource;
#[cfg(feature = "opencv")]
pub use yolo::YoloDetector;

use parking_core::{OccupancyCounts, Spot, VehicleDetection};
use std::sync::Arc;
use tracing::{debug, info};

/// Everything one monitoring cycle learns from a frame
#[derive(Debug, Clone)]
pub struct FrameAnalysis {
    pub counts: OccupancyCounts,
    pub detections: Vec<VehicleDetection>,
    pub assignments: Vec<Option<usize>>,
    /// Annotated snapshot, PNG encoded
    pub snapshot_png: Vec<u8>,
}

/// Detection, reduction and snapshot encoding for one frame
pub struct OccupancyPipeline {
    config: CvConfig,
    detector: VehicleDetector,
    reducer: OccupancyReducer,
}

impl OccupancyPipeline {
    pub fn new(detector: Arc<dyn Detector>, config: CvConfig) -> CvResult<Self> {
        config.validate()?;
        info!(detector = detector.name(), "Initializing occupancy pipeline");

        Ok(Self {
            detector: VehicleDetector::new(detector, &config),
            reducer: OccupancyReducer::new(&config),
            config,
        })
    }

    pub fn config(&self) -> &CvConfig {
        &self.config
    }

    /// Process a sampled frame against a lot's spots
    ///
    /// CPU bound, call from the blocking pool.
    pub fn process(&self, frame: Frame, spots: &[Spot]) -> CvResult<FrameAnalysis> {
        let detections = self.detector.detect(&frame)?;
        let reduction = self.reducer.reduce(&detections, spots, frame);
        let snapshot_png = reduction.annotated.encode_png()?;

        debug!(
            vehicles = detections.len(),
            occupied = reduction.counts.occupied,
            png_bytes = snapshot_png.len(),
            "Processed frame"
        );

        Ok(FrameAnalysis {
            counts: reduction.counts,
            detections,
            assignments: reduction.assignments,
            snapshot_png,
        })
    }

    /// Get detection statistics
    pub fn detection_stats(&self) -> DetectionStats {
        self.detector.stats()
    }
}
