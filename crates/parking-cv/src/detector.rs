//! Vehicle detection
//!
//! A [`Detector`] turns a frame into raw class-labelled boxes. The
//! [`VehicleDetector`] wraps one and keeps only confident car, bus and truck
//! detections, each with the reference point used for spot matching.

use crate::{CvConfig, CvResult, Frame};
use parking_core::{BoundingBox, VehicleClass, VehicleDetection};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace};

/// Unfiltered detector output, classes are COCO indices
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDetection {
    pub bbox: BoundingBox,
    pub class_id: usize,
    pub confidence: f32,
}

impl RawDetection {
    pub fn new(bbox: BoundingBox, class_id: usize, confidence: f32) -> Self {
        Self {
            bbox,
            class_id,
            confidence,
        }
    }

    /// Convenience constructor for a vehicle class
    pub fn vehicle(bbox: BoundingBox, class: VehicleClass, confidence: f32) -> Self {
        Self::new(bbox, class.coco_id(), confidence)
    }
}

/// Object detector over decoded frames
///
/// Implementations run on the blocking pool and may be shared across lots.
pub trait Detector: Send + Sync {
    fn detect(&self, frame: &Frame) -> CvResult<Vec<RawDetection>>;

    fn name(&self) -> &str {
        "detector"
    }
}

/// Statistics for vehicle detection
#[derive(Debug, Default, Clone)]
pub struct DetectionStats {
    pub frames_processed: u64,
    pub vehicles_detected: u64,
    pub discarded: u64,
    pub detection_time_ms: f64,
}

/// Filters a [`Detector`] down to vehicles
pub struct VehicleDetector {
    inner: Arc<dyn Detector>,
    min_confidence: f32,
    stats: Mutex<DetectionStats>,
}

impl VehicleDetector {
    pub fn new(inner: Arc<dyn Detector>, config: &CvConfig) -> Self {
        Self {
            inner,
            min_confidence: config.detection.min_confidence,
            stats: Mutex::new(DetectionStats::default()),
        }
    }

    /// Detect vehicles in a frame
    pub fn detect(&self, frame: &Frame) -> CvResult<Vec<VehicleDetection>> {
        let start = Instant::now();
        let raw = self.inner.detect(frame)?;
        let raw_count = raw.len();

        let vehicles: Vec<VehicleDetection> = raw
            .into_iter()
            .filter(|d| d.confidence >= self.min_confidence)
            .filter_map(|d| {
                VehicleClass::from_coco_id(d.class_id)
                    .map(|class| VehicleDetection::new(d.bbox, class, d.confidence))
            })
            .collect();

        let elapsed = start.elapsed().as_secs_f64() * 1000.0;
        {
            let mut stats = self.stats.lock();
            stats.frames_processed += 1;
            stats.vehicles_detected += vehicles.len() as u64;
            stats.discarded += (raw_count - vehicles.len()) as u64;
            stats.detection_time_ms = elapsed;
        }

        debug!(
            detector = self.inner.name(),
            source = %frame.source,
            "Detected {} vehicles ({} raw) in {:.2}ms",
            vehicles.len(),
            raw_count,
            elapsed
        );
        for v in &vehicles {
            trace!(
                class = %v.class,
                confidence = v.confidence,
                x = v.reference_point.x,
                y = v.reference_point.y,
                "vehicle"
            );
        }

        Ok(vehicles)
    }

    /// Get detection statistics
    pub fn stats(&self) -> DetectionStats {
        self.stats.lock().clone()
    }
}

/// Detector returning preset detections
///
/// Detections can be set per stream address, frames from other streams get
/// the default set.
#[derive(Default)]
pub struct StaticDetector {
    default: RwLock<Vec<RawDetection>>,
    by_source: RwLock<HashMap<String, Vec<RawDetection>>>,
}

impl StaticDetector {
    pub fn new(detections: Vec<RawDetection>) -> Self {
        Self {
            default: RwLock::new(detections),
            by_source: RwLock::new(HashMap::new()),
        }
    }

    /// Replace the detections returned for frames of every unlisted stream
    pub fn set_default(&self, detections: Vec<RawDetection>) {
        *self.default.write() = detections;
    }

    /// Replace the detections returned for frames of `source`
    pub fn set_for_source(&self, source: impl Into<String>, detections: Vec<RawDetection>) {
        self.by_source.write().insert(source.into(), detections);
    }
}

impl Detector for StaticDetector {
    fn detect(&self, frame: &Frame) -> CvResult<Vec<RawDetection>> {
        if let Some(detections) = self.by_source.read().get(&frame.source) {
            return Ok(detections.clone());
        }
        Ok(self.default.read().clone())
    }

    fn name(&self) -> &str {
        "static"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_core::Point;

    fn frame(source: &str) -> Frame {
        Frame::blank(16, 16, [0, 0, 0], source)
    }

    #[test]
    fn test_keeps_only_vehicle_classes() {
        let raw = vec![
            RawDetection::new(BoundingBox::new(0.0, 0.0, 10.0, 10.0), 2, 0.9),
            RawDetection::new(BoundingBox::new(0.0, 0.0, 10.0, 10.0), 0, 0.9),
            RawDetection::new(BoundingBox::new(0.0, 0.0, 10.0, 10.0), 5, 0.8),
            RawDetection::new(BoundingBox::new(0.0, 0.0, 10.0, 10.0), 7, 0.7),
            RawDetection::new(BoundingBox::new(0.0, 0.0, 10.0, 10.0), 3, 0.99),
        ];
        let detector = VehicleDetector::new(Arc::new(StaticDetector::new(raw)), &CvConfig::default());

        let vehicles = detector.detect(&frame("a")).unwrap();
        let classes: Vec<_> = vehicles.iter().map(|v| v.class).collect();
        assert_eq!(classes, vec![VehicleClass::Car, VehicleClass::Bus, VehicleClass::Truck]);

        let stats = detector.stats();
        assert_eq!(stats.frames_processed, 1);
        assert_eq!(stats.vehicles_detected, 3);
        assert_eq!(stats.discarded, 2);
    }

    #[test]
    fn test_confidence_floor() {
        let raw = vec![
            RawDetection::vehicle(BoundingBox::new(0.0, 0.0, 10.0, 10.0), VehicleClass::Car, 0.1),
            RawDetection::vehicle(BoundingBox::new(0.0, 0.0, 10.0, 10.0), VehicleClass::Car, 0.25),
        ];
        let detector = VehicleDetector::new(Arc::new(StaticDetector::new(raw)), &CvConfig::default());
        assert_eq!(detector.detect(&frame("a")).unwrap().len(), 1);
    }

    #[test]
    fn test_reference_point_attached() {
        let raw = vec![RawDetection::vehicle(
            BoundingBox::new(100.0, 100.0, 200.0, 300.0),
            VehicleClass::Truck,
            0.9,
        )];
        let detector = VehicleDetector::new(Arc::new(StaticDetector::new(raw)), &CvConfig::default());
        let vehicles = detector.detect(&frame("a")).unwrap();
        assert_eq!(vehicles[0].reference_point, Point::new(150.0, 250.0));
    }

    #[test]
    fn test_static_detector_per_source() {
        let detector = StaticDetector::default();
        let car = RawDetection::vehicle(BoundingBox::new(0.0, 0.0, 4.0, 4.0), VehicleClass::Car, 0.9);
        detector.set_for_source("rtsp://cam-1", vec![car]);

        assert_eq!(detector.detect(&frame("rtsp://cam-1")).unwrap().len(), 1);
        assert!(detector.detect(&frame("rtsp://cam-2")).unwrap().is_empty());

        detector.set_default(vec![car, car]);
        assert_eq!(detector.detect(&frame("rtsp://cam-2")).unwrap().len(), 2);
    }
}
