//! # Parking Core
//!
//! Core domain models and types for the parking occupancy monitoring system.
//! This crate provides shared types used across the engine crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod error;
pub mod events;
pub mod geo;

pub use error::{CoreError, CoreResult};
pub use events::*;
pub use geo::*;

// ============================================================================
// LOT MODELS
// ============================================================================

/// Unique identifier for a parking lot
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LotId(pub String);

impl LotId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check that the id can be used as a store key segment and a file name
    pub fn validate(&self) -> CoreResult<()> {
        let id = self.0.as_str();
        let invalid = id.is_empty()
            || id == "."
            || id == ".."
            || id.contains([':', '/', '\\'])
            || id.chars().any(char::is_control);

        if invalid {
            return Err(CoreError::InvalidLotId(id.to_string()));
        }
        Ok(())
    }
}

impl fmt::Display for LotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for LotId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for LotId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A registered parking lot and the stream it is watched through
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lot {
    pub id: LotId,
    pub stream_source: String,
}

impl Lot {
    pub fn new(id: impl Into<LotId>, stream_source: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            stream_source: stream_source.into(),
        }
    }
}

/// A named polygon marking one parking space
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spot {
    pub name: String,
    pub points: Vec<Point>,
}

impl Spot {
    pub fn new(name: impl Into<String>, points: Vec<Point>) -> Self {
        Self {
            name: name.into(),
            points,
        }
    }

    /// Axis-aligned rectangle spot, convenient for fixtures and demos
    pub fn rect(name: impl Into<String>, x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self::new(
            name,
            vec![
                Point::new(x1, y1),
                Point::new(x2, y1),
                Point::new(x2, y2),
                Point::new(x1, y2),
            ],
        )
    }

    pub fn polygon(&self) -> Polygon<'_> {
        Polygon::new(&self.points)
    }

    pub fn contains(&self, point: &Point) -> bool {
        self.polygon().contains(point)
    }
}

// ============================================================================
// DETECTION MODELS
// ============================================================================

/// Bounding box in corner form
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Build from top-left corner plus size
    pub fn from_xywh(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self::new(x, y, x + width, y + height)
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// Intersection over union with another box
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let iy = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let inter = ix * iy;
        let union = self.area() + other.area() - inter;
        if union <= 0.0 { 0.0 } else { inter / union }
    }

    /// Ground contact estimate of the object in this box
    ///
    /// Horizontal center, and halfway between the vertical center and the
    /// bottom edge. Corners are truncated to whole pixels and halving floors.
    pub fn reference_point(&self) -> Point {
        let x1 = self.x1 as i64;
        let y1 = self.y1 as i64;
        let x2 = self.x2 as i64;
        let y2 = self.y2 as i64;

        let cx = x1.saturating_add(x2).div_euclid(2);
        let cy = y1.saturating_add(y2).div_euclid(2).saturating_add(y2).div_euclid(2);

        Point::new(cx as f64, cy as f64)
    }
}

/// Vehicle classes that can occupy a spot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleClass {
    Car,
    Bus,
    Truck,
}

impl VehicleClass {
    pub const ALL: [VehicleClass; 3] = [VehicleClass::Car, VehicleClass::Bus, VehicleClass::Truck];

    /// Map a COCO class index to a vehicle class
    pub fn from_coco_id(class_id: usize) -> Option<Self> {
        match class_id {
            2 => Some(Self::Car),
            5 => Some(Self::Bus),
            7 => Some(Self::Truck),
            _ => None,
        }
    }

    /// Map a class label ("car", "bus", "truck") to a vehicle class
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim() {
            "car" => Some(Self::Car),
            "bus" => Some(Self::Bus),
            "truck" => Some(Self::Truck),
            _ => None,
        }
    }

    pub fn coco_id(&self) -> usize {
        match self {
            Self::Car => 2,
            Self::Bus => 5,
            Self::Truck => 7,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Car => "car",
            Self::Bus => "bus",
            Self::Truck => "truck",
        }
    }
}

impl fmt::Display for VehicleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detected vehicle and the point used to place it in a spot
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VehicleDetection {
    pub bbox: BoundingBox,
    pub class: VehicleClass,
    pub confidence: f32,
    pub reference_point: Point,
}

impl VehicleDetection {
    pub fn new(bbox: BoundingBox, class: VehicleClass, confidence: f32) -> Self {
        Self {
            bbox,
            class,
            confidence,
            reference_point: bbox.reference_point(),
        }
    }
}

// ============================================================================
// OCCUPANCY MODELS
// ============================================================================

/// Occupancy counts for one sample
///
/// `occupied` counts matched detections rather than distinct spots, so it can
/// exceed `total` and `freed` can go negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccupancyCounts {
    pub freed: i64,
    pub occupied: u32,
    pub total: u32,
}

impl OccupancyCounts {
    pub fn new(occupied: u32, total: u32) -> Self {
        Self {
            freed: total as i64 - occupied as i64,
            occupied,
            total,
        }
    }
}

/// Outcome of the latest monitoring cycle of a lot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OccupancyResult {
    Available {
        #[serde(flatten)]
        counts: OccupancyCounts,
        sampled_at: DateTime<Utc>,
    },
    Failed {
        reason: String,
        failed_at: DateTime<Utc>,
    },
}

impl OccupancyResult {
    pub fn available(counts: OccupancyCounts) -> Self {
        Self::Available {
            counts,
            sampled_at: Utc::now(),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
            failed_at: Utc::now(),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub fn counts(&self) -> Option<OccupancyCounts> {
        match self {
            Self::Available { counts, .. } => Some(*counts),
            Self::Failed { .. } => None,
        }
    }
}

/// What a reader gets back when asking for a lot's occupancy
#[derive(Debug, Clone, PartialEq)]
pub enum OccupancyReport {
    /// Counts from the last cycle
    Available(OccupancyCounts),
    /// The last cycle could not sample the stream
    Failed { reason: String },
    /// No cycle has finished yet
    Pending,
}

impl From<Option<OccupancyResult>> for OccupancyReport {
    fn from(result: Option<OccupancyResult>) -> Self {
        match result {
            Some(OccupancyResult::Available { counts, .. }) => Self::Available(counts),
            Some(OccupancyResult::Failed { reason, .. }) => Self::Failed { reason },
            None => Self::Pending,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lot_id_validation() {
        assert!(LotId::new("L1").validate().is_ok());
        assert!(LotId::new("north-garage_2.level").validate().is_ok());

        for bad in ["", ".", "..", "a:b", "a/b", "a\\b", "a\nb"] {
            assert!(
                matches!(LotId::new(bad).validate(), Err(CoreError::InvalidLotId(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_reference_point_formula() {
        let bbox = BoundingBox::new(100.0, 100.0, 200.0, 300.0);
        // cy = (200 + 300) / 2
        assert_eq!(bbox.reference_point(), Point::new(150.0, 250.0));

        // Corners are truncated before halving
        let bbox = BoundingBox::new(10.9, 11.7, 21.2, 40.9);
        // cx = (10 + 21) / 2 = 15, cy = ((11 + 40) / 2 + 40) / 2 = (25 + 40) / 2 = 32
        assert_eq!(bbox.reference_point(), Point::new(15.0, 32.0));
    }

    #[test]
    fn test_bounding_box_iou() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, 0.0, 15.0, 10.0);
        assert!((a.iou(&b) - 1.0 / 3.0).abs() < 1e-6);
        assert_eq!(a.iou(&BoundingBox::new(20.0, 20.0, 30.0, 30.0)), 0.0);
        assert_eq!(BoundingBox::from_xywh(5.0, 5.0, 10.0, 20.0).y2, 25.0);
    }

    #[test]
    fn test_vehicle_class_mapping() {
        assert_eq!(VehicleClass::from_coco_id(2), Some(VehicleClass::Car));
        assert_eq!(VehicleClass::from_coco_id(5), Some(VehicleClass::Bus));
        assert_eq!(VehicleClass::from_coco_id(7), Some(VehicleClass::Truck));
        assert_eq!(VehicleClass::from_coco_id(0), None);
        assert_eq!(VehicleClass::from_label("truck"), Some(VehicleClass::Truck));
        assert_eq!(VehicleClass::from_label("person"), None);
    }

    #[test]
    fn test_counts_freed_can_go_negative() {
        assert_eq!(OccupancyCounts::new(3, 10).freed, 7);
        assert_eq!(OccupancyCounts::new(3, 2).freed, -1);
    }

    #[test]
    fn test_occupancy_result_wire_shape() {
        let result = OccupancyResult::available(OccupancyCounts::new(3, 10));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "available");
        assert_eq!(json["occupied"], 3);
        assert_eq!(json["total"], 10);
        assert_eq!(json["freed"], 7);

        let failed = OccupancyResult::failed("stream unreadable");
        let json = serde_json::to_string(&failed).unwrap();
        let parsed: OccupancyResult = serde_json::from_str(&json).unwrap();
        assert!(parsed.is_failed());
        assert_eq!(parsed.counts(), None);
    }

    #[test]
    fn test_report_from_result() {
        assert_eq!(OccupancyReport::from(None), OccupancyReport::Pending);

        let report = OccupancyReport::from(Some(OccupancyResult::failed("boom")));
        assert_eq!(report, OccupancyReport::Failed { reason: "boom".into() });

        let counts = OccupancyCounts::new(1, 2);
        let report = OccupancyReport::from(Some(OccupancyResult::available(counts)));
        assert_eq!(report, OccupancyReport::Available(counts));
    }

    #[test]
    fn test_spot_serialization() {
        let spot = Spot::new("Spot A", vec![Point::new(100.0, 100.0), Point::new(200.0, 200.0)]);
        let json = serde_json::to_string(&vec![spot]).unwrap();
        assert_eq!(json, r#"[{"name":"Spot A","points":[[100.0,100.0],[200.0,200.0]]}]"#);
    }
}
