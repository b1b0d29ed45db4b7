//! Frame-to-occupancy reduction
//!
//! Each vehicle is assigned to the first spot, in spot order, whose polygon
//! contains its reference point. A vehicle inside no spot is ignored.
//! `occupied` counts assigned vehicles, not distinct spots: two vehicles in
//! one spot count twice, so `occupied` may exceed `total`.

use crate::{CvConfig, Frame, OverlayRenderer};
use parking_core::{OccupancyCounts, Spot, VehicleDetection};
use tracing::debug;

/// Result of reducing one frame
#[derive(Debug, Clone)]
pub struct Reduction {
    pub counts: OccupancyCounts,
    /// Matched spot index for each detection, in detection order
    pub assignments: Vec<Option<usize>>,
    /// The sampled frame with spot and vehicle overlays
    pub annotated: Frame,
}

impl Reduction {
    /// Names of the spots holding at least one vehicle
    pub fn occupied_spots<'a>(&self, spots: &'a [Spot]) -> Vec<&'a str> {
        let mut hit = vec![false; spots.len()];
        for idx in self.assignments.iter().flatten() {
            if let Some(slot) = hit.get_mut(*idx) {
                *slot = true;
            }
        }
        spots
            .iter()
            .zip(hit)
            .filter_map(|(spot, h)| h.then_some(spot.name.as_str()))
            .collect()
    }
}

/// Counts occupied spots and renders the snapshot overlay
pub struct OccupancyReducer {
    renderer: OverlayRenderer,
}

impl OccupancyReducer {
    pub fn new(config: &CvConfig) -> Self {
        Self {
            renderer: OverlayRenderer::new(config),
        }
    }

    /// Assign detections to spots and count them
    pub fn count(
        detections: &[VehicleDetection],
        spots: &[Spot],
    ) -> (OccupancyCounts, Vec<Option<usize>>) {
        let total = spots.len() as u32;
        let mut occupied = 0u32;

        let assignments: Vec<Option<usize>> = detections
            .iter()
            .map(|d| {
                let assigned = spots.iter().position(|s| s.contains(&d.reference_point));
                if assigned.is_some() && total != 0 {
                    occupied += 1;
                }
                assigned
            })
            .collect();

        (OccupancyCounts::new(occupied, total), assignments)
    }

    /// Reduce a frame's detections to counts and an annotated snapshot
    pub fn reduce(&self, detections: &[VehicleDetection], spots: &[Spot], mut frame: Frame) -> Reduction {
        let (counts, assignments) = Self::count(detections, spots);

        self.renderer
            .draw_occupancy(&mut frame, spots, detections, &assignments);

        debug!(
            source = %frame.source,
            occupied = counts.occupied,
            total = counts.total,
            freed = counts.freed,
            "Reduced frame"
        );

        Reduction {
            counts,
            assignments,
            annotated: frame,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use parking_core::{BoundingBox, Point, VehicleClass};

    fn car(x1: f32, y1: f32, x2: f32, y2: f32) -> VehicleDetection {
        VehicleDetection::new(BoundingBox::new(x1, y1, x2, y2), VehicleClass::Car, 0.9)
    }

    fn two_spots() -> Vec<Spot> {
        vec![
            Spot::rect("A", 100.0, 100.0, 200.0, 200.0),
            Spot::rect("B", 300.0, 100.0, 400.0, 200.0),
        ]
    }

    #[test]
    fn test_one_car_one_spot() {
        // reference point (150, 175)
        let (counts, assignments) = OccupancyReducer::count(&[car(100.0, 100.0, 200.0, 200.0)], &two_spots());
        assert_eq!(counts, OccupancyCounts::new(1, 2));
        assert_eq!(counts.freed, 1);
        assert_eq!(assignments, vec![Some(0)]);
    }

    #[test]
    fn test_vehicle_outside_every_spot_is_ignored() {
        let (counts, assignments) = OccupancyReducer::count(&[car(500.0, 500.0, 600.0, 600.0)], &two_spots());
        assert_eq!(counts, OccupancyCounts::new(0, 2));
        assert_eq!(assignments, vec![None]);
    }

    #[test]
    fn test_first_matching_spot_wins() {
        let overlapping = vec![
            Spot::rect("wide", 0.0, 0.0, 500.0, 500.0),
            Spot::rect("inner", 100.0, 100.0, 200.0, 200.0),
        ];
        let (counts, assignments) = OccupancyReducer::count(&[car(100.0, 100.0, 200.0, 200.0)], &overlapping);
        assert_eq!(counts.occupied, 1);
        assert_eq!(assignments, vec![Some(0)]);
    }

    #[test]
    fn test_two_cars_in_one_spot_exceed_total() {
        let one = vec![Spot::rect("A", 100.0, 100.0, 200.0, 200.0)];
        let cars = [car(110.0, 110.0, 150.0, 150.0), car(150.0, 150.0, 190.0, 190.0)];
        let (counts, _) = OccupancyReducer::count(&cars, &one);
        assert_eq!(counts.occupied, 2);
        assert_eq!(counts.total, 1);
        assert_eq!(counts.freed, -1);
    }

    #[test]
    fn test_no_spots() {
        let (counts, assignments) = OccupancyReducer::count(&[car(0.0, 0.0, 10.0, 10.0)], &[]);
        assert_eq!(counts, OccupancyCounts::new(0, 0));
        assert_eq!(assignments, vec![None]);
    }

    #[test]
    fn test_reference_point_on_edge_counts() {
        // reference point (150, 200) lies on the bottom edge of A
        let (counts, _) = OccupancyReducer::count(&[car(100.0, 200.0, 200.0, 200.0)], &two_spots());
        assert_eq!(counts.occupied, 1);
    }

    #[test]
    fn test_reduce_renders_and_lists_spots() {
        let reducer = OccupancyReducer::new(&CvConfig::default());
        let frame = Frame::blank(450, 250, [0, 0, 0], "test://lot");
        let spots = two_spots();

        let reduction = reducer.reduce(&[car(300.0, 100.0, 400.0, 200.0)], &spots, frame);
        assert_eq!(reduction.counts, OccupancyCounts::new(1, 2));
        assert_eq!(reduction.occupied_spots(&spots), vec!["B"]);
        assert_eq!(reduction.annotated.image.get_pixel(350, 100), &image::Rgb([255, 0, 0]));
        assert_eq!(reduction.annotated.image.get_pixel(150, 100), &image::Rgb([0, 255, 0]));
    }

    #[test]
    fn test_far_spot_vertices_keep_counts() {
        let reducer = OccupancyReducer::new(&CvConfig::default());

        for far in [1e8, 1e12, 1e300] {
            let spot = Spot::new(
                "far",
                vec![Point::new(0.0, 0.0), Point::new(far, 0.0), Point::new(0.0, 40.0)],
            );
            // reference point (20, 16)
            let reduction = reducer.reduce(
                &[car(10.0, 5.0, 30.0, 20.0)],
                &[spot],
                Frame::blank(64, 48, [0, 0, 0], "test://lot"),
            );
            assert_eq!(reduction.counts, OccupancyCounts::new(1, 1));
        }
    }
}
