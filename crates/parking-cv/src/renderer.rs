//! Overlay rendering for occupancy snapshots
//!
//! Draws on the sampled frame:
//! - Every spot outline in the spot color
//! - A dot at each vehicle reference point
//! - The outline of each matched spot in the occupied color

use crate::{CvConfig, Frame};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_line_segment_mut};
use parking_core::{Point, Spot, VehicleDetection};
use tracing::trace;

/// Renders spot and vehicle overlays on frames
pub struct OverlayRenderer {
    config: CvConfig,
}

impl OverlayRenderer {
    /// Create a new overlay renderer
    pub fn new(config: &CvConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Draw all occupancy overlays on a frame
    ///
    /// `assignments[i]` is the index of the spot matched by `detections[i]`.
    pub fn draw_occupancy(
        &self,
        frame: &mut Frame,
        spots: &[Spot],
        detections: &[VehicleDetection],
        assignments: &[Option<usize>],
    ) {
        let render = &self.config.rendering;

        for spot in spots {
            self.draw_spot(&mut frame.image, spot, Rgb(render.spot_color));
        }

        for (detection, assigned) in detections.iter().zip(assignments) {
            fill_circle(
                &mut frame.image,
                &detection.reference_point,
                render.point_radius,
                Rgb(render.point_color),
            );

            if let Some(spot) = assigned.and_then(|idx| spots.get(idx)) {
                self.draw_spot(&mut frame.image, spot, Rgb(render.occupied_color));
            }
        }

        trace!(
            spots = spots.len(),
            detections = detections.len(),
            "Rendered occupancy overlay"
        );
    }

    /// Draw a closed spot outline
    fn draw_spot(&self, image: &mut RgbImage, spot: &Spot, color: Rgb<u8>) {
        let thickness = self.config.rendering.line_thickness;
        let points = &spot.points;

        match points.len() {
            0 => {}
            1 => fill_circle(image, &points[0], thickness / 2, color),
            n => {
                for i in 0..n {
                    draw_line(image, &points[i], &points[(i + 1) % n], color, thickness);
                }
            }
        }
    }
}

/// Outline segment clipped to the frame, thickened by offset copies
fn draw_line(image: &mut RgbImage, a: &Point, b: &Point, color: Rgb<u8>, thickness: u32) {
    let t = thickness.max(1) as i64;
    let margin = t as f64;
    let bounds = (
        -margin,
        -margin,
        image.width() as f64 - 1.0 + margin,
        image.height() as f64 - 1.0 + margin,
    );

    let Some(((x0, y0), (x1, y1))) = clip_segment((a.x, a.y), (b.x, b.y), bounds) else {
        return;
    };

    let lo = -(t - 1) / 2;
    let hi = t / 2;
    for dy in lo..=hi {
        for dx in lo..=hi {
            let (dx, dy) = (dx as f64, dy as f64);
            draw_line_segment_mut(
                image,
                ((x0 + dx) as f32, (y0 + dy) as f32),
                ((x1 + dx) as f32, (y1 + dy) as f32),
                color,
            );
        }
    }
}

/// Liang-Barsky clipping of `a -> b` to `(min_x, min_y, max_x, max_y)`
///
/// `None` when the segment misses the rectangle or is not finite.
fn clip_segment(
    a: (f64, f64),
    b: (f64, f64),
    (min_x, min_y, max_x, max_y): (f64, f64, f64, f64),
) -> Option<((f64, f64), (f64, f64))> {
    let dx = b.0 - a.0;
    let dy = b.1 - a.1;
    if !(dx.is_finite() && dy.is_finite()) {
        return None;
    }

    let mut t0 = 0.0f64;
    let mut t1 = 1.0f64;
    let edges = [
        (-dx, a.0 - min_x),
        (dx, max_x - a.0),
        (-dy, a.1 - min_y),
        (dy, max_y - a.1),
    ];

    for (p, q) in edges {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let r = q / p;
        if p < 0.0 {
            if r > t1 {
                return None;
            }
            t0 = t0.max(r);
        } else {
            if r < t0 {
                return None;
            }
            t1 = t1.min(r);
        }
    }

    // huge magnitudes lose precision in a + t * d
    let at = |t: f64| {
        (
            (a.0 + t * dx).clamp(min_x, max_x),
            (a.1 + t * dy).clamp(min_y, max_y),
        )
    };
    let (start, end) = (at(t0), at(t1));
    [start.0, start.1, end.0, end.1]
        .iter()
        .all(|v| v.is_finite())
        .then_some((start, end))
}

fn fill_circle(image: &mut RgbImage, center: &Point, radius: u32, color: Rgb<u8>) {
    let r = radius as f64;
    let (cx, cy) = (center.x.round(), center.y.round());
    let off_frame = !(cx >= -r
        && cy >= -r
        && cx <= image.width() as f64 + r
        && cy <= image.height() as f64 + r);
    if off_frame {
        return;
    }
    draw_filled_circle_mut(image, (cx as i32, cy as i32), radius as i32, color);
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use parking_core::{BoundingBox, VehicleClass};

    const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
    const RED: Rgb<u8> = Rgb([255, 0, 0]);
    const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

    fn spots() -> Vec<Spot> {
        vec![
            Spot::rect("A", 10.0, 10.0, 30.0, 30.0),
            Spot::rect("B", 40.0, 10.0, 60.0, 30.0),
        ]
    }

    #[test]
    fn test_unmatched_spots_drawn_in_spot_color() {
        let renderer = OverlayRenderer::new(&CvConfig::default());
        let mut frame = Frame::blank(80, 40, [0, 0, 0], "t");

        renderer.draw_occupancy(&mut frame, &spots(), &[], &[]);

        assert_eq!(frame.image.get_pixel(20, 10), &GREEN);
        assert_eq!(frame.image.get_pixel(50, 30), &GREEN);
        assert_eq!(frame.image.get_pixel(20, 20), &BLACK);
    }

    #[test]
    fn test_matched_spot_and_point_drawn_in_red() {
        let renderer = OverlayRenderer::new(&CvConfig::default());
        let mut frame = Frame::blank(80, 40, [0, 0, 0], "t");
        let detection =
            VehicleDetection::new(BoundingBox::new(15.0, 10.0, 25.0, 26.0), VehicleClass::Car, 0.9);

        renderer.draw_occupancy(&mut frame, &spots(), &[detection], &[Some(0)]);

        // spot A outline now red, spot B still green
        assert_eq!(frame.image.get_pixel(20, 10), &RED);
        assert_eq!(frame.image.get_pixel(50, 10), &GREEN);
        let p = detection.reference_point;
        assert_eq!(frame.image.get_pixel(p.x as u32, p.y as u32), &RED);
    }

    #[test]
    fn test_drawing_is_clipped_to_frame() {
        let renderer = OverlayRenderer::new(&CvConfig::default());
        let mut frame = Frame::blank(20, 20, [0, 0, 0], "t");
        let spot = Spot::rect("edge", -10.0, -10.0, 50.0, 50.0);
        let detection =
            VehicleDetection::new(BoundingBox::new(-5.0, -5.0, 0.0, 0.0), VehicleClass::Bus, 0.9);

        renderer.draw_occupancy(&mut frame, &[spot], &[detection], &[None]);
        assert_eq!(frame.image.dimensions(), (20, 20));
    }

    #[test]
    fn test_far_vertices_are_clipped() {
        let renderer = OverlayRenderer::new(&CvConfig::default());

        for far in [1e12, 1e300, f64::MAX] {
            let mut frame = Frame::blank(64, 48, [0, 0, 0], "t");
            let spot = Spot::new(
                "far",
                vec![Point::new(0.0, 0.0), Point::new(far, 0.0), Point::new(far, 40.0)],
            );
            let detection = VehicleDetection::new(
                BoundingBox::new(1e30, 1e30, 2e30, 2e30),
                VehicleClass::Car,
                0.9,
            );

            renderer.draw_occupancy(&mut frame, &[spot], &[detection], &[Some(0)]);

            // the visible part of the top edge is still drawn
            assert_eq!(frame.image.get_pixel(30, 0), &RED);
        }
    }

    #[test]
    fn test_clip_segment() {
        let bounds = (0.0, 0.0, 10.0, 10.0);

        let ((x0, y0), (x1, y1)) = clip_segment((-10.0, 5.0), (1e300, 5.0), bounds).unwrap();
        assert!(x0.abs() < 1e-6 && (x1 - 10.0).abs() < 1e-6);
        assert_eq!((y0, y1), (5.0, 5.0));

        assert!(clip_segment((20.0, 20.0), (30.0, 40.0), bounds).is_none());
        assert!(clip_segment((-1e308, 0.0), (f64::MAX, 0.0), bounds).is_none());

        let ((x0, y0), (x1, y1)) = clip_segment((1e300, 10.0), (0.0, 0.0), bounds).unwrap();
        for v in [x0, y0, x1, y1] {
            assert!((0.0..=10.0).contains(&v));
        }
        assert_eq!(
            clip_segment((2.0, 3.0), (4.0, 5.0), bounds),
            Some(((2.0, 3.0), (4.0, 5.0)))
        );
    }
}
