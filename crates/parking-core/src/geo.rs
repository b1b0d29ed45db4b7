//! Planar geometry for mapping detections onto parking spot polygons
//!
//! All coordinates are image pixels: `x` grows to the right, `y` grows down.

use serde::{Deserialize, Serialize};

/// Tolerance used when deciding whether a point sits on a polygon edge
const EDGE_EPSILON: f64 = 1e-9;

/// 2-D point in pixel space
///
/// Serialized as a two element array `[x, y]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "(f64, f64)", into = "(f64, f64)")]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn to_tuple(&self) -> (f64, f64) {
        (self.x, self.y)
    }
}

impl From<(f64, f64)> for Point {
    fn from((x, y): (f64, f64)) -> Self {
        Self { x, y }
    }
}

impl From<Point> for (f64, f64) {
    fn from(point: Point) -> Self {
        (point.x, point.y)
    }
}

impl From<(i32, i32)> for Point {
    fn from((x, y): (i32, i32)) -> Self {
        Self::new(x as f64, y as f64)
    }
}

/// Axis-aligned bounds of a point set
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bounds {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Inclusive containment check
    pub fn contains(&self, point: &Point) -> bool {
        point.x >= self.min_x
            && point.x <= self.max_x
            && point.y >= self.min_y
            && point.y <= self.max_y
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }
}

/// Closed polygon given by its ordered vertices
///
/// No validation is applied: fewer than three vertices or self-intersecting
/// outlines are accepted and yield whatever the containment test produces.
#[derive(Debug, Clone, Copy)]
pub struct Polygon<'a> {
    vertices: &'a [Point],
}

impl<'a> Polygon<'a> {
    pub fn new(vertices: &'a [Point]) -> Self {
        Self { vertices }
    }

    pub fn vertices(&self) -> &'a [Point] {
        self.vertices
    }

    /// Get the bounding box of this polygon, `None` when it has no vertices
    pub fn bounds(&self) -> Option<Bounds> {
        let first = self.vertices.first()?;
        let init = Bounds::new(first.x, first.y, first.x, first.y);

        Some(self.vertices.iter().fold(init, |b, v| {
            Bounds::new(b.min_x.min(v.x), b.min_y.min(v.y), b.max_x.max(v.x), b.max_y.max(v.y))
        }))
    }

    /// Check whether `point` is inside the polygon or on its outline
    ///
    /// Edge and vertex hits count as inside. The interior test is even-odd
    /// ray casting, so it needs at least three vertices; shorter outlines only
    /// contain the points lying on them.
    pub fn contains(&self, point: &Point) -> bool {
        let Some(bounds) = self.bounds() else {
            return false;
        };

        if !bounds.contains(point) {
            return false;
        }

        if self.on_outline(point) {
            return true;
        }

        if self.vertices.len() < 3 {
            return false;
        }

        // Ray casting algorithm
        let mut inside = false;
        let n = self.vertices.len();
        let mut j = n - 1;

        for i in 0..n {
            let vi = &self.vertices[i];
            let vj = &self.vertices[j];

            if ((vi.y > point.y) != (vj.y > point.y))
                && (point.x < (vj.x - vi.x) * (point.y - vi.y) / (vj.y - vi.y) + vi.x)
            {
                inside = !inside;
            }
            j = i;
        }

        inside
    }

    /// True when `point` lies on any edge of the closed outline
    fn on_outline(&self, point: &Point) -> bool {
        let n = self.vertices.len();
        (0..n).any(|i| on_segment(&self.vertices[i], &self.vertices[(i + 1) % n], point))
    }
}

/// Check whether `point` lies on the segment `a`-`b`
fn on_segment(a: &Point, b: &Point, point: &Point) -> bool {
    let cross = (b.x - a.x) * (point.y - a.y) - (b.y - a.y) * (point.x - a.x);
    let length = ((b.x - a.x).powi(2) + (b.y - a.y).powi(2)).sqrt();

    if cross.abs() > EDGE_EPSILON * (1.0 + length) {
        return false;
    }

    point.x >= a.x.min(b.x) - EDGE_EPSILON
        && point.x <= a.x.max(b.x) + EDGE_EPSILON
        && point.y >= a.y.min(b.y) - EDGE_EPSILON
        && point.y <= a.y.max(b.y) + EDGE_EPSILON
}

/// Convenience wrapper over [`Polygon::contains`]
pub fn contains(vertices: &[Point], point: &Point) -> bool {
    Polygon::new(vertices).contains(point)
}

// ============================================================================
// TESTS
// ============================================================================
