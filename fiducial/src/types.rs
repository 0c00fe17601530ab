use serde::Serialize;

use crate::detect::pose::PoseEstimate;
use crate::family::FamilyId;

/// A 2D point `[x, y]`.
///
/// Image coordinates put the origin at the top-left corner of the first
/// pixel with y pointing down, so pixel `(i, j)` has its centre at
/// `(i + 0.5, j + 0.5)`.
pub type Point2 = [f64; 2];

/// Correspondence between an image point and a marker-local point.
///
/// `marker_pos` is expressed in marker-side units with the origin at the
/// marker centre, x right and y down.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct KeyPoint {
    pub image_pos: Point2,
    pub marker_pos: Point2,
    pub id: u32,
}

/// A decoded marker.
#[derive(Debug, Clone, Serialize)]
pub struct Fiducial {
    pub id: u32,
    pub family: FamilyId,
    /// Clockwise in image space, starting at the marker's canonical top-left corner.
    pub corners: Vec<Point2>,
    pub center: Point2,
    pub key_points: Vec<KeyPoint>,
    pub pose: Option<PoseEstimate>,
    /// Always within `[0, 1]`.
    pub confidence: f64,
    /// Light marker on a dark background. Distinct from the dark marker with the same id.
    pub inverted: bool,
}

impl Fiducial {
    pub fn new(id: u32, family: FamilyId, corners: Vec<Point2>, confidence: f64) -> Self {
        let center = mean_point(&corners);
        Self {
            id,
            family,
            corners,
            center,
            key_points: Vec::new(),
            pose: None,
            confidence: confidence.clamp(0.0, 1.0),
            inverted: false,
        }
    }

    pub fn with_center(mut self, center: Point2) -> Self {
        self.center = center;
        self
    }

    pub fn with_key_points(mut self, key_points: Vec<KeyPoint>) -> Self {
        self.key_points = key_points;
        self
    }

    pub fn with_inverted(mut self, inverted: bool) -> Self {
        self.inverted = inverted;
        self
    }
}

/// Key points for the four corners of a square marker, ids `first_id..first_id + 4`.
///
/// `corners` must already be in canonical order (top-left first, clockwise).
pub fn quad_key_points(corners: &[Point2; 4], first_id: u32) -> Vec<KeyPoint> {
    const LOCAL: [Point2; 4] = [[-0.5, -0.5], [0.5, -0.5], [0.5, 0.5], [-0.5, 0.5]];
    corners
        .iter()
        .zip(LOCAL)
        .enumerate()
        .map(|(i, (&image_pos, marker_pos))| KeyPoint {
            image_pos,
            marker_pos,
            id: first_id + i as u32,
        })
        .collect()
}

pub(crate) fn mean_point(points: &[Point2]) -> Point2 {
    if points.is_empty() {
        return [0.0, 0.0];
    }
    let n = points.len() as f64;
    let (sx, sy) = points
        .iter()
        .fold((0.0, 0.0), |(sx, sy), p| (sx + p[0], sy + p[1]));
    [sx / n, sy / n]
}
