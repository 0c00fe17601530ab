use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::types::{mean_point, Point2};

use super::contour::{find_contours, Contour};
use super::image::ImageU8;
use super::polygon::{
    approx_closed, bounds, dist, ensure_clockwise, is_convex, perimeter, point_line_distance,
    signed_area,
};
use super::threshold::{apply_filter, binarize, MorphFilter, Polarity, ThresholdMode};

/// Region proposal parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProposerConfig {
    pub threshold: ThresholdMode,
    pub polarity: Polarity,
    pub post_filter: MorphFilter,
    /// Minimum contour area in pixels².
    pub min_area: f64,
    /// Maximum contour area as a fraction of the frame area.
    pub max_area_fraction: f64,
    /// Maximum ratio of the long to the short bounding-box side.
    pub max_aspect: f64,
    /// Polygon approximation tolerance relative to the contour perimeter.
    pub approx_epsilon: f64,
    /// Re-fit quad sides to the contour and intersect them for sub-pixel corners.
    pub refine_edges: bool,
}

impl Default for ProposerConfig {
    fn default() -> Self {
        Self {
            threshold: ThresholdMode::default(),
            polarity: Polarity::Dark,
            post_filter: MorphFilter::None,
            min_area: 64.0,
            max_area_fraction: 0.9,
            max_aspect: 8.0,
            approx_epsilon: 0.03,
            refine_edges: true,
        }
    }
}

impl ProposerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if let ThresholdMode::Adaptive { window, .. } = self.threshold {
            if window < 3 {
                return Err(format!("adaptive window must be at least 3, got {window}"));
            }
        }
        if self.min_area.is_nan() || self.min_area < 0.0 {
            return Err(format!("min_area must be non-negative, got {}", self.min_area));
        }
        if !(self.max_area_fraction > 0.0 && self.max_area_fraction <= 1.0) {
            return Err(format!(
                "max_area_fraction must be in (0, 1], got {}",
                self.max_area_fraction
            ));
        }
        if self.max_aspect.is_nan() || self.max_aspect < 1.0 {
            return Err(format!("max_aspect must be >= 1, got {}", self.max_aspect));
        }
        if !(self.approx_epsilon > 0.0 && self.approx_epsilon < 0.5) {
            return Err(format!(
                "approx_epsilon must be in (0, 0.5), got {}",
                self.approx_epsilon
            ));
        }
        Ok(())
    }
}

/// Nesting summary of a region's blob.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
    /// Number of blobs nested inside each hole of the region, in tracing order.
    pub leaves_per_hole: SmallVec<[u16; 8]>,
}

/// A candidate marker outline.
#[derive(Debug, Clone)]
pub struct Region {
    /// Polygon corners, clockwise on screen.
    pub corners: SmallVec<[Point2; 8]>,
    /// Boundary pixel centres in tracing order.
    pub contour: Vec<Point2>,
    pub topology: Topology,
    /// True for a light blob on a dark background.
    pub light: bool,
}

impl Region {
    /// A region with known corners and no contour data.
    pub fn from_corners(corners: &[Point2]) -> Self {
        let mut corners: SmallVec<[Point2; 8]> = SmallVec::from_slice(corners);
        ensure_clockwise(&mut corners);
        Self {
            contour: corners.to_vec(),
            corners,
            topology: Topology::default(),
            light: false,
        }
    }

    /// The corners as a quadrilateral, if the region has exactly four.
    pub fn quad(&self) -> Option<[Point2; 4]> {
        match self.corners[..] {
            [a, b, c, d] => Some([a, b, c, d]),
            _ => None,
        }
    }

    pub fn area(&self) -> f64 {
        signed_area(&self.corners).abs()
    }

    pub fn center(&self) -> Point2 {
        mean_point(&self.corners)
    }
}

/// Extracts candidate marker outlines from a frame.
#[derive(Debug, Clone, Default)]
pub struct RegionProposer {
    pub config: ProposerConfig,
}

impl RegionProposer {
    pub fn new(config: ProposerConfig) -> Self {
        Self { config }
    }

    /// All candidate regions of the frame, in raster order of their first
    /// boundary pixel. Degenerate frames yield no regions.
    pub fn propose(&self, frame: &ImageU8) -> Vec<Region> {
        if frame.width < 3 || frame.height < 3 {
            return Vec::new();
        }
        let mut regions = Vec::new();
        for &light in self.config.polarity.passes() {
            let mask = binarize(frame, self.config.threshold, light);
            let mask = apply_filter(mask, self.config.post_filter);
            let contours = find_contours(&mask);
            let children = child_lists(&contours);

            for (idx, contour) in contours.iter().enumerate() {
                if contour.hole || contour.points.len() < 8 {
                    continue;
                }
                if let Some(region) = self.region_from_contour(frame, &contours, &children, idx, light)
                {
                    log::trace!(
                        "region with {} corners at {:?} (light={light})",
                        region.corners.len(),
                        region.center()
                    );
                    regions.push(region);
                }
            }
        }
        regions
    }

    fn region_from_contour(
        &self,
        frame: &ImageU8,
        contours: &[Contour],
        children: &[Vec<usize>],
        idx: usize,
        light: bool,
    ) -> Option<Region> {
        let cfg = &self.config;
        let points: Vec<Point2> = contours[idx]
            .points
            .iter()
            .map(|p| [p[0] as f64 + 0.5, p[1] as f64 + 0.5])
            .collect();

        let area = signed_area(&points).abs();
        let frame_area = frame.width as f64 * frame.height as f64;
        if area < cfg.min_area || area > cfg.max_area_fraction * frame_area {
            return None;
        }
        let (lo, hi) = bounds(&points);
        let (w, h) = (hi[0] - lo[0] + 1.0, hi[1] - lo[1] + 1.0);
        if w.max(h) / w.min(h) > cfg.max_aspect {
            return None;
        }

        let epsilon = (cfg.approx_epsilon * perimeter(&points)).max(1.0);
        let mut corners = approx_closed(&points, epsilon);
        if corners.len() < 4 {
            return None;
        }
        ensure_clockwise(&mut corners);
        if corners.len() == 4 && cfg.refine_edges && is_convex(&corners) {
            if let Some(refined) = refine_quad(&corners, &points) {
                corners.copy_from_slice(&refined);
            }
        }

        let leaves_per_hole = children[idx]
            .iter()
            .filter(|&&c| contours[c].hole)
            .map(|&hole| children[hole].len().min(u16::MAX as usize) as u16)
            .collect();

        Some(Region {
            corners: SmallVec::from_vec(corners),
            contour: points,
            topology: Topology { leaves_per_hole },
            light,
        })
    }
}

fn child_lists(contours: &[Contour]) -> Vec<Vec<usize>> {
    let mut children = vec![Vec::new(); contours.len()];
    for (i, c) in contours.iter().enumerate() {
        if let Some(p) = c.parent {
            children[p].push(i);
        }
    }
    children
}

/// Weighted first and second moments of a point set.
#[derive(Debug, Clone, Copy, Default)]
struct LineMoments {
    mx: f64,
    my: f64,
    mxx: f64,
    mxy: f64,
    myy: f64,
    w: f64,
}

impl LineMoments {
    fn add(&mut self, p: Point2) {
        self.mx += p[0];
        self.my += p[1];
        self.mxx += p[0] * p[0];
        self.mxy += p[0] * p[1];
        self.myy += p[1] * p[1];
        self.w += 1.0;
    }
}

/// A line through `p` with unit normal `n`.
#[derive(Debug, Clone, Copy)]
struct FittedLine {
    p: Point2,
    n: Point2,
}

/// Total-least-squares line fit: the normal is the minor eigenvector of the covariance.
fn fit_line(m: &LineMoments) -> Option<FittedLine> {
    if m.w < 3.0 {
        return None;
    }
    let ex = m.mx / m.w;
    let ey = m.my / m.w;
    let cxx = m.mxx / m.w - ex * ex;
    let cxy = m.mxy / m.w - ex * ey;
    let cyy = m.myy / m.w - ey * ey;

    let disc = ((cxx - cyy).powi(2) + 4.0 * cxy * cxy).sqrt();
    let eig_small = 0.5 * (cxx + cyy - disc);
    let eig_large = 0.5 * (cxx + cyy + disc);
    if eig_large < 1e-10 {
        return None;
    }

    let (nx, ny) = {
        let nx0 = cxy;
        let ny0 = eig_small - cxx;
        if (nx0 * nx0 + ny0 * ny0).sqrt() > 1e-10 {
            (nx0, ny0)
        } else if cxx > cyy {
            (0.0, 1.0)
        } else {
            (1.0, 0.0)
        }
    };
    let len = (nx * nx + ny * ny).sqrt();
    Some(FittedLine {
        p: [ex, ey],
        n: [nx / len, ny / len],
    })
}

fn intersect_lines(l0: &FittedLine, l1: &FittedLine) -> Option<Point2> {
    // Directions are the normals turned by 90 degrees.
    let d0 = [-l0.n[1], l0.n[0]];
    let d1 = [-l1.n[1], l1.n[0]];
    let det = d1[0] * d0[1] - d0[0] * d1[1];
    if det.abs() < 1e-3 {
        return None;
    }
    let b = [l1.p[0] - l0.p[0], l1.p[1] - l0.p[1]];
    let lambda = (d1[0] * b[1] - b[0] * d1[1]) / det;
    Some([l0.p[0] + lambda * d0[0], l0.p[1] + lambda * d0[1]])
}

/// Fit a line to the contour points along each side and intersect
/// neighbouring sides. Lines are moved half a pixel outward so corners land
/// on the blob boundary rather than on the outermost pixel centres.
fn refine_quad(corners: &[Point2], contour: &[Point2]) -> Option<[Point2; 4]> {
    let mut lines = [FittedLine {
        p: [0.0, 0.0],
        n: [0.0, 0.0],
    }; 4];

    for (i, line) in lines.iter_mut().enumerate() {
        let a = corners[i];
        let b = corners[(i + 1) % 4];
        let (dx, dy) = (b[0] - a[0], b[1] - a[1]);
        let len2 = dx * dx + dy * dy;
        if len2 < 4.0 {
            return None;
        }
        let band = (0.05 * len2.sqrt()).max(1.5);

        let mut moments = LineMoments::default();
        for &p in contour {
            let t = ((p[0] - a[0]) * dx + (p[1] - a[1]) * dy) / len2;
            if (0.1..=0.9).contains(&t) && point_line_distance(p, a, b) <= band {
                moments.add(p);
            }
        }
        let mut fitted = fit_line(&moments)?;

        // Outward normal of a clockwise (on screen) polygon side.
        let len = len2.sqrt();
        let outward = [dy / len, -dx / len];
        if fitted.n[0] * outward[0] + fitted.n[1] * outward[1] < 0.0 {
            fitted.n = [-fitted.n[0], -fitted.n[1]];
        }
        fitted.p = [fitted.p[0] + 0.5 * fitted.n[0], fitted.p[1] + 0.5 * fitted.n[1]];
        *line = fitted;
    }

    let shortest = (0..4)
        .map(|i| dist(corners[i], corners[(i + 1) % 4]))
        .fold(f64::MAX, f64::min);
    let mut out = [[0.0; 2]; 4];
    for i in 0..4 {
        let c = intersect_lines(&lines[(i + 3) % 4], &lines[i])?;
        if dist(c, corners[i]) > 0.25 * shortest {
            return None;
        }
        out[i] = c;
    }
    if !is_convex(&out) || signed_area(&out) <= 0.0 {
        return None;
    }
    Some(out)
}
