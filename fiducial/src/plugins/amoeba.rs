use serde::{Deserialize, Serialize};

use crate::detect::image::ImageU8;
use crate::detect::polygon::convex_hull;
use crate::detect::region::Region;
use crate::family::FamilyId;
use crate::types::{mean_point, Fiducial, Point2};

/// A marker layout: one digit per hole, each the number of blobs inside it.
/// Digit order does not matter, `"0122"` and `"2210"` describe the same marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AmoebaMarker {
    pub id: u32,
    pub code: String,
}

/// Topological markers, identified by how many blobs sit in each hole of a
/// blob. The signature survives bending and strong perspective.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AmoebaConfig {
    pub markers: Vec<AmoebaMarker>,
}

impl AmoebaConfig {
    pub fn validate(&self) -> Result<(), String> {
        let mut signatures: Vec<(Vec<u16>, u32)> = Vec::with_capacity(self.markers.len());
        for m in &self.markers {
            let sig = signature(&m.code)
                .ok_or_else(|| format!("marker {}: code '{}' is not a digit string", m.id, m.code))?;
            if let Some((_, other)) = signatures.iter().find(|(s, _)| *s == sig) {
                return Err(format!("markers {other} and {} share code '{}'", m.id, m.code));
            }
            if signatures.iter().any(|&(_, id)| id == m.id) {
                return Err(format!("duplicate marker id {}", m.id));
            }
            signatures.push((sig, m.id));
        }
        Ok(())
    }
}

/// Sorted hole counts of a code string, `None` if empty or not all digits.
fn signature(code: &str) -> Option<Vec<u16>> {
    if code.is_empty() {
        return None;
    }
    let mut sig = code
        .chars()
        .map(|c| c.to_digit(10).map(|d| d as u16))
        .collect::<Option<Vec<_>>>()?;
    sig.sort_unstable();
    Some(sig)
}

/// Hull points rotated to start at the one closest to the image's top-left.
fn hull_corners(contour: &[Point2]) -> Option<Vec<Point2>> {
    let mut hull = convex_hull(contour);
    if hull.len() < 4 {
        return None;
    }
    let start = hull
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| (a[0] + a[1]).total_cmp(&(b[0] + b[1])))
        .map(|(i, _)| i)?;
    hull.rotate_left(start);
    Some(hull)
}

pub fn try_decode(region: &Region, _frame: &ImageU8, cfg: &AmoebaConfig) -> Option<Fiducial> {
    if region.topology.leaves_per_hole.is_empty() || cfg.markers.is_empty() {
        return None;
    }
    let mut observed = region.topology.leaves_per_hole.to_vec();
    observed.sort_unstable();

    let marker = cfg
        .markers
        .iter()
        .find(|m| signature(&m.code).is_some_and(|sig| sig == observed))?;
    log::trace!("amoeba signature {observed:?} matches marker {}", marker.id);

    let corners = hull_corners(&region.contour)?;
    Some(
        Fiducial::new(marker.id, FamilyId::Amoeba, corners, 1.0)
            .with_center(mean_point(&region.contour)),
    )
}
