use serde::{Deserialize, Serialize};

use crate::detect::homography::Homography;
use crate::detect::image::ImageU8;
use crate::detect::region::Region;
use crate::family::FamilyId;
use crate::types::{Fiducial, KeyPoint, Point2};

use super::grid::{oriented_corners, Rectified, DEFAULT_MIN_CONTRAST};

/// Cells per side of one level.
pub const LEVEL_CELLS: usize = 10;
/// Bits in a level's code.
pub const CODE_BITS: usize = 12;
/// First and one-past-last cell of the nested level.
pub const NESTED_SPAN: (usize, usize) = (3, 7);
/// Side of the nested level relative to its parent.
pub const NESTED_SCALE: f64 = (NESTED_SPAN.1 - NESTED_SPAN.0) as f64 / LEVEL_CELLS as f64;

/// Cells between orientation corners along the data ring.
const RING_SIDE: usize = LEVEL_CELLS - 3;

/// Nested markers. Every level is a 10×10 cell square whose central 4×4
/// cells hold the next, smaller level.
///
/// From the outline inwards a level has a black border ring, then the data
/// ring (white top-left orientation corner, three black corners and a 12-bit
/// code written twice over the remaining 24 cells, LSB first, clockwise from
/// the top-left), then a white gap ring and the nested level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HierarchicalConfig {
    /// Number of levels read, the outermost included.
    pub max_depth: usize,
    /// Multiplier K in `id = coarse × K + fine`; nested ids must be below it.
    pub fine_modulus: u32,
    /// Smallest readable cell side in pixels.
    pub min_cell_px: f64,
    pub min_contrast: f64,
}

impl Default for HierarchicalConfig {
    fn default() -> Self {
        Self {
            max_depth: 2,
            fine_modulus: 1 << CODE_BITS,
            min_cell_px: 2.0,
            min_contrast: DEFAULT_MIN_CONTRAST,
        }
    }
}

impl HierarchicalConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(1..=4).contains(&self.max_depth) {
            return Err(format!("max_depth must be in 1..=4, got {}", self.max_depth));
        }
        if self.fine_modulus == 0 {
            return Err("fine_modulus must be positive".into());
        }
        if self.min_cell_px.is_nan() || self.min_cell_px < 0.5 {
            return Err(format!("min_cell_px must be at least 0.5, got {}", self.min_cell_px));
        }
        if self.min_contrast < 0.0 {
            return Err(format!("min_contrast must be non-negative, got {}", self.min_contrast));
        }
        Ok(())
    }

    /// Combine level codes, outermost first. `None` if a nested id reaches
    /// the modulus or the composite overflows.
    pub fn composite_id(&self, codes: &[u32]) -> Option<u32> {
        let (&innermost, outer) = codes.split_last()?;
        outer.iter().rev().try_fold(innermost, |fine, &coarse| {
            if fine >= self.fine_modulus {
                return None;
            }
            coarse.checked_mul(self.fine_modulus)?.checked_add(fine)
        })
    }
}

/// Walk the data ring of a level: orientation corners sit at every
/// `RING_SIDE`-th position, the remaining cells carry the code twice.
pub(crate) fn data_ring_bits(code: u32) -> Vec<bool> {
    let mut bits = Vec::with_capacity(4 * RING_SIDE);
    let mut n = 0;
    for j in 0..4 * RING_SIDE {
        if j % RING_SIDE == 0 {
            bits.push(j == 0);
        } else {
            bits.push((code >> (n % CODE_BITS)) & 1 == 1);
            n += 1;
        }
    }
    bits
}

/// Read one level. Returns its code and the number of corner advances to
/// its canonical top-left.
fn read_level(rect: &Rectified, min_contrast: f64) -> Option<(u32, usize)> {
    let black = rect.ring(0);
    let white = rect.ring(2);
    let levels = rect.levels(&black, &white);
    if levels.min_contrast(black.iter().copied()) < min_contrast {
        return None;
    }

    let bits: Vec<bool> = rect
        .ring(1)
        .into_iter()
        .map(|(x, y)| levels.is_white(x, y, rect.cell(x, y)))
        .collect();
    let rotation = (0..4).find(|&r| (0..4).all(|k| bits[k * RING_SIDE] == (k == r)))?;

    let mut copies = [0u32; 2];
    let mut n = 0;
    for j in 0..bits.len() {
        if j % RING_SIDE == 0 {
            continue;
        }
        if bits[(j + rotation * RING_SIDE) % bits.len()] {
            copies[n / CODE_BITS] |= 1 << (n % CODE_BITS);
        }
        n += 1;
    }
    (copies[0] == copies[1]).then_some((copies[0], rotation))
}

/// Image corners of the nested level, in the same order as `corners`.
fn nested_quad(corners: &[Point2; 4]) -> Option<[Point2; 4]> {
    let h = Homography::from_unit_square(corners)?;
    let lo = NESTED_SPAN.0 as f64 / LEVEL_CELLS as f64;
    let hi = NESTED_SPAN.1 as f64 / LEVEL_CELLS as f64;
    Some([
        h.project([lo, lo]),
        h.project([hi, lo]),
        h.project([hi, hi]),
        h.project([lo, hi]),
    ])
}

pub fn try_decode(region: &Region, frame: &ImageU8, cfg: &HierarchicalConfig) -> Option<Fiducial> {
    let quad = region.quad()?;

    let mut codes = Vec::with_capacity(cfg.max_depth);
    let mut key_points = Vec::with_capacity(4 * cfg.max_depth);
    let mut outline = quad;
    let mut corners = quad;
    let mut scale = 1.0;

    for depth in 0..cfg.max_depth {
        let rect = Rectified::new(frame, &corners, LEVEL_CELLS)?.inverted(region.light);
        if rect.cell_px() < cfg.min_cell_px {
            log::trace!("hierarchical level {depth} below {} px cells", cfg.min_cell_px);
            return None;
        }
        let (code, rotation) = read_level(&rect, cfg.min_contrast)?;
        if depth == 0 {
            // Later levels keep the outer marker's corner order.
            corners = oriented_corners(&corners, rotation);
            outline = corners;
        }
        codes.push(code);

        let half = 0.5 * scale;
        let local = [[-half, -half], [half, -half], [half, half], [-half, half]];
        for (i, (&image_pos, marker_pos)) in corners.iter().zip(local).enumerate() {
            key_points.push(KeyPoint {
                image_pos,
                marker_pos,
                id: (4 * depth + i) as u32,
            });
        }

        corners = nested_quad(&corners)?;
        scale *= NESTED_SCALE;
    }

    let id = cfg.composite_id(&codes)?;
    Some(Fiducial::new(id, FamilyId::Hierarchical, outline.to_vec(), 1.0).with_key_points(key_points))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{paint, MarkerPattern};

    const K: u32 = 4096;

    fn scene(codes: &[u32], corners: &[Point2; 4]) -> ImageU8 {
        let mut frame = ImageU8::filled(400, 400, 255);
        paint(&mut frame, &MarkerPattern::hierarchical(codes).unwrap(), corners);
        frame
    }

    const BIG: [Point2; 4] = [[50.0, 50.0], [350.0, 50.0], [350.0, 350.0], [50.0, 350.0]];

    #[test]
    fn composite_id_folds_levels() {
        let cfg = HierarchicalConfig::default();
        assert_eq!(cfg.composite_id(&[3, 5]), Some(3 * K + 5));
        assert_eq!(cfg.composite_id(&[3, 0, 5]), Some(3 * K + 5));
        assert_eq!(cfg.composite_id(&[3, 1, 5]), None);
        assert_eq!(cfg.composite_id(&[9]), Some(9));
        assert_eq!(cfg.composite_id(&[]), None);
    }

    #[test]
    fn data_ring_carries_code_twice() {
        let bits = data_ring_bits(0b1010_0000_0001);
        assert_eq!(bits.len(), 28);
        assert!(bits[0] && !bits[7] && !bits[14] && !bits[21]);
        assert!(bits[1]);
        assert!(!bits[2]);
    }

    #[test]
    fn two_levels_give_composite_id() {
        let frame = scene(&[3, 5], &BIG);
        let f = try_decode(&Region::from_corners(&BIG), &frame, &HierarchicalConfig::default())
            .unwrap();
        assert_eq!(f.id, 3 * K + 5);
        assert_eq!(f.corners[0], BIG[0]);
        assert_eq!(f.key_points.len(), 8);
        let inner_tl = f.key_points[4];
        assert!((inner_tl.image_pos[0] - 140.0).abs() < 1e-6, "{inner_tl:?}");
        assert!((inner_tl.marker_pos[0] + 0.2).abs() < 1e-12);
    }

    #[test]
    fn three_levels_with_deep_config() {
        let frame = scene(&[3, 0, 5], &BIG);
        let cfg = HierarchicalConfig {
            max_depth: 3,
            ..HierarchicalConfig::default()
        };
        let f = try_decode(&Region::from_corners(&BIG), &frame, &cfg).unwrap();
        assert_eq!(f.id, 3 * K + 5);
    }

    #[test]
    fn rotated_outline_reads_same_id() {
        let frame = scene(&[3, 5], &BIG);
        let order = [BIG[1], BIG[2], BIG[3], BIG[0]];
        let f = try_decode(&Region::from_corners(&order), &frame, &HierarchicalConfig::default())
            .unwrap();
        assert_eq!(f.id, 3 * K + 5);
        assert_eq!(f.corners[0], BIG[0]);
    }

    #[test]
    fn self_nested_marker_terminates() {
        let frame = scene(&[7, 7, 7, 7], &BIG);
        let region = Region::from_corners(&BIG);

        let f = try_decode(&region, &frame, &HierarchicalConfig::default()).unwrap();
        assert_eq!(f.id, 7 * K + 7);

        // The nested composite 7K + 7 reaches the modulus at depth 3.
        let deep = HierarchicalConfig {
            max_depth: 3,
            ..HierarchicalConfig::default()
        };
        assert!(try_decode(&region, &frame, &deep).is_none());

        // Fourth level cells are under 2 px.
        let deepest = HierarchicalConfig {
            max_depth: 4,
            ..HierarchicalConfig::default()
        };
        assert!(try_decode(&region, &frame, &deepest).is_none());
    }

    #[test]
    fn missing_nested_level_fails() {
        let frame = scene(&[3], &BIG);
        let region = Region::from_corners(&BIG);
        assert!(try_decode(&region, &frame, &HierarchicalConfig::default()).is_none());
        let single = HierarchicalConfig {
            max_depth: 1,
            ..HierarchicalConfig::default()
        };
        assert_eq!(try_decode(&region, &frame, &single).unwrap().id, 3);
    }
}
