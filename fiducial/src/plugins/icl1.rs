use serde::Deserialize;

use crate::bits::{pack, rotations};
use crate::detect::image::ImageU8;
use crate::detect::region::Region;
use crate::family::FamilyId;
use crate::idset::IdSet;
use crate::types::{quad_key_points, Fiducial};

use super::grid::{oriented_corners, read_bordered, DEFAULT_MIN_CONTRAST};

/// Payload cells per side.
pub const GRID_SIZE: usize = 4;

/// The ids printable as ICL1 markers.
pub const NATIVE_IDS: [u32; 32] = [
    1294, 1252, 1287, 1035, 1245, 993, 1292, 1250, 1280, 1028, 1208, 776, 1238, 986, 1166, 734,
    1285, 1033, 1243, 991, 1273, 1021, 1201, 769, 949, 517, 1231, 979, 1159, 727, 907, 475,
];

/// Corner cells (top-left, top-right, bottom-right, bottom-left) and their
/// colours in the canonical orientation.
const ORIENTATION: [(usize, bool); 4] = [(0, true), (3, false), (15, false), (12, false)];

const DIGIT_BITS: usize = 3;
const DIGITS: usize = 4;

/// Fallback family with a fixed table of ids.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Icl1Config {
    pub ids: IdSet,
    pub min_contrast: f64,
}

impl Default for Icl1Config {
    fn default() -> Self {
        Self {
            ids: IdSet::All,
            min_contrast: DEFAULT_MIN_CONTRAST,
        }
    }
}

impl Icl1Config {
    pub fn validate(&self) -> Result<(), String> {
        if let IdSet::List(ids) = &self.ids {
            if let Some(id) = ids.iter().find(|id| !NATIVE_IDS.contains(id)) {
                return Err(format!("{id} is not an ICL1 marker id"));
            }
        }
        if self.min_contrast < 0.0 {
            return Err(format!("min_contrast must be non-negative, got {}", self.min_contrast));
        }
        Ok(())
    }
}

/// Cell layout of an id in the canonical orientation: orientation corners
/// plus four base-6 digits, most significant first, 3 bits each (MSB first)
/// over the remaining cells in row-major order.
pub fn encode(id: u32) -> Option<u64> {
    if !NATIVE_IDS.contains(&id) {
        return None;
    }
    let mut cells = [false; GRID_SIZE * GRID_SIZE];
    for (cell, white) in ORIENTATION {
        cells[cell] = white;
    }
    let mut rest = id;
    let mut digits = [0u32; DIGITS];
    for d in digits.iter_mut().rev() {
        *d = rest % 6;
        rest /= 6;
    }
    let bits = digits
        .iter()
        .flat_map(|&d| (0..DIGIT_BITS).rev().map(move |b| (d >> b) & 1 == 1));
    for (cell, bit) in payload_cells().zip(bits) {
        cells[cell] = bit;
    }
    Some(pack(&cells))
}

fn payload_cells() -> impl Iterator<Item = usize> {
    (0..GRID_SIZE * GRID_SIZE).filter(|c| ORIENTATION.iter().all(|(o, _)| o != c))
}

fn decode(code: u64) -> Option<u32> {
    if ORIENTATION
        .iter()
        .any(|&(cell, white)| ((code >> cell) & 1 == 1) != white)
    {
        return None;
    }
    let mut id = 0u32;
    let mut cells = payload_cells();
    for _ in 0..DIGITS {
        let mut digit = 0u32;
        for _ in 0..DIGIT_BITS {
            let cell = cells.next()?;
            digit = (digit << 1) | ((code >> cell) & 1) as u32;
        }
        if digit >= 6 {
            return None;
        }
        id = id * 6 + digit;
    }
    Some(id)
}

pub fn try_decode(region: &Region, frame: &ImageU8, cfg: &Icl1Config) -> Option<Fiducial> {
    let quad = region.quad()?;
    let cells = read_bordered(frame, &quad, GRID_SIZE, cfg.min_contrast, region.light)?;

    let (rotation, id) = rotations(pack(&cells), GRID_SIZE)
        .into_iter()
        .enumerate()
        .find_map(|(r, code)| decode(code).map(|id| (r, id)))?;
    if !NATIVE_IDS.contains(&id) || !cfg.ids.contains(id) {
        return None;
    }

    let corners = oriented_corners(&quad, rotation);
    Some(
        Fiducial::new(id, FamilyId::Icl1, corners.to_vec(), 1.0)
            .with_key_points(quad_key_points(&corners, 0)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{paint, MarkerPattern};

    #[test]
    fn native_ids_roundtrip_through_cells() {
        for id in NATIVE_IDS {
            let code = encode(id).unwrap();
            assert_eq!(decode(code), Some(id));
        }
        assert!(encode(1000).is_none());
    }

    #[test]
    fn orientation_mark_is_unique_per_rotation() {
        let code = encode(1294).unwrap();
        let matches = rotations(code, GRID_SIZE)
            .into_iter()
            .filter(|&c| decode(c).is_some())
            .count();
        assert_eq!(matches, 1);
    }

    #[test]
    fn decodes_rendered_marker_in_any_corner_order() {
        let corners = [[30.0, 30.0], [130.0, 40.0], [120.0, 140.0], [20.0, 130.0]];
        let mut frame = ImageU8::filled(160, 170, 255);
        paint(&mut frame, &MarkerPattern::icl1(517).unwrap(), &corners);

        for start in 0..4 {
            let order: Vec<_> = (0..4).map(|i| corners[(i + start) % 4]).collect();
            let f = try_decode(&Region::from_corners(&order), &frame, &Icl1Config::default())
                .unwrap();
            assert_eq!(f.id, 517);
            assert_eq!(f.confidence, 1.0);
            assert_eq!(f.corners[0], corners[0]);
        }

        let only_others = Icl1Config {
            ids: "{475,907}".parse().unwrap(),
            ..Icl1Config::default()
        };
        assert!(try_decode(&Region::from_corners(&corners), &frame, &only_others).is_none());
    }

    #[test]
    fn validation_rejects_foreign_ids() {
        let cfg = Icl1Config {
            ids: "{1294,3}".parse().unwrap(),
            ..Icl1Config::default()
        };
        assert!(cfg.validate().is_err());
        assert!(Icl1Config::default().validate().is_ok());
    }
}
