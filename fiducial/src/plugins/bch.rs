use serde::Deserialize;
use smallvec::SmallVec;

use crate::bch::{self as codec, BchDecoded, CODE_BITS, DATA_BITS, MAX_CORRECTABLE};
use crate::bits::{pack, rotations};
use crate::detect::image::ImageU8;
use crate::detect::region::Region;
use crate::family::FamilyId;
use crate::idset::IdSet;
use crate::types::{quad_key_points, Fiducial};

use super::grid::{oriented_corners, read_bordered, DEFAULT_MIN_CONTRAST};

/// Payload cells per side.
pub const GRID_SIZE: usize = 6;

/// Error-corrected 6×6 markers carrying a 12-bit id.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BchConfig {
    /// Number of bit errors corrected before a read is rejected, at most 4.
    pub max_errors: u32,
    pub ids: IdSet,
    pub min_contrast: f64,
}

impl Default for BchConfig {
    fn default() -> Self {
        Self {
            max_errors: MAX_CORRECTABLE,
            ids: IdSet::All,
            min_contrast: DEFAULT_MIN_CONTRAST,
        }
    }
}

impl BchConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_errors > MAX_CORRECTABLE {
            return Err(format!(
                "max_errors must be at most {MAX_CORRECTABLE}, got {}",
                self.max_errors
            ));
        }
        let limit = (1u32 << DATA_BITS) - 1;
        let too_large = match &self.ids {
            IdSet::All => None,
            IdSet::Range(_, hi) => Some(*hi).filter(|&hi| hi > limit),
            IdSet::List(ids) => ids.iter().copied().find(|&id| id > limit),
        };
        if let Some(id) = too_large {
            return Err(format!("id {id} exceeds the largest BCH id {limit}"));
        }
        if self.min_contrast < 0.0 {
            return Err(format!("min_contrast must be non-negative, got {}", self.min_contrast));
        }
        Ok(())
    }
}

pub fn try_decode(region: &Region, frame: &ImageU8, cfg: &BchConfig) -> Option<Fiducial> {
    let quad = region.quad()?;
    let cells = read_bordered(frame, &quad, GRID_SIZE, cfg.min_contrast, region.light)?;
    let observed = pack(&cells);
    let code = codec::code();

    let mut reads: SmallVec<[(usize, BchDecoded); 4]> = rotations(observed, GRID_SIZE)
        .into_iter()
        .enumerate()
        .filter_map(|(r, word)| code.decode(word).map(|d| (r, d)))
        .filter(|(_, d)| d.corrected <= cfg.max_errors)
        .collect();
    reads.sort_by_key(|(_, d)| d.corrected);
    let &(rotation, decoded) = reads.first()?;

    // Rotated codewords can sit as close as 3 bits to another id, so a
    // competing read needs at least two more corrections to be ruled out.
    if let Some((_, rival)) = reads[1..]
        .iter()
        .find(|(_, d)| d.id != decoded.id && d.corrected <= decoded.corrected + 1)
    {
        log::trace!("ambiguous bch read: {} vs {}", decoded.id, rival.id);
        return None;
    }
    if !cfg.ids.contains(decoded.id) {
        return None;
    }

    let corners = oriented_corners(&quad, rotation);
    let confidence = 1.0 - decoded.corrected as f64 / CODE_BITS as f64;
    Some(
        Fiducial::new(decoded.id, FamilyId::Bch, corners.to_vec(), confidence)
            .with_key_points(quad_key_points(&corners, 0)),
    )
}
