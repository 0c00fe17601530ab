use serde::{Deserialize, Serialize};

use crate::bits::{hamming_distance, pack, rotations};
use crate::detect::image::ImageU8;
use crate::detect::region::Region;
use crate::family::FamilyId;
use crate::types::{quad_key_points, Fiducial};

use super::grid::{oriented_corners, read_bordered, DEFAULT_MIN_CONTRAST};

/// ArUco 4x4_50 dictionary, bit `y * 4 + x` set for a white cell.
#[rustfmt::skip]
pub const ARUCO_4X4_50: [u64; 50] = [
    0x4cad, 0x59f0, 0xb4cc, 0x6299, 0x792a, 0xb39e, 0x7479, 0x4f23,
    0x5b7f, 0x6af3, 0x899f, 0xe588, 0xed70, 0xf054, 0x8d24, 0x7c64,
    0xa662, 0x0066, 0x7a36, 0xf56e, 0xd161, 0xd40d, 0xab33, 0x41bb,
    0xe27f, 0x8e29, 0x2735, 0x2aa5, 0xc484, 0xf62c, 0xa822, 0x4dea,
    0xf379, 0xd30f, 0x7510, 0x9490, 0xae18, 0xff20, 0x6fb0, 0x5a38,
    0x18e8, 0x1454, 0x314c, 0x4d1c, 0x1724, 0xd774, 0xfcb4, 0x26d2,
    0x740a, 0xc80a,
];

/// Square markers matched against a codeword table. The id is the code's index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ForQuadsConfig {
    /// Payload cells per side, excluding the one-cell black border.
    pub grid_size: usize,
    pub codes: Vec<u64>,
    /// Maximum number of differing cells accepted for a match.
    pub max_hamming: u32,
    pub min_contrast: f64,
}

impl Default for ForQuadsConfig {
    fn default() -> Self {
        Self {
            grid_size: 4,
            codes: ARUCO_4X4_50.to_vec(),
            max_hamming: 0,
            min_contrast: DEFAULT_MIN_CONTRAST,
        }
    }
}

impl ForQuadsConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(2..=8).contains(&self.grid_size) {
            return Err(format!("grid_size must be in 2..=8, got {}", self.grid_size));
        }
        if self.codes.is_empty() {
            return Err("codes must not be empty".into());
        }
        let nbits = self.grid_size * self.grid_size;
        if nbits < 64 {
            if let Some(code) = self.codes.iter().find(|&&c| c >> nbits != 0) {
                return Err(format!("code {code:#x} does not fit in {nbits} bits"));
            }
        }
        if self.max_hamming as usize >= nbits / 2 {
            return Err(format!(
                "max_hamming must be below {}, got {}",
                nbits / 2,
                self.max_hamming
            ));
        }
        if self.min_contrast < 0.0 {
            return Err(format!("min_contrast must be non-negative, got {}", self.min_contrast));
        }
        Ok(())
    }
}

pub fn try_decode(region: &Region, frame: &ImageU8, cfg: &ForQuadsConfig) -> Option<Fiducial> {
    let quad = region.quad()?;
    let dim = cfg.grid_size;
    let cells = read_bordered(frame, &quad, dim, cfg.min_contrast, region.light)?;
    let observed = pack(&cells);

    // (index, hamming, rotation)
    let mut best: Option<(usize, u32, usize)> = None;
    for (rotation, rcode) in rotations(observed, dim).into_iter().enumerate() {
        for (index, &code) in cfg.codes.iter().enumerate() {
            let ham = hamming_distance(code, rcode);
            if ham <= cfg.max_hamming && best.map_or(true, |(_, h, _)| ham < h) {
                best = Some((index, ham, rotation));
            }
        }
    }
    let (index, ham, rotation) = best?;

    let corners = oriented_corners(&quad, rotation);
    let confidence = 1.0 - ham as f64 / (dim * dim) as f64;
    Some(
        Fiducial::new(index as u32, FamilyId::ForQuads, corners.to_vec(), confidence)
            .with_key_points(quad_key_points(&corners, 0)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{paint, MarkerPattern};

    fn scene(id: u32, corners: &[[f64; 2]; 4]) -> ImageU8 {
        let mut frame = ImageU8::filled(200, 200, 255);
        let pattern = MarkerPattern::forquads(&ForQuadsConfig::default(), id).unwrap();
        paint(&mut frame, &pattern, corners);
        frame
    }

    #[test]
    fn decodes_each_rotation() {
        let c = [[50.0, 40.0], [150.0, 40.0], [150.0, 140.0], [50.0, 140.0]];
        let frame = scene(17, &c);
        for start in 0..4 {
            let rotated: Vec<_> = (0..4).map(|i| c[(i + start) % 4]).collect();
            let region = Region::from_corners(&rotated);
            let f = try_decode(&region, &frame, &ForQuadsConfig::default()).unwrap();
            assert_eq!(f.id, 17);
            assert_eq!(f.confidence, 1.0);
            assert_eq!(f.corners[0], c[0], "start={start}");
            assert_eq!(f.key_points.len(), 4);
        }
    }

    #[test]
    fn flipped_cell_needs_hamming_budget() {
        let c = [[50.0, 40.0], [150.0, 40.0], [150.0, 140.0], [50.0, 140.0]];
        let mut frame = scene(3, &c);
        // Invert payload cell (1, 1): cell side 100 / 6 px.
        let cell = 100.0 / 6.0;
        for y in 0..14 {
            for x in 0..14 {
                let px = (50.0 + 2.0 * cell) as u32 + 1 + x;
                let py = (40.0 + 2.0 * cell) as u32 + 1 + y;
                let v = frame.get(px, py);
                frame.set(px, py, 255 - v);
            }
        }
        let region = Region::from_corners(&c);
        assert!(try_decode(&region, &frame, &ForQuadsConfig::default()).is_none());

        let tolerant = ForQuadsConfig {
            max_hamming: 1,
            ..ForQuadsConfig::default()
        };
        let f = try_decode(&region, &frame, &tolerant).unwrap();
        assert_eq!(f.id, 3);
        assert!((f.confidence - 15.0 / 16.0).abs() < 1e-12);
    }

    #[test]
    fn blank_region_fails() {
        let frame = ImageU8::filled(200, 200, 255);
        let region = Region::from_corners(&[[50.0, 40.0], [150.0, 40.0], [150.0, 140.0], [50.0, 140.0]]);
        assert!(try_decode(&region, &frame, &ForQuadsConfig::default()).is_none());
    }

    #[test]
    fn validation() {
        assert!(ForQuadsConfig::default().validate().is_ok());
        let too_wide = ForQuadsConfig {
            codes: vec![1 << 16],
            ..ForQuadsConfig::default()
        };
        assert!(too_wide.validate().is_err());
        let loose = ForQuadsConfig {
            max_hamming: 8,
            ..ForQuadsConfig::default()
        };
        assert!(loose.validate().is_err());
    }
}
