use serde::{Deserialize, Serialize};
use wide::f32x8;

use crate::bits::rotate_grid;
use crate::detect::homography::Homography;
use crate::detect::image::ImageU8;
use crate::detect::region::Region;
use crate::family::FamilyId;
use crate::types::{quad_key_points, Fiducial};

use super::grid::{oriented_corners, DEFAULT_MIN_CONTRAST};

/// Similarity measure between the rectified patch and a reference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// Fraction of agreeing pixels after binarization.
    Binary,
    /// One minus the mean squared difference of contrast-normalized intensities.
    SqrDist,
    /// Normalized cross-correlation, negative values clamped to zero.
    #[default]
    Ncc,
}

/// A reference picture, `size`×`size` row-major 8-bit pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArtPattern {
    pub id: u32,
    pub size: usize,
    pub pixels: Vec<u8>,
}

impl ArtPattern {
    /// Pixel value at unit coordinates `(u, v)`, nearest neighbour.
    pub fn value_at(&self, u: f64, v: f64) -> u8 {
        let s = self.size as f64;
        let x = ((u * s) as usize).min(self.size - 1);
        let y = ((v * s) as usize).min(self.size - 1);
        self.pixels[y * self.size + x]
    }

    fn resampled(&self, dim: usize) -> Vec<f32> {
        (0..dim * dim)
            .map(|i| {
                let u = ((i % dim) as f64 + 0.5) / dim as f64;
                let v = ((i / dim) as f64 + 0.5) / dim as f64;
                self.value_at(u, v) as f32
            })
            .collect()
    }
}

/// Template markers: a black frame around an arbitrary picture, matched
/// against reference bitmaps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArtConfig {
    pub mode: MatchMode,
    /// Side of the square patch compared against the references.
    pub match_dim: usize,
    /// Frame width relative to the marker side.
    pub border_ratio: f64,
    /// The best match must score strictly above this.
    pub min_score: f64,
    pub patterns: Vec<ArtPattern>,
    pub min_contrast: f64,
}

impl Default for ArtConfig {
    fn default() -> Self {
        Self {
            mode: MatchMode::Ncc,
            match_dim: 32,
            border_ratio: 0.25,
            min_score: 0.8,
            patterns: Vec::new(),
            min_contrast: DEFAULT_MIN_CONTRAST,
        }
    }
}

impl ArtConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(4..=256).contains(&self.match_dim) {
            return Err(format!("match_dim must be in 4..=256, got {}", self.match_dim));
        }
        if !(self.border_ratio >= 0.0 && self.border_ratio < 0.5) {
            return Err(format!("border_ratio must be in [0, 0.5), got {}", self.border_ratio));
        }
        if !(0.0..=1.0).contains(&self.min_score) {
            return Err(format!("min_score must be in [0, 1], got {}", self.min_score));
        }
        for p in &self.patterns {
            if p.size < 2 || p.pixels.len() != p.size * p.size {
                return Err(format!(
                    "pattern {} has {} pixels, expected {}x{}",
                    p.id,
                    p.pixels.len(),
                    p.size,
                    p.size
                ));
            }
        }
        if self.min_contrast < 0.0 {
            return Err(format!("min_contrast must be non-negative, got {}", self.min_contrast));
        }
        Ok(())
    }
}

/// Sums of a, b, a², b² and ab over two equally long slices.
fn moments(a: &[f32], b: &[f32]) -> [f32; 5] {
    let mut acc = [f32x8::ZERO; 5];
    let mut ca = a.chunks_exact(8);
    let mut cb = b.chunks_exact(8);
    for (xa, xb) in (&mut ca).zip(&mut cb) {
        let va = f32x8::from(<[f32; 8]>::try_from(xa).unwrap_or_default());
        let vb = f32x8::from(<[f32; 8]>::try_from(xb).unwrap_or_default());
        acc[0] += va;
        acc[1] += vb;
        acc[2] += va * va;
        acc[3] += vb * vb;
        acc[4] += va * vb;
    }
    let mut out = acc.map(|v| v.to_array().iter().sum::<f32>());
    for (&x, &y) in ca.remainder().iter().zip(cb.remainder()) {
        out[0] += x;
        out[1] += y;
        out[2] += x * x;
        out[3] += y * y;
        out[4] += x * y;
    }
    out
}

/// Similarity in `[0, 1]` of a patch (intensities in `[lo, hi]`) and a reference.
fn score(mode: MatchMode, patch: &[f32], reference: &[f32], lo: f32, hi: f32) -> f64 {
    let n = patch.len() as f32;
    let range = (hi - lo).max(1.0);
    let s = match mode {
        MatchMode::Binary => {
            let mid = 0.5 * (lo + hi);
            let a: Vec<f32> = patch.iter().map(|&v| (v > mid) as u8 as f32).collect();
            let b: Vec<f32> = reference.iter().map(|&v| (v >= 128.0) as u8 as f32).collect();
            let m = moments(&a, &b);
            1.0 - (m[2] - 2.0 * m[4] + m[3]) / n
        }
        MatchMode::SqrDist => {
            let a: Vec<f32> = patch.iter().map(|&v| (v - lo) / range).collect();
            let b: Vec<f32> = reference.iter().map(|&v| v / 255.0).collect();
            let m = moments(&a, &b);
            1.0 - (m[2] - 2.0 * m[4] + m[3]) / n
        }
        MatchMode::Ncc => {
            let m = moments(patch, reference);
            let cov = m[4] - m[0] * m[1] / n;
            let va = m[2] - m[0] * m[0] / n;
            let vb = m[3] - m[1] * m[1] / n;
            if va <= 1e-6 || vb <= 1e-6 {
                0.0
            } else {
                cov / (va * vb).sqrt()
            }
        }
    };
    (s as f64).clamp(0.0, 1.0)
}

pub fn try_decode(region: &Region, frame: &ImageU8, cfg: &ArtConfig) -> Option<Fiducial> {
    if cfg.patterns.is_empty() {
        return None;
    }
    let quad = region.quad()?;
    let h = Homography::from_unit_square(&quad)?;

    let dim = cfg.match_dim;
    let b = cfg.border_ratio;
    let span = 1.0 - 2.0 * b;
    let patch: Vec<f32> = (0..dim * dim)
        .map(|i| {
            let u = b + ((i % dim) as f64 + 0.5) / dim as f64 * span;
            let v = b + ((i / dim) as f64 + 0.5) / dim as f64 * span;
            let p = h.project([u, v]);
            let g = frame.interpolate(p[0], p[1]) as f32;
            if region.light {
                255.0 - g
            } else {
                g
            }
        })
        .collect();
    let lo = patch.iter().copied().fold(f32::MAX, f32::min);
    let hi = patch.iter().copied().fold(f32::MIN, f32::max);
    if ((hi - lo) as f64) < cfg.min_contrast {
        return None;
    }

    let mut views = Vec::with_capacity(4);
    views.push(patch);
    for r in 1..4 {
        let next = rotate_grid(&views[r - 1], dim);
        views.push(next);
    }

    // (score, id, rotation)
    let mut best: Option<(f64, u32, usize)> = None;
    for pattern in &cfg.patterns {
        let reference = pattern.resampled(dim);
        for (rotation, view) in views.iter().enumerate() {
            let s = score(cfg.mode, view, &reference, lo, hi);
            if best.map_or(true, |(bs, _, _)| s > bs) {
                best = Some((s, pattern.id, rotation));
            }
        }
    }
    let (s, id, rotation) = best?;
    if s <= cfg.min_score {
        log::trace!("art best score {s:.3} does not exceed {}", cfg.min_score);
        return None;
    }

    let corners = oriented_corners(&quad, rotation);
    Some(
        Fiducial::new(id, FamilyId::Art, corners.to_vec(), s)
            .with_key_points(quad_key_points(&corners, 0)),
    )
}
