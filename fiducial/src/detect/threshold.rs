use serde::{Deserialize, Serialize};

use super::image::ImageU8;

/// Foreground pixels of a mask.
pub const FOREGROUND: u8 = 255;

/// How the frame is binarized before contour tracing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase", deny_unknown_fields)]
pub enum ThresholdMode {
    /// Pixels darker than `level` are foreground.
    Fixed { level: u8 },
    /// Pixels darker than the mean of the surrounding `window`×`window`
    /// block minus `offset` are foreground.
    Adaptive { window: u32, offset: i32 },
}

impl Default for ThresholdMode {
    fn default() -> Self {
        ThresholdMode::Adaptive {
            window: 31,
            offset: 10,
        }
    }
}

/// Which blobs are candidate markers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Polarity {
    /// Dark markers on a light background.
    #[default]
    Dark,
    /// Light markers on a dark background.
    Light,
    Both,
}

impl Polarity {
    /// The `light` flags to run the proposer with.
    pub fn passes(self) -> &'static [bool] {
        match self {
            Polarity::Dark => &[false],
            Polarity::Light => &[true],
            Polarity::Both => &[false, true],
        }
    }
}

/// Morphological clean-up of the binary mask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MorphFilter {
    #[default]
    None,
    Erode,
    Dilate,
    Open,
    Close,
}

/// Produce a binary mask: [`FOREGROUND`] for marker-coloured pixels, 0 otherwise.
///
/// With `light` set, bright pixels are foreground instead of dark ones.
pub fn binarize(img: &ImageU8, mode: ThresholdMode, light: bool) -> ImageU8 {
    let w = img.width;
    let h = img.height;
    let mut out = ImageU8::new(w, h);
    if img.is_empty() {
        return out;
    }

    match mode {
        ThresholdMode::Fixed { level } => {
            for y in 0..h {
                for x in 0..w {
                    let v = img.get(x, y);
                    let fg = if light { v >= level } else { v < level };
                    if fg {
                        out.set(x, y, FOREGROUND);
                    }
                }
            }
        }
        ThresholdMode::Adaptive { window, offset } => {
            let integral = integral_image(img);
            let iw = w as usize + 1;
            let r = (window.max(1) / 2) as i64;
            for y in 0..h as i64 {
                let y0 = (y - r).max(0) as usize;
                let y1 = (y + r + 1).min(h as i64) as usize;
                for x in 0..w as i64 {
                    let x0 = (x - r).max(0) as usize;
                    let x1 = (x + r + 1).min(w as i64) as usize;
                    let area = ((x1 - x0) * (y1 - y0)) as i64;
                    let sum = integral[y1 * iw + x1] + integral[y0 * iw + x0]
                        - integral[y0 * iw + x1]
                        - integral[y1 * iw + x0];
                    let v = img.get(x as u32, y as u32) as i64;
                    let fg = if light {
                        (v - offset as i64) * area > sum
                    } else {
                        (v + offset as i64) * area < sum
                    };
                    if fg {
                        out.set(x as u32, y as u32, FOREGROUND);
                    }
                }
            }
        }
    }

    out
}

/// Summed-area table with one leading row and column of zeros.
fn integral_image(img: &ImageU8) -> Vec<i64> {
    let iw = img.width as usize + 1;
    let mut table = vec![0i64; iw * (img.height as usize + 1)];
    for y in 0..img.height as usize {
        let mut row = 0i64;
        for x in 0..img.width as usize {
            row += img.get(x as u32, y as u32) as i64;
            table[(y + 1) * iw + x + 1] = table[y * iw + x + 1] + row;
        }
    }
    table
}

/// Apply a morphological post-filter to a binary mask.
pub fn apply_filter(mask: ImageU8, filter: MorphFilter) -> ImageU8 {
    match filter {
        MorphFilter::None => mask,
        MorphFilter::Erode => morph_op(&mask, false),
        MorphFilter::Dilate => morph_op(&mask, true),
        MorphFilter::Open => morph_op(&morph_op(&mask, false), true),
        MorphFilter::Close => morph_op(&morph_op(&mask, true), false),
    }
}

/// Morphological operation: dilate (max) or erode (min) with 3x3 kernel.
fn morph_op(img: &ImageU8, dilate: bool) -> ImageU8 {
    let w = img.width as i32;
    let h = img.height as i32;
    let mut out = ImageU8::new(img.width, img.height);

    for y in 0..h {
        for x in 0..w {
            let mut best = img.get(x as u32, y as u32);
            for dy in -1..=1i32 {
                for dx in -1..=1i32 {
                    let nx = x + dx;
                    let ny = y + dy;
                    if nx >= 0 && nx < w && ny >= 0 && ny < h {
                        let v = img.get(nx as u32, ny as u32);
                        if dilate {
                            best = best.max(v);
                        } else {
                            best = best.min(v);
                        }
                    }
                }
            }
            out.set(x as u32, y as u32, best);
        }
    }
    out
}
