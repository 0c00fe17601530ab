use crate::detect::homography::Homography;
use crate::detect::image::ImageU8;
use crate::types::Point2;

/// Default minimum difference between the white and black intensity models.
pub const DEFAULT_MIN_CONTRAST: f64 = 30.0;

/// Linear intensity model `g(x, y) = c0 x + c1 y + c2` fitted over marker
/// coordinates, so illumination gradients across the marker are tolerated.
#[derive(Debug, Clone, Default)]
pub struct GrayModel {
    a: [[f64; 3]; 3],
    b: [f64; 3],
    c: [f64; 3],
    n: usize,
}

impl GrayModel {
    pub fn add(&mut self, x: f64, y: f64, gray: f64) {
        self.a[0][0] += x * x;
        self.a[0][1] += x * y;
        self.a[0][2] += x;
        self.a[1][1] += y * y;
        self.a[1][2] += y;
        self.a[2][2] += 1.0;
        self.b[0] += x * gray;
        self.b[1] += y * gray;
        self.b[2] += gray;
        self.n += 1;
    }

    pub fn solve(&mut self) {
        if self.n == 0 {
            return;
        }
        self.a[1][0] = self.a[0][1];
        self.a[2][0] = self.a[0][2];
        self.a[2][1] = self.a[1][2];

        match crate::detect::linalg::solve(self.a, self.b) {
            Some(c) => self.c = c,
            // Samples along a single line: fall back to a constant model.
            None => self.c = [0.0, 0.0, self.b[2] / self.n as f64],
        }
    }

    pub fn interpolate(&self, x: f64, y: f64) -> f64 {
        self.c[0] * x + self.c[1] * y + self.c[2]
    }
}

/// A square marker rectified through the homography of its corners.
///
/// Cell `(x, y)` of a `dim`×`dim` grid covers `[x/dim, (x+1)/dim)` of the
/// unit square; negative or `>= dim` indices address cells outside the
/// marker outline.
///
/// An inverted rectification reads a light-on-dark marker as its dark-on-light
/// counterpart.
pub struct Rectified<'a> {
    frame: &'a ImageU8,
    h: Homography,
    dim: usize,
    inverted: bool,
}

impl<'a> Rectified<'a> {
    pub fn new(frame: &'a ImageU8, corners: &[Point2; 4], dim: usize) -> Option<Self> {
        let h = Homography::from_unit_square(corners)?;
        Some(Self {
            frame,
            h,
            dim,
            inverted: false,
        })
    }

    pub fn inverted(mut self, inverted: bool) -> Self {
        self.inverted = inverted;
        self
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Image position of a point in cell units.
    pub fn project(&self, x: f64, y: f64) -> Point2 {
        let d = self.dim as f64;
        self.h.project([x / d, y / d])
    }

    /// Mean intensity of a cell from a 3×3 sub-sample around its centre.
    pub fn cell(&self, x: i32, y: i32) -> f64 {
        let mut sum = 0.0;
        for sy in [-0.25, 0.0, 0.25] {
            for sx in [-0.25, 0.0, 0.25] {
                let p = self.project(x as f64 + 0.5 + sx, y as f64 + 0.5 + sy);
                sum += self.frame.interpolate(p[0], p[1]);
            }
        }
        let mean = sum / 9.0;
        if self.inverted {
            255.0 - mean
        } else {
            mean
        }
    }

    /// Approximate side of one cell in pixels.
    pub fn cell_px(&self) -> f64 {
        let d = self.dim as f64;
        let c = |x: f64, y: f64| self.project(x, y);
        let sides = [
            (c(0.0, 0.0), c(d, 0.0)),
            (c(d, 0.0), c(d, d)),
            (c(d, d), c(0.0, d)),
            (c(0.0, d), c(0.0, 0.0)),
        ];
        let min_side = sides
            .iter()
            .map(|(a, b)| ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt())
            .fold(f64::MAX, f64::min);
        min_side / d
    }

    /// Cells of the ring `ring` cells in from the outline (`-1` = just outside).
    pub fn ring(&self, ring: i32) -> Vec<(i32, i32)> {
        ring_cells(self.dim, ring)
    }

    /// Fit black and white intensity models from reference cells.
    pub fn levels(&self, black: &[(i32, i32)], white: &[(i32, i32)]) -> Levels {
        let mut black_model = GrayModel::default();
        let mut white_model = GrayModel::default();
        for &(x, y) in black {
            black_model.add(x as f64, y as f64, self.cell(x, y));
        }
        for &(x, y) in white {
            white_model.add(x as f64, y as f64, self.cell(x, y));
        }
        black_model.solve();
        white_model.solve();
        Levels {
            black: black_model,
            white: white_model,
        }
    }
}

/// Cells of a square ring of a `dim`×`dim` grid, `ring` cells in from the
/// outline, walked clockwise on screen from its top-left cell.
pub fn ring_cells(dim: usize, ring: i32) -> Vec<(i32, i32)> {
    let lo = ring;
    let hi = dim as i32 - 1 - ring;
    if hi < lo {
        return Vec::new();
    }
    if hi == lo {
        return vec![(lo, lo)];
    }
    let mut cells = Vec::with_capacity(4 * (hi - lo) as usize);
    for x in lo..hi {
        cells.push((x, lo));
    }
    for y in lo..hi {
        cells.push((hi, y));
    }
    for x in (lo + 1..=hi).rev() {
        cells.push((x, hi));
    }
    for y in (lo + 1..=hi).rev() {
        cells.push((lo, y));
    }
    cells
}

/// Local black and white intensity references.
pub struct Levels {
    black: GrayModel,
    white: GrayModel,
}

impl Levels {
    /// White minus black level at a cell, negative if the marker reads inverted.
    pub fn contrast(&self, x: i32, y: i32) -> f64 {
        self.white.interpolate(x as f64, y as f64) - self.black.interpolate(x as f64, y as f64)
    }

    /// Lowest contrast over the given cells.
    pub fn min_contrast(&self, cells: impl IntoIterator<Item = (i32, i32)>) -> f64 {
        cells
            .into_iter()
            .map(|(x, y)| self.contrast(x, y))
            .fold(f64::MAX, f64::min)
    }

    /// True if the cell value is closer to white.
    pub fn is_white(&self, x: i32, y: i32, value: f64) -> bool {
        let mid = 0.5 * (self.white.interpolate(x as f64, y as f64)
            + self.black.interpolate(x as f64, y as f64));
        value > mid
    }
}

/// Read the `data`×`data` payload cells of a marker with a one-cell black
/// border surrounded by a white quiet zone, or with every intensity swapped
/// when `inverted` is set.
///
/// Returns row-major cell values (`true` = white in the non-inverted marker)
/// relative to the region's corner order, or `None` when contrast is too low.
pub fn read_bordered(
    frame: &ImageU8,
    corners: &[Point2; 4],
    data: usize,
    min_contrast: f64,
    inverted: bool,
) -> Option<Vec<bool>> {
    let rect = Rectified::new(frame, corners, data + 2)?.inverted(inverted);
    let black = rect.ring(0);
    let white = rect.ring(-1);
    let levels = rect.levels(&black, &white);
    if levels.min_contrast(black.iter().copied()) < min_contrast {
        return None;
    }

    let mut cells = Vec::with_capacity(data * data);
    for y in 1..=data as i32 {
        for x in 1..=data as i32 {
            cells.push(levels.is_white(x, y, rect.cell(x, y)));
        }
    }
    Some(cells)
}

/// Region corners reordered so that corner 0 is the marker's top-left after
/// the observed grid was rotated `rotation` times with [`crate::bits::rotate90`].
pub fn oriented_corners(corners: &[Point2; 4], rotation: usize) -> [Point2; 4] {
    std::array::from_fn(|i| corners[(i + rotation) % 4])
}
