use crate::bch;
use crate::detect::homography::Homography;
use crate::detect::image::ImageU8;
use crate::family::PluginConfig;
use crate::plugins::art::ArtPattern;
use crate::plugins::forquads::ForQuadsConfig;
use crate::plugins::grid::ring_cells;
use crate::plugins::hierarchical::{data_ring_bits, CODE_BITS, LEVEL_CELLS, NESTED_SPAN};
use crate::plugins::{bch as bch_plugin, icl1};
use crate::types::Point2;

const BLACK: u8 = 0;
const WHITE: u8 = 255;

/// The visual layout of one marker over the unit square, painted into frames
/// under arbitrary quad placements.
#[derive(Debug, Clone)]
pub enum MarkerPattern {
    /// A `dim`×`dim` cell grid, border included, row-major, `true` = white.
    Cells { dim: usize, cells: Vec<bool> },
    /// Hierarchical levels of `LEVEL_CELLS`² cells, outermost first.
    Nested { levels: Vec<Vec<bool>> },
    /// A picture inside a black frame `border` wide.
    Bitmap { border: f64, pattern: ArtPattern },
}

impl MarkerPattern {
    /// Payload cells wrapped in a one-cell black border.
    fn bordered(data: usize, code: u64) -> Self {
        let dim = data + 2;
        let mut cells = vec![false; dim * dim];
        for y in 0..data {
            for x in 0..data {
                cells[(y + 1) * dim + x + 1] = (code >> (y * data + x)) & 1 == 1;
            }
        }
        MarkerPattern::Cells { dim, cells }
    }

    pub fn forquads(cfg: &ForQuadsConfig, id: u32) -> Option<Self> {
        let code = *cfg.codes.get(id as usize)?;
        Some(Self::bordered(cfg.grid_size, code))
    }

    pub fn bch(id: u32) -> Option<Self> {
        let code = bch::code().encode(id)?;
        Some(Self::bordered(bch_plugin::GRID_SIZE, code))
    }

    pub fn icl1(id: u32) -> Option<Self> {
        Some(Self::bordered(icl1::GRID_SIZE, icl1::encode(id)?))
    }

    /// A nested marker from its level codes, outermost first.
    pub fn hierarchical(codes: &[u32]) -> Option<Self> {
        if codes.is_empty() || codes.iter().any(|&c| c >> CODE_BITS != 0) {
            return None;
        }
        let levels = codes.iter().map(|&code| level_cells(code)).collect();
        Some(MarkerPattern::Nested { levels })
    }

    pub fn art(pattern: &ArtPattern, border: f64) -> Self {
        MarkerPattern::Bitmap {
            border,
            pattern: pattern.clone(),
        }
    }

    /// The pattern a decoder configured with `config` reads as `id`.
    /// Amoeba markers and unknown ids have none.
    pub fn from_config(config: &PluginConfig, id: u32) -> Option<Self> {
        match config {
            PluginConfig::ForQuads(c) => Self::forquads(c, id),
            PluginConfig::Bch(_) => Self::bch(id),
            PluginConfig::Icl1(_) => Self::icl1(id),
            PluginConfig::Hierarchical(c) => {
                // Intermediate levels read 0 so the composite folds back to `id`.
                let mut codes = vec![0; c.max_depth.max(1)];
                if let [first, .., last] = codes.as_mut_slice() {
                    *first = id / c.fine_modulus;
                    *last = id % c.fine_modulus;
                } else {
                    codes[0] = id;
                }
                Self::hierarchical(&codes)
            }
            PluginConfig::Art(c) => c
                .patterns
                .iter()
                .find(|p| p.id == id)
                .map(|p| Self::art(p, c.border_ratio)),
            PluginConfig::Amoeba(_) => None,
        }
    }

    /// Toggle payload cell `(x, y)` of a bordered grid.
    pub fn flip_payload_cell(&mut self, x: usize, y: usize) {
        if let MarkerPattern::Cells { dim, cells } = self {
            if x + 2 < *dim && y + 2 < *dim {
                let i = (y + 1) * *dim + x + 1;
                cells[i] = !cells[i];
            }
        }
    }

    /// Intensity at unit-square coordinates `(u, v)`.
    pub fn value_at(&self, u: f64, v: f64) -> u8 {
        let shade = |white: bool| if white { WHITE } else { BLACK };
        match self {
            MarkerPattern::Cells { dim, cells } => shade(cells[cell_index(*dim, u, v)]),
            MarkerPattern::Nested { levels } => {
                let (mut u, mut v) = (u, v);
                let lo = NESTED_SPAN.0 as f64 / LEVEL_CELLS as f64;
                let span = (NESTED_SPAN.1 - NESTED_SPAN.0) as f64 / LEVEL_CELLS as f64;
                for (depth, level) in levels.iter().enumerate() {
                    let i = cell_index(LEVEL_CELLS, u, v);
                    let (cx, cy) = (i % LEVEL_CELLS, i / LEVEL_CELLS);
                    let inner = (NESTED_SPAN.0..NESTED_SPAN.1).contains(&cx)
                        && (NESTED_SPAN.0..NESTED_SPAN.1).contains(&cy);
                    if inner && depth + 1 < levels.len() {
                        u = (u - lo) / span;
                        v = (v - lo) / span;
                        continue;
                    }
                    return shade(level[i]);
                }
                WHITE
            }
            MarkerPattern::Bitmap { border, pattern } => {
                let span = 1.0 - 2.0 * border;
                let (pu, pv) = ((u - border) / span, (v - border) / span);
                if (0.0..1.0).contains(&pu) && (0.0..1.0).contains(&pv) {
                    pattern.value_at(pu, pv)
                } else {
                    BLACK
                }
            }
        }
    }
}

fn cell_index(dim: usize, u: f64, v: f64) -> usize {
    let d = dim as f64;
    let x = ((u * d).max(0.0) as usize).min(dim - 1);
    let y = ((v * d).max(0.0) as usize).min(dim - 1);
    y * dim + x
}

/// One hierarchical level: black border, data ring, white gap and a white
/// centre where the nested level goes.
fn level_cells(code: u32) -> Vec<bool> {
    let mut cells = vec![true; LEVEL_CELLS * LEVEL_CELLS];
    for (x, y) in ring_cells(LEVEL_CELLS, 0) {
        cells[y as usize * LEVEL_CELLS + x as usize] = false;
    }
    for ((x, y), bit) in ring_cells(LEVEL_CELLS, 1).into_iter().zip(data_ring_bits(code)) {
        cells[y as usize * LEVEL_CELLS + x as usize] = bit;
    }
    cells
}

/// Paint `pattern` into `frame` so that its unit square maps onto `corners`
/// (top-left first, clockwise). Each covered pixel takes the pattern value
/// at its centre.
pub fn paint(frame: &mut ImageU8, pattern: &MarkerPattern, corners: &[Point2; 4]) {
    let Some(inv) = Homography::from_unit_square(corners).and_then(|h| h.inverse()) else {
        return;
    };
    let (mut lo, mut hi) = ([f64::MAX; 2], [f64::MIN; 2]);
    for c in corners {
        for k in 0..2 {
            lo[k] = lo[k].min(c[k]);
            hi[k] = hi[k].max(c[k]);
        }
    }
    let x0 = lo[0].floor().max(0.0) as u32;
    let y0 = lo[1].floor().max(0.0) as u32;
    let x1 = (hi[0].ceil().max(0.0) as u32).min(frame.width);
    let y1 = (hi[1].ceil().max(0.0) as u32).min(frame.height);

    for y in y0..y1 {
        for x in x0..x1 {
            let [u, v] = inv.project([x as f64 + 0.5, y as f64 + 0.5]);
            if (0.0..1.0).contains(&u) && (0.0..1.0).contains(&v) {
                frame.set(x, y, pattern.value_at(u, v));
            }
        }
    }
}

/// An axis-aligned image of a marker `side` pixels wide on a white margin.
pub fn render(pattern: &MarkerPattern, side: u32, margin: u32) -> ImageU8 {
    let total = side + 2 * margin;
    let mut frame = ImageU8::filled(total, total, WHITE);
    let (a, b) = (margin as f64, (margin + side) as f64);
    paint(&mut frame, pattern, &[[a, a], [b, a], [b, b], [a, b]]);
    frame
}
