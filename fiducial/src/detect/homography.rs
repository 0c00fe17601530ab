use serde::Serialize;

use crate::error::GeometryError;
use crate::types::Point2;

use super::linalg;

/// Marker-local unit square, clockwise on screen from the top-left corner.
pub const UNIT_SQUARE: [Point2; 4] = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];

/// A 3x3 homography matrix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Homography {
    pub data: [[f64; 3]; 3],
}

impl Homography {
    pub const IDENTITY: Homography = Homography {
        data: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
    };

    /// Exact homography through 4 correspondences `src[i] -> dst[i]`.
    pub fn from_correspondences(src: &[Point2; 4], dst: &[Point2; 4]) -> Option<Self> {
        // 8x9 augmented DLT system with h[8] = 1
        let mut a = [[0.0f64; 9]; 8];
        for i in 0..4 {
            let (tx, ty) = (src[i][0], src[i][1]);
            let (px, py) = (dst[i][0], dst[i][1]);

            let row0 = i * 2;
            a[row0][0] = tx;
            a[row0][1] = ty;
            a[row0][2] = 1.0;
            a[row0][6] = -tx * px;
            a[row0][7] = -ty * px;
            a[row0][8] = px;

            let row1 = i * 2 + 1;
            a[row1][3] = tx;
            a[row1][4] = ty;
            a[row1][5] = 1.0;
            a[row1][6] = -tx * py;
            a[row1][7] = -ty * py;
            a[row1][8] = py;
        }

        let mut lhs = [[0.0f64; 8]; 8];
        let mut rhs = [0.0f64; 8];
        for (r, row) in a.iter().enumerate() {
            lhs[r].copy_from_slice(&row[..8]);
            rhs[r] = row[8];
        }
        let h = linalg::solve(lhs, rhs)?;

        Some(Homography {
            data: [[h[0], h[1], h[2]], [h[3], h[4], h[5]], [h[6], h[7], 1.0]],
        })
    }

    /// Homography mapping the marker unit square onto the given image quad.
    pub fn from_unit_square(corners: &[Point2; 4]) -> Option<Self> {
        Self::from_correspondences(&UNIT_SQUARE, corners)
    }

    /// Least-squares homography through `n >= 4` correspondences
    /// (normalized DLT).
    pub fn fit(src: &[Point2], dst: &[Point2]) -> Result<Self, GeometryError> {
        let n = src.len().min(dst.len());
        if n < 4 {
            return Err(GeometryError::TooFewPoints(n));
        }

        let ts = normalizer(&src[..n]).ok_or(GeometryError::Collinear)?;
        let td = normalizer(&dst[..n]).ok_or(GeometryError::Collinear)?;

        let mut ata = [[0.0f64; 9]; 9];
        for i in 0..n {
            let s = ts.project(src[i]);
            let d = td.project(dst[i]);
            let (x, y, u, v) = (s[0], s[1], d[0], d[1]);
            let rows = [
                [x, y, 1.0, 0.0, 0.0, 0.0, -u * x, -u * y, -u],
                [0.0, 0.0, 0.0, x, y, 1.0, -v * x, -v * y, -v],
            ];
            for row in &rows {
                for r in 0..9 {
                    for c in 0..9 {
                        ata[r][c] += row[r] * row[c];
                    }
                }
            }
        }

        let (values, vectors) = linalg::symmetric_eigen(ata);
        // A second (near) null direction means the solution is not unique.
        if values[1] <= 1e-10 * values[8].max(1e-300) {
            return Err(GeometryError::Singular);
        }

        let hn = Homography {
            data: [
                [vectors[0][0], vectors[1][0], vectors[2][0]],
                [vectors[3][0], vectors[4][0], vectors[5][0]],
                [vectors[6][0], vectors[7][0], vectors[8][0]],
            ],
        };
        let td_inv = td.inverse().ok_or(GeometryError::Singular)?;
        let h = td_inv.compose(&hn).compose(&ts);
        h.normalized().ok_or(GeometryError::Singular)
    }

    /// Scale so that `h[2][2] = 1`.
    pub fn normalized(&self) -> Option<Self> {
        let w = self.data[2][2];
        if w.abs() < 1e-12 {
            return None;
        }
        let mut data = self.data;
        for row in data.iter_mut() {
            for v in row.iter_mut() {
                *v /= w;
            }
        }
        Some(Homography { data })
    }

    /// `self * other`: apply `other` first.
    pub fn compose(&self, other: &Homography) -> Homography {
        let a = &self.data;
        let b = &other.data;
        let mut c = [[0.0; 3]; 3];
        for i in 0..3 {
            for j in 0..3 {
                c[i][j] = a[i][0] * b[0][j] + a[i][1] * b[1][j] + a[i][2] * b[2][j];
            }
        }
        Homography { data: c }
    }

    /// Project a point through the homography.
    pub fn project(&self, p: Point2) -> Point2 {
        let h = &self.data;
        let xx = h[0][0] * p[0] + h[0][1] * p[1] + h[0][2];
        let yy = h[1][0] * p[0] + h[1][1] * p[1] + h[1][2];
        let zz = h[2][0] * p[0] + h[2][1] * p[1] + h[2][2];
        [xx / zz, yy / zz]
    }

    /// Compute the inverse homography.
    pub fn inverse(&self) -> Option<Self> {
        let m = &self.data;
        let det = m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
            - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
            + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0]);

        if det.abs() < 1e-12 {
            return None;
        }

        let inv_det = 1.0 / det;
        let mut inv = [[0.0f64; 3]; 3];

        inv[0][0] = (m[1][1] * m[2][2] - m[1][2] * m[2][1]) * inv_det;
        inv[0][1] = (m[0][2] * m[2][1] - m[0][1] * m[2][2]) * inv_det;
        inv[0][2] = (m[0][1] * m[1][2] - m[0][2] * m[1][1]) * inv_det;
        inv[1][0] = (m[1][2] * m[2][0] - m[1][0] * m[2][2]) * inv_det;
        inv[1][1] = (m[0][0] * m[2][2] - m[0][2] * m[2][0]) * inv_det;
        inv[1][2] = (m[0][2] * m[1][0] - m[0][0] * m[1][2]) * inv_det;
        inv[2][0] = (m[1][0] * m[2][1] - m[1][1] * m[2][0]) * inv_det;
        inv[2][1] = (m[0][1] * m[2][0] - m[0][0] * m[2][1]) * inv_det;
        inv[2][2] = (m[0][0] * m[1][1] - m[0][1] * m[1][0]) * inv_det;

        Some(Homography { data: inv })
    }

    /// Root-mean-square transfer error of `src[i] -> dst[i]`.
    pub fn rms_error(&self, src: &[Point2], dst: &[Point2]) -> f64 {
        let n = src.len().min(dst.len());
        if n == 0 {
            return 0.0;
        }
        let sum: f64 = src
            .iter()
            .zip(dst)
            .map(|(&s, d)| {
                let p = self.project(s);
                (p[0] - d[0]).powi(2) + (p[1] - d[1]).powi(2)
            })
            .sum();
        (sum / n as f64).sqrt()
    }

    /// Levenberg-Marquardt refinement of the transfer error, `h[2][2]` fixed to 1.
    pub fn refine(&self, src: &[Point2], dst: &[Point2], max_iterations: u32) -> Homography {
        let Some(mut best) = self.normalized() else {
            return *self;
        };
        let mut best_err = best.rms_error(src, dst);
        let mut lambda = 1e-3;

        for _ in 0..max_iterations {
            if best_err < 1e-12 {
                break;
            }
            let h = &best.data;
            let mut jtj = [[0.0f64; 8]; 8];
            let mut jtr = [0.0f64; 8];
            for (&s, d) in src.iter().zip(dst) {
                let (x, y) = (s[0], s[1]);
                let w = h[2][0] * x + h[2][1] * y + 1.0;
                if w.abs() < 1e-12 {
                    continue;
                }
                let u = (h[0][0] * x + h[0][1] * y + h[0][2]) / w;
                let v = (h[1][0] * x + h[1][1] * y + h[1][2]) / w;
                let ju = [x / w, y / w, 1.0 / w, 0.0, 0.0, 0.0, -u * x / w, -u * y / w];
                let jv = [0.0, 0.0, 0.0, x / w, y / w, 1.0 / w, -v * x / w, -v * y / w];
                let (ru, rv) = (d[0] - u, d[1] - v);
                for r in 0..8 {
                    jtr[r] += ju[r] * ru + jv[r] * rv;
                    for c in 0..8 {
                        jtj[r][c] += ju[r] * ju[c] + jv[r] * jv[c];
                    }
                }
            }

            let mut damped = jtj;
            for (i, row) in damped.iter_mut().enumerate() {
                row[i] += lambda * jtj[i][i].max(1e-12);
            }
            let Some(delta) = linalg::solve(damped, jtr) else {
                break;
            };

            let mut data = best.data;
            for (k, dk) in delta.iter().enumerate() {
                data[k / 3][k % 3] += dk;
            }
            let candidate = Homography { data };
            let err = candidate.rms_error(src, dst);
            if err < best_err {
                let gain = best_err - err;
                best = candidate;
                best_err = err;
                lambda = (lambda * 0.1).max(1e-9);
                if gain < 1e-10 {
                    break;
                }
            } else {
                lambda *= 10.0;
                if lambda > 1e6 {
                    break;
                }
            }
        }

        best
    }
}

/// Similarity transform moving the centroid to the origin and scaling the
/// mean distance to sqrt(2). `None` when all points coincide.
fn normalizer(points: &[Point2]) -> Option<Homography> {
    let n = points.len() as f64;
    let cx = points.iter().map(|p| p[0]).sum::<f64>() / n;
    let cy = points.iter().map(|p| p[1]).sum::<f64>() / n;
    let mean_dist = points
        .iter()
        .map(|p| ((p[0] - cx).powi(2) + (p[1] - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    if mean_dist < 1e-12 {
        return None;
    }
    let s = std::f64::consts::SQRT_2 / mean_dist;
    Some(Homography {
        data: [[s, 0.0, -s * cx], [0.0, s, -s * cy], [0.0, 0.0, 1.0]],
    })
}
