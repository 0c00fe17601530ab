use serde::{Deserialize, Serialize};

use crate::error::GeometryError;
use crate::types::{KeyPoint, Point2};

use super::homography::Homography;

/// Pinhole camera intrinsics in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CameraIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

/// Pose solving parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoseConfig {
    /// Without intrinsics only a planar homography is recovered.
    pub intrinsics: Option<CameraIntrinsics>,
    /// Run iterative reprojection-error refinement after the linear solve.
    pub refine: bool,
    pub max_iterations: u32,
    /// Drop fiducials whose pose cannot be solved instead of reporting them without pose.
    pub drop_on_failure: bool,
}

impl Default for PoseConfig {
    fn default() -> Self {
        Self {
            intrinsics: None,
            refine: true,
            max_iterations: 50,
            drop_on_failure: false,
        }
    }
}

/// A rigid transform camera <- marker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RigidPose {
    /// 3x3 rotation matrix (row-major).
    pub rotation: [[f64; 3]; 3],
    pub translation: [f64; 3],
}

/// Recovered marker transform.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Transform {
    /// Marker-local plane to image pixels.
    Homography(Homography),
    /// Marker frame to camera frame.
    Rigid(RigidPose),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoseEstimate {
    pub transform: Transform,
    /// RMS reprojection error in pixels.
    pub reprojection_error: f64,
}

/// Solves marker transforms from key point correspondences.
#[derive(Debug, Clone, Default)]
pub struct PoseEstimator {
    pub config: PoseConfig,
}

impl PoseEstimator {
    pub fn new(config: PoseConfig) -> Self {
        Self { config }
    }

    /// Solve a homography, or a rigid pose when intrinsics are configured.
    ///
    /// Marker positions are taken to lie on the plane z = 0.
    pub fn estimate(&self, key_points: &[KeyPoint]) -> Result<PoseEstimate, GeometryError> {
        let marker: Vec<Point2> = key_points.iter().map(|k| k.marker_pos).collect();
        let image: Vec<Point2> = key_points.iter().map(|k| k.image_pos).collect();

        if marker.len() >= 3 && (is_degenerate(&marker) || is_degenerate(&image)) {
            return Err(GeometryError::Collinear);
        }
        if marker.len() < 4 {
            return Err(GeometryError::TooFewPoints(marker.len()));
        }

        let mut h = Homography::fit(&marker, &image)?;
        if self.config.refine {
            h = h.refine(&marker, &image, self.config.max_iterations);
        }

        let Some(k) = self.config.intrinsics else {
            return Ok(PoseEstimate {
                reprojection_error: h.rms_error(&marker, &image),
                transform: Transform::Homography(h),
            });
        };

        let object: Vec<[f64; 3]> = marker.iter().map(|p| [p[0], p[1], 0.0]).collect();
        let rays: Vec<[f64; 3]> = image
            .iter()
            .map(|p| [(p[0] - k.cx) / k.fx, (p[1] - k.cy) / k.fy, 1.0])
            .collect();

        let initial = homography_to_pose(&h, &k).ok_or(GeometryError::Singular)?;
        let mut best = initial.clone();
        if self.config.refine {
            let iters = self.config.max_iterations;
            let (pose1, err1) = orthogonal_iteration(&rays, &object, &initial, iters);
            best = pose1.clone();
            if let Some((pose2, err2)) = second_minimum(&rays, &object, &pose1, iters) {
                if err2 < err1 {
                    best = pose2;
                }
            }
        }

        Ok(PoseEstimate {
            reprojection_error: reprojection_rms(&best, &k, &object, &image),
            transform: Transform::Rigid(best),
        })
    }
}

/// True when the points are coincident or (nearly) on one line.
fn is_degenerate(points: &[Point2]) -> bool {
    let n = points.len() as f64;
    let mx = points.iter().map(|p| p[0]).sum::<f64>() / n;
    let my = points.iter().map(|p| p[1]).sum::<f64>() / n;
    let (mut sxx, mut sxy, mut syy) = (0.0, 0.0, 0.0);
    for p in points {
        let (dx, dy) = (p[0] - mx, p[1] - my);
        sxx += dx * dx;
        sxy += dx * dy;
        syy += dy * dy;
    }
    let disc = ((sxx - syy).powi(2) + 4.0 * sxy * sxy).sqrt();
    let large = 0.5 * (sxx + syy + disc);
    let small = 0.5 * (sxx + syy - disc);
    large < 1e-12 || small / large < 1e-8
}

fn reprojection_rms(
    pose: &RigidPose,
    k: &CameraIntrinsics,
    object: &[[f64; 3]],
    image: &[Point2],
) -> f64 {
    let sum: f64 = object
        .iter()
        .zip(image)
        .map(|(p, q)| {
            let c = mat_vec(&pose.rotation, p);
            let z = c[2] + pose.translation[2];
            let u = k.fx * (c[0] + pose.translation[0]) / z + k.cx;
            let v = k.fy * (c[1] + pose.translation[1]) / z + k.cy;
            (u - q[0]).powi(2) + (v - q[1]).powi(2)
        })
        .sum();
    (sum / object.len().max(1) as f64).sqrt()
}

// ── 3x3 matrix helpers ──

fn mat_mul(a: &[[f64; 3]; 3], b: &[[f64; 3]; 3]) -> [[f64; 3]; 3] {
    let mut c = [[0.0; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            c[i][j] = a[i][0] * b[0][j] + a[i][1] * b[1][j] + a[i][2] * b[2][j];
        }
    }
    c
}

fn mat_vec(m: &[[f64; 3]; 3], v: &[f64; 3]) -> [f64; 3] {
    [
        m[0][0] * v[0] + m[0][1] * v[1] + m[0][2] * v[2],
        m[1][0] * v[0] + m[1][1] * v[1] + m[1][2] * v[2],
        m[2][0] * v[0] + m[2][1] * v[1] + m[2][2] * v[2],
    ]
}

fn mat_transpose(m: &[[f64; 3]; 3]) -> [[f64; 3]; 3] {
    [
        [m[0][0], m[1][0], m[2][0]],
        [m[0][1], m[1][1], m[2][1]],
        [m[0][2], m[1][2], m[2][2]],
    ]
}

fn mat_det(m: &[[f64; 3]; 3]) -> f64 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

fn vec_norm(v: &[f64; 3]) -> f64 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

fn cross(a: &[f64; 3], b: &[f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn outer(a: &[f64; 3], b: &[f64; 3]) -> [[f64; 3]; 3] {
    [
        [a[0] * b[0], a[0] * b[1], a[0] * b[2]],
        [a[1] * b[0], a[1] * b[1], a[1] * b[2]],
        [a[2] * b[0], a[2] * b[1], a[2] * b[2]],
    ]
}

fn dot(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

const IDENTITY: [[f64; 3]; 3] = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

/// SVD of a 3x3 matrix via Jacobi iteration on M^T M.
/// Returns (U, S, V) with S in decreasing order.
fn svd_3x3(m: &[[f64; 3]; 3]) -> ([[f64; 3]; 3], [f64; 3], [[f64; 3]; 3]) {
    let mut ata = mat_mul(&mat_transpose(m), m);
    let mut v = IDENTITY;

    for _ in 0..100 {
        let mut max_val = 0.0;
        let mut p = 0;
        let mut q = 1;
        for i in 0..3 {
            for j in (i + 1)..3 {
                if ata[i][j].abs() > max_val {
                    max_val = ata[i][j].abs();
                    p = i;
                    q = j;
                }
            }
        }
        if max_val < 1e-15 {
            break;
        }

        let theta = 0.5 * f64::atan2(2.0 * ata[p][q], ata[p][p] - ata[q][q]);
        let c = theta.cos();
        let s = theta.sin();

        let mut next = ata;
        for i in 0..3 {
            next[i][p] = c * ata[i][p] + s * ata[i][q];
            next[i][q] = -s * ata[i][p] + c * ata[i][q];
        }
        let tmp = next;
        for j in 0..3 {
            next[p][j] = c * tmp[p][j] + s * tmp[q][j];
            next[q][j] = -s * tmp[p][j] + c * tmp[q][j];
        }
        ata = next;

        let mut next_v = v;
        for i in 0..3 {
            next_v[i][p] = c * v[i][p] + s * v[i][q];
            next_v[i][q] = -s * v[i][p] + c * v[i][q];
        }
        v = next_v;
    }

    let eigenvalues = [ata[0][0], ata[1][1], ata[2][2]];
    let mut order = [0usize, 1, 2];
    order.sort_by(|&a, &b| eigenvalues[b].total_cmp(&eigenvalues[a]));
    let sigma = order.map(|i| eigenvalues[i].max(0.0).sqrt());

    let mut v_sorted = [[0.0; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            v_sorted[i][j] = v[i][order[j]];
        }
    }
    if mat_det(&v_sorted) < 0.0 {
        for row in v_sorted.iter_mut() {
            row[2] = -row[2];
        }
    }

    // U = M V S^-1, completing missing columns for rank-deficient input
    let mv = mat_mul(m, &v_sorted);
    let mut u = [[0.0f64; 3]; 3];
    for j in 0..3 {
        if sigma[j] > 1e-10 {
            for i in 0..3 {
                u[i][j] = mv[i][j] / sigma[j];
            }
        }
    }
    if sigma[2] < 1e-10 {
        let u0 = [u[0][0], u[1][0], u[2][0]];
        let mut u1 = [u[0][1], u[1][1], u[2][1]];
        if sigma[1] < 1e-10 {
            let perp = if u0[0].abs() < 0.9 {
                [1.0, 0.0, 0.0]
            } else {
                [0.0, 1.0, 0.0]
            };
            let raw = cross(&u0, &perp);
            let n1 = vec_norm(&raw);
            if n1 > 1e-10 {
                u1 = [raw[0] / n1, raw[1] / n1, raw[2] / n1];
                for i in 0..3 {
                    u[i][1] = u1[i];
                }
            }
        }
        let u2 = cross(&u0, &u1);
        for i in 0..3 {
            u[i][2] = u2[i];
        }
    }

    (u, sigma, v_sorted)
}

/// Closest rotation matrix: R = U V^T with the sign of the last singular direction fixed.
fn project_to_so3(m: &[[f64; 3]; 3]) -> [[f64; 3]; 3] {
    let (mut u, _s, v) = svd_3x3(m);
    let vt = mat_transpose(&v);
    let r = mat_mul(&u, &vt);
    if mat_det(&r) >= 0.0 {
        return r;
    }
    for row in u.iter_mut() {
        row[2] = -row[2];
    }
    mat_mul(&u, &vt)
}

/// Initial rigid pose from a marker-plane homography: columns of K^-1 H.
fn homography_to_pose(h: &Homography, k: &CameraIntrinsics) -> Option<RigidPose> {
    let hd = &h.data;
    let col = |j: usize| {
        [
            (hd[0][j] - k.cx * hd[2][j]) / k.fx,
            (hd[1][j] - k.cy * hd[2][j]) / k.fy,
            hd[2][j],
        ]
    };
    let (c0, c1, c2) = (col(0), col(1), col(2));

    let mut scale = (vec_norm(&c0) + vec_norm(&c1)) / 2.0;
    if scale < 1e-12 {
        return None;
    }
    // The marker must lie in front of the camera.
    if c2[2] < 0.0 {
        scale = -scale;
    }
    let r0 = c0.map(|v| v / scale);
    let r1 = c1.map(|v| v / scale);
    let r2 = cross(&r0, &r1);

    let raw = [
        [r0[0], r1[0], r2[0]],
        [r0[1], r1[1], r2[1]],
        [r0[2], r1[2], r2[2]],
    ];
    Some(RigidPose {
        rotation: project_to_so3(&raw),
        translation: c2.map(|v| v / scale),
    })
}

/// Orthogonal iteration (Lu, Hager & Mjolsness 2000) over any number of points.
fn orthogonal_iteration(
    rays: &[[f64; 3]],
    object: &[[f64; 3]],
    initial: &RigidPose,
    n_iters: u32,
) -> (RigidPose, f64) {
    let n = object.len() as f64;

    // Line-of-sight projection operators F[i] = v v' / (v' v)
    let f_ops: Vec<[[f64; 3]; 3]> = rays
        .iter()
        .map(|v| {
            let vv = dot(v, v);
            outer(v, v).map(|row| row.map(|x| x / vv))
        })
        .collect();

    let mut p_mean = [0.0; 3];
    for p in object {
        for j in 0..3 {
            p_mean[j] += p[j] / n;
        }
    }
    let p_res: Vec<[f64; 3]> = object
        .iter()
        .map(|p| [p[0] - p_mean[0], p[1] - p_mean[1], p[2] - p_mean[2]])
        .collect();

    // M1_inv = (I - mean(F))^-1
    let mut i_minus_fmean = IDENTITY;
    for f in &f_ops {
        for r in 0..3 {
            for c in 0..3 {
                i_minus_fmean[r][c] -= f[r][c] / n;
            }
        }
    }
    let m1_inv = mat_inv(&i_minus_fmean).unwrap_or(IDENTITY);

    let mut r = initial.rotation;
    let mut t = initial.translation;

    for _ in 0..n_iters {
        // t = M1_inv * mean((F[i] - I) R p[i])
        let mut m2 = [0.0f64; 3];
        for (f, p) in f_ops.iter().zip(object) {
            let rp = mat_vec(&r, p);
            let f_rp = mat_vec(f, &rp);
            for j in 0..3 {
                m2[j] += (f_rp[j] - rp[j]) / n;
            }
        }
        t = mat_vec(&m1_inv, &m2);

        // q[i] = F[i] (R p[i] + t)
        let q: Vec<[f64; 3]> = f_ops
            .iter()
            .zip(object)
            .map(|(f, p)| {
                let rp = mat_vec(&r, p);
                mat_vec(f, &[rp[0] + t[0], rp[1] + t[1], rp[2] + t[2]])
            })
            .collect();
        let mut q_mean = [0.0f64; 3];
        for qi in &q {
            for j in 0..3 {
                q_mean[j] += qi[j] / n;
            }
        }

        let mut m3 = [[0.0f64; 3]; 3];
        for (qi, pi) in q.iter().zip(&p_res) {
            let q_res = [qi[0] - q_mean[0], qi[1] - q_mean[1], qi[2] - q_mean[2]];
            let op = outer(&q_res, pi);
            for a in 0..3 {
                for b in 0..3 {
                    m3[a][b] += op[a][b];
                }
            }
        }
        r = project_to_so3(&m3);
    }

    let pose = RigidPose {
        rotation: r,
        translation: t,
    };
    let err = object_space_error(&f_ops, &pose, object);
    (pose, err)
}

fn mat_inv(m: &[[f64; 3]; 3]) -> Option<[[f64; 3]; 3]> {
    Homography { data: *m }.inverse().map(|h| h.data)
}

/// Sum of squared distances of the transformed points to their lines of sight.
fn object_space_error(f_ops: &[[[f64; 3]; 3]], pose: &RigidPose, object: &[[f64; 3]]) -> f64 {
    let mut err = 0.0;
    for (f, p) in f_ops.iter().zip(object) {
        let rp = mat_vec(&pose.rotation, p);
        let c = [
            rp[0] + pose.translation[0],
            rp[1] + pose.translation[1],
            rp[2] + pose.translation[2],
        ];
        let fc = mat_vec(f, &c);
        for j in 0..3 {
            err += (c[j] - fc[j]).powi(2);
        }
    }
    err
}

/// The ambiguous planar solution (Schweighofer & Pinz 2006): start from the
/// rotation reflected about the viewing direction.
fn second_minimum(
    rays: &[[f64; 3]],
    object: &[[f64; 3]],
    pose1: &RigidPose,
    n_iters: u32,
) -> Option<(RigidPose, f64)> {
    let t_norm = vec_norm(&pose1.translation);
    if t_norm < 1e-10 {
        return None;
    }
    let n = pose1.translation.map(|v| v / t_norm);

    let nn = outer(&n, &n);
    let mut reflect = [[0.0f64; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            reflect[i][j] = 2.0 * nn[i][j] - IDENTITY[i][j];
        }
    }
    let r2 = mat_mul(&reflect, &pose1.rotation);

    let diff = mat_mul(&mat_transpose(&pose1.rotation), &r2);
    let trace = diff[0][0] + diff[1][1] + diff[2][2];
    let angle = ((trace - 1.0) / 2.0).clamp(-1.0, 1.0).acos();
    if angle < 0.1 {
        return None;
    }

    let start = RigidPose {
        rotation: r2,
        translation: pose1.translation,
    };
    Some(orthogonal_iteration(rays, object, &start, n_iters))
}

#[cfg(test)]
mod tests {
    use super::*;

    const K: CameraIntrinsics = CameraIntrinsics {
        fx: 500.0,
        fy: 500.0,
        cx: 320.0,
        cy: 240.0,
    };

    fn square_key_points(side: f64, project: impl Fn([f64; 3]) -> Point2) -> Vec<KeyPoint> {
        let s = side / 2.0;
        [[-s, -s], [s, -s], [s, s], [-s, s]]
            .iter()
            .enumerate()
            .map(|(i, &m)| KeyPoint {
                image_pos: project([m[0], m[1], 0.0]),
                marker_pos: m,
                id: i as u32,
            })
            .collect()
    }

    fn pinhole(p: [f64; 3]) -> Point2 {
        [K.fx * p[0] / p[2] + K.cx, K.fy * p[1] / p[2] + K.cy]
    }

    fn rigid(estimate: &PoseEstimate) -> &RigidPose {
        match &estimate.transform {
            Transform::Rigid(p) => p,
            other => panic!("expected rigid pose, got {other:?}"),
        }
    }

    #[test]
    fn square_homography_has_tiny_reprojection_error() {
        let kps = square_key_points(1.0, |p| [200.0 + 100.0 * p[0], 150.0 + 100.0 * p[1]]);
        let est = PoseEstimator::default().estimate(&kps).unwrap();
        assert!(est.reprojection_error < 1e-6, "err={}", est.reprojection_error);
        match est.transform {
            Transform::Homography(h) => {
                let c = h.project([0.0, 0.0]);
                assert!((c[0] - 200.0).abs() < 1e-6 && (c[1] - 150.0).abs() < 1e-6);
            }
            other => panic!("expected homography, got {other:?}"),
        }
    }

    #[test]
    fn three_collinear_points_are_ill_conditioned() {
        let kps: Vec<KeyPoint> = (0..3)
            .map(|i| KeyPoint {
                image_pos: [i as f64 * 10.0, i as f64 * 5.0],
                marker_pos: [i as f64, 0.0],
                id: i,
            })
            .collect();
        assert_eq!(
            PoseEstimator::default().estimate(&kps).unwrap_err(),
            GeometryError::Collinear
        );
    }

    #[test]
    fn collinear_and_underdetermined_sets_fail() {
        let line: Vec<KeyPoint> = (0..5)
            .map(|i| KeyPoint {
                image_pos: [i as f64, 2.0 * i as f64],
                marker_pos: [i as f64, 0.0],
                id: i,
            })
            .collect();
        assert_eq!(
            PoseEstimator::default().estimate(&line).unwrap_err(),
            GeometryError::Collinear
        );

        let triangle = square_key_points(1.0, |p| [p[0] * 10.0, p[1] * 10.0]);
        assert_eq!(
            PoseEstimator::default().estimate(&triangle[..3]).unwrap_err(),
            GeometryError::TooFewPoints(3)
        );
    }

    #[test]
    fn frontal_marker_pose() {
        let z = 5.0;
        let kps = square_key_points(0.1, |p| pinhole([p[0], p[1], p[2] + z]));
        let estimator = PoseEstimator::new(PoseConfig {
            intrinsics: Some(K),
            ..PoseConfig::default()
        });
        let est = estimator.estimate(&kps).unwrap();
        let pose = rigid(&est);
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!(
                    (pose.rotation[i][j] - expected).abs() < 1e-3,
                    "R[{i}][{j}]={}",
                    pose.rotation[i][j]
                );
            }
        }
        assert!(pose.translation[0].abs() < 1e-6, "tx={}", pose.translation[0]);
        assert!((pose.translation[2] - z).abs() < 1e-3, "tz={}", pose.translation[2]);
        assert!(est.reprojection_error < 1e-3, "err={}", est.reprojection_error);
    }

    #[test]
    fn offset_marker_pose() {
        let (tx, z) = (1.0, 3.0);
        let kps = square_key_points(0.2, |p| pinhole([p[0] + tx, p[1], p[2] + z]));
        let estimator = PoseEstimator::new(PoseConfig {
            intrinsics: Some(K),
            ..PoseConfig::default()
        });
        let est = estimator.estimate(&kps).unwrap();
        let pose = rigid(&est);
        assert!((pose.translation[0] - tx).abs() < 1e-3, "tx={}", pose.translation[0]);
        assert!((pose.translation[2] - z).abs() < 1e-3, "tz={}", pose.translation[2]);
    }

    #[test]
    fn oblique_marker_pose() {
        let (angle, z) = (0.7f64, 3.0);
        let (ca, sa) = (angle.cos(), angle.sin());
        let kps = square_key_points(0.2, |p| {
            pinhole([ca * p[0] + sa * p[2], p[1], -sa * p[0] + ca * p[2] + z])
        });
        let estimator = PoseEstimator::new(PoseConfig {
            intrinsics: Some(K),
            ..PoseConfig::default()
        });
        let est = estimator.estimate(&kps).unwrap();
        let pose = rigid(&est);
        assert!(est.reprojection_error < 0.1, "err={}", est.reprojection_error);
        assert!((pose.translation[2] - z).abs() < 0.05, "tz={}", pose.translation[2]);
    }

    #[test]
    fn svd_reconstructs_matrix() {
        let m = [[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 10.0]];
        let (u, s, v) = svd_3x3(&m);
        assert!(s[0] >= s[1] && s[1] >= s[2]);
        let mut us = [[0.0; 3]; 3];
        for i in 0..3 {
            for j in 0..3 {
                us[i][j] = u[i][j] * s[j];
            }
        }
        let recon = mat_mul(&us, &mat_transpose(&v));
        for i in 0..3 {
            for j in 0..3 {
                assert!(
                    (recon[i][j] - m[i][j]).abs() < 1e-8,
                    "recon[{i}][{j}]={} vs m={}",
                    recon[i][j],
                    m[i][j],
                );
            }
        }
    }

    #[test]
    fn project_to_so3_negative_det() {
        let m = [[-1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
        let r = project_to_so3(&m);
        let rrt = mat_mul(&r, &mat_transpose(&r));
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((rrt[i][j] - expected).abs() < 1e-10, "R*R^T[{i}][{j}]={}", rrt[i][j]);
            }
        }
        assert!((mat_det(&r) - 1.0).abs() < 1e-10, "det={}", mat_det(&r));
    }
}
