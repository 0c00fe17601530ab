use crate::types::Point2;

/// Shoelace area. Positive when the polygon runs clockwise on screen (y down).
pub fn signed_area(poly: &[Point2]) -> f64 {
    let n = poly.len();
    if n < 3 {
        return 0.0;
    }
    let mut sum = 0.0;
    for i in 0..n {
        let p = poly[i];
        let q = poly[(i + 1) % n];
        sum += p[0] * q[1] - q[0] * p[1];
    }
    0.5 * sum
}

/// Reverse the polygon if needed so that it runs clockwise on screen.
/// Returns true if it was reversed.
pub fn ensure_clockwise(poly: &mut [Point2]) -> bool {
    if signed_area(poly) < 0.0 {
        poly.reverse();
        true
    } else {
        false
    }
}

/// Length of the closed polygon outline.
pub fn perimeter(poly: &[Point2]) -> f64 {
    let n = poly.len();
    (0..n).map(|i| dist(poly[i], poly[(i + 1) % n])).sum()
}

/// True if all turns have the same direction.
pub fn is_convex(poly: &[Point2]) -> bool {
    let n = poly.len();
    if n < 3 {
        return false;
    }
    let mut sign = 0.0f64;
    for i in 0..n {
        let a = poly[i];
        let b = poly[(i + 1) % n];
        let c = poly[(i + 2) % n];
        let cross = (b[0] - a[0]) * (c[1] - b[1]) - (b[1] - a[1]) * (c[0] - b[0]);
        if cross.abs() < 1e-9 {
            continue;
        }
        if sign == 0.0 {
            sign = cross.signum();
        } else if cross.signum() != sign {
            return false;
        }
    }
    sign != 0.0
}

/// Axis-aligned bounds as `(min, max)`.
pub fn bounds(points: &[Point2]) -> (Point2, Point2) {
    let mut lo = [f64::MAX, f64::MAX];
    let mut hi = [f64::MIN, f64::MIN];
    for p in points {
        lo[0] = lo[0].min(p[0]);
        lo[1] = lo[1].min(p[1]);
        hi[0] = hi[0].max(p[0]);
        hi[1] = hi[1].max(p[1]);
    }
    (lo, hi)
}

pub fn dist(a: Point2, b: Point2) -> f64 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt()
}

/// Distance from `p` to the infinite line through `a` and `b`.
pub fn point_line_distance(p: Point2, a: Point2, b: Point2) -> f64 {
    let dx = b[0] - a[0];
    let dy = b[1] - a[1];
    let len = (dx * dx + dy * dy).sqrt();
    if len < 1e-12 {
        return dist(p, a);
    }
    ((p[0] - a[0]) * dy - (p[1] - a[1]) * dx).abs() / len
}

/// Douglas-Peucker simplification of a closed curve.
///
/// The curve is split at two mutually distant anchor points, each half is
/// simplified, and finally vertices lying within `epsilon` of the line
/// through their neighbours are dropped.
pub fn approx_closed(points: &[Point2], epsilon: f64) -> Vec<Point2> {
    let n = points.len();
    if n < 3 {
        return points.to_vec();
    }

    let farthest = |from: usize| -> usize {
        let origin = points[from];
        (0..n)
            .max_by(|&a, &b| dist(origin, points[a]).total_cmp(&dist(origin, points[b])))
            .unwrap_or(from)
    };
    let mut a = 0;
    let mut b = farthest(a);
    for _ in 0..2 {
        a = b;
        b = farthest(a);
    }
    if a == b {
        return vec![points[a]];
    }

    let (lo, hi) = (a.min(b), a.max(b));
    let mut keep = vec![false; n];
    keep[lo] = true;
    keep[hi] = true;

    let mut stack = vec![(lo, hi), (hi, lo + n)];
    while let Some((s, e)) = stack.pop() {
        if e <= s + 1 {
            continue;
        }
        let ps = points[s % n];
        let pe = points[e % n];
        let mut best = s;
        let mut best_d = 0.0;
        for i in s + 1..e {
            let d = point_line_distance(points[i % n], ps, pe);
            if d > best_d {
                best_d = d;
                best = i;
            }
        }
        if best_d > epsilon {
            keep[best % n] = true;
            stack.push((s, best));
            stack.push((best, e));
        }
    }

    let mut poly: Vec<Point2> = (0..n).filter(|&i| keep[i]).map(|i| points[i]).collect();
    prune_collinear(&mut poly, epsilon);
    poly
}

fn prune_collinear(poly: &mut Vec<Point2>, epsilon: f64) {
    let mut changed = true;
    while changed && poly.len() > 3 {
        changed = false;
        let n = poly.len();
        let mut weakest = None;
        let mut weakest_d = epsilon;
        for i in 0..n {
            let d = point_line_distance(poly[i], poly[(i + n - 1) % n], poly[(i + 1) % n]);
            if d < weakest_d {
                weakest_d = d;
                weakest = Some(i);
            }
        }
        if let Some(i) = weakest {
            poly.remove(i);
            changed = true;
        }
    }
}

/// Convex hull (monotone chain), clockwise on screen.
pub fn convex_hull(points: &[Point2]) -> Vec<Point2> {
    let mut pts = points.to_vec();
    pts.sort_by(|a, b| a[0].total_cmp(&b[0]).then(a[1].total_cmp(&b[1])));
    pts.dedup();
    if pts.len() < 3 {
        return pts;
    }

    let cross = |o: Point2, a: Point2, b: Point2| {
        (a[0] - o[0]) * (b[1] - o[1]) - (a[1] - o[1]) * (b[0] - o[0])
    };

    let mut hull: Vec<Point2> = Vec::with_capacity(pts.len() * 2);
    for &p in &pts {
        while hull.len() >= 2 && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0 {
            hull.pop();
        }
        hull.push(p);
    }
    let lower_len = hull.len() + 1;
    for &p in pts.iter().rev().skip(1) {
        while hull.len() >= lower_len && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0
        {
            hull.pop();
        }
        hull.push(p);
    }
    hull.pop();
    ensure_clockwise(&mut hull);
    hull
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_outline(x0: f64, y0: f64, side: usize) -> Vec<Point2> {
        // Pixel-centre outline, traced clockwise on screen.
        let mut pts = Vec::new();
        for i in 0..side {
            pts.push([x0 + i as f64, y0]);
        }
        for i in 1..side {
            pts.push([x0 + (side - 1) as f64, y0 + i as f64]);
        }
        for i in (0..side - 1).rev() {
            pts.push([x0 + i as f64, y0 + (side - 1) as f64]);
        }
        for i in (1..side - 1).rev() {
            pts.push([x0, y0 + i as f64]);
        }
        pts
    }

    #[test]
    fn signed_area_sign_follows_orientation() {
        let mut sq = vec![[0.0, 0.0], [2.0, 0.0], [2.0, 2.0], [0.0, 2.0]];
        assert!((signed_area(&sq) - 4.0).abs() < 1e-12);
        sq.reverse();
        assert!(signed_area(&sq) < 0.0);
        assert!(ensure_clockwise(&mut sq));
        assert!(signed_area(&sq) > 0.0);
    }

    #[test]
    fn approx_closed_recovers_square_corners() {
        let outline = square_outline(10.0, 20.0, 30);
        let poly = approx_closed(&outline, 2.0);
        assert_eq!(poly.len(), 4, "{poly:?}");
        for corner in [[10.0, 20.0], [39.0, 20.0], [39.0, 49.0], [10.0, 49.0]] {
            assert!(poly.contains(&corner), "missing {corner:?} in {poly:?}");
        }
    }

    #[test]
    fn approx_closed_starting_mid_edge() {
        let mut outline = square_outline(0.0, 0.0, 21);
        outline.rotate_left(7);
        let poly = approx_closed(&outline, 1.5);
        assert_eq!(poly.len(), 4, "{poly:?}");
    }

    #[test]
    fn convexity() {
        let square = [[0.0, 0.0], [4.0, 0.0], [4.0, 4.0], [0.0, 4.0]];
        assert!(is_convex(&square));
        let dart = [[0.0, 0.0], [4.0, 2.0], [0.0, 4.0], [1.0, 2.0]];
        assert!(!is_convex(&dart));
    }

    #[test]
    fn convex_hull_drops_interior_points() {
        let pts = [
            [0.0, 0.0],
            [2.0, 1.0],
            [4.0, 0.0],
            [4.0, 4.0],
            [1.0, 2.0],
            [0.0, 4.0],
        ];
        let hull = convex_hull(&pts);
        assert_eq!(hull.len(), 4);
        assert!(signed_area(&hull) > 0.0);
        assert!((signed_area(&hull) - 16.0).abs() < 1e-12);
    }

    #[test]
    fn point_line_distance_perpendicular() {
        let d = point_line_distance([1.0, 3.0], [0.0, 0.0], [5.0, 0.0]);
        assert!((d - 3.0).abs() < 1e-12);
        assert!((perimeter(&[[0.0, 0.0], [3.0, 0.0], [3.0, 4.0]]) - 12.0).abs() < 1e-12);
    }
}
