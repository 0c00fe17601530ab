use crate::family::FamilyId;
use crate::types::{Fiducial, Point2};

use super::polygon::convex_hull;

/// Resolve conflicting decodes, keeping the best of each conflict.
///
/// Two fiducials conflict if their outlines overlap with positive area
/// (separating axis theorem on convex hulls), whatever their families and
/// ids, or if they share family, id and polarity anywhere in the frame.
/// `rank` orders families for ties in confidence, lower first.
pub fn deduplicate(fiducials: &mut Vec<Fiducial>, rank: impl Fn(FamilyId) -> usize) {
    let mut hulls: Vec<Vec<Point2>> = fiducials.iter().map(|f| convex_hull(&f.corners)).collect();

    let mut i = 0;
    while i < fiducials.len() {
        let mut j = i + 1;
        while j < fiducials.len() {
            let (a, b) = (&fiducials[i], &fiducials[j]);
            let same_marker = a.family == b.family && a.id == b.id && a.inverted == b.inverted;
            if same_marker || polygons_overlap(&hulls[i], &hulls[j]) {
                if is_better(&fiducials[j], &fiducials[i], &rank) {
                    fiducials.swap(i, j);
                    hulls.swap(i, j);
                }
                fiducials.swap_remove(j);
                hulls.swap_remove(j);
                // The winner may now conflict with earlier candidates.
                j = i + 1;
            } else {
                j += 1;
            }
        }
        i += 1;
    }
}

/// Return true if `a` should be kept over `b`.
fn is_better(a: &Fiducial, b: &Fiducial, rank: &impl Fn(FamilyId) -> usize) -> bool {
    if (a.confidence - b.confidence).abs() > 1e-9 {
        return a.confidence > b.confidence;
    }
    let (ra, rb) = (rank(a.family), rank(b.family));
    if ra != rb {
        return ra < rb;
    }
    // Deterministic tiebreaker: lexicographic comparison of corners
    for (ca, cb) in a.corners.iter().zip(&b.corners) {
        for k in 0..2 {
            if (ca[k] - cb[k]).abs() > 1e-10 {
                return ca[k] < cb[k];
            }
        }
    }
    false
}

/// Test if two convex polygons overlap with positive area using the
/// separating axis theorem. Polygons that only touch do not overlap.
fn polygons_overlap(p: &[Point2], q: &[Point2]) -> bool {
    if p.len() < 3 || q.len() < 3 {
        return false;
    }
    for poly in [p, q] {
        for i in 0..poly.len() {
            let j = (i + 1) % poly.len();
            let nx = -(poly[j][1] - poly[i][1]);
            let ny = poly[j][0] - poly[i][0];

            let (p_min, p_max) = project_polygon(p, nx, ny);
            let (q_min, q_max) = project_polygon(q, nx, ny);
            if p_max <= q_min || q_max <= p_min {
                return false;
            }
        }
    }
    true
}

/// Project a polygon onto an axis and return (min, max) projections.
fn project_polygon(poly: &[Point2], nx: f64, ny: f64) -> (f64, f64) {
    poly.iter()
        .map(|pt| pt[0] * nx + pt[1] * ny)
        .fold((f64::MAX, f64::MIN), |(lo, hi), d| (lo.min(d), hi.max(d)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x: f64, y: f64, side: f64) -> Vec<Point2> {
        vec![[x, y], [x + side, y], [x + side, y + side], [x, y + side]]
    }

    fn make(family: FamilyId, id: u32, confidence: f64, corners: Vec<Point2>) -> Fiducial {
        Fiducial::new(id, family, corners, confidence)
    }

    fn by_registration(f: FamilyId) -> usize {
        FamilyId::ALL.iter().position(|&g| g == f).unwrap_or(usize::MAX)
    }

    #[test]
    fn polygons_overlap_cases() {
        let p = square(0.0, 0.0, 10.0);
        assert!(polygons_overlap(&p, &p));
        assert!(polygons_overlap(&p, &square(5.0, 5.0, 10.0)));
        assert!(!polygons_overlap(&p, &square(20.0, 0.0, 10.0)));
        // Shared edge and shared corner.
        assert!(!polygons_overlap(&p, &square(10.0, 0.0, 10.0)));
        assert!(!polygons_overlap(&p, &square(10.0, 10.0, 10.0)));

        let hexagon = convex_hull(&[
            [0.0, 5.0], [3.0, 0.0], [9.0, 0.0], [12.0, 5.0], [9.0, 10.0], [3.0, 10.0],
        ]);
        // Inside the bounding box of the hexagon but beyond its slanted edge.
        assert!(!polygons_overlap(&hexagon, &square(0.0, 0.0, 1.0)));
        assert!(polygons_overlap(&hexagon, &square(5.0, 4.0, 1.0)));
    }

    #[test]
    fn overlapping_same_id_keeps_higher_confidence() {
        let mut fs = vec![
            make(FamilyId::Bch, 42, 0.8, square(0.0, 0.0, 10.0)),
            make(FamilyId::Bch, 42, 1.0, square(1.0, 1.0, 10.0)),
        ];
        deduplicate(&mut fs, by_registration);
        assert_eq!(fs.len(), 1);
        assert_eq!(fs[0].confidence, 1.0);
    }

    #[test]
    fn overlapping_conflicting_ids_keep_one() {
        let mut fs = vec![
            make(FamilyId::ForQuads, 3, 0.9, square(0.0, 0.0, 10.0)),
            make(FamilyId::Bch, 7, 0.95, square(0.0, 0.0, 10.0)),
            make(FamilyId::Icl1, 1294, 1.0, square(50.0, 0.0, 10.0)),
        ];
        deduplicate(&mut fs, by_registration);
        let mut kept: Vec<_> = fs.iter().map(|f| (f.family, f.id)).collect();
        kept.sort();
        assert_eq!(kept, vec![(FamilyId::Bch, 7), (FamilyId::Icl1, 1294)]);
    }

    #[test]
    fn confidence_tie_goes_to_family_rank() {
        let mut fs = vec![
            make(FamilyId::Icl1, 1294, 1.0, square(0.0, 0.0, 10.0)),
            make(FamilyId::Bch, 5, 1.0, square(0.0, 0.0, 10.0)),
        ];
        deduplicate(&mut fs, by_registration);
        assert_eq!(fs[0].family, FamilyId::Bch);

        let mut fs = vec![
            make(FamilyId::Bch, 5, 1.0, square(0.0, 0.0, 10.0)),
            make(FamilyId::Icl1, 1294, 1.0, square(0.0, 0.0, 10.0)),
        ];
        deduplicate(&mut fs, |f| if f == FamilyId::Icl1 { 0 } else { 1 });
        assert_eq!(fs[0].family, FamilyId::Icl1);
    }

    #[test]
    fn lexicographic_tiebreaker() {
        let a = make(FamilyId::Bch, 1, 1.0, square(0.0, 0.0, 10.0));
        let b = make(FamilyId::Bch, 1, 1.0, square(1.0, 0.0, 10.0));
        assert!(is_better(&a, &b, &by_registration));
        assert!(!is_better(&b, &a, &by_registration));
        assert!(!is_better(&a, &a, &by_registration));
    }

    #[test]
    fn ids_are_unique_per_family_across_the_frame() {
        let mut fs = vec![
            make(FamilyId::Bch, 42, 0.9, square(0.0, 0.0, 10.0)),
            make(FamilyId::Bch, 42, 0.95, square(100.0, 0.0, 10.0)),
            make(FamilyId::ForQuads, 42, 1.0, square(200.0, 0.0, 10.0)),
        ];
        deduplicate(&mut fs, by_registration);
        assert_eq!(fs.len(), 2);
        let bch = fs.iter().find(|f| f.family == FamilyId::Bch).unwrap();
        assert_eq!(bch.confidence, 0.95);
    }

    #[test]
    fn adjacent_markers_sharing_an_edge_survive() {
        let mut fs = vec![
            make(FamilyId::Bch, 1, 1.0, square(0.0, 0.0, 10.0)),
            make(FamilyId::Bch, 2, 0.9, square(10.0, 0.0, 10.0)),
        ];
        deduplicate(&mut fs, by_registration);
        assert_eq!(fs.len(), 2);
    }

    #[test]
    fn inverted_marker_does_not_collide_with_its_dark_twin() {
        let mut fs = vec![
            make(FamilyId::Bch, 42, 1.0, square(0.0, 0.0, 10.0)),
            make(FamilyId::Bch, 42, 1.0, square(100.0, 0.0, 10.0)).with_inverted(true),
        ];
        deduplicate(&mut fs, by_registration);
        assert_eq!(fs.len(), 2);
    }

    #[test]
    fn separate_markers_survive() {
        let mut fs = vec![
            make(FamilyId::Bch, 1, 1.0, square(0.0, 0.0, 10.0)),
            make(FamilyId::Bch, 2, 1.0, square(20.0, 20.0, 10.0)),
        ];
        deduplicate(&mut fs, by_registration);
        assert_eq!(fs.len(), 2);
    }
}
