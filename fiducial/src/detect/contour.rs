use super::image::ImageU8;

/// Neighbour offsets `(dx, dy)`, counter-clockwise on screen starting east.
const NEIGHBORHOOD: [[i32; 2]; 8] = [
    [1, 0],
    [1, -1],
    [0, -1],
    [-1, -1],
    [-1, 0],
    [-1, 1],
    [0, 1],
    [1, 1],
];

/// One traced border of a binary mask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contour {
    /// Boundary pixels `[x, y]` in tracing order.
    pub points: Vec<[i32; 2]>,
    /// True if this border surrounds a hole in a foreground blob.
    pub hole: bool,
    /// Index of the enclosing border, `None` for borders touching the background frame.
    pub parent: Option<usize>,
}

/// Trace all borders of the non-zero pixels of `mask` (8-connectivity),
/// following Suzuki & Abe (1985).
///
/// Outer borders of blobs nested in a hole have that hole as parent, and
/// holes have their blob's outer border as parent.
pub fn find_contours(mask: &ImageU8) -> Vec<Contour> {
    let w = mask.width as usize + 2;
    let h = mask.height as usize + 2;
    let mut labels = vec![0i32; w * h];
    for y in 0..mask.height {
        for x in 0..mask.width {
            if mask.get(x, y) != 0 {
                labels[(y as usize + 1) * w + x as usize + 1] = 1;
            }
        }
    }
    let deltas = neighborhood_deltas(w as isize);

    let mut contours: Vec<Contour> = Vec::new();
    for y in 1..h - 1 {
        let mut last_border = 1i32;
        for x in 1..w - 1 {
            let pos = y * w + x;
            let v = labels[pos];
            if v == 0 {
                continue;
            }

            let start = if v == 1 && labels[pos - 1] == 0 {
                Some(false)
            } else if v >= 1 && labels[pos + 1] == 0 {
                if v > 1 {
                    last_border = v;
                }
                Some(true)
            } else {
                None
            };

            if let Some(hole) = start {
                let nbd = contours.len() as i32 + 2;
                let parent = if last_border < 2 {
                    None
                } else {
                    let idx = (last_border - 2) as usize;
                    if contours[idx].hole != hole {
                        Some(idx)
                    } else {
                        contours[idx].parent
                    }
                };
                let origin = [x as i32 - 1, y as i32 - 1];
                let points = follow_border(&mut labels, pos, nbd, origin, hole, &deltas);
                contours.push(Contour {
                    points,
                    hole,
                    parent,
                });
            }

            let v = labels[pos];
            if v != 1 {
                last_border = v.abs();
            }
        }
    }

    contours
}

/// Flat index offsets of the 8 neighbours, repeated twice for wrap-free scans.
fn neighborhood_deltas(width: isize) -> [isize; 16] {
    let mut deltas = [0isize; 16];
    for (i, n) in NEIGHBORHOOD.iter().enumerate() {
        let delta = n[0] as isize + n[1] as isize * width;
        deltas[i] = delta;
        deltas[i + 8] = delta;
    }
    deltas
}

#[inline]
fn step(pos: usize, delta: isize) -> usize {
    (pos as isize + delta) as usize
}

/// Follow one border starting at `pos`, labelling visited pixels with `nbd`
/// (or `-nbd` where the pixel's east neighbour is background).
fn follow_border(
    labels: &mut [i32],
    pos: usize,
    nbd: i32,
    mut point: [i32; 2],
    hole: bool,
    deltas: &[isize; 16],
) -> Vec<[i32; 2]> {
    let mut points = Vec::new();

    // Clockwise search from the background neighbour for the first foreground pixel.
    let start_dir: usize = if hole { 0 } else { 4 };
    let mut s = start_dir;
    let mut pos1;
    loop {
        s = (s + 7) & 7;
        pos1 = step(pos, deltas[s]);
        if labels[pos1] != 0 || s == start_dir {
            break;
        }
    }

    if s == start_dir {
        // Isolated pixel.
        labels[pos] = -nbd;
        points.push(point);
        return points;
    }

    let mut pos3 = pos;
    loop {
        let s_end = s;
        let mut pos4;
        loop {
            s = (s + 1) & 15;
            pos4 = step(pos3, deltas[s]);
            if labels[pos4] != 0 {
                break;
            }
        }
        s &= 7;

        // East neighbour was examined and is background.
        if s.wrapping_sub(1) < s_end {
            labels[pos3] = -nbd;
        } else if labels[pos3] == 1 {
            labels[pos3] = nbd;
        }

        points.push(point);
        point[0] += NEIGHBORHOOD[s][0];
        point[1] += NEIGHBORHOOD[s][1];

        if pos4 == pos && pos3 == pos1 {
            break;
        }

        pos3 = pos4;
        s = (s + 4) & 7;
    }

    points
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(mask: &mut ImageU8, x0: u32, y0: u32, x1: u32, y1: u32, v: u8) {
        for y in y0..y1 {
            for x in x0..x1 {
                mask.set(x, y, v);
            }
        }
    }

    #[test]
    fn empty_mask_has_no_contours() {
        assert!(find_contours(&ImageU8::new(16, 16)).is_empty());
    }

    #[test]
    fn filled_square_has_one_outer_border() {
        let mut mask = ImageU8::new(12, 12);
        fill(&mut mask, 2, 3, 7, 8, 255);
        let contours = find_contours(&mask);
        assert_eq!(contours.len(), 1);
        let c = &contours[0];
        assert!(!c.hole);
        assert_eq!(c.parent, None);
        assert_eq!(c.points.len(), 16);
        assert_eq!(c.points[0], [2, 3]);
        for p in &c.points {
            assert!(p[0] == 2 || p[0] == 6 || p[1] == 3 || p[1] == 7, "{p:?}");
        }
    }

    #[test]
    fn isolated_pixel_is_single_point_contour() {
        let mut mask = ImageU8::new(5, 5);
        mask.set(2, 2, 255);
        let contours = find_contours(&mask);
        assert_eq!(contours.len(), 1);
        assert_eq!(contours[0].points, vec![[2, 2]]);
    }

    #[test]
    fn ring_with_nested_blob_builds_hierarchy() {
        let mut mask = ImageU8::new(30, 30);
        fill(&mut mask, 2, 2, 28, 28, 255);
        fill(&mut mask, 6, 6, 24, 24, 0);
        fill(&mut mask, 10, 10, 14, 14, 255);
        fill(&mut mask, 17, 17, 20, 20, 255);

        let contours = find_contours(&mask);
        assert_eq!(contours.len(), 4, "{contours:?}");

        let outer = contours
            .iter()
            .position(|c| !c.hole && c.parent.is_none())
            .unwrap();
        let hole = contours.iter().position(|c| c.hole).unwrap();
        assert_eq!(contours[hole].parent, Some(outer));

        let nested: Vec<_> = contours
            .iter()
            .filter(|c| !c.hole && c.parent == Some(hole))
            .collect();
        assert_eq!(nested.len(), 2);
    }

    #[test]
    fn blob_touching_image_edge_is_traced() {
        let mut mask = ImageU8::new(8, 8);
        fill(&mut mask, 0, 0, 4, 4, 255);
        let contours = find_contours(&mask);
        assert_eq!(contours.len(), 1);
        assert!(contours[0].points.contains(&[0, 0]));
        assert!(contours[0].points.contains(&[3, 3]));
    }
}
