/// Rotate a packed `dim`×`dim` code to how it reads once the quad's corner
/// order advances by one position.
///
/// Cell `(x, y)` of the result is cell `(dim - 1 - y, x)` of the input.
pub fn rotate90(code: u64, dim: usize) -> u64 {
    let mut out = 0u64;
    for y in 0..dim {
        for x in 0..dim {
            if (code >> (x * dim + dim - 1 - y)) & 1 == 1 {
                out |= 1 << (y * dim + x);
            }
        }
    }
    out
}

/// Same rotation as [`rotate90`] for an unpacked grid.
pub fn rotate_grid<T: Copy>(cells: &[T], dim: usize) -> Vec<T> {
    debug_assert_eq!(cells.len(), dim * dim);
    let mut out = Vec::with_capacity(dim * dim);
    for y in 0..dim {
        for x in 0..dim {
            out.push(cells[x * dim + dim - 1 - y]);
        }
    }
    out
}

/// All four rotations of a packed code, index = number of corner advances.
pub fn rotations(code: u64, dim: usize) -> [u64; 4] {
    let r1 = rotate90(code, dim);
    let r2 = rotate90(r1, dim);
    let r3 = rotate90(r2, dim);
    [code, r1, r2, r3]
}

/// Pack a row-major boolean grid into a `u64`, cell `(x, y)` at bit `y * dim + x`.
pub fn pack(cells: &[bool]) -> u64 {
    debug_assert!(cells.len() <= 64);
    cells
        .iter()
        .enumerate()
        .fold(0u64, |acc, (i, &b)| if b { acc | (1 << i) } else { acc })
}

/// Compute the Hamming distance between two code words.
pub fn hamming_distance(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotate90_four_times_returns_original() {
        let code: u64 = 0xd7e00984b;
        let mut v = code;
        for _ in 0..4 {
            v = rotate90(v, 6);
        }
        assert_eq!(v, code);
    }

    #[test]
    fn rotate90_moves_top_right_to_top_left() {
        // Only cell (dim-1, 0) set: after advancing the corners it is the new origin.
        let dim = 4;
        let code = 1u64 << (dim - 1);
        assert_eq!(rotate90(code, dim), 1);
    }

    #[test]
    fn rotate_grid_matches_packed_rotation() {
        let code: u64 = 0b1011_0010_0110_1101;
        let cells: Vec<bool> = (0..16).map(|i| (code >> i) & 1 == 1).collect();
        let rotated = rotate_grid(&cells, 4);
        assert_eq!(pack(&rotated), rotate90(code, 4));
    }

    #[test]
    fn hamming_distance_counts_differing_bits() {
        assert_eq!(hamming_distance(0, 0), 0);
        assert_eq!(hamming_distance(0b1010, 0b0101), 4);
        assert_eq!(hamming_distance(0xFF, 0xF0), 4);
    }
}
