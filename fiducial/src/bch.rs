use std::sync::OnceLock;

/// Number of bits in a shortened codeword.
pub const CODE_BITS: usize = 36;
/// Number of data bits, so ids are `0..4096`.
pub const DATA_BITS: usize = 12;
/// Number of parity bits.
pub const PARITY_BITS: usize = CODE_BITS - DATA_BITS;
/// Correction capacity of the code.
pub const MAX_CORRECTABLE: u32 = 4;

const FIELD_ORDER: usize = 63;
/// x^6 + x + 1
const PRIMITIVE_POLY: u32 = 0b100_0011;

/// A successfully decoded codeword.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BchDecoded {
    pub id: u32,
    pub corrected: u32,
}

/// Shared encoder/decoder tables.
///
/// The mother code is BCH(63, 39) over GF(2^6) with designed distance 9
/// (corrects 4 errors). Markers carry a shortened version: 12 data bits
/// followed by 24 parity bits, one per cell of a 6×6 grid. Codeword bit `i`
/// is coefficient `i` of the code polynomial; the data bits occupy
/// positions 24..36.
#[derive(Debug, Clone)]
pub struct BchCode {
    exp: [u8; FIELD_ORDER],
    log: [u8; FIELD_ORDER + 1],
    generator: u64,
}

/// The process-wide code tables, built on first use.
pub fn code() -> &'static BchCode {
    static CODE: OnceLock<BchCode> = OnceLock::new();
    CODE.get_or_init(BchCode::new)
}

impl BchCode {
    fn new() -> Self {
        let mut exp = [0u8; FIELD_ORDER];
        let mut log = [0u8; FIELD_ORDER + 1];
        let mut a: u32 = 1;
        for (i, e) in exp.iter_mut().enumerate() {
            *e = a as u8;
            log[a as usize] = i as u8;
            a <<= 1;
            if a & 0x40 != 0 {
                a ^= PRIMITIVE_POLY;
            }
        }

        let mut code = Self {
            exp,
            log,
            generator: 1,
        };

        // g(x) = lcm of the minimal polynomials of alpha^1 .. alpha^(2t)
        let mut covered = [false; FIELD_ORDER];
        let mut generator = 1u64;
        for root in 1..=(2 * MAX_CORRECTABLE as usize) {
            if covered[root] {
                continue;
            }
            let mut coset = Vec::new();
            let mut e = root;
            while !covered[e] {
                covered[e] = true;
                coset.push(e);
                e = (e * 2) % FIELD_ORDER;
            }
            generator = clmul(generator, code.minimal_poly(&coset));
        }
        code.generator = generator;
        code
    }

    /// Binary minimal polynomial whose roots are `alpha^e` for `e` in `coset`.
    fn minimal_poly(&self, coset: &[usize]) -> u64 {
        // Coefficients in GF(64), lowest degree first.
        let mut poly: Vec<u8> = vec![1];
        for &e in coset {
            let root = self.exp[e];
            let mut next = vec![0u8; poly.len() + 1];
            for (i, &c) in poly.iter().enumerate() {
                next[i + 1] ^= c;
                next[i] ^= self.mul(c, root);
            }
            poly = next;
        }
        poly.iter()
            .enumerate()
            .fold(0u64, |acc, (i, &c)| if c != 0 { acc | (1 << i) } else { acc })
    }

    #[inline]
    fn mul(&self, a: u8, b: u8) -> u8 {
        if a == 0 || b == 0 {
            return 0;
        }
        let s = self.log[a as usize] as usize + self.log[b as usize] as usize;
        self.exp[s % FIELD_ORDER]
    }

    #[inline]
    fn div(&self, a: u8, b: u8) -> u8 {
        if a == 0 {
            return 0;
        }
        let s = self.log[a as usize] as usize + FIELD_ORDER - self.log[b as usize] as usize;
        self.exp[s % FIELD_ORDER]
    }

    #[inline]
    fn alpha_pow(&self, e: usize) -> u8 {
        self.exp[e % FIELD_ORDER]
    }

    /// Generator polynomial as a bit mask (degree 24).
    pub fn generator(&self) -> u64 {
        self.generator
    }

    /// Systematic encoding of a 12-bit id. Returns `None` for ids beyond the data width.
    pub fn encode(&self, id: u32) -> Option<u64> {
        if id >= 1 << DATA_BITS {
            return None;
        }
        let shifted = (id as u64) << PARITY_BITS;
        Some(shifted | poly_mod(shifted, self.generator))
    }

    /// Correct up to [`MAX_CORRECTABLE`] errors in a received 36-bit word.
    ///
    /// Returns `None` when the word is not within correction distance of any
    /// codeword.
    pub fn decode(&self, received: u64) -> Option<BchDecoded> {
        let received = received & ((1u64 << CODE_BITS) - 1);
        let two_t = 2 * MAX_CORRECTABLE as usize;

        let mut syndromes = [0u8; 8];
        for (j, s) in syndromes.iter_mut().enumerate().take(two_t) {
            *s = self.syndrome(received, j + 1);
        }
        if syndromes.iter().all(|&s| s == 0) {
            return Some(BchDecoded {
                id: (received >> PARITY_BITS) as u32,
                corrected: 0,
            });
        }

        let locator = self.berlekamp_massey(&syndromes[..two_t]);
        let degree = locator.len() - 1;
        if degree == 0 || degree > MAX_CORRECTABLE as usize {
            return None;
        }

        let mut corrected = received;
        let mut roots = 0;
        for pos in 0..FIELD_ORDER {
            let x = self.alpha_pow(FIELD_ORDER - pos);
            if self.eval(&locator, x) == 0 {
                if pos >= CODE_BITS {
                    // Error located in the shortened (always zero) part.
                    return None;
                }
                corrected ^= 1 << pos;
                roots += 1;
            }
        }
        if roots != degree {
            return None;
        }
        if (1..=two_t).any(|j| self.syndrome(corrected, j) != 0) {
            return None;
        }

        Some(BchDecoded {
            id: (corrected >> PARITY_BITS) as u32,
            corrected: roots as u32,
        })
    }

    fn syndrome(&self, word: u64, j: usize) -> u8 {
        (0..CODE_BITS)
            .filter(|&i| (word >> i) & 1 == 1)
            .fold(0u8, |acc, i| acc ^ self.alpha_pow(i * j))
    }

    /// Error locator polynomial, lowest degree first, trimmed to its degree.
    fn berlekamp_massey(&self, syndromes: &[u8]) -> Vec<u8> {
        let n = syndromes.len();
        let mut c = vec![0u8; n + 1];
        let mut b = vec![0u8; n + 1];
        c[0] = 1;
        b[0] = 1;
        let mut len = 0usize;
        let mut shift = 1usize;
        let mut last = 1u8;

        for k in 0..n {
            let mut d = syndromes[k];
            for i in 1..=len {
                d ^= self.mul(c[i], syndromes[k - i]);
            }
            if d == 0 {
                shift += 1;
                continue;
            }
            let coef = self.div(d, last);
            let prev = c.clone();
            for i in 0..=n - shift {
                c[i + shift] ^= self.mul(coef, b[i]);
            }
            if 2 * len <= k {
                len = k + 1 - len;
                b = prev;
                last = d;
                shift = 1;
            } else {
                shift += 1;
            }
        }

        c.truncate(len + 1);
        c
    }

    fn eval(&self, poly: &[u8], x: u8) -> u8 {
        poly.iter()
            .rev()
            .fold(0u8, |acc, &c| self.mul(acc, x) ^ c)
    }
}

/// Carry-less polynomial multiplication over GF(2).
fn clmul(a: u64, b: u64) -> u64 {
    let mut out = 0u64;
    for i in 0..64 {
        if (b >> i) & 1 == 1 {
            out ^= a << i;
        }
    }
    out
}

/// Remainder of `value` divided by `modulus` over GF(2).
fn poly_mod(mut value: u64, modulus: u64) -> u64 {
    let deg = 63 - modulus.leading_zeros();
    while value != 0 && 63 - value.leading_zeros() >= deg {
        let shift = (63 - value.leading_zeros()) - deg;
        value ^= modulus << shift;
    }
    value
}
