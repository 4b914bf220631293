//! GF(2^8) arithmetic for the systematic Cauchy Reed-Solomon code and the
//! Rabin IDA used by the CRSSS scheme.
//!
//! Uses the irreducible polynomial 0x11D (x^8 + x^4 + x^3 + x^2 + 1), the
//! same primitive polynomial `gf_init_easy` selects for an 8-bit field in
//! jerasure. Log/antilog tables are built once and shared; every share
//! produced by this module must match byte-for-byte with any other
//! implementation built on the same polynomial, so the constant is
//! part of the on-disk/on-wire format, not an implementation detail.

const GF_POLY: u16 = 0x11D;

pub struct Gf256 {
    exp: [u8; 512],
    log: [u8; 256],
}

impl Gf256 {
    pub fn new() -> Self {
        let mut exp = [0u8; 512];
        let mut log = [0u8; 256];
        let mut x: u16 = 1;
        for i in 0..255usize {
            exp[i] = x as u8;
            log[x as usize] = i as u8;
            x <<= 1;
            if x & 0x100 != 0 {
                x ^= GF_POLY;
            }
        }
        // extend the table so multiply() can index exp[log(a)+log(b)]
        // without a modulo on the 0..=509 range produced by two bytes.
        for i in 255..512 {
            exp[i] = exp[i - 255];
        }
        Gf256 { exp, log }
    }

    #[inline]
    pub fn multiply(&self, a: u8, b: u8) -> u8 {
        if a == 0 || b == 0 {
            return 0;
        }
        let la = self.log[a as usize] as usize;
        let lb = self.log[b as usize] as usize;
        self.exp[la + lb]
    }

    /// a / b, b must be nonzero.
    #[inline]
    pub fn divide(&self, a: u8, b: u8) -> u8 {
        assert!(b != 0, "division by zero in GF(2^8)");
        if a == 0 {
            return 0;
        }
        let la = self.log[a as usize] as i32;
        let lb = self.log[b as usize] as i32;
        let diff = (la - lb).rem_euclid(255) as usize;
        self.exp[diff]
    }

    /// region-wise `out[i] = region[i] * coef` (xor=false) or
    /// `out[i] ^= region[i] * coef` (xor=true), mirroring
    /// `gf_t::multiply_region.w32` in the reference implementation.
    pub fn multiply_region(&self, region: &[u8], out: &mut [u8], coef: u8, xor: bool) {
        debug_assert_eq!(region.len(), out.len());
        if coef == 1 {
            if xor {
                for (o, r) in out.iter_mut().zip(region.iter()) {
                    *o ^= *r;
                }
            } else {
                out.copy_from_slice(region);
            }
            return;
        }
        for (o, r) in out.iter_mut().zip(region.iter()) {
            let v = self.multiply(*r, coef);
            if xor {
                *o ^= v;
            } else {
                *o = v;
            }
        }
    }
}

impl Default for Gf256 {
    fn default() -> Self {
        Self::new()
    }
}

/// An n*k distribution (generator transpose) matrix and the machinery to
/// invert any k*k submatrix, exactly mirroring `CDCodec::squareMatrixInverting`.
pub struct Matrix {
    pub n: usize,
    pub k: usize,
    /// row-major n*k matrix of GF(2^8) elements.
    pub data: Vec<u8>,
}

impl Matrix {
    pub fn get(&self, row: usize, col: usize) -> u8 {
        self.data[row * self.k + col]
    }

    /// Build the systematic Cauchy distribution matrix used by CAONT-RS,
    /// Old-CAONT-RS and AONT-RS: the top k rows are the identity, the
    /// bottom m rows are a Cauchy matrix with entries `1/(i ^ (m+j))`.
    pub fn systematic_cauchy(gf: &Gf256, n: usize, k: usize) -> Self {
        let m = n - k;
        let mut data = vec![0u8; n * k];
        for i in 0..k {
            data[i * k + i] = 1;
        }
        for i in 0..m {
            for j in 0..k {
                let sum = (i ^ (m + j)) as u8;
                data[(k + i) * k + j] = gf.divide(1, sum);
            }
        }
        Matrix { n, k, data }
    }

    /// Build the full n*k Cauchy distribution matrix used by CRSSS:
    /// entries `1/(i ^ (n+j))` for every row (no identity submatrix).
    pub fn full_cauchy(gf: &Gf256, n: usize, k: usize) -> Self {
        let mut data = vec![0u8; n * k];
        for i in 0..n {
            for j in 0..k {
                let sum = (i ^ (n + j)) as u8;
                data[i * k + j] = gf.divide(1, sum);
            }
        }
        Matrix { n, k, data }
    }

    /// Extract the k rows named by `share_ids` (each < n) into a k*k
    /// matrix and invert it in GF(2^8). Returns `None` if the submatrix
    /// is singular (should never happen for a Cauchy matrix with
    /// distinct ids, but a corrupted id list must not panic).
    pub fn invert_submatrix(&self, gf: &Gf256, share_ids: &[usize]) -> Option<Vec<u8>> {
        let k = self.k;
        assert_eq!(share_ids.len(), k);

        let mut square = vec![0u8; k * k];
        for (row, &id) in share_ids.iter().enumerate() {
            for col in 0..k {
                square[row * k + col] = self.get(id, col);
            }
        }

        let mut inverse = vec![0u8; k * k];
        for i in 0..k {
            inverse[i * k + i] = 1;
        }

        for i in 0..k {
            if square[i * k + i] == 0 {
                let mut j = i + 1;
                while j < k && square[j * k + i] == 0 {
                    j += 1;
                }
                if j == k {
                    return None;
                }
                for h in 0..k {
                    square.swap(i * k + h, j * k + h);
                    inverse.swap(i * k + h, j * k + h);
                }
            }

            let pivot = square[i * k + i];
            if pivot != 1 {
                let factor = gf.divide(1, pivot);
                for col in 0..k {
                    square[i * k + col] = gf.multiply(square[i * k + col], factor);
                    inverse[i * k + col] = gf.multiply(inverse[i * k + col], factor);
                }
            }

            for row in (i + 1)..k {
                let h = square[row * k + i];
                if h == 0 {
                    continue;
                }
                for col in 0..k {
                    let sv = gf.multiply(square[i * k + col], h);
                    square[row * k + col] ^= sv;
                    let iv = gf.multiply(inverse[i * k + col], h);
                    inverse[row * k + col] ^= iv;
                }
            }
        }

        for i in (0..k).rev() {
            for row in 0..i {
                let h = square[row * k + i];
                if h == 0 {
                    continue;
                }
                for col in 0..k {
                    let iv = gf.multiply(inverse[i * k + col], h);
                    inverse[row * k + col] ^= iv;
                }
                square[row * k + i] = 0;
            }
        }

        Some(inverse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiply_is_commutative_and_has_identity() {
        let gf = Gf256::new();
        for a in 0u16..256 {
            for b in (0u16..256).step_by(17) {
                let (a, b) = (a as u8, b as u8);
                assert_eq!(gf.multiply(a, b), gf.multiply(b, a));
            }
            assert_eq!(gf.multiply(a as u8, 1), a as u8);
        }
    }

    #[test]
    fn divide_inverts_multiply() {
        let gf = Gf256::new();
        for a in 1u16..256 {
            for b in 1u16..256 {
                let (a, b) = (a as u8, b as u8);
                let product = gf.multiply(a, b);
                assert_eq!(gf.divide(product, b), a);
            }
        }
    }

    #[test]
    fn every_k_subset_of_systematic_cauchy_is_invertible() {
        let gf = Gf256::new();
        let (n, k) = (5, 3);
        let matrix = Matrix::systematic_cauchy(&gf, n, k);

        // enumerate all 3-subsets of {0..5}
        for a in 0..n {
            for b in (a + 1)..n {
                for c in (b + 1)..n {
                    let ids = [a, b, c];
                    assert!(
                        matrix.invert_submatrix(&gf, &ids).is_some(),
                        "submatrix {:?} should be invertible",
                        ids
                    );
                }
            }
        }
    }

    #[test]
    fn multiply_region_xor_matches_manual_xor() {
        let gf = Gf256::new();
        let region = [1u8, 2, 3, 4];
        let mut out = [10u8, 20, 30, 40];
        let expected: Vec<u8> = region
            .iter()
            .zip(out.iter())
            .map(|(r, o)| o ^ gf.multiply(*r, 7))
            .collect();
        gf.multiply_region(&region, &mut out, 7, true);
        assert_eq!(out.to_vec(), expected);
    }
}
