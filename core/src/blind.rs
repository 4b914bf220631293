//! Blinded RSA key exchange primitives (the "oblivious RSA protocol").
//!
//! The client blinds a fingerprint hash with a random factor before
//! sending it to a Key Manager, so the KM only ever sees
//! `h * r^e mod n` and never learns `h` itself. The client unblinds the
//! KM's response to recover `h^d mod n`, then hashes that to derive the
//! 32-byte (or 16-byte, at LOW security) convergent key. Everything here
//! is pure math; transport (TLS to the KM) lives in the client/server
//! crates.

use num_bigint_dig::{BigUint, ModInverse, RandBigInt};
use num_traits::{One, Zero};
use rand::rngs::OsRng;

use crate::error::CoreError;

/// Fixed wire width of every RSA element on the KM channel: a 1024-bit
/// modulus serialized as 128 big-endian bytes, left-zero-padded.
pub const RSA_ELEMENT_SIZE: usize = 128;

#[derive(Debug, Clone)]
pub struct RsaPublicKey {
    pub n: BigUint,
    pub e: BigUint,
}

impl RsaPublicKey {
    pub fn from_bytes(n: &[u8; RSA_ELEMENT_SIZE], e: &[u8; RSA_ELEMENT_SIZE]) -> Self {
        RsaPublicKey {
            n: BigUint::from_bytes_be(n),
            e: BigUint::from_bytes_be(e),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RsaPrivateKey {
    pub n: BigUint,
    pub d: BigUint,
}

impl RsaPrivateKey {
    /// Compute `x^d mod n` for a fixed-width blinded input, as performed
    /// by the Key Manager on every element of an incoming request.
    pub fn sign_blinded(&self, blinded: &[u8; RSA_ELEMENT_SIZE]) -> [u8; RSA_ELEMENT_SIZE] {
        let x = BigUint::from_bytes_be(blinded);
        let y = x.modpow(&self.d, &self.n);
        to_fixed_width(&y)
    }
}

fn to_fixed_width(v: &BigUint) -> [u8; RSA_ELEMENT_SIZE] {
    let bytes = v.to_bytes_be();
    let mut out = [0u8; RSA_ELEMENT_SIZE];
    assert!(bytes.len() <= RSA_ELEMENT_SIZE, "RSA element overflowed fixed width");
    out[RSA_ELEMENT_SIZE - bytes.len()..].copy_from_slice(&bytes);
    out
}

/// Per-exchange blinding state: the random factor `r` and its modular
/// inverse, held only for the duration of one round trip.
pub struct Blinding {
    r: BigUint,
    r_inv: BigUint,
}

impl Blinding {
    /// Sample a fresh 256-bit blinding factor `r` in `[2, n-1]`.
    pub fn new(pub_key: &RsaPublicKey) -> Result<Self, CoreError> {
        let mut rng = OsRng;
        let mut r = rng.gen_biguint(256);
        if r < BigUint::from(2u32) {
            r += BigUint::from(2u32);
        }
        r %= &pub_key.n;
        if r.is_zero() || r.is_one() {
            r = BigUint::from(2u32);
        }
        let r_inv = r
            .clone()
            .mod_inverse(&pub_key.n)
            .and_then(|v| v.to_biguint())
            .ok_or_else(|| CoreError::Internal("blinding factor has no modular inverse".into()))?;
        Ok(Blinding { r, r_inv })
    }

    /// `m = H(fingerprint) as integer, blinded = h * r^e mod n`, fixed
    /// width 128 bytes.
    pub fn blind(&self, fp_hash: &[u8], pub_key: &RsaPublicKey) -> [u8; RSA_ELEMENT_SIZE] {
        let h = BigUint::from_bytes_be(fp_hash);
        let r_e = self.r.modpow(&pub_key.e, &pub_key.n);
        let blinded = (h * r_e) % &pub_key.n;
        to_fixed_width(&blinded)
    }

    /// `t = s * r^-1 mod n`, recovering `h^d mod n` from the KM's
    /// blinded signature `s`.
    pub fn unblind(&self, signed: &[u8; RSA_ELEMENT_SIZE], pub_key: &RsaPublicKey) -> Vec<u8> {
        let s = BigUint::from_bytes_be(signed);
        let t = (s * &self.r_inv) % &pub_key.n;
        t.to_bytes_be()
    }

    /// Optional blind-signature self-check: recompute `h^e mod n` from
    /// the unblinded value and compare against the original hash's
    /// signature-verification exponentiation. Used to detect a
    /// misbehaving KM before trusting a derived key; on failure the
    /// caller abandons its segment-key cache entry and retries once
    /// (§A.7 KM exchange error policy).
    pub fn verify(&self, fp_hash: &[u8], unblinded: &[u8], pub_key: &RsaPublicKey) -> bool {
        let h = BigUint::from_bytes_be(fp_hash);
        let t = BigUint::from_bytes_be(unblinded);
        let recomputed = t.modpow(&pub_key.e, &pub_key.n);
        recomputed == (h % &pub_key.n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // A small test-only RSA keypair (not 1024-bit, just large enough to
    // exercise the blind/unblind algebra without a slow keygen).
    fn test_keypair() -> (RsaPublicKey, RsaPrivateKey) {
        // p = 61, q = 53 (textbook RSA example), n = 3233, e = 17, d = 2753
        let n = BigUint::from(3233u32);
        let e = BigUint::from(17u32);
        let d = BigUint::from(2753u32);
        (RsaPublicKey { n: n.clone(), e }, RsaPrivateKey { n, d })
    }

    #[test]
    fn blind_unblind_roundtrip_recovers_plain_signature() {
        let (pubk, privk) = test_keypair();
        let h = BigUint::from(65u32);

        // direct signature for comparison
        let direct = h.modpow(&privk.d, &privk.n);

        let blinding = Blinding {
            r: BigUint::from(7u32),
            r_inv: BigUint::from(7u32).mod_inverse(&pubk.n).unwrap().to_biguint().unwrap(),
        };

        let mut hbytes = [0u8; RSA_ELEMENT_SIZE];
        let hb = h.to_bytes_be();
        hbytes[RSA_ELEMENT_SIZE - hb.len()..].copy_from_slice(&hb);

        let blinded = blinding.blind(&hbytes, &pubk);
        let signed = privk.sign_blinded(&blinded);
        let unblinded = blinding.unblind(&signed, &pubk);

        let recovered = BigUint::from_bytes_be(&unblinded);
        assert_eq!(recovered, direct);
    }

    #[test]
    fn verify_detects_correct_km_response() {
        let (pubk, privk) = test_keypair();
        let blinding = Blinding::new(&pubk).unwrap();

        let h = BigUint::from(42u32);
        let hb = h.to_bytes_be();
        let mut hbytes = [0u8; RSA_ELEMENT_SIZE];
        hbytes[RSA_ELEMENT_SIZE - hb.len()..].copy_from_slice(&hb);

        let blinded = blinding.blind(&hbytes, &pubk);
        let signed = privk.sign_blinded(&blinded);
        let unblinded = blinding.unblind(&signed, &pubk);

        assert!(blinding.verify(&hbytes, &unblinded, &pubk));
    }

    #[test]
    fn verify_rejects_tampered_km_response() {
        let (pubk, privk) = test_keypair();
        let blinding = Blinding::new(&pubk).unwrap();

        let h = BigUint::from(42u32);
        let hb = h.to_bytes_be();
        let mut hbytes = [0u8; RSA_ELEMENT_SIZE];
        hbytes[RSA_ELEMENT_SIZE - hb.len()..].copy_from_slice(&hb);

        let blinded = blinding.blind(&hbytes, &pubk);
        let mut signed = privk.sign_blinded(&blinded);
        signed[RSA_ELEMENT_SIZE - 1] ^= 0xff;
        let unblinded = blinding.unblind(&signed, &pubk);

        assert!(!blinding.verify(&hbytes, &unblinded, &pubk));
    }
}
