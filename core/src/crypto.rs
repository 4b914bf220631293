//! Hash and block-cipher primitives behind one `CryptoPrimitive`-style
//! interface, selected by security level per the CLI's `-u HIGH|LOW`
//! flag: HIGH is SHA-256 + AES-256, LOW is MD5 + AES-128. Both pairings
//! keep hash size equal to key size, a precondition the CAONT transform
//! (see `codec.rs`) relies on.

use aes::cipher::{BlockEncryptMut, KeyIvInit};
use cipher::block_padding::NoPadding;
use md5::{Digest as Md5Digest, Md5};
use sha2::{Digest, Sha256};

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityLevel {
    High,
    Low,
}

impl SecurityLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "HIGH" => Some(SecurityLevel::High),
            "LOW" => Some(SecurityLevel::Low),
            _ => None,
        }
    }

    pub fn hash_size(&self) -> usize {
        match self {
            SecurityLevel::High => 32,
            SecurityLevel::Low => 16,
        }
    }

    pub fn key_size(&self) -> usize {
        self.hash_size()
    }
}

/// A CryptoPrimitive instance bound to one security level. All hash and
/// encryption operations in the encoder go through this type so the
/// HIGH/LOW choice is made once, at pipeline construction.
pub struct CryptoPrimitive {
    level: SecurityLevel,
}

impl CryptoPrimitive {
    pub fn new(level: SecurityLevel) -> Self {
        CryptoPrimitive { level }
    }

    pub fn level(&self) -> SecurityLevel {
        self.level
    }

    pub fn hash_size(&self) -> usize {
        self.level.hash_size()
    }

    pub fn key_size(&self) -> usize {
        self.level.key_size()
    }

    pub fn generate_hash(&self, data: &[u8]) -> Vec<u8> {
        match self.level {
            SecurityLevel::High => Sha256::digest(data).to_vec(),
            SecurityLevel::Low => Md5::digest(data).to_vec(),
        }
    }

    /// AES-CBC encrypt `data` with `key` under an all-zero IV and no
    /// padding. `data.len()` must already be a multiple of 16 bytes —
    /// the encoder only ever calls this on block-aligned buffers.
    pub fn encrypt_with_key(&self, data: &[u8], key: &[u8]) -> Result<Vec<u8>, CoreError> {
        if data.len() % 16 != 0 {
            return Err(CoreError::Precondition(format!(
                "encrypt_with_key: data length {} is not AES-block aligned",
                data.len()
            )));
        }
        if key.len() != self.key_size() {
            return Err(CoreError::Precondition(format!(
                "encrypt_with_key: key length {} does not match key size {}",
                key.len(),
                self.key_size()
            )));
        }

        let iv = [0u8; 16];
        let mut buf = data.to_vec();
        let ct_len = match self.level {
            SecurityLevel::High => {
                let mut enc = cbc::Encryptor::<aes::Aes256>::new(key.into(), &iv.into());
                enc.encrypt_padded_mut::<NoPadding>(&mut buf, data.len())
                    .map_err(|e| CoreError::Internal(format!("AES-256-CBC encrypt failed: {e}")))?
                    .len()
            }
            SecurityLevel::Low => {
                let mut enc = cbc::Encryptor::<aes::Aes128>::new(key.into(), &iv.into());
                enc.encrypt_padded_mut::<NoPadding>(&mut buf, data.len())
                    .map_err(|e| CoreError::Internal(format!("AES-128-CBC encrypt failed: {e}")))?
                    .len()
            }
        };
        buf.truncate(ct_len);
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn high_hash_and_key_sizes_match() {
        let c = CryptoPrimitive::new(SecurityLevel::High);
        assert_eq!(c.hash_size(), c.key_size());
        assert_eq!(c.hash_size(), 32);
    }

    #[test]
    fn low_hash_and_key_sizes_match() {
        let c = CryptoPrimitive::new(SecurityLevel::Low);
        assert_eq!(c.hash_size(), c.key_size());
        assert_eq!(c.hash_size(), 16);
    }

    #[test]
    fn encryption_is_deterministic_for_a_fixed_key() {
        let c = CryptoPrimitive::new(SecurityLevel::High);
        let key = vec![7u8; 32];
        let plaintext = vec![0u8; 64];
        let a = c.encrypt_with_key(&plaintext, &key).unwrap();
        let b = c.encrypt_with_key(&plaintext, &key).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), plaintext.len());
    }

    #[test]
    fn rejects_unaligned_data() {
        let c = CryptoPrimitive::new(SecurityLevel::High);
        let key = vec![7u8; 32];
        assert!(c.encrypt_with_key(&[0u8; 15], &key).is_err());
    }
}
