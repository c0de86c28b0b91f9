//! Key material held in memory.
//!
//! `SecretKey` is the scoped buffer every 32-byte key in the engine lives
//! in: the per-artifact data key, the runtime master key, and keys derived
//! from passphrases or key agreement. Its bytes are overwritten on drop.

use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::errors::{AetherVaultError, Result};

/// Length of every symmetric key (256 bits, for AES-256).
pub const KEY_LEN: usize = 32;

/// A 32-byte symmetric key that zeroes its memory when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey {
    bytes: [u8; KEY_LEN],
}

impl SecretKey {
    /// Wrap raw key bytes. The caller's copy is not cleared.
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    pub(crate) fn zeroed() -> Self {
        Self {
            bytes: [0u8; KEY_LEN],
        }
    }

    /// Fresh random key from the thread-local CSPRNG.
    pub fn generate() -> Self {
        let mut key = Self::zeroed();
        rand::rng().fill_bytes(&mut key.bytes);
        key
    }

    /// Copy a key out of a decrypted buffer, clearing the buffer.
    pub fn from_vec(mut bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() != KEY_LEN {
            let len = bytes.len();
            bytes.zeroize();
            return Err(AetherVaultError::InvalidFormat(format!(
                "wrapped key decrypted to {len} bytes, expected {KEY_LEN}"
            )));
        }
        let mut key = Self::zeroed();
        key.bytes.copy_from_slice(&bytes);
        bytes.zeroize();
        Ok(key)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }

    pub(crate) fn as_mut_bytes(&mut self) -> &mut [u8; KEY_LEN] {
        &mut self.bytes
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(<redacted>)")
    }
}

/// Base64 of SHA-256 over the data key, as recorded in artifact metadata.
pub fn hash_data_key(key: &SecretKey) -> String {
    BASE64.encode(Sha256::digest(key.as_bytes()))
}

/// Constant-time check of a recovered data key against the stored hash.
pub fn verify_data_key_hash(key: &SecretKey, expected: &str) -> bool {
    hash_data_key(key)
        .as_bytes()
        .ct_eq(expected.as_bytes())
        .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_differ() {
        assert_ne!(
            SecretKey::generate().as_bytes(),
            SecretKey::generate().as_bytes()
        );
    }

    #[test]
    fn from_vec_rejects_wrong_length() {
        assert!(SecretKey::from_vec(vec![0u8; 16]).is_err());
        let key = SecretKey::from_vec(vec![3u8; 32]).unwrap();
        assert_eq!(key.as_bytes(), &[3u8; 32]);
    }

    #[test]
    fn debug_output_is_redacted() {
        let key = SecretKey::new([0xAA; 32]);
        assert_eq!(format!("{key:?}"), "SecretKey(<redacted>)");
    }

    #[test]
    fn hash_verification() {
        let key = SecretKey::generate();
        let hash = hash_data_key(&key);
        assert!(verify_data_key_hash(&key, &hash));
        assert!(!verify_data_key_hash(&SecretKey::generate(), &hash));
    }
}
