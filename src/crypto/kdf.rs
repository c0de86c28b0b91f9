//! Password-based key derivation using PBKDF2-HMAC-SHA256.
//!
//! The iteration count and salt are stored next to whatever they protect
//! so the exact same derivation can be replayed later.

use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;

use super::keys::SecretKey;
use crate::errors::{AetherVaultError, Result};

/// Length of generated salts in bytes.
pub const SALT_LEN: usize = 32;

/// Default PBKDF2 iteration count.
pub const DEFAULT_ITERATIONS: u32 = 100_000;

/// Iteration counts below this are refused.
pub const MIN_ITERATIONS: u32 = 1_000;

/// Iteration counts above this are refused. Counts are read back from
/// containers, so an unbounded value would let a crafted file stall us.
pub const MAX_ITERATIONS: u32 = 10_000_000;

/// Derive a 32-byte key from `passphrase` and `salt`.
///
/// The same passphrase + salt + iterations always produce the same key.
pub fn derive_key(passphrase: &[u8], salt: &[u8], iterations: u32) -> Result<SecretKey> {
    if !(MIN_ITERATIONS..=MAX_ITERATIONS).contains(&iterations) {
        return Err(AetherVaultError::KeyDerivationFailed(format!(
            "PBKDF2 iterations must be between {MIN_ITERATIONS} and {MAX_ITERATIONS} (got {iterations})"
        )));
    }
    if salt.is_empty() {
        return Err(AetherVaultError::KeyDerivationFailed(
            "salt must not be empty".into(),
        ));
    }

    let mut key = SecretKey::zeroed();
    pbkdf2_hmac::<Sha256>(passphrase, salt, iterations, key.as_mut_bytes());
    Ok(key)
}

/// Generate a cryptographically random salt.
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::rng().fill_bytes(&mut salt);
    salt
}
