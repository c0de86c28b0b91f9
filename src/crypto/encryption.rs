//! Sealing under AES-256-GCM.
//!
//! Two things get sealed in an artifact: the archived content (under the
//! data key) and the data key itself (under each access method's wrap
//! key). Both use the same self-describing blob:
//!
//! ```text
//! [ 12-byte nonce | ciphertext | 16-byte auth tag ]
//! ```
//!
//! Keys are always `SecretKey`s, so a key of the wrong length cannot reach
//! the cipher. `open` fails closed with one generic error.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};

use super::keys::SecretKey;
use crate::errors::{AetherVaultError, Result};

/// Size of the AES-256-GCM nonce in bytes.
pub const NONCE_LEN: usize = 12;

/// Size of the GCM authentication tag in bytes.
pub const TAG_LEN: usize = 16;

/// Name recorded in artifact metadata.
pub const ALGORITHM: &str = "AES-256-GCM";

/// Length of the blob `seal` produces for `plaintext_len` bytes.
pub const fn sealed_len(plaintext_len: usize) -> usize {
    NONCE_LEN + plaintext_len + TAG_LEN
}

/// Seal `plaintext` under `key` with a fresh random nonce.
pub fn seal(key: &SecretKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| AetherVaultError::EncryptionFailed(format!("seal: {e}")))?;

    let mut sealed = Vec::with_capacity(sealed_len(plaintext.len()));
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Open a blob produced by `seal`.
///
/// Short input, a wrong key and a flipped bit all give
/// `AuthenticationFailed`.
pub fn open(key: &SecretKey, sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < sealed_len(0) {
        return Err(AetherVaultError::AuthenticationFailed);
    }

    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
    Aes256Gcm::new(key.as_bytes().into())
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| AetherVaultError::AuthenticationFailed)
}

/// Seal a data key under a wrap key.
pub fn wrap_key(kek: &SecretKey, data_key: &SecretKey) -> Result<Vec<u8>> {
    seal(kek, data_key.as_bytes())
}

/// Recover a data key sealed by `wrap_key`.
///
/// The intermediate plaintext is wiped whether or not it has key length.
pub fn unwrap_key(kek: &SecretKey, wrapped: &[u8]) -> Result<SecretKey> {
    SecretKey::from_vec(open(kek, wrapped)?)
}
