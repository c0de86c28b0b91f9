//! Passphrase access method.
//!
//! The wrapping key is `PBKDF2(passphrase, salt, iterations)` on both the
//! wrap and unwrap side; salt and iteration count are stored in the
//! method's configuration and always read back from the artifact.

use serde::{Deserialize, Serialize};

use super::{base64_decode, base64_encode, unlock_failed};
use crate::crypto::keys::SecretKey;
use crate::crypto::{derive_key, generate_salt, unwrap_key, wrap_key, DEFAULT_ITERATIONS};
use crate::errors::Result;

/// Stored configuration of a passphrase method.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassphraseConfig {
    #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
    pub salt: Vec<u8>,
    pub iterations: u32,
}

/// Wrap `data_key` under a key derived from `passphrase`.
pub fn wrap(
    data_key: &SecretKey,
    passphrase: &str,
    iterations: Option<u32>,
) -> Result<(PassphraseConfig, Vec<u8>)> {
    let config = PassphraseConfig {
        salt: generate_salt().to_vec(),
        iterations: iterations.unwrap_or(DEFAULT_ITERATIONS),
    };

    let wrapping_key = derive_key(passphrase.as_bytes(), &config.salt, config.iterations)?;
    let wrapped = wrap_key(&wrapping_key, data_key)?;
    Ok((config, wrapped))
}

/// Recover the data key with the caller's passphrase.
pub fn unwrap(config: &PassphraseConfig, wrapped: &[u8], passphrase: &str) -> Result<SecretKey> {
    let wrapping_key = derive_key(passphrase.as_bytes(), &config.salt, config.iterations)?;
    unwrap_key(&wrapping_key, wrapped).map_err(|_| unlock_failed())
}
