//! Runtime access method: the data key is wrapped directly with the
//! process-held master key. Unlocking needs no caller secret; any service
//! configured with the same master secret, salt and iteration count can
//! recover the key.

use super::unlock_failed;
use crate::crypto::keys::SecretKey;
use crate::crypto::{derive_key, unwrap_key, wrap_key};
use crate::errors::Result;

/// Master key held by an `EncryptionService` for its whole lifetime.
#[derive(Debug)]
pub struct RuntimeKey(SecretKey);

impl RuntimeKey {
    /// Derive the master key from configuration material.
    pub fn derive(master_secret: &str, salt: &[u8], iterations: u32) -> Result<Self> {
        derive_key(master_secret.as_bytes(), salt, iterations).map(Self)
    }

    pub fn wrap(&self, data_key: &SecretKey) -> Result<Vec<u8>> {
        wrap_key(&self.0, data_key)
    }

    pub fn unwrap(&self, wrapped: &[u8]) -> Result<SecretKey> {
        unwrap_key(&self.0, wrapped).map_err(|_| unlock_failed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_configuration_unwraps() {
        let a = RuntimeKey::derive("master", b"salt-salt", 1_000).unwrap();
        let b = RuntimeKey::derive("master", b"salt-salt", 1_000).unwrap();
        let data_key = SecretKey::generate();

        let wrapped = a.wrap(&data_key).unwrap();
        assert_eq!(b.unwrap(&wrapped).unwrap().as_bytes(), data_key.as_bytes());
    }

    #[test]
    fn different_master_secret_is_denied() {
        let a = RuntimeKey::derive("master", b"salt-salt", 1_000).unwrap();
        let other = RuntimeKey::derive("other", b"salt-salt", 1_000).unwrap();
        let wrapped = a.wrap(&SecretKey::generate()).unwrap();
        assert!(other.unwrap(&wrapped).is_err());
    }
}
