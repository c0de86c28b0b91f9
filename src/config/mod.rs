//! Engine configuration.
//!
//! - `EngineConfig`: the immutable input to `EncryptionService::new`
//! - `Settings`: optional `.aethervault.toml` plus environment overrides,
//!   for calling layers that want to build an `EngineConfig`

pub mod settings;

use std::fmt;

use zeroize::Zeroizing;

pub use settings::Settings;

/// Master key material and KDF parameters for the runtime access method.
#[derive(Clone)]
pub struct EngineConfig {
    pub master_secret: Zeroizing<String>,
    pub kdf_salt: String,
    pub kdf_iterations: u32,
}

impl EngineConfig {
    pub fn new(
        master_secret: impl Into<String>,
        kdf_salt: impl Into<String>,
        kdf_iterations: u32,
    ) -> Self {
        Self {
            master_secret: Zeroizing::new(master_secret.into()),
            kdf_salt: kdf_salt.into(),
            kdf_iterations,
        }
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("master_secret", &"<redacted>")
            .field("kdf_salt", &self.kdf_salt)
            .field("kdf_iterations", &self.kdf_iterations)
            .finish()
    }
}
