use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::EngineConfig;
use crate::crypto::kdf::{DEFAULT_ITERATIONS, MAX_ITERATIONS, MIN_ITERATIONS};
use crate::errors::{AetherVaultError, Result};
use crate::service::EncryptionRequest;

/// Environment variable holding the runtime master secret.
pub const ENV_MASTER_KEY: &str = "AETHER_MASTER_KEY";
/// Environment variable overriding the master-key KDF salt.
pub const ENV_KDF_SALT: &str = "AETHER_KDF_SALT";
/// Environment variable overriding the master-key KDF iteration count.
pub const ENV_KDF_ITERATIONS: &str = "AETHER_KDF_ITERATIONS";

/// Project-level configuration, loaded from `.aethervault.toml`.
///
/// Every field except the master secret has a default. The master secret
/// is normally supplied through `AETHER_MASTER_KEY` rather than the file.
#[derive(Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Secret the runtime master key is derived from.
    #[serde(default)]
    pub master_key: Option<Zeroizing<String>>,

    /// Salt for deriving the runtime master key.
    #[serde(default = "default_kdf_salt")]
    pub kdf_salt: String,

    /// PBKDF2 iteration count for the runtime master key.
    #[serde(default = "default_kdf_iterations")]
    pub kdf_iterations: u32,

    /// Whether archives are gzipped in requests built by
    /// [`Settings::encryption_request`].
    #[serde(default = "default_compression")]
    pub compression: bool,
}

// ── Serde default helpers ────────────────────────────────────────────

fn default_kdf_salt() -> String {
    "aether-vault".to_string()
}

fn default_kdf_iterations() -> u32 {
    DEFAULT_ITERATIONS
}

fn default_compression() -> bool {
    true
}

// ── Implementation ───────────────────────────────────────────────────

impl Default for Settings {
    fn default() -> Self {
        Self {
            master_key: None,
            kdf_salt: default_kdf_salt(),
            kdf_iterations: default_kdf_iterations(),
            compression: default_compression(),
        }
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("master_key", &self.master_key.as_ref().map(|_| "<redacted>"))
            .field("kdf_salt", &self.kdf_salt)
            .field("kdf_iterations", &self.kdf_iterations)
            .field("compression", &self.compression)
            .finish()
    }
}

impl Settings {
    /// Name of the config file we look for in the project root.
    pub const FILE_NAME: &'static str = ".aethervault.toml";

    /// Load settings from `<project_dir>/.aethervault.toml`.
    ///
    /// If the file does not exist, defaults are returned.
    /// If the file exists but cannot be parsed, an error is returned.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let config_path = project_dir.join(Self::FILE_NAME);

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&config_path)?;

        let settings: Settings = toml::from_str(&contents).map_err(|e| {
            AetherVaultError::ConfigError(format!("Failed to parse {}: {e}", config_path.display()))
        })?;

        Ok(settings)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_with(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    ///
    /// Empty values are treated as unset.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.is_empty());

        if let Some(master) = var(ENV_MASTER_KEY) {
            self.master_key = Some(Zeroizing::new(master));
        }
        if let Some(salt) = var(ENV_KDF_SALT) {
            self.kdf_salt = salt;
        }
        if let Some(iterations) = var(ENV_KDF_ITERATIONS) {
            self.kdf_iterations = iterations.trim().parse().map_err(|_| {
                AetherVaultError::ConfigError(format!(
                    "{ENV_KDF_ITERATIONS} must be a positive integer, got '{iterations}'"
                ))
            })?;
        }
        Ok(())
    }

    /// Build the engine configuration, checking it is usable.
    pub fn engine_config(&self) -> Result<EngineConfig> {
        let master = self
            .master_key
            .as_ref()
            .filter(|m| !m.is_empty())
            .ok_or_else(|| {
                AetherVaultError::ConfigError(format!(
                    "no master key configured (set {ENV_MASTER_KEY})"
                ))
            })?;

        if !(MIN_ITERATIONS..=MAX_ITERATIONS).contains(&self.kdf_iterations) {
            return Err(AetherVaultError::ConfigError(format!(
                "kdf_iterations must be between {MIN_ITERATIONS} and {MAX_ITERATIONS}, got {}",
                self.kdf_iterations
            )));
        }

        Ok(EngineConfig {
            master_secret: master.clone(),
            kdf_salt: self.kdf_salt.clone(),
            kdf_iterations: self.kdf_iterations,
        })
    }

    /// Start an encryption request carrying the project defaults.
    pub fn encryption_request(
        &self,
        source_path: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
    ) -> EncryptionRequest {
        EncryptionRequest::new(source_path, output_path).with_compression(self.compression)
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn default_settings_are_sensible() {
        let s = Settings::default();
        assert!(s.master_key.is_none());
        assert_eq!(s.kdf_salt, "aether-vault");
        assert_eq!(s.kdf_iterations, 100_000);
        assert!(s.compression);
    }

    #[test]
    fn load_returns_defaults_when_no_config_file() {
        let tmp = TempDir::new().unwrap();
        let settings = Settings::load(tmp.path()).unwrap();
        assert_eq!(settings.kdf_iterations, 100_000);
    }

    #[test]
    fn load_parses_toml_file() {
        let tmp = TempDir::new().unwrap();
        let config = r#"
kdf_salt = "project-salt"
kdf_iterations = 250000
compression = false
"#;
        fs::write(tmp.path().join(".aethervault.toml"), config).unwrap();

        let settings = Settings::load(tmp.path()).unwrap();
        assert_eq!(settings.kdf_salt, "project-salt");
        assert_eq!(settings.kdf_iterations, 250_000);
        assert!(!settings.compression);
        assert!(settings.master_key.is_none());
    }

    #[test]
    fn load_errors_on_invalid_toml() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(".aethervault.toml"), "not valid {{toml").unwrap();

        let result = Settings::load(tmp.path());
        assert!(matches!(result, Err(AetherVaultError::ConfigError(_))));
    }

    #[test]
    fn env_overrides_file_values() {
        let mut s = Settings {
            kdf_salt: "from-file".into(),
            ..Settings::default()
        };
        s.apply_env_with(env(&[
            (ENV_MASTER_KEY, "s3cret"),
            (ENV_KDF_SALT, "from-env"),
            (ENV_KDF_ITERATIONS, "5000"),
        ]))
        .unwrap();

        assert_eq!(s.master_key.as_deref().map(String::as_str), Some("s3cret"));
        assert_eq!(s.kdf_salt, "from-env");
        assert_eq!(s.kdf_iterations, 5_000);
    }

    #[test]
    fn empty_env_values_are_ignored() {
        let mut s = Settings::default();
        s.apply_env_with(env(&[(ENV_KDF_SALT, "")])).unwrap();
        assert_eq!(s.kdf_salt, "aether-vault");
    }

    #[test]
    fn bad_iteration_override_is_config_error() {
        let mut s = Settings::default();
        let result = s.apply_env_with(env(&[(ENV_KDF_ITERATIONS, "lots")]));
        assert!(matches!(result, Err(AetherVaultError::ConfigError(_))));
    }

    #[test]
    fn engine_config_requires_master_key() {
        let result = Settings::default().engine_config();
        assert!(matches!(result, Err(AetherVaultError::ConfigError(_))));
    }

    #[test]
    fn engine_config_enforces_iteration_bounds() {
        let s = Settings {
            master_key: Some(Zeroizing::new("k".into())),
            kdf_iterations: 999,
            ..Settings::default()
        };
        assert!(s.engine_config().is_err());

        let huge = Settings {
            kdf_iterations: MAX_ITERATIONS + 1,
            ..s.clone()
        };
        assert!(matches!(
            huge.engine_config(),
            Err(AetherVaultError::ConfigError(_))
        ));

        let ok = Settings {
            kdf_iterations: 1_000,
            ..s
        };
        let config = ok.engine_config().unwrap();
        assert_eq!(config.master_secret.as_str(), "k");
        assert_eq!(config.kdf_iterations, 1_000);
    }

    #[test]
    fn debug_hides_master_key() {
        let s = Settings {
            master_key: Some(Zeroizing::new("very-secret-value".into())),
            ..Settings::default()
        };
        assert!(!format!("{s:?}").contains("very-secret-value"));
    }

    #[test]
    fn master_key_loads_from_file() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join(".aethervault.toml"),
            "master_key = \"from-file\"\n",
        )
        .unwrap();

        let settings = Settings::load(tmp.path()).unwrap();
        let config = settings.engine_config().unwrap();
        assert_eq!(config.master_secret.as_str(), "from-file");
    }

    #[test]
    fn encryption_request_follows_compression_setting() {
        let on = Settings::default().encryption_request("src", "out.ava");
        assert!(on.compression);
        assert_eq!(on.source_path, PathBuf::from("src"));

        let off = Settings {
            compression: false,
            ..Settings::default()
        };
        let request = off.encryption_request("src", "out.ava");
        assert!(!request.compression);
        assert!(request.access_methods.is_empty());
    }
}
