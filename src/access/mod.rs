//! Access methods: independent ways to wrap and recover an artifact's
//! data key.
//!
//! Every method wraps the *same* data key, so unlocking through one never
//! depends on any other. Requests and unlock selectors are typed per
//! method; the stored `AccessMethod` record keeps a JSON config that is
//! parsed back into the matching typed config on unwrap.

pub mod certificate;
pub mod passphrase;
pub mod runtime;

use std::fmt;
use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::artifact::{AccessMethod, AccessMethodType};
use crate::crypto::keys::SecretKey;
use crate::errors::{AetherVaultError, Result};

pub use certificate::{CertificateConfig, CertificateInfo};
pub use passphrase::PassphraseConfig;
pub use runtime::RuntimeKey;

/// How a requested access method protects the data key.
pub enum AccessMethodSpec {
    Passphrase {
        passphrase: Zeroizing<String>,
        iterations: Option<u32>,
    },
    Runtime,
    Certificate {
        certificate_path: PathBuf,
    },
}

impl AccessMethodSpec {
    pub fn method_type(&self) -> AccessMethodType {
        match self {
            Self::Passphrase { .. } => AccessMethodType::Passphrase,
            Self::Runtime => AccessMethodType::Runtime,
            Self::Certificate { .. } => AccessMethodType::Certificate,
        }
    }

    /// Parse the shorthand `passphrase`, `runtime` or `certificate:<file>`.
    ///
    /// The passphrase itself is never part of the descriptor; it is passed
    /// separately and required for the passphrase type.
    pub fn parse(descriptor: &str, passphrase: Option<Zeroizing<String>>) -> Result<Self> {
        let (kind, arg) = match descriptor.split_once(':') {
            Some((kind, arg)) => (kind, Some(arg)),
            None => (descriptor, None),
        };

        match kind.parse::<AccessMethodType>()? {
            AccessMethodType::Passphrase => {
                let passphrase = passphrase.ok_or_else(|| {
                    AetherVaultError::InvalidInput("passphrase method requires a passphrase".into())
                })?;
                if passphrase.is_empty() {
                    return Err(AetherVaultError::InvalidInput(
                        "passphrase cannot be empty".into(),
                    ));
                }
                Ok(Self::Passphrase {
                    passphrase,
                    iterations: None,
                })
            }
            AccessMethodType::Runtime => Ok(Self::Runtime),
            AccessMethodType::Certificate => match arg {
                Some(file) if !file.is_empty() => Ok(Self::Certificate {
                    certificate_path: PathBuf::from(file),
                }),
                _ => Err(AetherVaultError::InvalidInput(
                    "certificate method requires a certificate file".into(),
                )),
            },
            AccessMethodType::Policy => Err(AetherVaultError::InvalidInput(
                "policy is not a key-wrapping access method".into(),
            )),
        }
    }
}

impl fmt::Debug for AccessMethodSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passphrase { iterations, .. } => f
                .debug_struct("Passphrase")
                .field("passphrase", &"<redacted>")
                .field("iterations", iterations)
                .finish(),
            Self::Runtime => f.write_str("Runtime"),
            Self::Certificate { certificate_path } => f
                .debug_struct("Certificate")
                .field("certificate_path", certificate_path)
                .finish(),
        }
    }
}

/// One access method to create during `Encrypt`.
#[derive(Debug)]
pub struct AccessMethodRequest {
    pub name: String,
    pub spec: AccessMethodSpec,
}

impl AccessMethodRequest {
    pub fn new(name: impl Into<String>, spec: AccessMethodSpec) -> Self {
        Self {
            name: name.into(),
            spec,
        }
    }

    /// A passphrase method named `passphrase`.
    pub fn passphrase(passphrase: impl Into<String>) -> Self {
        Self::new(
            "passphrase",
            AccessMethodSpec::Passphrase {
                passphrase: Zeroizing::new(passphrase.into()),
                iterations: None,
            },
        )
    }

    /// A runtime method named `runtime`.
    pub fn runtime() -> Self {
        Self::new("runtime", AccessMethodSpec::Runtime)
    }

    /// A certificate method named `certificate-<file name>`.
    pub fn certificate(path: impl Into<PathBuf>) -> Self {
        let certificate_path = path.into();
        let file = certificate_path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::new(
            format!("certificate-{file}"),
            AccessMethodSpec::Certificate { certificate_path },
        )
    }

    /// Override the PBKDF2 iteration count of a passphrase request.
    pub fn with_iterations(mut self, count: u32) -> Self {
        if let AccessMethodSpec::Passphrase { iterations, .. } = &mut self.spec {
            *iterations = Some(count);
        }
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Unlocking material supplied to `Decrypt`.
pub enum Unlock {
    Passphrase(Zeroizing<String>),
    Runtime,
    Certificate { private_key_path: PathBuf },
}

impl Unlock {
    pub fn passphrase(passphrase: impl Into<String>) -> Self {
        Self::Passphrase(Zeroizing::new(passphrase.into()))
    }

    pub fn method_type(&self) -> AccessMethodType {
        match self {
            Self::Passphrase(_) => AccessMethodType::Passphrase,
            Self::Runtime => AccessMethodType::Runtime,
            Self::Certificate { .. } => AccessMethodType::Certificate,
        }
    }
}

impl fmt::Debug for Unlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passphrase(_) => f.write_str("Passphrase(<redacted>)"),
            Self::Runtime => f.write_str("Runtime"),
            Self::Certificate { private_key_path } => f
                .debug_struct("Certificate")
                .field("private_key_path", private_key_path)
                .finish(),
        }
    }
}

/// Wrap `data_key` according to `request`, producing the stored record.
pub(crate) fn create_method(
    request: &AccessMethodRequest,
    data_key: &SecretKey,
    runtime_key: &RuntimeKey,
    artifact_id: Uuid,
    now: DateTime<Utc>,
) -> Result<AccessMethod> {
    let (config, wrapped, key_id) = match &request.spec {
        AccessMethodSpec::Passphrase {
            passphrase,
            iterations,
        } => {
            if passphrase.is_empty() {
                return Err(AetherVaultError::InvalidInput(
                    "passphrase cannot be empty".into(),
                ));
            }
            let (config, wrapped) = passphrase::wrap(data_key, passphrase, *iterations)?;
            (to_config_json(&config)?, wrapped, String::new())
        }
        AccessMethodSpec::Runtime => ("{}".to_string(), runtime_key.wrap(data_key)?, String::new()),
        AccessMethodSpec::Certificate { certificate_path } => {
            let cert = certificate::load_certificate(certificate_path)?;
            let (config, wrapped) = certificate::wrap(data_key, &cert)?;
            (to_config_json(&config)?, wrapped, cert.key_id)
        }
    };

    Ok(AccessMethod {
        id: Uuid::new_v4(),
        artifact_id,
        method_type: request.spec.method_type(),
        name: request.name.clone(),
        config,
        encrypted_key: BASE64.encode(wrapped),
        key_id,
        is_active: true,
        created_at: now,
        updated_at: now,
    })
}

/// Recover the data key from one stored method.
///
/// The caller has already matched `unlock` to `method` by type.
pub(crate) fn unwrap_data_key(
    method: &AccessMethod,
    unlock: &Unlock,
    runtime_key: &RuntimeKey,
) -> Result<SecretKey> {
    let wrapped = BASE64
        .decode(&method.encrypted_key)
        .map_err(|e| AetherVaultError::MalformedMetadata(format!("wrapped key: {e}")))?;

    match (method.method_type, unlock) {
        (AccessMethodType::Passphrase, Unlock::Passphrase(passphrase)) => {
            let config: PassphraseConfig = from_config_json(&method.config)?;
            passphrase::unwrap(&config, &wrapped, passphrase)
        }
        (AccessMethodType::Runtime, Unlock::Runtime) => runtime_key.unwrap(&wrapped),
        (AccessMethodType::Certificate, Unlock::Certificate { private_key_path }) => {
            let config: CertificateConfig = from_config_json(&method.config)?;
            let private_key = certificate::load_private_key(private_key_path)?;
            certificate::unwrap(&config, &wrapped, &private_key)
        }
        (stored, _) => Err(AetherVaultError::MethodNotFound(stored)),
    }
}

/// The one message every failed unwrap reports.
pub(crate) fn unlock_failed() -> AetherVaultError {
    AetherVaultError::AccessDenied("supplied credentials did not unlock the data key".into())
}

fn to_config_json<T: Serialize>(config: &T) -> Result<String> {
    serde_json::to_string(config)
        .map_err(|e| AetherVaultError::SerializationError(format!("method config: {e}")))
}

fn from_config_json<T: DeserializeOwned>(json: &str) -> Result<T> {
    serde_json::from_str(json)
        .map_err(|e| AetherVaultError::MalformedMetadata(format!("method config: {e}")))
}

// ---------------------------------------------------------------------------
// Serde helpers for base64-encoded Vec<u8> fields
// ---------------------------------------------------------------------------

pub(crate) fn base64_encode<S>(data: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&BASE64.encode(data))
}

pub(crate) fn base64_decode<'de, D>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    BASE64.decode(&s).map_err(serde::de::Error::custom)
}
