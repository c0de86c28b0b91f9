//! The artifact record embedded in every container.
//!
//! `EncryptedArtifact` is serialized verbatim as the container's JSON
//! metadata, together with the access methods and policies it owns.
//! Method configuration and policy rules are kept as JSON text so the
//! schema stays stable as new method and rule types appear.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AetherVaultError;

/// Current container format version string.
pub const FORMAT_VERSION: &str = "1.0";

/// How an access method recovers the data key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMethodType {
    Passphrase,
    Certificate,
    Runtime,
    /// Reserved in the schema; no wrapping strategy exists for it.
    Policy,
}

impl AccessMethodType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passphrase => "passphrase",
            Self::Certificate => "certificate",
            Self::Runtime => "runtime",
            Self::Policy => "policy",
        }
    }
}

impl fmt::Display for AccessMethodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessMethodType {
    type Err = AetherVaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "passphrase" | "password" => Ok(Self::Passphrase),
            "certificate" => Ok(Self::Certificate),
            "runtime" => Ok(Self::Runtime),
            "policy" => Ok(Self::Policy),
            other => Err(AetherVaultError::InvalidInput(format!(
                "unsupported access method type: {other}"
            ))),
        }
    }
}

/// Kind of constraint a policy places on decryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyType {
    Ttl,
    Environment,
    Instance,
    Region,
    MultiFactor,
}

impl PolicyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ttl => "ttl",
            Self::Environment => "environment",
            Self::Instance => "instance",
            Self::Region => "region",
            Self::MultiFactor => "multi_factor",
        }
    }
}

impl fmt::Display for PolicyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PolicyType {
    type Err = AetherVaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ttl" => Ok(Self::Ttl),
            "environment" => Ok(Self::Environment),
            "instance" => Ok(Self::Instance),
            "region" => Ok(Self::Region),
            "multi_factor" => Ok(Self::MultiFactor),
            other => Err(AetherVaultError::InvalidInput(format!(
                "unsupported policy type: {other}"
            ))),
        }
    }
}

/// One way to recover the artifact's data key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessMethod {
    pub id: Uuid,
    pub artifact_id: Uuid,

    #[serde(rename = "type")]
    pub method_type: AccessMethodType,

    pub name: String,

    /// Type-specific configuration as JSON text (salt, iterations, key id...).
    pub config: String,

    /// Base64 of `nonce || wrapped data key || tag`.
    pub encrypted_key: String,

    /// Certificate key id; empty for other method types.
    #[serde(default)]
    pub key_id: String,

    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A named constraint checked before decryption is permitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionPolicy {
    pub id: Uuid,
    pub artifact_id: Uuid,
    pub name: String,

    #[serde(rename = "type")]
    pub policy_type: PolicyType,

    /// Rule values as JSON text, e.g. `{"duration":"24h"}`.
    pub rules: String,

    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Whether the artifact was made from a single file or a directory tree.
///
/// A file source decrypts to a file at the output path; a directory
/// source decrypts to a directory there.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    File,
    #[default]
    Directory,
}

/// Metadata for one encrypted artifact; doubles as the container header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedArtifact {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub description: String,
    pub file_path: String,
    pub original_path: String,

    /// Containers written before this field existed unpack as directories.
    #[serde(default)]
    pub source_kind: SourceKind,

    pub algorithm: String,
    pub version: String,

    /// Base64 SHA-256 of the data key. Not secret; used to confirm an unwrap.
    pub data_key_hash: String,

    /// Size of the plaintext archive stream in bytes.
    pub content_size: u64,

    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[serde(default)]
    pub access_methods: Vec<AccessMethod>,

    #[serde(default)]
    pub policies: Vec<EncryptionPolicy>,
}

impl EncryptedArtifact {
    /// The first active access method of the given type.
    pub fn active_method(&self, method_type: AccessMethodType) -> Option<&AccessMethod> {
        self.access_methods
            .iter()
            .find(|m| m.method_type == method_type && m.is_active)
    }

    pub fn method_names(&self) -> Vec<String> {
        self.access_methods.iter().map(|m| m.name.clone()).collect()
    }

    pub fn policy_names(&self) -> Vec<String> {
        self.policies.iter().map(|p| p.name.clone()).collect()
    }
}
