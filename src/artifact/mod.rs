//! Artifact module: the metadata record and the on-disk container.
//!
//! This module provides:
//! - `EncryptedArtifact`, `AccessMethod` and `EncryptionPolicy` records (`record`)
//! - The binary `.ava` container codec (`format`)

pub mod format;
pub mod record;

pub use format::{decode, encode, inspect, read_artifact, write_artifact, RawArtifact, MAGIC};
pub use record::{
    AccessMethod, AccessMethodType, EncryptedArtifact, EncryptionPolicy, PolicyType,
    SourceKind, FORMAT_VERSION,
};
