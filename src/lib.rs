pub mod access;
pub mod archive;
pub mod artifact;
pub mod config;
pub mod crypto;
pub mod errors;
pub mod policy;
pub mod service;

pub use access::{AccessMethodRequest, AccessMethodSpec, Unlock};
pub use config::{EngineConfig, Settings};
pub use errors::{AetherVaultError, ErrorKind, Phase, Result};
pub use policy::{PolicyDecision, PolicyRequest, PolicyRule, RequestContext};
pub use service::{
    DecryptionRequest, DecryptionResult, EncryptionRequest, EncryptionResult, EncryptionService,
};
