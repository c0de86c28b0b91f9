//! Inputs and outputs of the encryption service.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::access::{AccessMethodRequest, Unlock};
use crate::artifact::{AccessMethodType, EncryptedArtifact};
use crate::policy::{PolicyRequest, RequestContext};

/// What to encrypt, where to put it, and how it may be unlocked.
#[derive(Debug)]
pub struct EncryptionRequest {
    pub source_path: PathBuf,
    pub output_path: PathBuf,
    pub access_methods: Vec<AccessMethodRequest>,
    pub policies: Vec<PolicyRequest>,
    pub description: String,
    pub compression: bool,
    /// Recorded as the artifact's `user_id`.
    pub owner: Uuid,
}

impl EncryptionRequest {
    pub fn new(source_path: impl Into<PathBuf>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            source_path: source_path.into(),
            output_path: output_path.into(),
            access_methods: Vec::new(),
            policies: Vec::new(),
            description: String::new(),
            compression: true,
            owner: Uuid::nil(),
        }
    }

    pub fn with_method(mut self, method: AccessMethodRequest) -> Self {
        self.access_methods.push(method);
        self
    }

    pub fn with_policy(mut self, policy: PolicyRequest) -> Self {
        self.policies.push(policy);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_compression(mut self, compression: bool) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_owner(mut self, owner: Uuid) -> Self {
        self.owner = owner;
        self
    }
}

/// Which artifact to open, with what, and into where.
#[derive(Debug)]
pub struct DecryptionRequest {
    pub artifact_path: PathBuf,
    pub output_path: PathBuf,
    pub unlock: Unlock,
    /// Replace an existing output file, or merge into an existing output
    /// directory, instead of failing with `OutputExists`.
    pub force: bool,
    pub context: RequestContext,
}

impl DecryptionRequest {
    pub fn new(
        artifact_path: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
        unlock: Unlock,
    ) -> Self {
        Self {
            artifact_path: artifact_path.into(),
            output_path: output_path.into(),
            unlock,
            force: false,
            context: RequestContext::default(),
        }
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }
}

/// Summary of a completed `encrypt`.
#[derive(Debug, Clone, Serialize)]
pub struct EncryptionResult {
    pub artifact_id: Uuid,
    pub file_path: PathBuf,
    /// Length of the (possibly compressed) archive before encryption.
    pub original_size: u64,
    /// Size of the container file on disk.
    pub encrypted_size: u64,
    pub algorithm: String,
    pub access_method_names: Vec<String>,
    pub policy_names: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Outcome of a `decrypt` that got as far as reading the artifact.
#[derive(Debug, Clone, Serialize)]
pub struct DecryptionResult {
    pub artifact_id: Uuid,
    pub file_path: PathBuf,
    pub original_size: u64,
    pub decrypted_size: u64,
    pub method_type: AccessMethodType,
    pub success: bool,
    /// Why decryption was refused; `None` on success.
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl DecryptionResult {
    pub(crate) fn rejected(
        artifact: &EncryptedArtifact,
        request: &DecryptionRequest,
        reason: String,
    ) -> Self {
        Self {
            artifact_id: artifact.id,
            file_path: request.output_path.clone(),
            original_size: artifact.content_size,
            decrypted_size: 0,
            method_type: request.unlock.method_type(),
            success: false,
            reason: Some(reason),
            created_at: Utc::now(),
        }
    }
}
