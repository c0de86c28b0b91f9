use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::artifact::AccessMethodType;

/// All errors that can occur in the artifact engine.
#[derive(Debug, Error)]
pub enum AetherVaultError {
    // --- Input errors ---
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Source path does not exist: {0}")]
    SourceNotFound(PathBuf),

    #[error("At least one access method is required")]
    NoAccessMethods,

    #[error("Output path already exists: {0} (use force to overwrite)")]
    OutputExists(PathBuf),

    // --- Format errors ---
    #[error("Invalid artifact format: {0}")]
    InvalidFormat(String),

    #[error("Truncated metadata: header declares {expected} bytes, only {available} present")]
    TruncatedMetadata { expected: usize, available: usize },

    #[error("Malformed artifact metadata: {0}")]
    MalformedMetadata(String),

    // --- Crypto errors ---
    /// Deliberately carries no detail: tag failures on content and on
    /// wrapped keys must look identical to the caller.
    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    // --- Access errors ---
    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("No active access method of type '{0}'")]
    MethodNotFound(AccessMethodType),

    #[error("Certificate error: {0}")]
    Certificate(String),

    // --- Policy errors ---
    #[error("Policy violation: {0}")]
    PolicyViolation(String),

    // --- Config errors ---
    #[error("Config error: {0}")]
    ConfigError(String),

    // --- IO errors ---
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    // --- Orchestration ---
    #[error("{phase} failed: {source}")]
    Phased {
        phase: Phase,
        #[source]
        source: Box<AetherVaultError>,
    },
}

/// Coarse error category, stable across variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    Format,
    Crypto,
    AccessDenied,
    PolicyViolation,
    Io,
    Config,
}

/// Pipeline stage an orchestrated error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Archive,
    ContentEncryption,
    AccessMethod,
    Policy,
    Container,
    ContentDecryption,
    Unpack,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Archive => "archive",
            Phase::ContentEncryption => "content encryption",
            Phase::AccessMethod => "access method",
            Phase::Policy => "policy",
            Phase::Container => "container",
            Phase::ContentDecryption => "content decryption",
            Phase::Unpack => "unpack",
        };
        f.write_str(name)
    }
}

impl AetherVaultError {
    /// Category of this error, looking through phase context.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_)
            | Self::SourceNotFound(_)
            | Self::NoAccessMethods
            | Self::OutputExists(_)
            | Self::Certificate(_) => ErrorKind::InvalidInput,
            Self::InvalidFormat(_) | Self::TruncatedMetadata { .. } | Self::MalformedMetadata(_) => {
                ErrorKind::Format
            }
            Self::AuthenticationFailed
            | Self::EncryptionFailed(_)
            | Self::KeyDerivationFailed(_) => ErrorKind::Crypto,
            Self::AccessDenied(_) | Self::MethodNotFound(_) => ErrorKind::AccessDenied,
            Self::PolicyViolation(_) => ErrorKind::PolicyViolation,
            Self::ConfigError(_) => ErrorKind::Config,
            Self::Io(_) | Self::SerializationError(_) => ErrorKind::Io,
            Self::Phased { source, .. } => source.kind(),
        }
    }

    /// The innermost error, with all phase context stripped.
    pub fn root(&self) -> &AetherVaultError {
        match self {
            Self::Phased { source, .. } => source.root(),
            other => other,
        }
    }

    /// The phase this error was attributed to, if any.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Self::Phased { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    pub(crate) fn in_phase(self, phase: Phase) -> Self {
        match self {
            already @ Self::Phased { .. } => already,
            other => Self::Phased {
                phase,
                source: Box::new(other),
            },
        }
    }
}

/// Attach a pipeline phase to the error side of a result.
pub(crate) trait PhaseExt<T> {
    fn phase(self, phase: Phase) -> Result<T>;
}

impl<T> PhaseExt<T> for Result<T> {
    fn phase(self, phase: Phase) -> Result<T> {
        self.map_err(|e| e.in_phase(phase))
    }
}

/// Convenience type alias for engine results.
pub type Result<T> = std::result::Result<T, AetherVaultError>;
