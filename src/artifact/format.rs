//! Binary `.ava` container format.
//!
//! A container has this layout (integers big-endian):
//!
//! ```text
//! [AVA\0: 4 bytes][metadata_len: 4 bytes BE][metadata JSON][nonce: 12 bytes][ciphertext + tag]
//! ```
//!
//! - **Magic** (`AVA\0`): identifies the file as an Aether Vault artifact.
//! - **Metadata length**: big-endian u32 telling us where the JSON ends.
//! - **Metadata JSON**: serialized `EncryptedArtifact`, including its
//!   access methods and policies.
//! - **Content**: the AES-256-GCM blob produced by `crypto::seal`.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

use tempfile::NamedTempFile;

use super::record::EncryptedArtifact;
use crate::errors::{AetherVaultError, Result};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Magic bytes at the start of every container.
pub const MAGIC: &[u8; 4] = b"AVA\0";

/// Fixed-size prefix: 4 (magic) + 4 (metadata_len).
pub const PREFIX_LEN: usize = 8;

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Serialize an artifact record and its encrypted content into one buffer.
pub fn encode(artifact: &EncryptedArtifact, content: &[u8]) -> Result<Vec<u8>> {
    let metadata = serde_json::to_vec(artifact)
        .map_err(|e| AetherVaultError::SerializationError(format!("artifact metadata: {e}")))?;

    let metadata_len = u32::try_from(metadata.len()).map_err(|_| {
        AetherVaultError::SerializationError(format!(
            "metadata length {} exceeds u32::MAX",
            metadata.len()
        ))
    })?;

    let mut buf = Vec::with_capacity(PREFIX_LEN + metadata.len() + content.len());
    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&metadata_len.to_be_bytes());
    buf.extend_from_slice(&metadata);
    buf.extend_from_slice(content);
    Ok(buf)
}

/// A decoded container: the record plus the still-encrypted content blob.
#[derive(Debug)]
pub struct RawArtifact {
    pub artifact: EncryptedArtifact,
    pub content: Vec<u8>,
}

/// Parse a container held in memory.
///
/// The magic is checked before anything else, so a foreign file is
/// rejected without any JSON or cryptographic work.
pub fn decode(data: &[u8]) -> Result<RawArtifact> {
    let metadata_len = parse_prefix(data)?;

    let available = data.len() - PREFIX_LEN;
    if metadata_len > available {
        return Err(AetherVaultError::TruncatedMetadata {
            expected: metadata_len,
            available,
        });
    }

    let metadata_end = PREFIX_LEN + metadata_len;
    let artifact = parse_metadata(&data[PREFIX_LEN..metadata_end])?;

    Ok(RawArtifact {
        artifact,
        content: data[metadata_end..].to_vec(),
    })
}

fn parse_prefix(data: &[u8]) -> Result<usize> {
    if data.len() < MAGIC.len() || &data[..MAGIC.len()] != MAGIC {
        return Err(AetherVaultError::InvalidFormat(
            "missing AVA magic bytes".into(),
        ));
    }
    if data.len() < PREFIX_LEN {
        return Err(AetherVaultError::InvalidFormat(
            "file too small to hold a metadata length".into(),
        ));
    }

    let len_bytes: [u8; 4] = data[4..PREFIX_LEN]
        .try_into()
        .map_err(|_| AetherVaultError::InvalidFormat("bad metadata length".into()))?;
    let metadata_len = u32::from_be_bytes(len_bytes);

    usize::try_from(metadata_len).map_err(|_| {
        AetherVaultError::InvalidFormat(format!(
            "metadata length {metadata_len} exceeds platform address space"
        ))
    })
}

fn parse_metadata(bytes: &[u8]) -> Result<EncryptedArtifact> {
    serde_json::from_slice(bytes).map_err(|e| AetherVaultError::MalformedMetadata(e.to_string()))
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

/// Write a container to `path` **atomically** and return its size.
///
/// The bytes go to a temp file in the same directory which is renamed
/// over the target; if anything fails the temp file is removed on drop.
pub fn write_artifact(path: &Path, artifact: &EncryptedArtifact, content: &[u8]) -> Result<u64> {
    let buf = encode(artifact, content)?;

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(&buf)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| AetherVaultError::Io(e.error))?;

    Ok(buf.len() as u64)
}

/// Read and decode the container at `path`.
pub fn read_artifact(path: &Path) -> Result<RawArtifact> {
    let data = fs::read(path)?;
    decode(&data)
}

/// Read only the artifact record, leaving the content on disk.
pub fn inspect(path: &Path) -> Result<EncryptedArtifact> {
    let mut file = File::open(path)?;

    let mut prefix = Vec::with_capacity(PREFIX_LEN);
    (&mut file).take(PREFIX_LEN as u64).read_to_end(&mut prefix)?;
    let metadata_len = parse_prefix(&prefix)?;

    let mut metadata = Vec::new();
    (&mut file)
        .take(metadata_len as u64)
        .read_to_end(&mut metadata)?;
    if metadata.len() < metadata_len {
        return Err(AetherVaultError::TruncatedMetadata {
            expected: metadata_len,
            available: metadata.len(),
        });
    }

    parse_metadata(&metadata)
}
