//! The encryption service: turns a file or directory into a `.ava`
//! artifact and back.
//!
//! `EncryptionService` holds only the runtime master key, derived once at
//! construction. Every `encrypt`/`decrypt` call is self-contained; scratch
//! space is scoped to the call and removed on every exit path.

pub mod request;

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::access::{self, unlock_failed, RuntimeKey};
use crate::archive;
use crate::artifact::{self, EncryptedArtifact, SourceKind, FORMAT_VERSION};
use crate::config::EngineConfig;
use crate::crypto::keys::SecretKey;
use crate::crypto::{self, hash_data_key, verify_data_key_hash, ALGORITHM};
use crate::errors::{AetherVaultError, ErrorKind, Phase, PhaseExt, Result};
use crate::policy::{self, PolicyDecision};

pub use request::{DecryptionRequest, DecryptionResult, EncryptionRequest, EncryptionResult};

/// Content recovery either yields plaintext or a reason it was refused.
enum Opened {
    Plaintext(Zeroizing<Vec<u8>>),
    Rejected(String),
}

/// Encrypts and decrypts artifacts under one engine configuration.
#[derive(Debug)]
pub struct EncryptionService {
    runtime_key: RuntimeKey,
}

impl EncryptionService {
    /// Derive the runtime master key from `config`.
    pub fn new(config: &EngineConfig) -> Result<Self> {
        if config.master_secret.is_empty() {
            return Err(AetherVaultError::ConfigError(
                "master secret must not be empty".into(),
            ));
        }

        let runtime_key = RuntimeKey::derive(
            &config.master_secret,
            config.kdf_salt.as_bytes(),
            config.kdf_iterations,
        )
        .map_err(|e| AetherVaultError::ConfigError(e.to_string()))?;

        Ok(Self { runtime_key })
    }

    // ------------------------------------------------------------------
    // Encrypt
    // ------------------------------------------------------------------

    /// Archive, encrypt and wrap `request.source_path` into a container
    /// at `request.output_path`.
    pub fn encrypt(&self, request: &EncryptionRequest) -> Result<EncryptionResult> {
        if request.access_methods.is_empty() {
            return Err(AetherVaultError::NoAccessMethods);
        }
        let source_kind = match fs::metadata(&request.source_path) {
            Ok(meta) if meta.is_dir() => SourceKind::Directory,
            Ok(_) => SourceKind::File,
            Err(_) => {
                return Err(AetherVaultError::SourceNotFound(
                    request.source_path.clone(),
                ))
            }
        };
        check_unique_names(request)?;

        let artifact_id = Uuid::new_v4();
        let now = Utc::now();

        // 1. Fresh data key for this artifact only.
        let data_key = SecretKey::generate();

        // 2. Archive the source.
        let archived = Zeroizing::new(
            archive::pack(&request.source_path, request.compression).phase(Phase::Archive)?,
        );
        debug!(%artifact_id, bytes = archived.len(), compressed = request.compression, "source archived");

        // 3. Encrypt the archive.
        let content =
            crypto::seal(&data_key, &archived).phase(Phase::ContentEncryption)?;

        // 4. Wrap the data key once per access method.
        let access_methods = request
            .access_methods
            .iter()
            .map(|m| access::create_method(m, &data_key, &self.runtime_key, artifact_id, now))
            .collect::<Result<Vec<_>>>()
            .phase(Phase::AccessMethod)?;

        // 5. Attach policies.
        let policies = request
            .policies
            .iter()
            .map(|p| policy::create_policy(p, artifact_id, now))
            .collect();

        // 6. Assemble the record and write the container.
        let artifact = EncryptedArtifact {
            id: artifact_id,
            user_id: request.owner,
            name: source_name(&request.source_path),
            description: request.description.clone(),
            file_path: request.output_path.display().to_string(),
            original_path: request.source_path.display().to_string(),
            source_kind,
            algorithm: ALGORITHM.to_string(),
            version: FORMAT_VERSION.to_string(),
            data_key_hash: hash_data_key(&data_key),
            content_size: archived.len() as u64,
            is_active: true,
            created_at: now,
            updated_at: now,
            access_methods,
            policies,
        };
        let encrypted_size = artifact::write_artifact(&request.output_path, &artifact, &content)
            .phase(Phase::Container)?;

        info!(
            %artifact_id,
            methods = artifact.access_methods.len(),
            policies = artifact.policies.len(),
            original_size = artifact.content_size,
            encrypted_size,
            "artifact encrypted"
        );

        // 7. Summarize.
        Ok(EncryptionResult {
            artifact_id,
            file_path: request.output_path.clone(),
            original_size: artifact.content_size,
            encrypted_size,
            algorithm: artifact.algorithm.clone(),
            access_method_names: artifact.method_names(),
            policy_names: artifact.policy_names(),
            created_at: now,
        })
    }

    // ------------------------------------------------------------------
    // Decrypt
    // ------------------------------------------------------------------

    /// Unlock and unpack an artifact.
    ///
    /// Returns `Err` when decryption could not be attempted (unreadable or
    /// malformed container, existing output without `force`, I/O failure
    /// while unpacking). A refused attempt (no matching method, wrong
    /// credentials, policy denial, tampered content) is `Ok` with
    /// `success == false` and a reason.
    pub fn decrypt(&self, request: &DecryptionRequest) -> Result<DecryptionResult> {
        if !request.force && fs::symlink_metadata(&request.output_path).is_ok() {
            return Err(AetherVaultError::OutputExists(request.output_path.clone()));
        }

        // 1. Read the container.
        let raw = artifact::read_artifact(&request.artifact_path).phase(Phase::Container)?;
        let artifact = raw.artifact;

        // 2-5. Unlock, check policies, decrypt content.
        let plaintext = match self.open_content(&artifact, &raw.content, request)? {
            Opened::Plaintext(plaintext) => plaintext,
            Opened::Rejected(reason) => {
                warn!(
                    artifact_id = %artifact.id,
                    method = %request.unlock.method_type(),
                    %reason,
                    "decryption refused"
                );
                return Ok(DecryptionResult::rejected(&artifact, request, reason));
            }
        };

        // 6. Unpack through a staging directory.
        unpack_to(
            &plaintext,
            &request.output_path,
            artifact.source_kind,
            request.force,
        )
        .phase(Phase::Unpack)?;

        info!(
            artifact_id = %artifact.id,
            method = %request.unlock.method_type(),
            bytes = plaintext.len(),
            "artifact decrypted"
        );

        // 7. Summarize.
        Ok(DecryptionResult {
            artifact_id: artifact.id,
            file_path: request.output_path.clone(),
            original_size: artifact.content_size,
            decrypted_size: plaintext.len() as u64,
            method_type: request.unlock.method_type(),
            success: true,
            reason: None,
            created_at: Utc::now(),
        })
    }

    fn open_content(
        &self,
        artifact: &EncryptedArtifact,
        content: &[u8],
        request: &DecryptionRequest,
    ) -> Result<Opened> {
        let method_type = request.unlock.method_type();

        // 2. Find the active method of the requested type.
        let Some(method) = artifact.active_method(method_type) else {
            return Ok(rejected(AetherVaultError::MethodNotFound(method_type)));
        };

        // 3. Unwrap and confirm it is this artifact's data key.
        let data_key = match access::unwrap_data_key(method, &request.unlock, &self.runtime_key) {
            Ok(key) => key,
            Err(e) if is_refusal(&e) => return Ok(rejected(e)),
            Err(e) => return Err(e.in_phase(Phase::AccessMethod)),
        };
        if !verify_data_key_hash(&data_key, &artifact.data_key_hash) {
            return Ok(rejected(unlock_failed()));
        }
        debug!(artifact_id = %artifact.id, method = %method_type, "data key unwrapped");

        // 4. Policies gate decryption once the key is known.
        if let PolicyDecision::Denied(reason) =
            policy::validate(&artifact.policies, artifact.created_at, &request.context)
        {
            return Ok(rejected(AetherVaultError::PolicyViolation(reason)));
        }

        // 5. Decrypt and check the recorded size.
        let plaintext = match crypto::open(&data_key, content) {
            Ok(plain) => Zeroizing::new(plain),
            Err(e) => return Ok(rejected(e)),
        };
        if plaintext.len() as u64 != artifact.content_size {
            return Ok(rejected(AetherVaultError::InvalidFormat(format!(
                "decrypted {} bytes, artifact records {}",
                plaintext.len(),
                artifact.content_size
            ))));
        }

        Ok(Opened::Plaintext(plaintext))
    }
}

fn rejected(err: AetherVaultError) -> Opened {
    Opened::Rejected(err.to_string())
}

fn is_refusal(err: &AetherVaultError) -> bool {
    matches!(err.kind(), ErrorKind::AccessDenied | ErrorKind::Crypto)
}

fn check_unique_names(request: &EncryptionRequest) -> Result<()> {
    let mut seen = HashSet::new();
    for name in request.access_methods.iter().map(|m| &m.name) {
        if !seen.insert(name) {
            return Err(AetherVaultError::InvalidInput(format!(
                "duplicate access method name '{name}'"
            )));
        }
    }
    Ok(())
}

fn source_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

// ---------------------------------------------------------------------------
// Output staging
// ---------------------------------------------------------------------------

/// Unpack `archived` into a scratch directory beside `output`, then move
/// the result into place. Nothing is left behind on failure.
///
/// A directory artifact becomes the directory `output`; a file artifact
/// becomes the file `output`.
fn unpack_to(archived: &[u8], output: &Path, kind: SourceKind, force: bool) -> Result<()> {
    let parent = match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let scratch = tempfile::Builder::new()
        .prefix(".ava-unpack-")
        .tempdir_in(parent)?;
    let unpacked = scratch.path().join("out");
    archive::unpack(archived, &unpacked)?;

    let staged = match kind {
        SourceKind::Directory => unpacked,
        SourceKind::File => only_file(&unpacked)?,
    };

    match fs::symlink_metadata(output) {
        Err(_) => fs::rename(&staged, output)?,
        Ok(meta) if meta.is_dir() && force && kind == SourceKind::Directory => {
            merge_into(&staged, output)?
        }
        Ok(meta) if !meta.is_dir() && force => {
            fs::remove_file(output)?;
            fs::rename(&staged, output)?;
        }
        Ok(_) => return Err(AetherVaultError::OutputExists(output.to_path_buf())),
    }
    Ok(())
}

/// The one regular file a file artifact unpacks to.
fn only_file(dir: &Path) -> Result<PathBuf> {
    let entries = fs::read_dir(dir)?.collect::<std::io::Result<Vec<_>>>()?;
    match entries.as_slice() {
        [entry] if entry.file_type()?.is_file() => Ok(entry.path()),
        _ => Err(AetherVaultError::InvalidFormat(format!(
            "file artifact unpacked to {} entries instead of one file",
            entries.len()
        ))),
    }
}

/// Move every entry of `from` into `into`, replacing what is there.
///
/// Directories are merged rather than moved, and get the unpacked mode
/// only after their contents are in place.
fn merge_into(from: &Path, into: &Path) -> Result<()> {
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let source = entry.path();
        let target = into.join(entry.file_name());
        let is_dir = entry.file_type()?.is_dir();

        match fs::symlink_metadata(&target) {
            Ok(meta) if meta.is_dir() && is_dir => {}
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(&target)?,
            Ok(_) => fs::remove_file(&target)?,
            Err(_) => {}
        }

        if is_dir {
            let mode = fs::metadata(&source)?.permissions();
            fs::create_dir_all(&target)?;
            make_writable(&source)?;
            make_writable(&target)?;
            merge_into(&source, &target)?;
            fs::set_permissions(&target, mode)?;
        } else {
            fs::rename(&source, &target)?;
        }
    }
    Ok(())
}

/// Give the owner enough access to add and remove entries in `dir`.
#[cfg(unix)]
fn make_writable(dir: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mode = fs::metadata(dir)?.permissions().mode();
    if mode & 0o300 != 0o300 {
        fs::set_permissions(dir, fs::Permissions::from_mode(mode | 0o300))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn make_writable(_dir: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{AccessMethodRequest, Unlock};
    use tempfile::TempDir;

    fn service() -> EncryptionService {
        EncryptionService::new(&EngineConfig::new("unit-master", "unit-salt", 1_000)).unwrap()
    }

    #[test]
    fn new_rejects_unusable_config() {
        let empty = EngineConfig::new("", "salt", 1_000);
        assert!(matches!(
            EncryptionService::new(&empty),
            Err(AetherVaultError::ConfigError(_))
        ));

        let weak = EngineConfig::new("master", "salt", 10);
        assert!(matches!(
            EncryptionService::new(&weak),
            Err(AetherVaultError::ConfigError(_))
        ));
    }

    #[test]
    fn duplicate_method_names_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("a.txt");
        fs::write(&src, "a").unwrap();

        let request = EncryptionRequest::new(&src, tmp.path().join("a.ava"))
            .with_method(AccessMethodRequest::runtime())
            .with_method(AccessMethodRequest::runtime());
        let err = service().encrypt(&request).unwrap_err();
        assert!(matches!(err, AetherVaultError::InvalidInput(_)));
        assert!(!tmp.path().join("a.ava").exists());
    }

    #[test]
    fn force_merges_into_existing_directory() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        fs::create_dir_all(src.join("sub")).unwrap();
        fs::write(src.join("sub/new.txt"), "new").unwrap();
        fs::write(src.join("keep.txt"), "from artifact").unwrap();

        let svc = service();
        let ava = tmp.path().join("src.ava");
        svc.encrypt(
            &EncryptionRequest::new(&src, &ava).with_method(AccessMethodRequest::runtime()),
        )
        .unwrap();

        let out = tmp.path().join("out");
        fs::create_dir_all(out.join("sub")).unwrap();
        fs::write(out.join("keep.txt"), "stale").unwrap();
        fs::write(out.join("sub/untouched.txt"), "mine").unwrap();

        let result = svc
            .decrypt(&DecryptionRequest::new(&ava, &out, Unlock::Runtime).with_force(true))
            .unwrap();
        assert!(result.success);
        assert_eq!(fs::read_to_string(out.join("keep.txt")).unwrap(), "from artifact");
        assert_eq!(fs::read_to_string(out.join("sub/new.txt")).unwrap(), "new");
        assert_eq!(fs::read_to_string(out.join("sub/untouched.txt")).unwrap(), "mine");
    }

    #[test]
    fn no_scratch_directories_are_left_behind() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("f.txt");
        fs::write(&src, "data").unwrap();

        let svc = service();
        let ava = tmp.path().join("f.ava");
        svc.encrypt(&EncryptionRequest::new(&src, &ava).with_method(AccessMethodRequest::runtime()))
            .unwrap();
        svc.decrypt(&DecryptionRequest::new(&ava, tmp.path().join("out"), Unlock::Runtime))
            .unwrap();

        let leftovers: Vec<_> = fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with(".ava-unpack-") || n.starts_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "{leftovers:?}");
    }

    fn runtime_artifact(svc: &EncryptionService, src: &Path, ava: &Path) {
        svc.encrypt(&EncryptionRequest::new(src, ava).with_method(AccessMethodRequest::runtime()))
            .unwrap();
    }

    #[test]
    fn file_artifact_decrypts_to_the_output_path_itself() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("notes.txt");
        fs::write(&src, "first").unwrap();

        let svc = service();
        let ava = tmp.path().join("notes.ava");
        runtime_artifact(&svc, &src, &ava);

        let out = tmp.path().join("restored.txt");
        let result = svc
            .decrypt(&DecryptionRequest::new(&ava, &out, Unlock::Runtime))
            .unwrap();
        assert!(result.success);
        assert!(out.is_file());
        assert_eq!(fs::read_to_string(&out).unwrap(), "first");

        // force replaces an existing file
        fs::write(&out, "stale").unwrap();
        svc.decrypt(&DecryptionRequest::new(&ava, &out, Unlock::Runtime).with_force(true))
            .unwrap();
        assert_eq!(fs::read_to_string(&out).unwrap(), "first");
    }

    #[test]
    fn file_artifact_never_replaces_a_directory() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("notes.txt");
        fs::write(&src, "data").unwrap();

        let svc = service();
        let ava = tmp.path().join("notes.ava");
        runtime_artifact(&svc, &src, &ava);

        let out = tmp.path().join("dir");
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join("mine.txt"), "mine").unwrap();

        let err = svc
            .decrypt(&DecryptionRequest::new(&ava, &out, Unlock::Runtime).with_force(true))
            .unwrap_err();
        assert!(matches!(err.root(), AetherVaultError::OutputExists(_)));
        assert_eq!(fs::read_to_string(out.join("mine.txt")).unwrap(), "mine");
    }

    #[cfg(unix)]
    #[test]
    fn read_only_directories_decrypt_and_merge() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        fs::create_dir_all(src.join("ro")).unwrap();
        fs::write(src.join("ro/inside.txt"), "kept").unwrap();
        fs::set_permissions(src.join("ro"), fs::Permissions::from_mode(0o555)).unwrap();

        let svc = service();
        let ava = tmp.path().join("src.ava");
        runtime_artifact(&svc, &src, &ava);

        let out = tmp.path().join("out");
        let fresh = svc.decrypt(&DecryptionRequest::new(&ava, &out, Unlock::Runtime));
        let merged = svc
            .decrypt(&DecryptionRequest::new(&ava, &out, Unlock::Runtime).with_force(true));
        let mode = fs::metadata(out.join("ro")).map(|m| m.permissions().mode() & 0o777);
        let text = fs::read_to_string(out.join("ro/inside.txt"));

        for dir in [src.join("ro"), out.join("ro")] {
            if dir.exists() {
                fs::set_permissions(&dir, fs::Permissions::from_mode(0o755)).unwrap();
            }
        }

        assert!(fresh.unwrap().success);
        assert!(merged.unwrap().success);
        assert_eq!(mode.unwrap(), 0o555);
        assert_eq!(text.unwrap(), "kept");
    }
}
