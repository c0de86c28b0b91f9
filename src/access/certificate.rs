//! Certificate access method.
//!
//! The data key is sealed to the X25519 public key carried in an X.509
//! certificate. Wrapping uses a fresh ephemeral X25519 key per artifact;
//! the wrap key is HKDF-SHA256 over the shared secret, salted with both
//! public keys. Unwrapping needs the matching PKCS#8 private key.
//!
//! The certificate is only a carrier for the public key: its signature
//! and validity window are not checked here.

use std::fs;
use std::path::Path;

use hkdf::Hkdf;
use pkcs8::der::asn1::{BitString, OctetStringRef};
use pkcs8::der::{Decode, DecodePem, Encode};
use pkcs8::{ObjectIdentifier, PrivateKeyInfo, SecretDocument};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey, StaticSecret};
use x509_cert::spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned};
use x509_cert::Certificate;
use zeroize::Zeroizing;

use super::{base64_decode, base64_encode, unlock_failed};
use crate::crypto::keys::SecretKey;
use crate::crypto::{unwrap_key, wrap_key};
use crate::errors::{AetherVaultError, Result};

/// id-X25519 (RFC 8410).
pub const X25519_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.101.110");

/// HKDF info string binding derived keys to this use.
const WRAP_INFO: &[u8] = b"aether-vault-certificate-wrap";

/// Hex characters kept from the SPKI digest.
const KEY_ID_LEN: usize = 16;

/// What the engine needs from a recipient certificate.
#[derive(Debug, Clone)]
pub struct CertificateInfo {
    pub key_id: String,
    pub subject: String,
    pub public_key: [u8; 32],
}

/// Stored configuration of a certificate method.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateConfig {
    pub key_id: String,
    #[serde(rename = "certificate_subject")]
    pub subject: String,
    #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
    pub ephemeral_public: Vec<u8>,
}

/// First 16 hex characters of SHA-256 over a DER SubjectPublicKeyInfo.
pub fn key_id(spki_der: &[u8]) -> String {
    let mut id = hex::encode(Sha256::digest(spki_der));
    id.truncate(KEY_ID_LEN);
    id
}

fn x25519_spki_der(public_key: &[u8; 32]) -> Result<Vec<u8>> {
    let spki = SubjectPublicKeyInfoOwned {
        algorithm: AlgorithmIdentifierOwned {
            oid: X25519_OID,
            parameters: None,
        },
        subject_public_key: BitString::from_bytes(public_key)
            .map_err(|e| AetherVaultError::Certificate(e.to_string()))?,
    };
    spki.to_der()
        .map_err(|e| AetherVaultError::Certificate(e.to_string()))
}

/// Read a PEM or DER certificate from disk.
pub fn load_certificate(path: &Path) -> Result<CertificateInfo> {
    let bytes = fs::read(path).map_err(|e| {
        AetherVaultError::Certificate(format!("cannot read {}: {e}", path.display()))
    })?;
    parse_certificate(&bytes)
}

/// Parse a PEM or DER certificate carrying an X25519 public key.
pub fn parse_certificate(bytes: &[u8]) -> Result<CertificateInfo> {
    let cert = if looks_like_pem(bytes) {
        Certificate::from_pem(bytes)
    } else {
        Certificate::from_der(bytes)
    }
    .map_err(|e| AetherVaultError::Certificate(format!("invalid certificate: {e}")))?;

    let tbs = &cert.tbs_certificate;
    let spki = &tbs.subject_public_key_info;
    if spki.algorithm.oid != X25519_OID {
        return Err(AetherVaultError::Certificate(format!(
            "unsupported public key algorithm {}; an X25519 key is required",
            spki.algorithm.oid
        )));
    }

    let public_key: [u8; 32] = spki
        .subject_public_key
        .as_bytes()
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| AetherVaultError::Certificate("malformed X25519 public key".into()))?;

    let spki_der = spki
        .to_der()
        .map_err(|e| AetherVaultError::Certificate(e.to_string()))?;

    Ok(CertificateInfo {
        key_id: key_id(&spki_der),
        subject: tbs.subject.to_string(),
        public_key,
    })
}

/// Read a PKCS#8 (PEM or DER) X25519 private key from disk.
pub fn load_private_key(path: &Path) -> Result<StaticSecret> {
    let bytes = Zeroizing::new(fs::read(path).map_err(|e| {
        AetherVaultError::Certificate(format!("cannot read {}: {e}", path.display()))
    })?);
    parse_private_key(&bytes)
}

/// Parse a PKCS#8 X25519 private key.
pub fn parse_private_key(bytes: &[u8]) -> Result<StaticSecret> {
    let invalid = |e: &dyn std::fmt::Display| {
        AetherVaultError::Certificate(format!("invalid private key: {e}"))
    };

    let pem_doc;
    let der: &[u8] = if looks_like_pem(bytes) {
        let text = std::str::from_utf8(bytes).map_err(|e| invalid(&e))?;
        let (label, doc) = SecretDocument::from_pem(text).map_err(|e| invalid(&e))?;
        if label != "PRIVATE KEY" {
            return Err(invalid(&format!("unexpected PEM label '{label}'")));
        }
        pem_doc = doc;
        pem_doc.as_bytes()
    } else {
        bytes
    };

    let info = PrivateKeyInfo::try_from(der).map_err(|e| invalid(&e))?;
    if info.algorithm.oid != X25519_OID {
        return Err(invalid(&format!(
            "algorithm {} is not X25519",
            info.algorithm.oid
        )));
    }

    // RFC 8410: the private key is itself a DER OCTET STRING.
    let inner = OctetStringRef::from_der(info.private_key).map_err(|e| invalid(&e))?;
    let mut scalar: [u8; 32] = inner
        .as_bytes()
        .try_into()
        .map_err(|_| invalid(&"X25519 private key must be 32 bytes"))?;
    let secret = StaticSecret::from(scalar);
    zeroize::Zeroize::zeroize(&mut scalar);
    Ok(secret)
}

fn looks_like_pem(bytes: &[u8]) -> bool {
    bytes
        .windows(b"-----BEGIN".len())
        .any(|w| w == b"-----BEGIN")
}

fn derive_wrap_key(shared: &[u8; 32], ephemeral: &[u8; 32], recipient: &[u8; 32]) -> Result<SecretKey> {
    let mut salt = [0u8; 64];
    salt[..32].copy_from_slice(ephemeral);
    salt[32..].copy_from_slice(recipient);

    let hk = Hkdf::<Sha256>::new(Some(&salt[..]), shared);
    let mut key = SecretKey::zeroed();
    hk.expand(WRAP_INFO, key.as_mut_bytes())
        .map_err(|e| AetherVaultError::KeyDerivationFailed(format!("HKDF expand failed: {e}")))?;
    Ok(key)
}

/// Seal `data_key` to the certificate's public key.
pub fn wrap(data_key: &SecretKey, cert: &CertificateInfo) -> Result<(CertificateConfig, Vec<u8>)> {
    let mut ephemeral_bytes = Zeroizing::new([0u8; 32]);
    rand::rng().fill_bytes(&mut *ephemeral_bytes);
    let ephemeral = StaticSecret::from(*ephemeral_bytes);
    let ephemeral_public = PublicKey::from(&ephemeral);

    let shared = ephemeral.diffie_hellman(&PublicKey::from(cert.public_key));
    if !shared.was_contributory() {
        return Err(AetherVaultError::Certificate(
            "certificate public key is a low-order point".into(),
        ));
    }

    let key = derive_wrap_key(
        shared.as_bytes(),
        ephemeral_public.as_bytes(),
        &cert.public_key,
    )?;
    let wrapped = wrap_key(&key, data_key)?;

    let config = CertificateConfig {
        key_id: cert.key_id.clone(),
        subject: cert.subject.clone(),
        ephemeral_public: ephemeral_public.as_bytes().to_vec(),
    };
    Ok((config, wrapped))
}

/// Recover the data key with the recipient's private key.
pub fn unwrap(
    config: &CertificateConfig,
    wrapped: &[u8],
    private_key: &StaticSecret,
) -> Result<SecretKey> {
    let recipient_public = PublicKey::from(private_key);
    if key_id(&x25519_spki_der(recipient_public.as_bytes())?) != config.key_id {
        return Err(AetherVaultError::AccessDenied(
            "private key does not match the artifact's certificate".into(),
        ));
    }

    let ephemeral: [u8; 32] = config
        .ephemeral_public
        .as_slice()
        .try_into()
        .map_err(|_| AetherVaultError::MalformedMetadata("bad ephemeral public key".into()))?;

    let shared = private_key.diffie_hellman(&PublicKey::from(ephemeral));
    let key = derive_wrap_key(shared.as_bytes(), &ephemeral, recipient_public.as_bytes())?;
    unwrap_key(&key, wrapped).map_err(|_| unlock_failed())
}
