//! Shared helpers for the integration tests.
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use aether_vault::{EncryptionService, EngineConfig};
use rand::RngCore;
use x25519_dalek::{PublicKey, StaticSecret};
use x509_cert::der::asn1::BitString;
use x509_cert::der::pem::LineEnding;
use x509_cert::der::EncodePem;
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::{AlgorithmIdentifierOwned, ObjectIdentifier, SubjectPublicKeyInfoOwned};
use x509_cert::time::Validity;
use x509_cert::{Certificate, TbsCertificate, Version};

/// Low iteration count keeps the suite fast.
pub const FAST_ITERATIONS: u32 = 1_000;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn service() -> EncryptionService {
    service_with_master("integration-master-secret")
}

pub fn service_with_master(master: &str) -> EncryptionService {
    init_tracing();
    EncryptionService::new(&EngineConfig::new(master, "integration-salt", FAST_ITERATIONS))
        .expect("service")
}

/// A small tree with nested directories and a binary file.
pub fn write_tree(root: &Path) {
    fs::create_dir_all(root.join("config/nested")).unwrap();
    fs::write(root.join("README.txt"), "top level\n").unwrap();
    fs::write(root.join("config/app.toml"), "name = \"demo\"\n").unwrap();
    fs::write(root.join("config/nested/blob.bin"), (0u8..=255).collect::<Vec<_>>()).unwrap();
}

/// Assert two directory trees hold the same relative paths and contents.
pub fn assert_same_tree(expected: &Path, actual: &Path) {
    let mut want = list(expected, expected);
    let mut got = list(actual, actual);
    want.sort();
    got.sort();
    assert_eq!(want, got);
}

fn list(root: &Path, dir: &Path) -> Vec<(PathBuf, Option<Vec<u8>>)> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        let rel = path.strip_prefix(root).unwrap().to_path_buf();
        if path.is_dir() {
            out.push((rel, None));
            out.extend(list(root, &path));
        } else {
            out.push((rel, Some(fs::read(&path).unwrap())));
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Certificates
// ---------------------------------------------------------------------------

const X25519_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.101.110");
const ED25519_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.101.112");

/// Write an X25519 certificate and its PKCS#8 private key into `dir`.
///
/// Returns `(certificate_path, private_key_path)`.
pub fn write_certificate_pair(dir: &Path, stem: &str) -> (PathBuf, PathBuf) {
    let mut scalar = [0u8; 32];
    rand::rng().fill_bytes(&mut scalar);
    let secret = StaticSecret::from(scalar);
    let public = PublicKey::from(&secret);

    let sig_alg = AlgorithmIdentifierOwned {
        oid: ED25519_OID,
        parameters: None,
    };
    let tbs = TbsCertificate {
        version: Version::V3,
        serial_number: SerialNumber::new(&[0x2a]).unwrap(),
        signature: sig_alg.clone(),
        issuer: Name::from_str("CN=aether-ca").unwrap(),
        validity: Validity::from_now(Duration::from_secs(86_400)).unwrap(),
        subject: Name::from_str(&format!("CN={stem}")).unwrap(),
        subject_public_key_info: SubjectPublicKeyInfoOwned {
            algorithm: AlgorithmIdentifierOwned {
                oid: X25519_OID,
                parameters: None,
            },
            subject_public_key: BitString::from_bytes(public.as_bytes()).unwrap(),
        },
        issuer_unique_id: None,
        subject_unique_id: None,
        extensions: None,
    };
    let cert = Certificate {
        tbs_certificate: tbs,
        signature_algorithm: sig_alg,
        signature: BitString::from_bytes(&[0u8; 64]).unwrap(),
    };

    let cert_path = dir.join(format!("{stem}.pem"));
    fs::write(&cert_path, cert.to_pem(LineEnding::LF).unwrap()).unwrap();

    // PKCS#8 OneAsymmetricKey for X25519 (RFC 8410).
    let mut key_der = vec![
        0x30, 0x2e, 0x02, 0x01, 0x00, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x6e, 0x04, 0x22, 0x04,
        0x20,
    ];
    key_der.extend_from_slice(&scalar);
    let key_path = dir.join(format!("{stem}.key.der"));
    fs::write(&key_path, key_der).unwrap();

    (cert_path, key_path)
}
