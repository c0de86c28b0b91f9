//! Cryptographic primitives for the artifact engine.
//!
//! This module provides:
//! - AES-256-GCM sealing of content and wrapped keys (`encryption`)
//! - PBKDF2-HMAC-SHA256 password-based key derivation (`kdf`)
//! - The zeroizing `SecretKey` buffer and data-key hashing (`keys`)

pub mod encryption;
pub mod kdf;
pub mod keys;

pub use encryption::{open, seal, sealed_len, unwrap_key, wrap_key, ALGORITHM};
pub use kdf::{derive_key, generate_salt, DEFAULT_ITERATIONS};
pub use keys::{hash_data_key, verify_data_key_hash, SecretKey};
