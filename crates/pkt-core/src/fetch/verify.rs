//! Artifact and package-list integrity checks.

use base64::Engine;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};
use thiserror::Error;

use pkt_schema::{PackageRecord, Sha256Hash};

/// Why an artifact or package list was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntegrityError {
    /// The configured public key does not decode.
    #[error("Invalid public key: {0}")]
    InvalidKey(String),

    /// The signature does not decode.
    #[error("Invalid signature encoding: {0}")]
    InvalidSignature(String),

    /// The signature does not match the data.
    #[error("Signature verification failed")]
    BadSignature,

    /// The artifact hash differs from the index.
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Hash from the index.
        expected: String,
        /// Hash of the downloaded bytes.
        actual: String,
    },

    /// The record carries nothing to check against.
    #[error("No checksum or signature to verify against")]
    Unverifiable,
}

/// Hex sha256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> Sha256Hash {
    Sha256Hash::from_digest(&Sha256::digest(bytes))
}

fn decode_key(key_b64: &str) -> Result<VerifyingKey, IntegrityError> {
    let raw = base64::engine::general_purpose::STANDARD
        .decode(key_b64.trim())
        .map_err(|e| IntegrityError::InvalidKey(e.to_string()))?;
    let raw: [u8; 32] = raw
        .as_slice()
        .try_into()
        .map_err(|_| IntegrityError::InvalidKey(format!("expected 32 bytes, got {}", raw.len())))?;
    VerifyingKey::from_bytes(&raw).map_err(|e| IntegrityError::InvalidKey(e.to_string()))
}

/// Verify a base64 Ed25519 signature over `bytes`.
///
/// # Errors
///
/// Returns [`IntegrityError`] if the key or signature is malformed or
/// the signature does not match.
pub fn verify_signature(
    bytes: &[u8],
    signature_b64: &str,
    key_b64: &str,
) -> Result<(), IntegrityError> {
    let key = decode_key(key_b64)?;
    let raw = base64::engine::general_purpose::STANDARD
        .decode(signature_b64.trim())
        .map_err(|e| IntegrityError::InvalidSignature(e.to_string()))?;
    let signature =
        Signature::from_slice(&raw).map_err(|e| IntegrityError::InvalidSignature(e.to_string()))?;
    key.verify(bytes, &signature)
        .map_err(|_| IntegrityError::BadSignature)
}

/// Compare the sha256 of `bytes` against `expected`.
///
/// # Errors
///
/// Returns [`IntegrityError::ChecksumMismatch`] on a difference and
/// [`IntegrityError::Unverifiable`] for an empty expectation.
pub fn verify_checksum(bytes: &[u8], expected: &Sha256Hash) -> Result<(), IntegrityError> {
    if expected.is_empty() {
        return Err(IntegrityError::Unverifiable);
    }
    let actual = sha256_hex(bytes);
    if &actual != expected {
        return Err(IntegrityError::ChecksumMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}

/// Verify artifact bytes against their index record.
///
/// Records from a trusted location carrying a signature are checked with
/// the trusted key; everything else falls back to the recorded checksum.
///
/// # Errors
///
/// See [`verify_signature`] and [`verify_checksum`].
pub fn verify_artifact(
    bytes: &[u8],
    record: &PackageRecord,
    trusted: bool,
    key_b64: &str,
) -> Result<(), IntegrityError> {
    if trusted && !record.signature.is_empty() {
        verify_signature(bytes, &record.signature, key_b64)
    } else {
        verify_checksum(bytes, &record.checksum)
    }
}
