//! Checksum newtypes.

use serde::{Deserialize, Serialize};

/// Newtype for a SHA256 hash string (64 hex characters).
///
/// Index records may carry an empty checksum when the artifact is signed
/// instead; see [`Sha256Hash::is_empty`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Sha256Hash(String);

impl Sha256Hash {
    /// Create a new `Sha256Hash` without validation (for index/deserialized data).
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into().trim().to_ascii_lowercase())
    }

    /// Create a validated `Sha256Hash` (64 hex characters).
    ///
    /// # Errors
    ///
    /// Returns an error string if `s` is not exactly 64 ASCII hex characters.
    pub fn validated(s: &str) -> Result<Self, String> {
        if s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit()) {
            Ok(Self::new(s))
        } else {
            Err(format!(
                "Invalid SHA256 hash: expected 64 hex chars, got '{s}'"
            ))
        }
    }

    /// Hash of raw digest bytes.
    pub fn from_digest(bytes: &[u8]) -> Self {
        Self(hex::encode(bytes))
    }

    /// Whether no checksum was recorded.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Return the inner hex string as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Sha256Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Sha256Hash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for Sha256Hash {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for Sha256Hash {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validated_rejects_short() {
        assert!(Sha256Hash::validated("abc").is_err());
        assert!(Sha256Hash::validated(&"a".repeat(64)).is_ok());
    }

    #[test]
    fn test_case_insensitive() {
        let upper = Sha256Hash::new("ABCDEF");
        assert_eq!(upper, Sha256Hash::from_digest(&[0xab, 0xcd, 0xef]));
    }
}
