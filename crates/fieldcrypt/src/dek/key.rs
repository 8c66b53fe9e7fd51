//! In-memory representation of an unwrapped data encryption key.

use chrono::{DateTime, Utc};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::KEY_LEN;

/// Fixed-size buffer holding exactly [`KEY_LEN`] bytes of DEK material.
///
/// Overwritten with zeroes on drop to shorten the window during which
/// plaintext key material lives in RAM.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DekBytes(Box<[u8; KEY_LEN]>);

impl DekBytes {
    pub fn new(material: &[u8; KEY_LEN]) -> Self {
        Self(Box::new(*material))
    }

    pub fn as_slice(&self) -> &[u8] {
        self.0.as_slice()
    }
}

impl std::fmt::Debug for DekBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material, not even in debug builds.
        f.write_str("DekBytes([REDACTED])")
    }
}

/// A DEK together with the identifier embedded in every ciphertext it seals.
///
/// Immutable once built: rotation creates new keys, it never edits old ones.
#[derive(Debug, Clone)]
pub struct DataKey {
    fingerprint: String,
    material: DekBytes,
    created_at: DateTime<Utc>,
}

impl DataKey {
    pub fn new(fingerprint: String, material: DekBytes, created_at: DateTime<Utc>) -> Self {
        Self {
            fingerprint,
            material,
            created_at,
        }
    }

    /// Stable identifier, `base64url(HMAC-SHA256(fingerprinting key, material))`.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Raw key bytes. Use and drop promptly.
    pub fn material(&self) -> &[u8] {
        self.material.as_slice()
    }

    /// Creation time as recorded by the key store.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
