//! Crate-wide error type.
//!
//! Every failure aborts the single field's encode or decode. None of them
//! leave the current-key slot checked out or the read cache holding partial
//! data.

use fieldcrypt_common::{Algorithm, FormatError};
use thiserror::Error;

use crate::dek::store::StoreError;

/// Errors surfaced by the codecs and the DEK lifecycle manager.
#[derive(Debug, Error)]
pub enum Error {
    /// The value has the `ENC:` prefix but does not parse.
    #[error(transparent)]
    Format(#[from] FormatError),

    /// The field was written by a different codec.
    #[error("expected {expected} but got: {found}")]
    AlgorithmMismatch {
        expected: Algorithm,
        found: Algorithm,
    },

    /// No live key row carries this fingerprint (never existed or soft-deleted).
    #[error("data key not found: {0}")]
    KeyNotFound(String),

    /// The sealed body failed to verify: tampered data or the wrong key.
    #[error("authentication failed")]
    Authentication,

    /// No marshaler is configured, or the configured one failed.
    #[error("marshaling failed: {0}")]
    Marshaling(String),

    /// The durable key store rejected a read or write.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The OS random source failed.
    #[error("secure random generation failed: {0}")]
    Entropy(String),

    /// A root key or DEK is not 32 bytes.
    #[error("invalid key length: expected {expected} bytes, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    /// The static block codec only transforms whole AES blocks.
    #[error("payload length {0} is not a multiple of the AES block size")]
    UnalignedBlock(usize),

    /// Stored DEK material does not hash to its own fingerprint, usually
    /// because the process was started with a different root key.
    #[error("data key {0} does not match its fingerprint")]
    FingerprintMismatch(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatch_names_both_algorithms() {
        let e = Error::AlgorithmMismatch {
            expected: Algorithm::AesGcm,
            found: Algorithm::Aes,
        };
        assert_eq!(e.to_string(), "expected aes-gcm but got: aes");
    }

    #[test]
    fn format_errors_convert() {
        let e: Error = FormatError::UnknownAlgorithm(9).into();
        assert!(matches!(e, Error::Format(FormatError::UnknownAlgorithm(9))));
    }
}
