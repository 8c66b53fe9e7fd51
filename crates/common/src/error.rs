//! Errors produced while parsing the wire format.

use thiserror::Error;

/// A value carries the `ENC:` prefix but is not a valid encrypted field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    /// Wrong delimiter count, oversized algorithm id, or an unusable fingerprint.
    #[error("malformed encrypted field: {0}")]
    Malformed(&'static str),

    /// The algorithm id is not in the registry.
    #[error("unknown algorithm id: {0}")]
    UnknownAlgorithm(u8),
}
