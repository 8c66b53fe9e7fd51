//! Byte layout of a persisted, encrypted field.
//!
//! ```text
//! "ENC:" | algorithm id (1 byte) | "," | fingerprint | "," | ciphertext
//! ```
//!
//! Values without the `ENC:` prefix were written before encryption was
//! enabled and are handed back untouched with an empty fingerprint. The
//! fingerprint is URL-safe base64, so it never contains the delimiter; the
//! ciphertext may contain anything.

use crate::algorithm::Algorithm;
use crate::error::FormatError;

/// Literal prefix marking a value as encrypted.
pub const PREFIX: &[u8] = b"ENC:";

/// Separator between the algorithm id, fingerprint and ciphertext.
pub const DELIMITER: u8 = b',';

/// The three components of a stored field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedField<'a> {
    pub algorithm: Algorithm,
    /// Empty when the value is legacy plaintext.
    pub fingerprint: &'a str,
    /// For legacy plaintext this is the entire input.
    pub ciphertext: &'a [u8],
}

impl ParsedField<'_> {
    /// `false` for values written before encryption was enabled.
    pub fn is_encrypted(&self) -> bool {
        !self.fingerprint.is_empty()
    }
}

/// Lay out an encrypted field.
pub fn encode(algorithm: Algorithm, fingerprint: &str, ciphertext: &[u8]) -> Vec<u8> {
    let mut out =
        Vec::with_capacity(PREFIX.len() + 3 + fingerprint.len() + ciphertext.len());
    out.extend_from_slice(PREFIX);
    out.push(algorithm.id());
    out.push(DELIMITER);
    out.extend_from_slice(fingerprint.as_bytes());
    out.push(DELIMITER);
    out.extend_from_slice(ciphertext);
    out
}

/// Split a stored value into its components.
///
/// # Errors
///
/// Only fails once the `ENC:` prefix is present: [`FormatError::Malformed`]
/// when the remainder does not split into exactly three parts with a one-byte
/// algorithm id and a UTF-8 fingerprint, and
/// [`FormatError::UnknownAlgorithm`] when the id is not registered.
///
/// A prefixed value with an empty fingerprint parses successfully and, like
/// an unprefixed one, is not [`ParsedField::is_encrypted`].
pub fn decode(field: &[u8]) -> Result<ParsedField<'_>, FormatError> {
    let Some(rest) = field.strip_prefix(PREFIX) else {
        return Ok(ParsedField {
            algorithm: Algorithm::Unknown,
            fingerprint: "",
            ciphertext: field,
        });
    };

    let mut parts = rest.splitn(3, |b| *b == DELIMITER);
    let (Some(id), Some(fingerprint), Some(ciphertext)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(FormatError::Malformed("expected three delimited parts"));
    };

    let [id] = id else {
        return Err(FormatError::Malformed("algorithm id must be a single byte"));
    };
    let algorithm = Algorithm::from_id(*id).ok_or(FormatError::UnknownAlgorithm(*id))?;

    let fingerprint = std::str::from_utf8(fingerprint)
        .map_err(|_| FormatError::Malformed("fingerprint is not valid UTF-8"))?;

    Ok(ParsedField {
        algorithm,
        fingerprint,
        ciphertext,
    })
}
