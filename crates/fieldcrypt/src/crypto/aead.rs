//! AES-256-GCM sealing for the envelope codec.
//!
//! # Sealed layout
//!
//! ```text
//! nonce (12 bytes) | ciphertext | tag (16 bytes)
//! ```
//!
//! A fresh nonce comes from the OS CSPRNG on every call. Never reuse a nonce
//! under the same DEK: GCM nonce reuse breaks both confidentiality and
//! authentication.

use aes_gcm::{
    aead::{rand_core::RngCore, Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};

use super::keys::KEY_LEN;
use crate::error::{Error, Result};

/// Byte length of an AES-GCM nonce (96 bits).
pub const NONCE_LEN: usize = 12;

/// Byte length of the GCM authentication tag.
pub const TAG_LEN: usize = 16;

/// Seal `plaintext` under `dek`, returning `nonce || ciphertext || tag`.
///
/// # Errors
///
/// - [`Error::InvalidKeyLength`] if `dek` is not [`KEY_LEN`] bytes.
/// - [`Error::Entropy`] if no nonce can be drawn.
/// - [`Error::Authentication`] on an internal AEAD failure (unreachable with
///   a valid key and nonce).
pub fn seal(dek: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = build_cipher(dek)?;

    let mut nonce = [0u8; NONCE_LEN];
    OsRng
        .try_fill_bytes(&mut nonce)
        .map_err(|e| Error::Entropy(e.to_string()))?;

    let sealed = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| Error::Authentication)?;

    let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Verify and decrypt a `nonce || ciphertext || tag` body.
///
/// # Errors
///
/// - [`Error::InvalidKeyLength`] if `dek` is not [`KEY_LEN`] bytes.
/// - [`Error::Authentication`] if the body is too short to hold a nonce and
///   tag, or the tag does not verify (tampered data or the wrong key).
pub fn open(dek: &[u8], sealed: &[u8]) -> Result<Vec<u8>> {
    let cipher = build_cipher(dek)?;
    if sealed.len() < NONCE_LEN + TAG_LEN {
        return Err(Error::Authentication);
    }
    let (nonce, body) = sealed.split_at(NONCE_LEN);
    cipher
        .decrypt(Nonce::from_slice(nonce), body)
        .map_err(|_| Error::Authentication)
}

fn build_cipher(dek: &[u8]) -> Result<Aes256Gcm> {
    if dek.len() != KEY_LEN {
        return Err(Error::InvalidKeyLength {
            expected: KEY_LEN,
            got: dek.len(),
        });
    }
    Aes256Gcm::new_from_slice(dek).map_err(|_| Error::InvalidKeyLength {
        expected: KEY_LEN,
        got: dek.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::generate_key;

    #[test]
    fn seal_open_round_trip() {
        let dek = generate_key().unwrap();
        let sealed = seal(&dek, b"123-45-6789").unwrap();
        assert_eq!(sealed.len(), NONCE_LEN + 11 + TAG_LEN);
        assert_eq!(open(&dek, &sealed).unwrap(), b"123-45-6789");
    }

    #[test]
    fn nonces_are_fresh() {
        let dek = generate_key().unwrap();
        let a = seal(&dek, b"same").unwrap();
        let b = seal(&dek, b"same").unwrap();
        assert_ne!(a[..NONCE_LEN], b[..NONCE_LEN]);
    }

    #[test]
    fn wrong_key_fails_auth() {
        let sealed = seal(&generate_key().unwrap(), b"secret").unwrap();
        assert!(matches!(
            open(&generate_key().unwrap(), &sealed),
            Err(Error::Authentication)
        ));
    }

    #[test]
    fn every_flipped_bit_fails_auth() {
        let dek = generate_key().unwrap();
        let sealed = seal(&dek, b"tamper me").unwrap();
        for i in 0..sealed.len() {
            for bit in 0..8 {
                let mut tampered = sealed.clone();
                tampered[i] ^= 1 << bit;
                assert!(
                    matches!(open(&dek, &tampered), Err(Error::Authentication)),
                    "byte {i} bit {bit} went undetected"
                );
            }
        }
    }

    #[test]
    fn truncated_body_fails_auth() {
        let dek = generate_key().unwrap();
        assert!(matches!(open(&dek, &[0u8; 20]), Err(Error::Authentication)));
    }

    #[test]
    fn invalid_key_length_rejected() {
        assert!(matches!(
            seal(&[0u8; 16], b"x"),
            Err(Error::InvalidKeyLength { got: 16, .. })
        ));
    }
}
