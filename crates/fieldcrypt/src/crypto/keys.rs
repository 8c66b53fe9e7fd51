//! Key generation, the root key wrapper, and fingerprint derivation.

use aes_gcm::aead::{rand_core::RngCore, OsRng};
use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine as _,
};
use hmac::digest::generic_array::GenericArray;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::{Error, Result};

/// Byte length of every root key and DEK (256 bits).
pub const KEY_LEN: usize = 32;

type HmacSha256 = Hmac<Sha256>;

/// SHA-256 input block size. HMAC zero-pads shorter keys to this length.
const HMAC_BLOCK_LEN: usize = 64;

/// Produce a 256-bit key from the OS CSPRNG.
///
/// Suitable both as a root key and as DEK material.
///
/// # Errors
///
/// Returns [`Error::Entropy`] if the OS random source fails.
pub fn generate_key() -> Result<[u8; KEY_LEN]> {
    let mut key = [0u8; KEY_LEN];
    OsRng
        .try_fill_bytes(&mut key)
        .map_err(|e| Error::Entropy(e.to_string()))?;
    Ok(key)
}

/// Long-lived secret supplied at startup.
///
/// Never encrypts field data directly: it wraps DEK material at rest and keys
/// the DEK fingerprints. Zeroed on drop.
#[derive(Clone)]
pub struct RootKey(Zeroizing<[u8; KEY_LEN]>);

impl RootKey {
    /// Wrap raw key bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidKeyLength`] unless `bytes` is [`KEY_LEN`] long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let key: [u8; KEY_LEN] = bytes.try_into().map_err(|_| Error::InvalidKeyLength {
            expected: KEY_LEN,
            got: bytes.len(),
        })?;
        Ok(Self(Zeroizing::new(key)))
    }

    /// Decode a standard-base64 root key, as carried in configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidKeyLength`] if the text is not base64 or does
    /// not decode to [`KEY_LEN`] bytes.
    pub fn from_base64(text: &str) -> Result<Self> {
        let bytes = Zeroizing::new(STANDARD.decode(text.trim()).map_err(|_| {
            Error::InvalidKeyLength {
                expected: KEY_LEN,
                got: 0,
            }
        })?);
        Self::from_slice(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Tag written into every field the static block codec produces:
    /// an HMAC-SHA256 of the root key under an empty key.
    pub fn fingerprint(&self) -> String {
        keyed_fingerprint(None, self.as_bytes())
    }

    /// Key used to fingerprint DEKs: SHA-256 of the root key, so processes
    /// sharing a root key derive identical fingerprints.
    pub fn fingerprinting_key(&self) -> FingerprintKey {
        FingerprintKey(Zeroizing::new(Sha256::digest(self.as_bytes()).into()))
    }
}

impl std::fmt::Debug for RootKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RootKey([REDACTED])")
    }
}

/// Secret that keys DEK fingerprints.
#[derive(Clone)]
pub struct FingerprintKey(Zeroizing<[u8; KEY_LEN]>);

impl FingerprintKey {
    /// `base64url(HMAC-SHA256(self, material))`, unpadded.
    pub fn fingerprint(&self, material: &[u8]) -> String {
        keyed_fingerprint(Some(&*self.0), material)
    }
}

impl std::fmt::Debug for FingerprintKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FingerprintKey([REDACTED])")
    }
}

/// HMAC-SHA256 of `data`, keyed by `key` or by the empty key.
fn keyed_fingerprint(key: Option<&[u8; KEY_LEN]>, data: &[u8]) -> String {
    let mut block = Zeroizing::new([0u8; HMAC_BLOCK_LEN]);
    if let Some(key) = key {
        block[..KEY_LEN].copy_from_slice(key);
    }
    let mut mac = <HmacSha256 as Mac>::new(GenericArray::from_slice(block.as_slice()));
    mac.update(data);
    URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
}
