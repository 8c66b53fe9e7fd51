//! Static-key AES applied independently to each 16-byte block.
//!
//! There is no IV, no padding and no authentication. Use it only for values
//! that are already high-entropy and validated downstream, such as DEK
//! material (whose fingerprint is re-derived after unwrapping). Decrypting
//! with the wrong key yields garbage rather than an error.

use aes::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes256;
use fieldcrypt_common::{format, Algorithm};

use super::keys::RootKey;
use crate::error::{Error, Result};

/// AES block length in bytes.
pub const BLOCK_LEN: usize = 16;

/// Codec for the `aes` algorithm.
#[derive(Clone)]
pub struct BlockCodec {
    cipher: Aes256,
    fingerprint: String,
}

impl BlockCodec {
    /// Build a codec keyed by `key`, tagging output with the key's fingerprint.
    pub fn new(key: &RootKey) -> Self {
        Self {
            cipher: Aes256::new(GenericArray::from_slice(key.as_bytes())),
            fingerprint: key.fingerprint(),
        }
    }

    /// Fingerprint written into every field this codec produces.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Encrypt `plaintext` and lay it out as an `aes` field.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnalignedBlock`] unless the length is a multiple of
    /// [`BLOCK_LEN`]; 32-byte DEKs always are.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        ensure_aligned(plaintext.len())?;
        let mut buf = plaintext.to_vec();
        for block in buf.chunks_exact_mut(BLOCK_LEN) {
            self.cipher.encrypt_block(GenericArray::from_mut_slice(block));
        }
        Ok(format::encode(Algorithm::Aes, &self.fingerprint, &buf))
    }

    /// Decrypt an `aes` field.
    ///
    /// Values without the `ENC:` prefix are returned unchanged.
    ///
    /// # Errors
    ///
    /// - [`Error::Format`] if the prefix is present but the layout is broken.
    /// - [`Error::AlgorithmMismatch`] if another codec wrote the field.
    /// - [`Error::UnalignedBlock`] if the ciphertext is not whole blocks.
    pub fn decrypt(&self, field: &[u8]) -> Result<Vec<u8>> {
        let parsed = format::decode(field)?;
        if !parsed.is_encrypted() {
            return Ok(parsed.ciphertext.to_vec());
        }
        if parsed.algorithm != Algorithm::Aes {
            return Err(Error::AlgorithmMismatch {
                expected: Algorithm::Aes,
                found: parsed.algorithm,
            });
        }

        ensure_aligned(parsed.ciphertext.len())?;
        let mut buf = parsed.ciphertext.to_vec();
        for block in buf.chunks_exact_mut(BLOCK_LEN) {
            self.cipher.decrypt_block(GenericArray::from_mut_slice(block));
        }
        Ok(buf)
    }
}

impl std::fmt::Debug for BlockCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockCodec")
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

fn ensure_aligned(len: usize) -> Result<()> {
    if len % BLOCK_LEN != 0 {
        return Err(Error::UnalignedBlock(len));
    }
    Ok(())
}
