//! Authenticated per-field encryption under the current DEK.
//!
//! Encode: marshal if needed, check out the current key, copy its handle and
//! release the slot, seal with a fresh nonce, and lay out an `aes-gcm` field
//! tagged with the key's fingerprint.
//!
//! Decode: values without the `ENC:` prefix are returned untouched, so tables
//! can be migrated to encryption incrementally. Everything else is resolved
//! by fingerprint and must authenticate.

use std::sync::Arc;

use fieldcrypt_common::{format, Algorithm};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use crate::crypto::aead;
use crate::dek::DekManager;
use crate::error::{Error, Result};
use crate::marshal::{self, FieldKind, FieldValue, Marshaler};

/// Codec for the `aes-gcm` algorithm.
#[derive(Clone)]
pub struct EnvelopeCodec {
    keys: Arc<DekManager>,
    marshaler: Option<Arc<dyn Marshaler>>,
}

impl EnvelopeCodec {
    pub fn new(keys: Arc<DekManager>, marshaler: Option<Arc<dyn Marshaler>>) -> Self {
        Self { keys, marshaler }
    }

    /// The lifecycle manager this codec draws keys from.
    pub fn keys(&self) -> &Arc<DekManager> {
        &self.keys
    }

    /// Encrypt a field value.
    ///
    /// # Errors
    ///
    /// - [`Error::Marshaling`] for structured values without a marshaler, or
    ///   when marshaling fails.
    /// - [`Error::Entropy`] if no nonce can be drawn.
    pub async fn encode(&self, value: &FieldValue) -> Result<Vec<u8>> {
        match value {
            FieldValue::Bytes(bytes) => self.seal(bytes).await,
            FieldValue::Structured(v) => {
                let plaintext = self.marshaler()?.marshal(v)?;
                self.seal(&plaintext).await
            }
        }
    }

    /// Decrypt a stored value into the declared field kind.
    ///
    /// Legacy plaintext of kind [`FieldKind::Structured`] is handed to the
    /// unmarshaler as-is.
    ///
    /// # Errors
    ///
    /// - [`Error::Format`] if the prefix is present but the layout is broken.
    /// - [`Error::AlgorithmMismatch`] if another codec wrote the field.
    /// - [`Error::KeyNotFound`] if the fingerprint names no live key.
    /// - [`Error::Authentication`] if the sealed body does not verify.
    /// - [`Error::Marshaling`] for structured kinds without an unmarshaler.
    pub async fn decode(&self, stored: &[u8], kind: FieldKind) -> Result<FieldValue> {
        let plaintext = self.open(stored).await?;
        match kind {
            FieldKind::Bytes => Ok(FieldValue::Bytes(plaintext)),
            FieldKind::Structured => Ok(FieldValue::Structured(
                self.marshaler()?.unmarshal(&plaintext)?,
            )),
        }
    }

    /// Encrypt raw bytes.
    pub async fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let key = {
            let current = self.keys.checkout_current().await;
            current.share()
        };
        let sealed = aead::seal(key.material(), plaintext)?;
        Ok(format::encode(Algorithm::AesGcm, key.fingerprint(), &sealed))
    }

    /// Decrypt to raw bytes. Unprefixed input is returned unchanged.
    pub async fn open(&self, stored: &[u8]) -> Result<Vec<u8>> {
        let parsed = format::decode(stored)?;
        if !parsed.is_encrypted() {
            debug!("field is not encrypted; passing through");
            return Ok(parsed.ciphertext.to_vec());
        }
        if parsed.algorithm != Algorithm::AesGcm {
            return Err(Error::AlgorithmMismatch {
                expected: Algorithm::AesGcm,
                found: parsed.algorithm,
            });
        }

        let key = self.keys.resolve(parsed.fingerprint).await?;
        aead::open(key.material(), parsed.ciphertext)
    }

    /// Encrypt any `serde` value through the configured marshaler.
    pub async fn encode_typed<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        let value = serde_json::to_value(value).map_err(|e| Error::Marshaling(e.to_string()))?;
        self.encode(&FieldValue::Structured(value)).await
    }

    /// Decrypt into any `serde` type through the configured unmarshaler.
    pub async fn decode_typed<T: DeserializeOwned>(&self, stored: &[u8]) -> Result<T> {
        match self.decode(stored, FieldKind::Structured).await? {
            FieldValue::Structured(value) => {
                serde_json::from_value(value).map_err(|e| Error::Marshaling(e.to_string()))
            }
            FieldValue::Bytes(_) => Err(Error::Marshaling("expected a structured value".into())),
        }
    }

    fn marshaler(&self) -> Result<&dyn Marshaler> {
        self.marshaler.as_deref().ok_or_else(marshal::missing)
    }
}

impl std::fmt::Debug for EnvelopeCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeCodec")
            .field("keys", &self.keys)
            .field("marshaler", &self.marshaler.is_some())
            .finish()
    }
}
