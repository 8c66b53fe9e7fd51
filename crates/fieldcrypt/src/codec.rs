//! Codec registry: both algorithms behind one trait, built from one set of
//! options, looked up by id or by name.

use std::sync::Arc;

use async_trait::async_trait;
use fieldcrypt_common::Algorithm;
use tracing::info;

use crate::config::EngineOptions;
use crate::crypto::BlockCodec;
use crate::dek::{DekManager, KeyStore};
use crate::envelope::EnvelopeCodec;
use crate::error::{Error, Result};
use crate::marshal::{FieldKind, FieldValue};

/// A field transformer that a record-mapping layer can install per column.
#[async_trait]
pub trait FieldCodec: Send + Sync {
    /// The algorithm this codec writes.
    fn algorithm(&self) -> Algorithm;

    /// Encrypt a value for storage.
    async fn encode(&self, value: &FieldValue) -> Result<Vec<u8>>;

    /// Decrypt a stored value into the declared kind.
    async fn decode(&self, stored: &[u8], kind: FieldKind) -> Result<FieldValue>;
}

#[async_trait]
impl FieldCodec for BlockCodec {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Aes
    }

    async fn encode(&self, value: &FieldValue) -> Result<Vec<u8>> {
        match value {
            FieldValue::Bytes(bytes) => self.encrypt(bytes),
            FieldValue::Structured(_) => Err(bytes_only()),
        }
    }

    async fn decode(&self, stored: &[u8], kind: FieldKind) -> Result<FieldValue> {
        match kind {
            FieldKind::Bytes => Ok(FieldValue::Bytes(self.decrypt(stored)?)),
            FieldKind::Structured => Err(bytes_only()),
        }
    }
}

#[async_trait]
impl FieldCodec for EnvelopeCodec {
    fn algorithm(&self) -> Algorithm {
        Algorithm::AesGcm
    }

    async fn encode(&self, value: &FieldValue) -> Result<Vec<u8>> {
        EnvelopeCodec::encode(self, value).await
    }

    async fn decode(&self, stored: &[u8], kind: FieldKind) -> Result<FieldValue> {
        EnvelopeCodec::decode(self, stored, kind).await
    }
}

fn bytes_only() -> Error {
    Error::Marshaling("the aes codec only handles byte fields".into())
}

/// Both codecs, sharing one root key.
#[derive(Clone, Debug)]
pub struct Encryption {
    block: Arc<BlockCodec>,
    envelope: Arc<EnvelopeCodec>,
}

impl Encryption {
    /// Build the block and envelope codecs from `options`.
    ///
    /// With `auto_migrate` set, the key table is provisioned before the DEK
    /// manager bootstraps.
    ///
    /// # Errors
    ///
    /// - [`Error::Store`] if provisioning fails.
    /// - Any error from [`DekManager::bootstrap`].
    pub async fn register(store: Arc<dyn KeyStore>, options: EngineOptions) -> Result<Self> {
        if options.auto_migrate {
            store.migrate().await?;
            info!("key table provisioned");
        }

        let block = Arc::new(BlockCodec::new(&options.root_key));
        let keys = Arc::new(DekManager::bootstrap(store, &options).await?);
        let envelope = Arc::new(EnvelopeCodec::new(keys, options.marshaler.clone()));

        Ok(Self { block, envelope })
    }

    /// The codec registered for `algorithm`, if any.
    pub fn codec(&self, algorithm: Algorithm) -> Option<Arc<dyn FieldCodec>> {
        let codec: Arc<dyn FieldCodec> = match algorithm {
            Algorithm::Aes => self.block.clone(),
            Algorithm::AesGcm => self.envelope.clone(),
            Algorithm::Unknown => return None,
        };
        Some(codec)
    }

    /// The codec registered under `name` (`"aes"` or `"aes-gcm"`).
    pub fn codec_by_name(&self, name: &str) -> Option<Arc<dyn FieldCodec>> {
        Algorithm::from_name(name).and_then(|a| self.codec(a))
    }

    /// The static-key block codec.
    pub fn block(&self) -> &BlockCodec {
        &self.block
    }

    /// The authenticated envelope codec.
    pub fn envelope(&self) -> &EnvelopeCodec {
        &self.envelope
    }
}
