//! Transparent field-level encryption for values persisted by a record
//! mapper.
//!
//! Two codecs share one self-describing field format
//! (`"ENC:" | algorithm id | "," | fingerprint | "," | ciphertext`):
//!
//! - [`BlockCodec`] (`aes`): static-key AES per 16-byte block. No
//!   authentication; meant for high-entropy values such as DEK material.
//! - [`EnvelopeCodec`] (`aes-gcm`): AES-256-GCM under a rotating data
//!   encryption key (DEK). DEKs are persisted through a [`KeyStore`],
//!   wrapped by the block codec under the root key.
//!
//! Values without the prefix are treated as legacy plaintext and returned
//! unchanged on decode.
//!
//! [`Encryption::register`] builds both codecs from one [`EngineOptions`].

pub mod codec;
pub mod config;
pub mod crypto;
pub mod dek;
pub mod envelope;
pub mod error;
pub mod marshal;
pub mod telemetry;

pub use codec::{Encryption, FieldCodec};
pub use config::{Config, EngineOptions};
pub use crypto::{generate_key, BlockCodec, RootKey, KEY_LEN};
pub use dek::{CurrentKey, DataKey, DekManager, KeyStore, MemoryKeyStore, StoreError, StoredKey};
#[cfg(feature = "sqlite")]
pub use dek::sqlite::SqliteKeyStore;
pub use envelope::EnvelopeCodec;
pub use error::{Error, Result};
pub use fieldcrypt_common::{format, Algorithm, FormatError};
pub use marshal::{FieldKind, FieldValue, JsonMarshaler, Marshaler};
