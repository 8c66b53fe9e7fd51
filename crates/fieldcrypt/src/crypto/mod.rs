//! Cryptographic primitives: key generation, fingerprinting, the static-key
//! block codec and AES-256-GCM sealing.
//!
//! This module knows nothing about the key store or the current-key slot;
//! the DEK layer and the envelope codec build on it.

pub mod aead;
pub mod block;
pub mod keys;

pub use block::BlockCodec;
pub use keys::{generate_key, RootKey, KEY_LEN};
