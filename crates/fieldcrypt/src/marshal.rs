//! Pluggable serialisation for field values that are not raw bytes.
//!
//! Structured values travel as [`serde_json::Value`] so a marshaler can be
//! stored as a trait object; typed callers go through `serde` on either side.

use serde_json::Value;

use crate::error::{Error, Result};

/// A serialise/deserialise pair for structured field values.
pub trait Marshaler: Send + Sync {
    /// Serialise a value into the plaintext that gets sealed.
    fn marshal(&self, value: &Value) -> Result<Vec<u8>>;

    /// Rebuild a value from decrypted plaintext.
    fn unmarshal(&self, bytes: &[u8]) -> Result<Value>;
}

/// JSON text encoding via `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMarshaler;

impl Marshaler for JsonMarshaler {
    fn marshal(&self, value: &Value) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| Error::Marshaling(e.to_string()))
    }

    fn unmarshal(&self, bytes: &[u8]) -> Result<Value> {
        serde_json::from_slice(bytes).map_err(|e| Error::Marshaling(e.to_string()))
    }
}

/// Declared type of the destination field, supplied by the record mapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Raw bytes, sealed and returned as-is.
    Bytes,
    /// Anything else; passes through the configured [`Marshaler`].
    Structured,
}

/// A field value on its way into or out of a codec.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Bytes(Vec<u8>),
    Structured(Value),
}

impl FieldValue {
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldValue::Bytes(_) => FieldKind::Bytes,
            FieldValue::Structured(_) => FieldKind::Structured,
        }
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(bytes: Vec<u8>) -> Self {
        FieldValue::Bytes(bytes)
    }
}

impl From<&[u8]> for FieldValue {
    fn from(bytes: &[u8]) -> Self {
        FieldValue::Bytes(bytes.to_vec())
    }
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        FieldValue::Structured(value)
    }
}

pub(crate) fn missing() -> Error {
    Error::Marshaling(
        "marshaling not supported; configure a marshaler and unmarshaler to enable".into(),
    )
}
