//! Wire contract shared across `fieldcrypt` crates: the algorithm registry and
//! the `ENC:` field layout.

pub mod algorithm;
pub mod error;
pub mod format;

pub use algorithm::Algorithm;
pub use error::FormatError;
pub use format::ParsedField;
