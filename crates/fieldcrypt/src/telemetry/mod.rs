//! Structured logging setup for processes embedding the engine.
//!
//! The library itself only emits [`tracing`] events; installing a subscriber
//! is left to the binary.
//!
//! # Telemetry invariants
//!
//! - **No plaintext or key material** may appear in any log field. Keys are
//!   identified by fingerprint only.
//! - Log level is configurable via `FIELDCRYPT_LOG_LEVEL` (default: `info`),
//!   overridden by `RUST_LOG` when set.

pub mod init;

pub use init::{init_tracing, LogFormat};
