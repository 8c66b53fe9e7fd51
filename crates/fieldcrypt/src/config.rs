//! Configuration for the encryption engine.
//!
//! [`EngineOptions`] is what the engine consumes. [`Config`] is its
//! environment-variable form (prefix `FIELDCRYPT_`), validated at load time so
//! a process exits with a clear message if anything required is missing.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use config::builder::DefaultState;
use config::ConfigBuilder;
use serde::Deserialize;

use crate::crypto::RootKey;
use crate::marshal::Marshaler;

/// Data keys cached for decryption.
pub const DEFAULT_CACHE_SIZE: usize = 5;

/// How long a cached data key stays resident.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// How long a data key is used for new writes before rotating.
pub const DEFAULT_ROTATION_INTERVAL: Duration = Duration::from_secs(10 * 24 * 60 * 60);

/// In-process engine configuration.
///
/// Build with [`EngineOptions::new`] and override fields with struct update
/// syntax.
#[derive(Clone)]
pub struct EngineOptions {
    /// Wraps DEK material at rest and keys DEK fingerprints.
    pub root_key: RootKey,
    /// Maximum number of resolved data keys kept in memory.
    pub cache_size: usize,
    /// Lifetime of a cached data key.
    pub cache_ttl: Duration,
    /// Age after which the current data key is replaced.
    pub rotation_interval: Duration,
    /// Provision the key table before first use.
    pub auto_migrate: bool,
    /// Serialiser for non-byte field values. Without one, structured values
    /// fail with a marshaling error.
    pub marshaler: Option<Arc<dyn Marshaler>>,
}

impl EngineOptions {
    /// Options with every default applied.
    pub fn new(root_key: RootKey) -> Self {
        Self {
            root_key,
            cache_size: DEFAULT_CACHE_SIZE,
            cache_ttl: DEFAULT_CACHE_TTL,
            rotation_interval: DEFAULT_ROTATION_INTERVAL,
            auto_migrate: false,
            marshaler: None,
        }
    }
}

impl std::fmt::Debug for EngineOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineOptions")
            .field("root_key", &self.root_key)
            .field("cache_size", &self.cache_size)
            .field("cache_ttl", &self.cache_ttl)
            .field("rotation_interval", &self.rotation_interval)
            .field("auto_migrate", &self.auto_migrate)
            .field("marshaler", &self.marshaler.is_some())
            .finish()
    }
}

/// Validated configuration read from the environment.
#[derive(Clone, Deserialize)]
pub struct Config {
    /// Standard base64 of a 32-byte root key. **Required.**
    pub root_key: String,

    /// Number of data keys cached for decryption.
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,

    /// Seconds a cached data key stays resident.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    /// Seconds a data key is used for new writes before rotating.
    #[serde(default = "default_rotation_interval")]
    pub rotation_interval_secs: u64,

    /// Create the key table on startup.
    #[serde(default)]
    pub auto_migrate: bool,

    /// SQLite database holding the key table.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Tracing log level (e.g. `"info"`, `"debug"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_cache_size() -> usize {
    DEFAULT_CACHE_SIZE
}
fn default_cache_ttl() -> u64 {
    DEFAULT_CACHE_TTL.as_secs()
}
fn default_rotation_interval() -> u64 {
    DEFAULT_ROTATION_INTERVAL.as_secs()
}
fn default_database_path() -> String {
    "fieldcrypt.db".into()
}
fn default_log_level() -> String {
    "info".into()
}

impl Config {
    /// Load and validate configuration from `FIELDCRYPT_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if any required variable is absent or cannot be parsed.
    pub fn from_env() -> Result<Self> {
        Self::from_builder(
            config::Config::builder().add_source(config::Environment::with_prefix("FIELDCRYPT")),
        )
    }

    /// Load and validate configuration from an assembled builder.
    pub fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        let cfg = builder
            .build()
            .context("failed to build configuration from environment")?;

        let c: Config = cfg
            .try_deserialize()
            .context("failed to deserialise configuration")?;

        c.validate()?;
        Ok(c)
    }

    /// Convert into engine options. No marshaler is installed.
    pub fn engine_options(&self) -> Result<EngineOptions> {
        let root_key = RootKey::from_base64(&self.root_key)
            .context("FIELDCRYPT_ROOT_KEY must be base64 of exactly 32 bytes")?;
        Ok(EngineOptions {
            cache_size: self.cache_size,
            cache_ttl: Duration::from_secs(self.cache_ttl_secs),
            rotation_interval: Duration::from_secs(self.rotation_interval_secs),
            auto_migrate: self.auto_migrate,
            ..EngineOptions::new(root_key)
        })
    }

    /// Validate all fields, returning a descriptive error on the first failure.
    fn validate(&self) -> Result<()> {
        if self.root_key.trim().is_empty() {
            anyhow::bail!("FIELDCRYPT_ROOT_KEY is required and must not be empty");
        }
        RootKey::from_base64(&self.root_key)
            .context("FIELDCRYPT_ROOT_KEY must be base64 of exactly 32 bytes")?;
        if self.cache_size == 0 {
            anyhow::bail!("FIELDCRYPT_CACHE_SIZE must be > 0");
        }
        if self.cache_ttl_secs == 0 {
            anyhow::bail!("FIELDCRYPT_CACHE_TTL_SECS must be > 0");
        }
        if self.rotation_interval_secs == 0 {
            anyhow::bail!("FIELDCRYPT_ROTATION_INTERVAL_SECS must be > 0");
        }
        if self.database_path.trim().is_empty() {
            anyhow::bail!("FIELDCRYPT_DATABASE_PATH must not be empty");
        }
        Ok(())
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("root_key", &"[REDACTED]")
            .field("cache_size", &self.cache_size)
            .field("cache_ttl_secs", &self.cache_ttl_secs)
            .field("rotation_interval_secs", &self.rotation_interval_secs)
            .field("auto_migrate", &self.auto_migrate)
            .field("database_path", &self.database_path)
            .field("log_level", &self.log_level)
            .finish()
    }
}
