//! `fieldcrypt`: operator CLI over the field encryption engine.
//!
//! Commands:
//!   generate-key                 - print a fresh base64 root key
//!   migrate                      - provision the key table
//!   encrypt [-a ALGO] <value>    - encrypt a UTF-8 value, print the field as base64
//!   decrypt [-a ALGO] <field>    - decrypt a base64 field, print the plaintext
//!
//! Everything except `generate-key` reads `FIELDCRYPT_*` configuration from
//! the environment.

use std::sync::Arc;

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use clap::{Parser, Subcommand};
use tracing::info;

use fieldcrypt::telemetry::{self, LogFormat};
use fieldcrypt::{
    generate_key, Algorithm, Config, Encryption, FieldKind, FieldValue, KeyStore, SqliteKeyStore,
};

#[derive(Parser, Debug)]
#[command(
    name = "fieldcrypt",
    version,
    about = "Field-level encryption key tool",
    long_about = "fieldcrypt: generate root keys, provision the key table, and encrypt or decrypt single values"
)]
struct Cli {
    /// SQLite database holding the key table (overrides FIELDCRYPT_DATABASE_PATH)
    #[arg(long, short = 'd', global = true)]
    database: Option<String>,

    /// Emit human-readable logs instead of JSON
    #[arg(long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print a new 256-bit root key, base64 encoded
    #[command(name = "generate-key")]
    GenerateKey,

    /// Create the key table if it does not exist
    Migrate,

    /// Encrypt a value and print the stored field as base64
    Encrypt {
        /// Plaintext to encrypt
        value: String,
        /// Codec to use (aes or aes-gcm)
        #[arg(long, short = 'a', default_value = "aes-gcm", value_parser = parse_algorithm)]
        algorithm: Algorithm,
    },

    /// Decrypt a base64 stored field and print the plaintext
    Decrypt {
        /// Stored field, base64 encoded
        field: String,
        /// Codec that wrote the field (aes or aes-gcm)
        #[arg(long, short = 'a', default_value = "aes-gcm", value_parser = parse_algorithm)]
        algorithm: Algorithm,
    },
}

fn parse_algorithm(name: &str) -> Result<Algorithm, String> {
    match Algorithm::from_name(name) {
        Some(Algorithm::Unknown) | None => Err(format!(
            "unknown algorithm {name:?}; expected \"aes\" or \"aes-gcm\""
        )),
        Some(algorithm) => Ok(algorithm),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let database = cli.database.as_deref();

    match cli.command {
        Commands::GenerateKey => {
            println!("{}", new_root_key()?);
            Ok(())
        }
        Commands::Migrate => {
            let env = Env::load(database, cli.pretty)?;
            cmd_migrate(&env.store, &env.path).await
        }
        Commands::Encrypt { value, algorithm } => {
            let env = Env::load(database, cli.pretty)?;
            cmd_encrypt(&env.cfg, env.store, algorithm, &value).await
        }
        Commands::Decrypt { field, algorithm } => {
            let env = Env::load(database, cli.pretty)?;
            cmd_decrypt(&env.cfg, env.store, algorithm, &field).await
        }
    }
}

/// Configuration, logging and the key store, for commands that touch keys.
struct Env {
    cfg: Config,
    store: Arc<SqliteKeyStore>,
    path: String,
}

impl Env {
    fn load(database: Option<&str>, pretty: bool) -> Result<Self> {
        // -------------------------------------------------------------------
        // 1. Configuration
        // -------------------------------------------------------------------
        let cfg = Config::from_env().map_err(|e| {
            // Logging is not yet up; write to stderr directly.
            eprintln!("ERROR: configuration invalid: {e:#}");
            e
        })?;

        // -------------------------------------------------------------------
        // 2. Logging
        // -------------------------------------------------------------------
        let format = if pretty {
            LogFormat::Pretty
        } else {
            LogFormat::Json
        };
        telemetry::init_tracing(&cfg.log_level, format)?;

        // -------------------------------------------------------------------
        // 3. Key store
        // -------------------------------------------------------------------
        let path = database.unwrap_or(&cfg.database_path).to_owned();
        let store = Arc::new(
            SqliteKeyStore::open(&path)
                .with_context(|| format!("failed to open key store {path}"))?,
        );

        Ok(Self { cfg, store, path })
    }
}

fn new_root_key() -> Result<String> {
    let key = generate_key().context("failed to generate root key")?;
    Ok(STANDARD.encode(key))
}

async fn cmd_migrate(store: &SqliteKeyStore, path: &str) -> Result<()> {
    store.migrate().await.context("failed to provision key table")?;
    info!(database = %path, "key table ready");
    Ok(())
}

async fn cmd_encrypt(
    cfg: &Config,
    store: Arc<SqliteKeyStore>,
    algorithm: Algorithm,
    value: &str,
) -> Result<()> {
    let codec = registry(cfg, store)
        .await?
        .codec(algorithm)
        .with_context(|| format!("no codec registered for {algorithm}"))?;
    let stored = codec
        .encode(&FieldValue::Bytes(value.as_bytes().to_vec()))
        .await
        .with_context(|| format!("{algorithm} encryption failed"))?;
    println!("{}", STANDARD.encode(stored));
    Ok(())
}

async fn cmd_decrypt(
    cfg: &Config,
    store: Arc<SqliteKeyStore>,
    algorithm: Algorithm,
    field: &str,
) -> Result<()> {
    let stored = STANDARD
        .decode(field.trim())
        .context("field must be standard base64")?;
    let codec = registry(cfg, store)
        .await?
        .codec(algorithm)
        .with_context(|| format!("no codec registered for {algorithm}"))?;
    match codec
        .decode(&stored, FieldKind::Bytes)
        .await
        .with_context(|| format!("{algorithm} decryption failed"))?
    {
        FieldValue::Bytes(plaintext) => {
            println!("{}", String::from_utf8_lossy(&plaintext));
            Ok(())
        }
        FieldValue::Structured(value) => {
            println!("{value}");
            Ok(())
        }
    }
}

async fn registry(cfg: &Config, store: Arc<SqliteKeyStore>) -> Result<Encryption> {
    let options = cfg.engine_options()?;
    Encryption::register(store, options)
        .await
        .context("failed to initialise encryption")
}
