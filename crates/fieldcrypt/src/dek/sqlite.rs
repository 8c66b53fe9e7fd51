//! [`KeyStore`] over a SQLite database via `rusqlite`.
//!
//! Timestamps are stored as integer microseconds since the Unix epoch.
//! Every call runs on the blocking pool behind a single connection.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};

use super::store::{KeyStore, NewDataKey, StoreError, StoredKey, TABLE_NAME};

const COLUMNS: &str = "fingerprint, created_at, updated_at, deleted_at, data_key";

/// SQLite-backed key table.
#[derive(Clone)]
pub struct SqliteKeyStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteKeyStore {
    /// Open (or create) a database file. The key table is not provisioned;
    /// call [`KeyStore::migrate`] or enable auto-migrate.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(backend)?;
        Ok(Self::from_connection(conn))
    }

    /// A private in-memory database, gone when the store is dropped.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(backend)?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Mark a row deleted. Returns `false` if no live row matched.
    pub async fn soft_delete(&self, fingerprint: &str) -> Result<bool, StoreError> {
        let fingerprint = fingerprint.to_owned();
        self.with_conn(move |conn| {
            let now = Utc::now().timestamp_micros();
            let changed = conn
                .execute(
                    &format!(
                        "UPDATE {TABLE_NAME} SET deleted_at = ?1, updated_at = ?1 \
                         WHERE fingerprint = ?2 AND deleted_at IS NULL"
                    ),
                    params![now, fingerprint],
                )
                .map_err(backend)?;
            Ok(changed > 0)
        })
        .await
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("key store task failed: {e}")))?
    }
}

impl std::fmt::Debug for SqliteKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteKeyStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl KeyStore for SqliteKeyStore {
    async fn migrate(&self) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {TABLE_NAME} (
                     fingerprint VARCHAR(64) PRIMARY KEY,
                     created_at  INTEGER NOT NULL,
                     updated_at  INTEGER NOT NULL,
                     deleted_at  INTEGER,
                     data_key    BLOB NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS idx_{TABLE_NAME}_deleted_at ON {TABLE_NAME} (deleted_at);
                 CREATE INDEX IF NOT EXISTS idx_{TABLE_NAME}_created_at ON {TABLE_NAME} (created_at);"
            ))
            .map_err(backend)
        })
        .await
    }

    async fn create(&self, key: NewDataKey) -> Result<StoredKey, StoreError> {
        self.with_conn(move |conn| {
            let now_micros = Utc::now().timestamp_micros();
            let now = from_micros(now_micros)?;
            conn.execute(
                &format!("INSERT INTO {TABLE_NAME} ({COLUMNS}) VALUES (?1, ?2, ?2, NULL, ?3)"),
                params![key.fingerprint, now_micros, key.data_key],
            )
            .map_err(|e| match e.sqlite_error_code() {
                Some(ErrorCode::ConstraintViolation) => {
                    StoreError::Duplicate(key.fingerprint.clone())
                }
                _ => backend(e),
            })?;

            Ok(StoredKey {
                fingerprint: key.fingerprint,
                created_at: now,
                updated_at: now,
                deleted_at: None,
                data_key: key.data_key,
            })
        })
        .await
    }

    async fn find_latest_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Option<StoredKey>, StoreError> {
        self.with_conn(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {COLUMNS} FROM {TABLE_NAME} \
                     WHERE deleted_at IS NULL AND created_at > ?1 \
                     ORDER BY created_at DESC LIMIT 1"
                ),
                params![since.timestamp_micros()],
                RawRow::read,
            )
            .optional()
            .map_err(backend)?
            .map(RawRow::into_stored)
            .transpose()
        })
        .await
    }

    async fn find_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<StoredKey>, StoreError> {
        let fingerprint = fingerprint.to_owned();
        self.with_conn(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {COLUMNS} FROM {TABLE_NAME} \
                     WHERE fingerprint = ?1 AND deleted_at IS NULL"
                ),
                params![fingerprint],
                RawRow::read,
            )
            .optional()
            .map_err(backend)?
            .map(RawRow::into_stored)
            .transpose()
        })
        .await
    }
}

struct RawRow {
    fingerprint: String,
    created_at: i64,
    updated_at: i64,
    deleted_at: Option<i64>,
    data_key: Vec<u8>,
}

impl RawRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            fingerprint: row.get(0)?,
            created_at: row.get(1)?,
            updated_at: row.get(2)?,
            deleted_at: row.get(3)?,
            data_key: row.get(4)?,
        })
    }

    fn into_stored(self) -> Result<StoredKey, StoreError> {
        Ok(StoredKey {
            fingerprint: self.fingerprint,
            created_at: from_micros(self.created_at)?,
            updated_at: from_micros(self.updated_at)?,
            deleted_at: self.deleted_at.map(from_micros).transpose()?,
            data_key: self.data_key,
        })
    }
}

fn from_micros(micros: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::<Utc>::from_timestamp_micros(micros)
        .ok_or_else(|| StoreError::Backend(format!("timestamp out of range: {micros}")))
}

fn backend(e: rusqlite::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}
