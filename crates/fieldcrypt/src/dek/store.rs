//! Durable key storage seen from the lifecycle manager.
//!
//! The manager only ever creates rows and reads them back. Rows are never
//! updated after creation; soft deletion is the store owner's business and
//! simply makes a row invisible to both lookups.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use thiserror::Error;

/// Name of the key table.
pub const TABLE_NAME: &str = "encryption_keys";

/// Errors produced by a [`KeyStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// A row with this fingerprint already exists.
    #[error("data key already exists: {0}")]
    Duplicate(String),

    /// The backing store failed.
    #[error("key store failure: {0}")]
    Backend(String),
}

/// A persisted DEK row.
///
/// `data_key` holds the material wrapped by the static block codec under the
/// root key (an `aes` field), or raw material for rows written before
/// wrapping was enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredKey {
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub data_key: Vec<u8>,
}

/// A row about to be created. Timestamps are assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDataKey {
    pub fingerprint: String,
    pub data_key: Vec<u8>,
}

/// Durable store of DEK rows.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Provision the key table. Stores without a schema need not override.
    async fn migrate(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Insert one row and return it as stored.
    async fn create(&self, key: NewDataKey) -> Result<StoredKey, StoreError>;

    /// The newest live row created strictly after `since`.
    async fn find_latest_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Option<StoredKey>, StoreError>;

    /// The live row with exactly this fingerprint.
    async fn find_by_fingerprint(&self, fingerprint: &str)
        -> Result<Option<StoredKey>, StoreError>;
}

/// Process-local [`KeyStore`], for tests and single-process embedding.
#[derive(Clone, Debug, Default)]
pub struct MemoryKeyStore {
    rows: Arc<RwLock<Vec<StoredKey>>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows, deleted ones included.
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    /// Mark a row deleted. Returns `false` if no live row matched.
    pub fn soft_delete(&self, fingerprint: &str) -> bool {
        let mut rows = self.rows.write();
        match rows
            .iter_mut()
            .find(|r| r.fingerprint == fingerprint && r.deleted_at.is_none())
        {
            Some(row) => {
                let now = Utc::now();
                row.deleted_at = Some(now);
                row.updated_at = now;
                true
            }
            None => false,
        }
    }

    /// Insert a fully-formed row, bypassing timestamp assignment.
    pub fn insert_raw(&self, row: StoredKey) {
        self.rows.write().push(row);
    }

    /// Copy of every row in insertion order.
    pub fn rows_snapshot(&self) -> Vec<StoredKey> {
        self.rows.read().clone()
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn create(&self, key: NewDataKey) -> Result<StoredKey, StoreError> {
        let mut rows = self.rows.write();
        if rows.iter().any(|r| r.fingerprint == key.fingerprint) {
            return Err(StoreError::Duplicate(key.fingerprint));
        }
        let now = Utc::now();
        let row = StoredKey {
            fingerprint: key.fingerprint,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            data_key: key.data_key,
        };
        rows.push(row.clone());
        Ok(row)
    }

    async fn find_latest_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Option<StoredKey>, StoreError> {
        Ok(self
            .rows
            .read()
            .iter()
            .filter(|r| r.deleted_at.is_none() && r.created_at > since)
            .max_by_key(|r| r.created_at)
            .cloned())
    }

    async fn find_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<StoredKey>, StoreError> {
        Ok(self
            .rows
            .read()
            .iter()
            .find(|r| r.fingerprint == fingerprint && r.deleted_at.is_none())
            .cloned())
    }
}
