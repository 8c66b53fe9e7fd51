//! DEK (Data Encryption Key) lifecycle: generation, fingerprinting, rotation,
//! persistence hand-off and read-side resolution.
//!
//! # Lifecycle
//!
//! 1. [`DekManager::bootstrap`] reuses the newest live key created within one
//!    rotation interval, or generates and persists a fresh one.
//! 2. Writers take the single current key with
//!    [`DekManager::checkout_current`]. The returned [`CurrentKey`] is the
//!    only handle to the slot; dropping it (or passing it to
//!    [`DekManager::return_current`]) releases the slot, so every exit path
//!    releases, including a cancelled task.
//! 3. Rotation is decided lazily at checkout once the deadline has passed. A
//!    failed rotation keeps the previous key and retries on the next checkout.
//! 4. Readers call [`DekManager::resolve`] with the fingerprint embedded in a
//!    ciphertext: cache first, then the store.
//!
//! # Security invariants
//!
//! - DEK material is wrapped under the root key before it reaches the store.
//! - Key material is never logged or included in traces; only fingerprints.

pub mod cache;
pub mod key;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod store;

pub use cache::KeyCache;
pub use key::{DataKey, DekBytes};
pub use store::{KeyStore, MemoryKeyStore, NewDataKey, StoreError, StoredKey};

use std::ops::Deref;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use zeroize::Zeroize;

use crate::config::EngineOptions;
use crate::crypto::keys::FingerprintKey;
use crate::crypto::{generate_key, BlockCodec, KEY_LEN};
use crate::error::{Error, Result};

/// Creates, unwraps and caches keys. Everything except the current slot.
struct Keyring {
    store: Arc<dyn KeyStore>,
    wrapper: BlockCodec,
    fingerprinter: FingerprintKey,
    cache: KeyCache,
}

impl Keyring {
    /// Generate material, fingerprint it, wrap it, and persist a new row.
    async fn new_key(&self) -> Result<Arc<DataKey>> {
        let mut raw = generate_key()?;
        let material = DekBytes::new(&raw);
        raw.zeroize();

        let fingerprint = self.fingerprinter.fingerprint(material.as_slice());
        let data_key = self.wrapper.encrypt(material.as_slice())?;
        let row = self
            .store
            .create(NewDataKey {
                fingerprint,
                data_key,
            })
            .await?;

        let key = Arc::new(DataKey::new(row.fingerprint, material, row.created_at));
        self.cache.insert(Arc::clone(&key));
        Ok(key)
    }

    /// Unwrap a stored row and check the material against its fingerprint.
    fn unwrap_row(&self, row: StoredKey) -> Result<DataKey> {
        let mut plain = self.wrapper.decrypt(&row.data_key)?;
        let material: Result<[u8; KEY_LEN], _> = plain.as_slice().try_into();
        plain.zeroize();
        let mut material =
            material.map_err(|_| Error::FingerprintMismatch(row.fingerprint.clone()))?;

        let derived = self.fingerprinter.fingerprint(&material);
        let bytes = DekBytes::new(&material);
        material.zeroize();
        if derived != row.fingerprint {
            return Err(Error::FingerprintMismatch(row.fingerprint));
        }
        Ok(DataKey::new(row.fingerprint, bytes, row.created_at))
    }
}

struct Slot {
    key: Arc<DataKey>,
    /// `None` when the interval is too long to represent; the key never rotates.
    rotate_at: Option<Instant>,
}

impl Slot {
    fn rotation_due(&self) -> bool {
        self.rotate_at.is_some_and(|at| Instant::now() >= at)
    }
}

fn rotation_deadline(after: Duration) -> Option<Instant> {
    Instant::now().checked_add(after)
}

/// Exclusive checkout of the current DEK.
///
/// While a `CurrentKey` is alive every other checkout waits. Dropping it
/// releases the slot.
pub struct CurrentKey {
    slot: OwnedMutexGuard<Slot>,
}

impl CurrentKey {
    /// A shared handle to the key, usable after the slot is released.
    pub fn share(&self) -> Arc<DataKey> {
        Arc::clone(&self.slot.key)
    }
}

impl Deref for CurrentKey {
    type Target = DataKey;

    fn deref(&self) -> &DataKey {
        &self.slot.key
    }
}

impl std::fmt::Debug for CurrentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CurrentKey").field(&*self.slot.key).finish()
    }
}

/// Owner of the single current DEK and the read-side cache.
pub struct DekManager {
    keyring: Keyring,
    current: Arc<Mutex<Slot>>,
    rotate_after: Duration,
}

impl DekManager {
    /// Build a manager and seed the current slot.
    ///
    /// Reuses the newest live key created within `options.rotation_interval`
    /// of now. If there is none, or the lookup or unwrap fails, a new key is
    /// generated and persisted.
    ///
    /// # Errors
    ///
    /// Fails only if a new key is needed and cannot be generated or persisted.
    pub async fn bootstrap(store: Arc<dyn KeyStore>, options: &EngineOptions) -> Result<Self> {
        let keyring = Keyring {
            store,
            wrapper: BlockCodec::new(&options.root_key),
            fingerprinter: options.root_key.fingerprinting_key(),
            cache: KeyCache::new(options.cache_size, options.cache_ttl),
        };
        let rotate_after = options.rotation_interval;

        let since = chrono::Duration::from_std(rotate_after)
            .ok()
            .and_then(|d| Utc::now().checked_sub_signed(d))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let reused = match keyring.store.find_latest_since(since).await {
            Ok(Some(row)) => {
                let fingerprint = row.fingerprint.clone();
                match keyring.unwrap_row(row) {
                    Ok(key) => Some(Arc::new(key)),
                    Err(e) => {
                        warn!(%fingerprint, error = %e, "latest DEK is unusable; generating a new one");
                        None
                    }
                }
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "failed to look up latest DEK; generating a new one");
                None
            }
        };

        let key = match reused {
            Some(key) => {
                keyring.cache.insert(Arc::clone(&key));
                info!(fingerprint = %key.fingerprint(), "reusing existing DEK");
                key
            }
            None => {
                let key = keyring.new_key().await?;
                info!(fingerprint = %key.fingerprint(), "created initial DEK");
                key
            }
        };

        Ok(Self {
            keyring,
            current: Arc::new(Mutex::new(Slot {
                key,
                rotate_at: rotation_deadline(rotate_after),
            })),
            rotate_after,
        })
    }

    /// Take exclusive hold of the current DEK, rotating it first if due.
    ///
    /// Waits, without timeout, while another caller holds the slot. If a
    /// due rotation cannot persist the new key, the previous key is returned
    /// and the deadline is left in the past so the next checkout retries.
    pub async fn checkout_current(&self) -> CurrentKey {
        let mut slot = Arc::clone(&self.current).lock_owned().await;

        if slot.rotation_due() {
            match self.keyring.new_key().await {
                Ok(next) => {
                    info!(
                        previous = %slot.key.fingerprint(),
                        current = %next.fingerprint(),
                        "DEK rotated"
                    );
                    slot.key = next;
                    slot.rotate_at = rotation_deadline(self.rotate_after);
                }
                Err(e) => warn!(
                    fingerprint = %slot.key.fingerprint(),
                    error = %e,
                    "DEK rotation failed; retaining previous key"
                ),
            }
        }

        CurrentKey { slot }
    }

    /// Release a checked-out key so the next writer can take it.
    ///
    /// Equivalent to dropping the [`CurrentKey`].
    pub fn return_current(&self, current: CurrentKey) {
        drop(current);
    }

    /// Look up a historical or current key by the fingerprint embedded in a
    /// ciphertext.
    ///
    /// # Errors
    ///
    /// - [`Error::KeyNotFound`] if no live row has this fingerprint.
    /// - [`Error::Store`] if the store lookup fails.
    /// - [`Error::FingerprintMismatch`] if the row does not unwrap to
    ///   material matching its fingerprint (wrong root key).
    pub async fn resolve(&self, fingerprint: &str) -> Result<Arc<DataKey>> {
        if let Some(key) = self.keyring.cache.get(fingerprint) {
            return Ok(key);
        }

        debug!(%fingerprint, "DEK cache miss; querying store");
        let row = self
            .keyring
            .store
            .find_by_fingerprint(fingerprint)
            .await?
            .ok_or_else(|| Error::KeyNotFound(fingerprint.to_owned()))?;

        let key = Arc::new(self.keyring.unwrap_row(row)?);
        self.keyring.cache.insert(Arc::clone(&key));
        Ok(key)
    }

    /// Generate and persist a new key without touching the current slot.
    ///
    /// # Errors
    ///
    /// Propagates entropy and store failures.
    pub(crate) async fn new_key(&self) -> Result<Arc<DataKey>> {
        self.keyring.new_key().await
    }

    /// The read cache, for inspection.
    pub fn cache(&self) -> &KeyCache {
        &self.keyring.cache
    }
}

impl std::fmt::Debug for DekManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DekManager")
            .field("rotate_after", &self.rotate_after)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::RootKey;
    use crate::dek::store::MockKeyStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::sleep;

    fn options(seed: u8) -> EngineOptions {
        EngineOptions::new(RootKey::from_slice(&[seed; KEY_LEN]).unwrap())
    }

    fn stored(key: NewDataKey) -> StoredKey {
        let now = Utc::now();
        StoredKey {
            fingerprint: key.fingerprint,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            data_key: key.data_key,
        }
    }

    #[tokio::test]
    async fn bootstrap_creates_key_in_empty_store() {
        let store = MemoryKeyStore::new();
        let manager = DekManager::bootstrap(Arc::new(store.clone()), &options(1))
            .await
            .unwrap();
        assert_eq!(store.len(), 1);
        let current = manager.checkout_current().await;
        assert_eq!(current.material().len(), KEY_LEN);
    }

    #[tokio::test]
    async fn bootstrap_reuses_recent_key() {
        let store = Arc::new(MemoryKeyStore::new());
        let first = DekManager::bootstrap(store.clone(), &options(1)).await.unwrap();
        let fp = first.checkout_current().await.fingerprint().to_owned();

        let second = DekManager::bootstrap(store.clone(), &options(1)).await.unwrap();
        assert_eq!(second.checkout_current().await.fingerprint(), fp);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn bootstrap_skips_expired_key() {
        let store = Arc::new(MemoryKeyStore::new());
        let opts = EngineOptions {
            rotation_interval: Duration::from_millis(30),
            ..options(1)
        };
        let first = DekManager::bootstrap(store.clone(), &opts).await.unwrap();
        let fp = first.checkout_current().await.fingerprint().to_owned();

        sleep(Duration::from_millis(60)).await;
        let second = DekManager::bootstrap(store.clone(), &opts).await.unwrap();
        assert_ne!(second.checkout_current().await.fingerprint(), fp);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn bootstrap_replaces_key_wrapped_under_other_root() {
        let store = Arc::new(MemoryKeyStore::new());
        DekManager::bootstrap(store.clone(), &options(1)).await.unwrap();
        DekManager::bootstrap(store.clone(), &options(2)).await.unwrap();
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn bootstrap_survives_lookup_failure() {
        let mut store = MockKeyStore::new();
        store
            .expect_find_latest_since()
            .times(1)
            .returning(|_| Err(StoreError::Backend("connection refused".into())));
        store
            .expect_create()
            .times(1)
            .returning(|key| Ok(stored(key)));
        assert!(DekManager::bootstrap(Arc::new(store), &options(1)).await.is_ok());
    }

    #[tokio::test]
    async fn bootstrap_fails_when_key_cannot_be_persisted() {
        let mut store = MockKeyStore::new();
        store.expect_find_latest_since().returning(|_| Ok(None));
        store
            .expect_create()
            .returning(|_| Err(StoreError::Backend("read-only".into())));
        assert!(matches!(
            DekManager::bootstrap(Arc::new(store), &options(1)).await,
            Err(Error::Store(_))
        ));
    }

    #[tokio::test]
    async fn rotation_after_interval() {
        let store = Arc::new(MemoryKeyStore::new());
        let opts = EngineOptions {
            rotation_interval: Duration::from_millis(50),
            ..options(1)
        };
        let manager = DekManager::bootstrap(store.clone(), &opts).await.unwrap();

        let first = manager.checkout_current().await.fingerprint().to_owned();
        let again = manager.checkout_current().await.fingerprint().to_owned();
        assert_eq!(first, again);

        sleep(Duration::from_millis(80)).await;
        let rotated = manager.checkout_current().await.fingerprint().to_owned();
        assert_ne!(first, rotated);
        assert_eq!(store.len(), 2);

        // The superseded key stays resolvable.
        assert_eq!(manager.resolve(&first).await.unwrap().fingerprint(), first);
    }

    #[tokio::test]
    async fn unrepresentable_interval_never_rotates() {
        let store = Arc::new(MemoryKeyStore::new());
        let opts = EngineOptions {
            rotation_interval: Duration::from_secs(u64::MAX),
            ..options(1)
        };
        let manager = DekManager::bootstrap(store.clone(), &opts).await.unwrap();

        let first = manager.checkout_current().await.fingerprint().to_owned();
        sleep(Duration::from_millis(10)).await;
        let again = manager.checkout_current().await.fingerprint().to_owned();
        assert_eq!(first, again);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn failed_rotation_keeps_previous_key_and_retries() {
        let creates = Arc::new(AtomicUsize::new(0));
        let mut store = MockKeyStore::new();
        store.expect_find_latest_since().returning(|_| Ok(None));
        let counter = Arc::clone(&creates);
        store.expect_create().returning(move |key| {
            // Calls: bootstrap ok, first rotation fails, retry ok.
            match counter.fetch_add(1, Ordering::SeqCst) {
                1 => Err(StoreError::Backend("deadlock detected".into())),
                _ => Ok(stored(key)),
            }
        });

        let opts = EngineOptions {
            rotation_interval: Duration::from_millis(30),
            ..options(1)
        };
        let manager = DekManager::bootstrap(Arc::new(store), &opts).await.unwrap();
        let initial = manager.checkout_current().await.fingerprint().to_owned();

        sleep(Duration::from_millis(50)).await;
        let after_failure = manager.checkout_current().await.fingerprint().to_owned();
        assert_eq!(after_failure, initial);

        let retried = manager.checkout_current().await.fingerprint().to_owned();
        assert_ne!(retried, initial);
        assert_eq!(creates.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn second_checkout_waits_for_return() {
        let manager = Arc::new(
            DekManager::bootstrap(Arc::new(MemoryKeyStore::new()), &options(1))
                .await
                .unwrap(),
        );
        let held = manager.checkout_current().await;

        let waiter = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.checkout_current().await.fingerprint().to_owned() })
        };
        sleep(Duration::from_millis(30)).await;
        assert!(!waiter.is_finished());

        let fp = held.fingerprint().to_owned();
        manager.return_current(held);
        assert_eq!(waiter.await.unwrap(), fp);
    }

    #[tokio::test]
    async fn cancelled_waiter_does_not_leak_slot() {
        let manager = DekManager::bootstrap(Arc::new(MemoryKeyStore::new()), &options(1))
            .await
            .unwrap();
        let held = manager.checkout_current().await;
        let timed_out =
            tokio::time::timeout(Duration::from_millis(20), manager.checkout_current()).await;
        assert!(timed_out.is_err());
        drop(held);
        assert!(
            tokio::time::timeout(Duration::from_millis(200), manager.checkout_current())
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn resolve_reads_store_once_within_ttl() {
        let root = RootKey::from_slice(&[1; KEY_LEN]).unwrap();
        let source = DekManager::bootstrap(
            Arc::new(MemoryKeyStore::new()),
            &EngineOptions::new(root.clone()),
        )
        .await
        .unwrap();
        let historical = source.new_key().await.unwrap();
        let row = StoredKey {
            fingerprint: historical.fingerprint().to_owned(),
            created_at: historical.created_at(),
            updated_at: historical.created_at(),
            deleted_at: None,
            data_key: BlockCodec::new(&root).encrypt(historical.material()).unwrap(),
        };

        let mut store = MockKeyStore::new();
        store.expect_find_latest_since().returning(|_| Ok(None));
        store.expect_create().returning(|key| Ok(stored(key)));
        let lookup = row.clone();
        store
            .expect_find_by_fingerprint()
            .times(1)
            .returning(move |_| Ok(Some(lookup.clone())));

        let manager = DekManager::bootstrap(Arc::new(store), &EngineOptions::new(root))
            .await
            .unwrap();
        let a = manager.resolve(&row.fingerprint).await.unwrap();
        let b = manager.resolve(&row.fingerprint).await.unwrap();
        assert_eq!(a.material(), historical.material());
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn resolve_rereads_after_ttl_expiry() {
        let store = Arc::new(MemoryKeyStore::new());
        let root = RootKey::from_slice(&[1; KEY_LEN]).unwrap();
        let writer = DekManager::bootstrap(store.clone(), &EngineOptions::new(root.clone()))
            .await
            .unwrap();
        let fp = writer.new_key().await.unwrap().fingerprint().to_owned();
        let row = store.find_by_fingerprint(&fp).await.unwrap().unwrap();

        let mut mock = MockKeyStore::new();
        mock.expect_find_latest_since().returning(|_| Ok(None));
        mock.expect_create().returning(|key| Ok(stored(key)));
        mock.expect_find_by_fingerprint()
            .times(2)
            .returning(move |_| Ok(Some(row.clone())));

        let opts = EngineOptions {
            cache_ttl: Duration::from_millis(40),
            ..EngineOptions::new(root)
        };
        let reader = DekManager::bootstrap(Arc::new(mock), &opts).await.unwrap();
        reader.resolve(&fp).await.unwrap();
        reader.resolve(&fp).await.unwrap();
        sleep(Duration::from_millis(70)).await;
        reader.resolve(&fp).await.unwrap();
    }

    #[tokio::test]
    async fn resolve_rereads_after_capacity_eviction() {
        let store = Arc::new(MemoryKeyStore::new());
        let root = RootKey::from_slice(&[1; KEY_LEN]).unwrap();
        let writer = DekManager::bootstrap(store.clone(), &EngineOptions::new(root.clone()))
            .await
            .unwrap();
        let mut fps = Vec::new();
        for _ in 0..3 {
            fps.push(writer.new_key().await.unwrap().fingerprint().to_owned());
        }

        let reads = Arc::new(AtomicUsize::new(0));
        let mut mock = MockKeyStore::new();
        mock.expect_find_latest_since().returning(|_| Ok(None));
        mock.expect_create().returning(|key| Ok(stored(key)));
        let backing = store.clone();
        let counter = Arc::clone(&reads);
        mock.expect_find_by_fingerprint().returning(move |fp| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(backing
                .rows_snapshot()
                .into_iter()
                .find(|r| r.fingerprint == fp))
        });

        // Capacity 2: the bootstrap key occupies one slot.
        let opts = EngineOptions {
            cache_size: 2,
            ..EngineOptions::new(root)
        };
        let reader = DekManager::bootstrap(Arc::new(mock), &opts).await.unwrap();
        reader.resolve(&fps[0]).await.unwrap();
        reader.resolve(&fps[0]).await.unwrap();
        assert_eq!(reads.load(Ordering::SeqCst), 1);

        reader.resolve(&fps[1]).await.unwrap();
        reader.resolve(&fps[2]).await.unwrap();
        reader.resolve(&fps[0]).await.unwrap();
        assert_eq!(reads.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn resolve_unknown_fingerprint_is_not_found() {
        let manager = DekManager::bootstrap(Arc::new(MemoryKeyStore::new()), &options(1))
            .await
            .unwrap();
        assert!(matches!(
            manager.resolve("missing").await,
            Err(Error::KeyNotFound(fp)) if fp == "missing"
        ));
        assert!(manager.cache().get("missing").is_none());
    }

    #[tokio::test]
    async fn resolve_deleted_key_is_not_found() {
        let store = Arc::new(MemoryKeyStore::new());
        let root = RootKey::from_slice(&[1; KEY_LEN]).unwrap();
        let writer = DekManager::bootstrap(store.clone(), &EngineOptions::new(root.clone()))
            .await
            .unwrap();
        let fp = writer.new_key().await.unwrap().fingerprint().to_owned();
        store.soft_delete(&fp);

        let reader = DekManager::bootstrap(store.clone(), &EngineOptions::new(root))
            .await
            .unwrap();
        assert!(matches!(reader.resolve(&fp).await, Err(Error::KeyNotFound(_))));
    }

    #[tokio::test]
    async fn resolve_rejects_key_wrapped_under_other_root() {
        let store = Arc::new(MemoryKeyStore::new());
        let writer = DekManager::bootstrap(store.clone(), &options(1)).await.unwrap();
        let fp = writer.new_key().await.unwrap().fingerprint().to_owned();

        let reader = DekManager::bootstrap(store.clone(), &options(2)).await.unwrap();
        assert!(matches!(
            reader.resolve(&fp).await,
            Err(Error::FingerprintMismatch(_))
        ));
        assert!(reader.cache().get(&fp).is_none());
    }

    #[tokio::test]
    async fn legacy_unwrapped_rows_resolve() {
        let store = Arc::new(MemoryKeyStore::new());
        let root = RootKey::from_slice(&[1; KEY_LEN]).unwrap();
        let material = generate_key().unwrap();
        let fp = root.fingerprinting_key().fingerprint(&material);
        let now = Utc::now();
        store.insert_raw(StoredKey {
            fingerprint: fp.clone(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
            data_key: material.to_vec(),
        });

        let manager = DekManager::bootstrap(store, &EngineOptions::new(root))
            .await
            .unwrap();
        assert_eq!(manager.resolve(&fp).await.unwrap().material(), &material);
    }

    #[tokio::test]
    async fn stored_material_is_wrapped() {
        let store = Arc::new(MemoryKeyStore::new());
        let manager = DekManager::bootstrap(store.clone(), &options(1)).await.unwrap();
        let current = manager.checkout_current().await;
        let row = store
            .find_by_fingerprint(current.fingerprint())
            .await
            .unwrap()
            .unwrap();
        assert!(row.data_key.starts_with(b"ENC:\x01,"));
        assert!(!row
            .data_key
            .windows(KEY_LEN)
            .any(|w| w == current.material()));
    }
}
