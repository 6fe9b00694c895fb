//! In-process storage.
//!
//! [`MemoryStorage`] keeps records in a `HashMap` behind a read/write lock.
//! Expired records are invisible to readers immediately and physically
//! removed by a periodic sweep task.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{trace, warn};

use crate::storage::effective_ttl;
use crate::{DeleteStatus, Storage, StorageError, StorageResult};

/// Default period between two expiry sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(10);

const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
struct Slot {
    data: Bytes,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

type Records = RwLock<HashMap<String, Slot>>;

struct Inner {
    records: Arc<Records>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    name: String,
}

impl Inner {
    fn stop_sweeper(&self) {
        let handle = match self.sweeper.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.stop_sweeper();
    }
}

/// In-process key/value storage with TTL support.
///
/// Cloning is cheap: clones share the same records and sweep task.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use tagcache_backend::{MemoryStorage, Storage};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let storage = MemoryStorage::builder()
///     .sweep_interval(Duration::from_secs(1))
///     .build();
///
/// storage.set("greeting", "hello".into(), None).await.unwrap();
/// assert_eq!(storage.get("greeting").await.unwrap().as_deref(), Some(&b"hello"[..]));
/// # }
/// ```
#[derive(Clone)]
pub struct MemoryStorage {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("name", &self.inner.name)
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl MemoryStorage {
    /// Creates a storage with the default sweep interval.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Creates a new [`MemoryStorageBuilder`].
    pub fn builder() -> MemoryStorageBuilder {
        MemoryStorageBuilder::default()
    }

    /// Number of records currently held, expired ones included.
    pub async fn len(&self) -> usize {
        self.inner.records.read().await.len()
    }

    /// Returns `true` when no record is held.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            Err(StorageError::Closed)
        } else {
            Ok(())
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`MemoryStorage`].
#[derive(Debug, Clone)]
pub struct MemoryStorageBuilder {
    sweep_interval: Duration,
    name: String,
}

impl Default for MemoryStorageBuilder {
    fn default() -> Self {
        Self {
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            name: "memory".to_owned(),
        }
    }
}

impl MemoryStorageBuilder {
    /// Sets the period between two expiry sweeps.
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval.max(MIN_SWEEP_INTERVAL);
        self
    }

    /// Sets the name reported by [`Storage::name`].
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Builds the storage and starts its sweep task.
    ///
    /// Outside of a Tokio runtime no sweep task is started; expired records
    /// are then only hidden from readers, never reclaimed.
    pub fn build(self) -> MemoryStorage {
        let records: Arc<Records> = Arc::new(RwLock::new(HashMap::new()));
        let sweeper = match tokio::runtime::Handle::try_current() {
            Ok(handle) => Some(handle.spawn(sweep(Arc::downgrade(&records), self.sweep_interval))),
            Err(_) => {
                warn!(storage = %self.name, "no tokio runtime, expiry sweep disabled");
                None
            }
        };
        MemoryStorage {
            inner: Arc::new(Inner {
                records,
                sweeper: Mutex::new(sweeper),
                closed: AtomicBool::new(false),
                name: self.name,
            }),
        }
    }
}

async fn sweep(records: Weak<Records>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let Some(records) = records.upgrade() else {
            break;
        };
        let now = Instant::now();
        let mut records = records.write().await;
        let before = records.len();
        records.retain(|_, slot| !slot.is_expired(now));
        let removed = before - records.len();
        if removed > 0 {
            trace!(removed, "memory storage sweep");
        }
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: &str) -> StorageResult<Option<Bytes>> {
        self.ensure_open()?;
        let records = self.inner.records.read().await;
        let now = Instant::now();
        Ok(records
            .get(key)
            .filter(|slot| !slot.is_expired(now))
            .map(|slot| slot.data.clone()))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> StorageResult<()> {
        self.ensure_open()?;
        let expires_at = effective_ttl(ttl).map(|ttl| Instant::now() + ttl);
        self.inner.records.write().await.insert(
            key.to_owned(),
            Slot {
                data: value,
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<DeleteStatus> {
        self.ensure_open()?;
        let removed = self.inner.records.write().await.remove(key);
        Ok(match removed {
            Some(_) => DeleteStatus::Deleted(1),
            None => DeleteStatus::Missing,
        })
    }

    async fn reset(&self) -> StorageResult<()> {
        self.ensure_open()?;
        self.inner.records.write().await.clear();
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            self.inner.stop_sweeper();
            self.inner.records.write().await.clear();
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.inner.name
    }

    fn is_in_process(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_key_is_not_an_error() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.get("nope").await.unwrap(), None);
        assert_eq!(storage.delete("nope").await.unwrap(), DeleteStatus::Missing);
    }

    #[tokio::test]
    async fn zero_ttl_never_expires() {
        tokio::time::pause();
        let storage = MemoryStorage::new();
        storage
            .set("k", Bytes::from_static(b"v"), Some(Duration::ZERO))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(3600)).await;
        assert!(storage.get("k").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn expired_record_is_hidden_then_swept() {
        tokio::time::pause();
        let storage = MemoryStorage::builder()
            .sweep_interval(Duration::from_secs(1))
            .build();
        storage
            .set("k", Bytes::from_static(b"v"), Some(Duration::from_millis(500)))
            .await
            .unwrap();
        assert!(storage.get("k").await.unwrap().is_some());

        tokio::time::advance(Duration::from_millis(600)).await;
        assert_eq!(storage.get("k").await.unwrap(), None);
        assert_eq!(storage.len().await, 1, "hidden but not yet reclaimed");

        tokio::time::advance(Duration::from_secs(2)).await;
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        assert_eq!(storage.len().await, 0);
    }

    #[tokio::test]
    async fn reset_clears_everything() {
        let storage = MemoryStorage::new();
        for key in ["a", "b", "c"] {
            storage.set(key, Bytes::from_static(b"1"), None).await.unwrap();
        }
        storage.reset().await.unwrap();
        assert!(storage.is_empty().await);
    }

    #[tokio::test]
    async fn closed_storage_refuses_operations() {
        let storage = MemoryStorage::new();
        storage.close().await.unwrap();
        assert!(matches!(
            storage.get("k").await,
            Err(StorageError::Closed)
        ));
        // closing twice is harmless
        storage.close().await.unwrap();
    }

    #[test]
    fn builds_without_runtime() {
        let storage = MemoryStorage::new();
        assert!(storage.is_in_process());
        assert_eq!(storage.name(), "memory");
    }
}
