use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;

use crate::StorageError;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Status of deleting result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteStatus {
    /// Record successfully deleted.
    Deleted(u32),
    /// Record already missing.
    Missing,
}

/// Key/value storage the cache writes through.
///
/// Keys are plain strings and values opaque byte sequences. A `ttl` of `None`
/// or [`Duration::ZERO`] means the record never expires. Reading a missing or
/// expired key yields `Ok(None)`, never an error.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Reads the value stored under `key`.
    async fn get(&self, key: &str) -> StorageResult<Option<Bytes>>;

    /// Stores `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> StorageResult<()>;

    /// Removes `key`.
    async fn delete(&self, key: &str) -> StorageResult<DeleteStatus>;

    /// Removes every record.
    async fn reset(&self) -> StorageResult<()>;

    /// Releases resources held by the storage.
    async fn close(&self) -> StorageResult<()>;

    /// Returns the name of this storage, used in logs.
    fn name(&self) -> &str {
        "storage"
    }

    /// Whether the records live inside this process.
    fn is_in_process(&self) -> bool {
        false
    }
}

#[async_trait]
impl Storage for &dyn Storage {
    async fn get(&self, key: &str) -> StorageResult<Option<Bytes>> {
        (*self).get(key).await
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> StorageResult<()> {
        (*self).set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> StorageResult<DeleteStatus> {
        (*self).delete(key).await
    }

    async fn reset(&self) -> StorageResult<()> {
        (*self).reset().await
    }

    async fn close(&self) -> StorageResult<()> {
        (*self).close().await
    }

    fn name(&self) -> &str {
        (*self).name()
    }

    fn is_in_process(&self) -> bool {
        (*self).is_in_process()
    }
}

#[async_trait]
impl Storage for Box<dyn Storage> {
    async fn get(&self, key: &str) -> StorageResult<Option<Bytes>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> StorageResult<()> {
        (**self).set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> StorageResult<DeleteStatus> {
        (**self).delete(key).await
    }

    async fn reset(&self) -> StorageResult<()> {
        (**self).reset().await
    }

    async fn close(&self) -> StorageResult<()> {
        (**self).close().await
    }

    fn name(&self) -> &str {
        (**self).name()
    }

    fn is_in_process(&self) -> bool {
        (**self).is_in_process()
    }
}

#[async_trait]
impl Storage for Arc<dyn Storage> {
    async fn get(&self, key: &str) -> StorageResult<Option<Bytes>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> StorageResult<()> {
        (**self).set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> StorageResult<DeleteStatus> {
        (**self).delete(key).await
    }

    async fn reset(&self) -> StorageResult<()> {
        (**self).reset().await
    }

    async fn close(&self) -> StorageResult<()> {
        (**self).close().await
    }

    fn name(&self) -> &str {
        (**self).name()
    }

    fn is_in_process(&self) -> bool {
        (**self).is_in_process()
    }
}

/// Normalizes a caller supplied TTL: zero means "no expiry".
pub fn effective_ttl(ttl: Option<Duration>) -> Option<Duration> {
    ttl.filter(|ttl| !ttl.is_zero())
}
