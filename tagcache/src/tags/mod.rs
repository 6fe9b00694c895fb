//! Tag to key indexes used for group invalidation.
//!
//! Two implementations share the [`TagIndex`] contract:
//!
//! - [`LocalTagIndex`] keeps both maps in process memory.
//! - [`DistributedTagIndex`] persists them in a shared [`Storage`] so several
//!   processes observe each other's invalidations.
//!
//! [`Storage`]: tagcache_backend::Storage

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tagcache_backend::StorageResult;

pub mod codec;
mod distributed;
mod local;

pub use distributed::DistributedTagIndex;
pub use local::LocalTagIndex;

/// Where the tag index lives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagsMode {
    /// In-process maps only.
    #[default]
    Local,
    /// Maps persisted in the cache storage.
    Distributed,
}

/// Bidirectional tag to key mapping.
#[async_trait]
pub trait TagIndex: Send + Sync {
    /// Registers `key` under every tag. No-op for an empty slice.
    async fn add(&self, key: &str, tags: &[String]) -> StorageResult<()>;

    /// Whether any tag is registered for `key`. Never suspends.
    fn has(&self, key: &str) -> bool;

    /// Forgets `key` and drops it from every tag it was registered under.
    async fn remove(&self, key: &str) -> StorageResult<()>;

    /// Removes `tags` and returns every key that was registered under them.
    async fn invalidate(&self, tags: &[String]) -> StorageResult<Vec<String>>;

    /// Re-registers `key` when the index no longer knows it.
    ///
    /// Called on every cache hit.
    async fn ensure(&self, key: &str, tags: &[String]) -> StorageResult<()> {
        if tags.is_empty() || self.has(key) {
            return Ok(());
        }
        self.add(key, tags).await
    }
}

#[async_trait]
impl TagIndex for Arc<dyn TagIndex> {
    async fn add(&self, key: &str, tags: &[String]) -> StorageResult<()> {
        (**self).add(key, tags).await
    }

    fn has(&self, key: &str) -> bool {
        (**self).has(key)
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        (**self).remove(key).await
    }

    async fn invalidate(&self, tags: &[String]) -> StorageResult<Vec<String>> {
        (**self).invalidate(tags).await
    }

    async fn ensure(&self, key: &str, tags: &[String]) -> StorageResult<()> {
        (**self).ensure(key, tags).await
    }
}
