use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tagcache_backend::{Storage, StorageResult};
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use super::codec::{decode_string_set, encode_string_set};
use super::{LocalTagIndex, TagIndex};

const FORWARD_PREFIX: &str = "tagcache:tag:";
const REVERSE_PREFIX: &str = "tagcache:key:";

/// Tag index shared between processes through a [`Storage`].
///
/// Forward (`tag -> keys`) and reverse (`key -> tags`) sets are persisted
/// with the [`codec`](super::codec) encoding. A local mirror answers
/// [`TagIndex::has`] without touching the storage, so it can be stale after
/// another process invalidated a tag.
pub struct DistributedTagIndex {
    local: LocalTagIndex,
    storage: Arc<dyn Storage>,
    rmw: Mutex<()>,
    ttl: Option<Duration>,
    verify_on_hit: bool,
}

impl std::fmt::Debug for DistributedTagIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedTagIndex")
            .field("storage", &self.storage.name())
            .field("ttl", &self.ttl)
            .field("verify_on_hit", &self.verify_on_hit)
            .finish()
    }
}

impl DistributedTagIndex {
    /// Creates an index persisting its sets in `storage`.
    ///
    /// `ttl` applies to every persisted set; `None` keeps them forever.
    pub fn new(storage: Arc<dyn Storage>, ttl: Option<Duration>) -> Self {
        Self {
            local: LocalTagIndex::new(),
            storage,
            rmw: Mutex::new(()),
            ttl,
            verify_on_hit: false,
        }
    }

    /// Check the persisted reverse set on every [`TagIndex::ensure`] call
    /// instead of trusting the local mirror.
    pub fn verify_on_hit(mut self, verify: bool) -> Self {
        self.verify_on_hit = verify;
        self
    }

    /// The in-process mirror.
    pub fn local(&self) -> &LocalTagIndex {
        &self.local
    }

    /// Reads the persisted keys registered under `tag`.
    pub async fn stored_keys(&self, tag: &str) -> StorageResult<Vec<String>> {
        self.read_set(&forward_key(tag)).await
    }

    /// Reads the persisted tags registered for `key`.
    pub async fn stored_tags(&self, key: &str) -> StorageResult<Vec<String>> {
        self.read_set(&reverse_key(key)).await
    }

    async fn read_set(&self, key: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .storage
            .get(key)
            .await?
            .map(|data| decode_string_set(&data))
            .unwrap_or_default())
    }

    async fn write_set(&self, key: &str, set: &[String]) -> StorageResult<()> {
        if set.is_empty() {
            self.storage.delete(key).await?;
        } else {
            let data = Bytes::from(encode_string_set(set));
            self.storage.set(key, data, self.ttl).await?;
        }
        Ok(())
    }
}

fn forward_key(tag: &str) -> String {
    format!("{FORWARD_PREFIX}{tag}")
}

fn reverse_key(key: &str) -> String {
    format!("{REVERSE_PREFIX}{key}")
}

#[async_trait]
impl TagIndex for DistributedTagIndex {
    async fn add(&self, key: &str, tags: &[String]) -> StorageResult<()> {
        if tags.is_empty() {
            return Ok(());
        }
        self.local.add_sync(key, tags);

        let _guard = self.rmw.lock().await;
        for tag in tags {
            let bucket = forward_key(tag);
            let mut keys = self.read_set(&bucket).await?;
            if !keys.iter().any(|k| k == key) {
                keys.push(key.to_owned());
                self.write_set(&bucket, &keys).await?;
            }
        }

        let reverse = reverse_key(key);
        let mut stored = self.read_set(&reverse).await?;
        let before = stored.len();
        for tag in tags {
            if !stored.contains(tag) {
                stored.push(tag.clone());
            }
        }
        if stored.len() != before {
            self.write_set(&reverse, &stored).await?;
        }
        trace!(key = %key, ?tags, "registered tags");
        Ok(())
    }

    fn has(&self, key: &str) -> bool {
        self.local.has(key)
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        self.local.remove_sync(key);

        let _guard = self.rmw.lock().await;
        let reverse = reverse_key(key);
        for tag in self.read_set(&reverse).await? {
            let bucket = forward_key(&tag);
            let mut keys = self.read_set(&bucket).await?;
            let before = keys.len();
            keys.retain(|k| k != key);
            if keys.len() != before {
                self.write_set(&bucket, &keys).await?;
            }
        }
        self.storage.delete(&reverse).await?;
        Ok(())
    }

    async fn invalidate(&self, tags: &[String]) -> StorageResult<Vec<String>> {
        let mut seen = HashSet::new();
        let mut keys = Vec::new();
        for key in self.local.invalidate_sync(tags) {
            if seen.insert(key.clone()) {
                keys.push(key);
            }
        }

        let _guard = self.rmw.lock().await;
        // Nothing is rewritten until every forward set has been read, so a
        // failed read leaves the persisted index intact for a retry.
        for tag in tags {
            for key in self.read_set(&forward_key(tag)).await? {
                if seen.insert(key.clone()) {
                    keys.push(key);
                }
            }
        }

        for key in &keys {
            let reverse = reverse_key(key);
            let rewrite = match self.read_set(&reverse).await {
                Ok(mut stored) => {
                    stored.retain(|tag| !tags.contains(tag));
                    self.write_set(&reverse, &stored).await
                }
                Err(error) => Err(error),
            };
            if let Err(error) = rewrite {
                warn!(key = %key, %error, "failed to rewrite reverse tag set");
            }
        }
        for tag in tags {
            if let Err(error) = self.storage.delete(&forward_key(tag)).await {
                warn!(tag = %tag, %error, "failed to delete forward tag set");
            }
        }

        debug!(?tags, keys = keys.len(), "invalidated tags");
        Ok(keys)
    }

    async fn ensure(&self, key: &str, tags: &[String]) -> StorageResult<()> {
        if tags.is_empty() {
            return Ok(());
        }
        if self.verify_on_hit {
            let stored = self.stored_tags(key).await?;
            if tags.iter().all(|tag| stored.contains(tag)) {
                return Ok(());
            }
            debug!(key = %key, "persisted tags are missing, registering again");
        } else if self.has(key) {
            return Ok(());
        }
        self.add(key, tags).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tagcache_backend::MemoryStorage;

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(|tag| (*tag).to_owned()).collect()
    }

    #[tokio::test]
    async fn persists_both_directions() {
        let index = DistributedTagIndex::new(Arc::new(MemoryStorage::new()), None);
        index.add("k1", &tags(&["a", "b"])).await.unwrap();
        index.add("k2", &tags(&["a"])).await.unwrap();

        assert_eq!(index.stored_keys("a").await.unwrap(), tags(&["k1", "k2"]));
        assert_eq!(index.stored_tags("k1").await.unwrap(), tags(&["a", "b"]));
        assert!(index.has("k1"));
    }

    #[tokio::test]
    async fn remove_deletes_empty_sets() {
        let storage = Arc::new(MemoryStorage::new());
        let index = DistributedTagIndex::new(storage.clone(), None);
        index.add("k1", &tags(&["a"])).await.unwrap();
        index.remove("k1").await.unwrap();

        assert!(!index.has("k1"));
        assert!(storage.is_empty().await);
    }

    #[tokio::test]
    async fn invalidate_rewrites_reverse_sets() {
        let index = DistributedTagIndex::new(Arc::new(MemoryStorage::new()), None);
        index.add("k1", &tags(&["a", "b"])).await.unwrap();

        assert_eq!(index.invalidate(&tags(&["a"])).await.unwrap(), tags(&["k1"]));
        assert!(index.stored_keys("a").await.unwrap().is_empty());
        assert_eq!(index.stored_tags("k1").await.unwrap(), tags(&["b"]));
        assert_eq!(index.local().tags_for("k1"), tags(&["b"]));
    }
}
