use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tagcache_backend::StorageResult;

use super::TagIndex;

/// Forward and reverse tag maps, kept mutually consistent.
#[derive(Debug, Default)]
pub(crate) struct TagMaps {
    forward: HashMap<String, HashSet<String>>,
    reverse: HashMap<String, HashSet<String>>,
}

impl TagMaps {
    pub(crate) fn add(&mut self, key: &str, tags: &[String]) {
        if tags.is_empty() {
            return;
        }
        let reverse = self.reverse.entry(key.to_owned()).or_default();
        for tag in tags {
            self.forward
                .entry(tag.clone())
                .or_default()
                .insert(key.to_owned());
            reverse.insert(tag.clone());
        }
    }

    pub(crate) fn has(&self, key: &str) -> bool {
        self.reverse.contains_key(key)
    }

    pub(crate) fn remove(&mut self, key: &str) {
        let Some(tags) = self.reverse.remove(key) else {
            return;
        };
        for tag in tags {
            if let Some(keys) = self.forward.get_mut(&tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.forward.remove(&tag);
                }
            }
        }
    }

    pub(crate) fn invalidate(&mut self, tags: &[String]) -> Vec<String> {
        let mut keys = HashSet::new();
        for tag in tags {
            if let Some(bucket) = self.forward.remove(tag) {
                keys.extend(bucket);
            }
        }
        for key in &keys {
            if let Some(reverse) = self.reverse.get_mut(key) {
                for tag in tags {
                    reverse.remove(tag);
                }
                if reverse.is_empty() {
                    self.reverse.remove(key);
                }
            }
        }
        keys.into_iter().collect()
    }
}

/// In-process bidirectional tag index.
///
/// All operations take one mutex for a short, non-suspending critical section.
#[derive(Debug, Default)]
pub struct LocalTagIndex {
    maps: Mutex<TagMaps>,
}

impl LocalTagIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    fn maps(&self) -> MutexGuard<'_, TagMaps> {
        self.maps.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn add_sync(&self, key: &str, tags: &[String]) {
        self.maps().add(key, tags);
    }

    pub(crate) fn remove_sync(&self, key: &str) {
        self.maps().remove(key);
    }

    pub(crate) fn invalidate_sync(&self, tags: &[String]) -> Vec<String> {
        self.maps().invalidate(tags)
    }

    /// Keys currently registered under `tag`.
    pub fn keys_for(&self, tag: &str) -> Vec<String> {
        self.maps()
            .forward
            .get(tag)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Tags currently registered for `key`.
    pub fn tags_for(&self, key: &str) -> Vec<String> {
        self.maps()
            .reverse
            .get(key)
            .map(|tags| tags.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl TagIndex for LocalTagIndex {
    async fn add(&self, key: &str, tags: &[String]) -> StorageResult<()> {
        self.add_sync(key, tags);
        Ok(())
    }

    fn has(&self, key: &str) -> bool {
        self.maps().has(key)
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        self.remove_sync(key);
        Ok(())
    }

    async fn invalidate(&self, tags: &[String]) -> StorageResult<Vec<String>> {
        Ok(self.invalidate_sync(tags))
    }
}
