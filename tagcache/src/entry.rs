//! Cached response records and the manager routing them through storage.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use tagcache_backend::{DeleteStatus, Storage, StorageError};
use tracing::{debug, warn};

use crate::error::{CacheError, EntryError};
use crate::heap::HeapHandle;

const POOL_CAPACITY: usize = 64;

/// One stored response.
///
/// Timestamps are Unix seconds. `headers` never holds hop-by-hop headers, nor
/// the headers that have a dedicated field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedEntry {
    /// Response body.
    #[serde(with = "serde_bytes")]
    pub body: Vec<u8>,
    /// `Content-Type` of the response.
    pub content_type: Option<String>,
    /// `Content-Encoding` of the response.
    pub content_encoding: Option<String>,
    /// Numeric status code.
    pub status: u16,
    /// Preserved response headers, lowercase name to raw values.
    pub headers: BTreeMap<String, Vec<String>>,
    /// Absolute expiration.
    pub expires_at: u64,
    /// TTL the entry was admitted with.
    pub ttl: u64,
    /// Creation time, used to compute `Age`.
    pub created_at: u64,
    /// The response carried `must-revalidate`.
    pub must_revalidate: bool,
    /// The response carried `proxy-revalidate`.
    pub proxy_revalidate: bool,
    /// Quoted entity tag.
    pub etag: Option<String>,
    /// `Last-Modified` as an HTTP-date.
    pub last_modified: Option<String>,
    /// `Cache-Control` set by the handler, kept verbatim.
    pub cache_control: Option<String>,
    /// Expiration record created when the entry was admitted.
    ///
    /// Published entries are never rewritten, so the admitting cache
    /// resolves removals through its own key to handle map, which holds
    /// the same handle. The copy here identifies the record when the entry
    /// is inspected, and is meaningless to other processes.
    pub heap_handle: Option<HeapHandle>,
}

impl CachedEntry {
    /// Clears every field while keeping allocated capacity.
    pub fn reset(&mut self) {
        self.body.clear();
        self.content_type = None;
        self.content_encoding = None;
        self.status = 0;
        self.headers.clear();
        self.expires_at = 0;
        self.ttl = 0;
        self.created_at = 0;
        self.must_revalidate = false;
        self.proxy_revalidate = false;
        self.etag = None;
        self.last_modified = None;
        self.cache_control = None;
        self.heap_handle = None;
    }

    /// Seconds of freshness left at `now`.
    pub fn remaining(&self, now: u64) -> u64 {
        self.expires_at.saturating_sub(now)
    }

    /// Whether the entry is past its expiration at `now`.
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at <= now
    }
}

/// Encoding used for stored entries.
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryFormat {
    /// Compact binary encoding with bincode.
    #[default]
    Bincode,
    /// JSON, readable when inspecting the storage by hand.
    Json,
}

impl EntryFormat {
    /// Encodes an entry.
    pub fn serialize(&self, entry: &CachedEntry) -> Result<Vec<u8>, EntryError> {
        match self {
            EntryFormat::Bincode => {
                bincode::serde::encode_to_vec(entry, bincode::config::standard())
                    .map_err(|err| EntryError::Serialize(Box::new(err)))
            }
            EntryFormat::Json => {
                serde_json::to_vec(entry).map_err(|err| EntryError::Serialize(Box::new(err)))
            }
        }
    }

    /// Decodes an entry.
    pub fn deserialize(&self, data: &[u8]) -> Result<CachedEntry, EntryError> {
        match self {
            EntryFormat::Bincode => {
                bincode::serde::decode_from_slice(data, bincode::config::standard())
                    .map(|(entry, _)| entry)
                    .map_err(|err| EntryError::Deserialize(Box::new(err)))
            }
            EntryFormat::Json => {
                serde_json::from_slice(data).map_err(|err| EntryError::Deserialize(Box::new(err)))
            }
        }
    }
}

/// Allocates, encodes and stores [`CachedEntry`] values.
///
/// Entries are recycled through a pool once written, but only for storages
/// living outside the process.
pub struct EntryManager {
    storage: Arc<dyn Storage>,
    format: EntryFormat,
    pool: Option<Mutex<Vec<CachedEntry>>>,
}

impl std::fmt::Debug for EntryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryManager")
            .field("storage", &self.storage.name())
            .field("format", &self.format)
            .field("pooled", &self.pool.is_some())
            .finish()
    }
}

impl EntryManager {
    /// Creates a manager writing through `storage`.
    pub fn new(storage: Arc<dyn Storage>, format: EntryFormat) -> Self {
        let pool = (!storage.is_in_process()).then(|| Mutex::new(Vec::new()));
        Self {
            storage,
            format,
            pool,
        }
    }

    /// Storage the manager writes through.
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Takes a cleared entry from the pool, or allocates one.
    pub fn acquire(&self) -> CachedEntry {
        self.pool
            .as_ref()
            .and_then(|pool| pool.lock().unwrap_or_else(PoisonError::into_inner).pop())
            .unwrap_or_default()
    }

    /// Returns an entry to the pool.
    pub fn release(&self, mut entry: CachedEntry) {
        if let Some(pool) = &self.pool {
            let mut pool = pool.lock().unwrap_or_else(PoisonError::into_inner);
            if pool.len() < POOL_CAPACITY {
                entry.reset();
                pool.push(entry);
            }
        }
    }

    /// Reads and decodes the entry under `key`.
    ///
    /// Undecodable records are deleted and reported as missing.
    pub async fn get(&self, key: &str) -> Result<Option<CachedEntry>, CacheError> {
        let Some(raw) = self.get_raw(key).await? else {
            return Ok(None);
        };
        let decoded = self.format.deserialize(&raw).and_then(|entry| {
            StatusCode::from_u16(entry.status)
                .map(|_| entry)
                .map_err(|err| EntryError::Deserialize(Box::new(err)))
        });
        match decoded {
            Ok(entry) => Ok(Some(entry)),
            Err(error) => {
                warn!(key = %key, %error, "dropping undecodable cache entry");
                if let Err(error) = self.delete(key).await {
                    debug!(key = %key, %error, "failed to delete undecodable entry");
                }
                Ok(None)
            }
        }
    }

    /// Reads the raw bytes under `key`.
    pub async fn get_raw(&self, key: &str) -> Result<Option<Bytes>, StorageError> {
        self.storage.get(key).await
    }

    /// Encodes `entry` and writes it under `key`.
    ///
    /// On success the entry goes back to the pool.
    pub async fn set(
        &self,
        key: &str,
        entry: CachedEntry,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let data = self.format.serialize(&entry)?;
        self.set_raw(key, Bytes::from(data), ttl).await?;
        self.release(entry);
        Ok(())
    }

    /// Writes raw bytes under `key`.
    pub async fn set_raw(
        &self,
        key: &str,
        data: Bytes,
        ttl: Option<Duration>,
    ) -> Result<(), StorageError> {
        self.storage.set(key, data, ttl).await
    }

    /// Deletes the entry under `key`.
    pub async fn delete(&self, key: &str) -> Result<DeleteStatus, StorageError> {
        self.storage.delete(key).await
    }
}
