//! Redis storage implementation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use redis::{Client, aio::ConnectionManager};
use tagcache_backend::{
    DeleteStatus, Storage, StorageError, StorageResult, effective_ttl,
};
use tokio::sync::OnceCell;
use tracing::trace;

use crate::error::Error;

const SCAN_BATCH: usize = 500;

/// Redis storage based on the redis-rs crate.
///
/// Every key is stored as a plain Redis string, optionally namespaced with a
/// prefix so several applications can share one database.
pub struct RedisStorage {
    client: Client,
    connection: OnceCell<ConnectionManager>,
    prefix: String,
    name: String,
    closed: AtomicBool,
}

impl std::fmt::Debug for RedisStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStorage")
            .field("name", &self.name)
            .field("prefix", &self.prefix)
            .field("connected", &self.connection.initialized())
            .finish()
    }
}

impl RedisStorage {
    /// Creates new RedisStorage builder with default settings.
    #[must_use]
    pub fn builder() -> RedisStorageBuilder {
        RedisStorageBuilder::default()
    }

    /// Create lazy connection to redis via [`ConnectionManager`]
    pub async fn connection(&self) -> Result<ConnectionManager, StorageError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }
        trace!("Get connection manager");
        let manager = self
            .connection
            .get_or_try_init(|| {
                trace!("Initialize new redis connection manager");
                self.client.get_connection_manager()
            })
            .await
            .map_err(Error::from)?;
        Ok(manager.clone())
    }

    fn key(&self, key: &str) -> String {
        let mut full = String::with_capacity(self.prefix.len() + key.len());
        full.push_str(&self.prefix);
        full.push_str(key);
        full
    }

    async fn delete_prefixed(&self, con: &mut ConnectionManager) -> Result<(), Error> {
        let pattern = format!("{}*", self.prefix);
        let mut cursor: u64 = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(con)
                .await?;
            if !keys.is_empty() {
                redis::cmd("DEL").arg(&keys).query_async::<()>(con).await?;
            }
            if next == 0 {
                return Ok(());
            }
            cursor = next;
        }
    }
}

/// Part of builder pattern implementation for RedisStorage.
#[derive(Debug, Clone)]
pub struct RedisStorageBuilder {
    connection_info: String,
    prefix: String,
    name: String,
}

impl Default for RedisStorageBuilder {
    fn default() -> Self {
        Self {
            connection_info: "redis://127.0.0.1/".to_owned(),
            prefix: String::new(),
            name: "redis".to_owned(),
        }
    }
}

impl RedisStorageBuilder {
    /// Set connection info (host, port, database, etc.) for RedisStorage.
    pub fn server(mut self, connection_info: impl Into<String>) -> Self {
        self.connection_info = connection_info.into();
        self
    }

    /// Namespace every key with `prefix`.
    ///
    /// With a prefix set, [`Storage::reset`] only removes keys under the
    /// prefix instead of flushing the whole database.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Set a custom name for this storage, used in logs.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Create new instance of Redis storage with passed settings.
    ///
    /// Only the connection URL is validated here, no connection is made.
    pub fn build(self) -> Result<RedisStorage, Error> {
        Ok(RedisStorage {
            client: Client::open(self.connection_info)?,
            connection: OnceCell::new(),
            prefix: self.prefix,
            name: self.name,
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl Storage for RedisStorage {
    async fn get(&self, key: &str) -> StorageResult<Option<Bytes>> {
        let mut con = self.connection().await?;
        let data: Option<Vec<u8>> = redis::cmd("GET")
            .arg(self.key(key))
            .query_async(&mut con)
            .await
            .map_err(Error::from)?;
        Ok(data.map(Bytes::from))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> StorageResult<()> {
        let mut con = self.connection().await?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.key(key)).arg(value.as_ref());
        if let Some(ttl) = effective_ttl(ttl) {
            let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
            cmd.arg("PX").arg(millis);
        }
        cmd.query_async::<()>(&mut con)
            .await
            .map_err(Error::from)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<DeleteStatus> {
        let mut con = self.connection().await?;
        let deleted: u32 = redis::cmd("DEL")
            .arg(self.key(key))
            .query_async(&mut con)
            .await
            .map_err(Error::from)?;
        if deleted > 0 {
            Ok(DeleteStatus::Deleted(deleted))
        } else {
            Ok(DeleteStatus::Missing)
        }
    }

    async fn reset(&self) -> StorageResult<()> {
        let mut con = self.connection().await?;
        if self.prefix.is_empty() {
            redis::cmd("FLUSHDB")
                .query_async::<()>(&mut con)
                .await
                .map_err(Error::from)?;
        } else {
            self.delete_prefixed(&mut con).await?;
        }
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
