//! Error types for cache operations.

use tagcache_backend::{BoxError, StorageError};
use thiserror::Error;

/// Failure while converting a [`CachedEntry`](crate::entry::CachedEntry) to or
/// from its stored byte form.
#[derive(Debug, Error)]
pub enum EntryError {
    /// The entry could not be encoded.
    #[error("failed to serialize cache entry: {0}")]
    Serialize(#[source] BoxError),

    /// Stored bytes could not be decoded into an entry.
    #[error("failed to deserialize cache entry: {0}")]
    Deserialize(#[source] BoxError),
}

/// Error type for cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Storage failure outside of eviction.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Deleting an entry while enforcing the byte budget failed.
    ///
    /// Surfaced to the caller because the budget can no longer be trusted.
    #[error("eviction failed: {0}")]
    Eviction(#[source] StorageError),

    /// Entry encoding or decoding failure.
    #[error(transparent)]
    Entry(#[from] EntryError),

    /// Tag invalidation was requested on a request the middleware never saw.
    #[error("invalidating tags requires the cache middleware")]
    MiddlewareMissing,

    /// The downstream handler failed. The response is never cached.
    #[error("upstream error: {0}")]
    Upstream(#[source] BoxError),

    /// The task populating an entry panicked or was aborted.
    #[error("cache population task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Invalid configuration value.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A method name in the settings could not be parsed.
    #[error("invalid method `{0}`")]
    InvalidMethod(String),

    /// A header name in the settings could not be parsed.
    #[error("invalid header name `{0}`")]
    InvalidHeaderName(String),
}
