//! Error types for Redis storage operations.
//!
//! All errors convert into [`StorageError`] for uniform handling by the cache.
//!
//! [`StorageError`]: tagcache_backend::StorageError

use redis::RedisError;
use tagcache_backend::StorageError;

/// Error type for Redis storage operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An error from the underlying Redis client.
    ///
    /// This includes connection failures, protocol errors, authentication
    /// failures, and command execution errors.
    #[error("Redis storage error: {0}")]
    Redis(#[from] RedisError),
}

impl From<Error> for StorageError {
    fn from(error: Error) -> Self {
        match error {
            Error::Redis(ref inner)
                if inner.is_io_error() || inner.is_connection_dropped() || inner.is_timeout() =>
            {
                Self::Connection(Box::new(error))
            }
            Error::Redis(_) => Self::Internal(Box::new(error)),
        }
    }
}
