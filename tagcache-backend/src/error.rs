//! Error types for storage operations.

use thiserror::Error;

/// Boxed error used to carry failures from concrete storage drivers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Error type for storage operations.
///
/// Storage errors are surfaced verbatim to the caller. Nothing in this crate
/// retries an operation on its own.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Internal storage error, state or computation error.
    ///
    /// Any error not related to network interaction.
    #[error(transparent)]
    Internal(BoxError),

    /// Network interaction error.
    ///
    /// Errors occurring during communication with remote storages (e.g., Redis).
    #[error(transparent)]
    Connection(BoxError),

    /// The storage was closed and refuses further operations.
    #[error("storage is closed")]
    Closed,
}

impl StorageError {
    /// Wraps any error as an [`StorageError::Internal`].
    pub fn internal<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Internal(Box::new(error))
    }

    /// Wraps any error as an [`StorageError::Connection`].
    pub fn connection<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Connection(Box::new(error))
    }
}
