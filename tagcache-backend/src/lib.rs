//! Storage contract for the tagcache HTTP response cache.
//!
//! The cache writes serialized responses and tag index records through the
//! [`Storage`] trait. This crate provides the trait, its error type and
//! [`MemoryStorage`], an in-process implementation with TTL support.
//!
//! Any external key/value service can back the cache by implementing
//! [`Storage`]; `tagcache-redis` is one such implementation. Trait objects
//! (`Box<dyn Storage>`, `Arc<dyn Storage>`) implement the trait as well, so a
//! storage chosen at runtime plugs in the same way as a concrete one.
#![warn(missing_docs)]

mod error;
pub mod memory;
mod storage;

pub use error::{BoxError, StorageError};
pub use memory::{MemoryStorage, MemoryStorageBuilder};
pub use storage::{DeleteStatus, Storage, StorageResult, effective_ttl};
