//! HTTP response cache with tag based invalidation.
//!
//! `tagcache` stores buffered HTTP responses under a per-request fingerprint,
//! answers conditional requests (`If-None-Match`, `If-Modified-Since`) from
//! the stored validators, keeps the total cached body size under a byte
//! budget, and groups entries under tags so related responses can be dropped
//! together.
//!
//! # Core Concepts
//!
//! - **[`ResponseCache`]**: the orchestrator. Give it a request and a handler
//!   closure; it returns the response marked with `X-Cache: hit | miss | unreachable`.
//! - **[`Config`]**: TTL, byte budget, fingerprinting, tagging and header
//!   options. [`Settings`] is its file-loadable subset.
//! - **[`Storage`]**: where entries live. [`MemoryStorage`] by default, or any
//!   external storage such as `tagcache-redis`.
//! - **[`TagIndex`]**: tag to key mapping, in process ([`LocalTagIndex`]) or
//!   shared through the storage ([`DistributedTagIndex`]).
//! - **[`Invalidator`]**: bound to every request the middleware sees, used by
//!   handlers to invalidate tags.
//!
//! For Tower based servers use the `tagcache-tower` crate, which wraps
//! [`ResponseCache`] in a `Layer`.
//!
//! # Feature Flags
//!
//! - `metrics`: record hit/miss/eviction counters and handler latency with
//!   the `metrics` crate.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

/// The cache orchestrator.
pub mod cache;

/// Single-flight coordination, so that concurrent misses on one fingerprint
/// call the handler once.
pub mod concurrency;

/// Middleware configuration.
pub mod config;

/// Cached response records, their encodings and the manager storing them.
pub mod entry;

/// Error types for cache operations.
pub mod error;

/// `Cache-Control` parsing, age, conditional requests and validators.
pub mod freshness;

/// Expiration-ordered heap backing the byte budget.
pub mod heap;

mod invalidate;

/// Metrics collection for cache observability.
pub mod metrics;

/// Tag pattern matching for rejected responses.
pub mod reject;

/// The `X-Cache` status marker.
pub mod status;

/// Tag indexes.
pub mod tags;

pub use cache::ResponseCache;
pub use config::{Config, ConfigBuilder, Settings};
pub use entry::{CachedEntry, EntryFormat, EntryManager};
pub use error::{CacheError, ConfigError, EntryError};
pub use invalidate::{Invalidator, invalidate_tags};
pub use reject::RejectMatcher;
pub use status::{CacheStatus, X_CACHE};
pub use tags::{DistributedTagIndex, LocalTagIndex, TagIndex, TagsMode};

pub use tagcache_backend::{
    BoxError, DeleteStatus, MemoryStorage, MemoryStorageBuilder, Storage, StorageError,
    StorageResult,
};
