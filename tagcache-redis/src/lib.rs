//! Redis storage for the tagcache HTTP response cache.
//!
//! [`RedisStorage`] lets several processes share cached responses and the
//! distributed tag index. The connection is established lazily on first use
//! through a [`redis::aio::ConnectionManager`], which reconnects on its own.
//!
//! ```no_run
//! use tagcache_redis::RedisStorage;
//!
//! let storage = RedisStorage::builder()
//!     .server("redis://127.0.0.1/")
//!     .prefix("app1:")
//!     .build()
//!     .unwrap();
//! ```
#![warn(missing_docs)]

pub mod error;
pub mod storage;

#[doc(inline)]
pub use crate::error::Error;
#[doc(inline)]
pub use crate::storage::{RedisStorage, RedisStorageBuilder};
