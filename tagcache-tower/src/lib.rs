//! Tower middleware integration for the `tagcache` HTTP response cache.
//!
//! This crate provides [`Cache`], a Tower [`Layer`] that serves `GET` and
//! `HEAD` responses from a [`ResponseCache`], answers conditional requests
//! with `304 Not Modified` and lets handlers drop cached responses by tag.
//!
//! # Quick Start
//!
//! ```
//! use std::time::Duration;
//! use tagcache_tower::{Cache, Config};
//! use tower::{ServiceBuilder, service_fn};
//!
//! let layer = Cache::builder()
//!     .config(
//!         Config::builder()
//!             .expiration(Duration::from_secs(60))
//!             .tags(|req| vec![format!("path:{}", req.uri().path())])
//!             .build(),
//!     )
//!     .build();
//!
//! let service = ServiceBuilder::new()
//!     .layer(layer)
//!     .service(service_fn(|_req: http::Request<String>| async {
//!         Ok::<_, std::convert::Infallible>(http::Response::new(String::from("hello")))
//!     }));
//! # drop(service);
//! ```
//!
//! # Invalidation from handlers
//!
//! Every request passed to the wrapped service carries an [`Invalidator`] in
//! its extensions. With axum it can be extracted directly:
//!
//! ```ignore
//! async fn update_user(Extension(invalidator): Extension<Invalidator>) -> StatusCode {
//!     invalidator.invalidate(["user:1"]).await.ok();
//!     StatusCode::NO_CONTENT
//! }
//! ```
//!
//! # Response Headers
//!
//! | `X-Cache` | Meaning |
//! |-----------|---------|
//! | `hit` | Served from the cache |
//! | `miss` | Produced by the wrapped service and stored |
//! | `unreachable` | Produced by the wrapped service, not stored |
//!
//! [`Layer`]: tower::Layer

#![warn(missing_docs)]

/// Future types for the cache service.
pub mod future;
/// Tower layer and builder.
pub mod layer;
/// The Tower service performing the caching.
pub mod service;
pub mod upstream;

pub use layer::{Cache, CacheBuilder};
pub use service::CacheService;
pub use tagcache::{
    CacheError, CacheStatus, Config, ConfigBuilder, Invalidator, ResponseCache, X_CACHE,
    invalidate_tags,
};
pub use upstream::TowerUpstream;
