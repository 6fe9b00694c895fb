use tagcache::{Config, ResponseCache};
use tower::Layer;

use crate::service::CacheService;

/// Tower [`Layer`] adding the response cache to a service.
///
/// Cloning the layer shares the underlying [`ResponseCache`], so every
/// service it wraps sees the same entries, byte budget and tag index.
#[derive(Clone, Debug)]
pub struct Cache {
    cache: ResponseCache,
}

impl Cache {
    /// Creates a layer backed by a new cache built from `config`.
    pub fn new(config: Config) -> Self {
        Self {
            cache: ResponseCache::new(config),
        }
    }

    /// Creates a builder with the default configuration.
    pub fn builder() -> CacheBuilder {
        CacheBuilder::default()
    }

    /// The cache shared by the wrapped services.
    pub fn response_cache(&self) -> &ResponseCache {
        &self.cache
    }
}

impl From<ResponseCache> for Cache {
    fn from(cache: ResponseCache) -> Self {
        Self { cache }
    }
}

impl<S> Layer<S> for Cache {
    type Service = CacheService<S>;

    fn layer(&self, upstream: S) -> Self::Service {
        CacheService::new(upstream, self.cache.clone())
    }
}

/// Builder for [`Cache`].
#[derive(Default)]
pub struct CacheBuilder {
    config: Option<Config>,
    cache: Option<ResponseCache>,
}

impl CacheBuilder {
    /// Configuration of the cache created by [`build`](Self::build).
    pub fn config(self, config: Config) -> Self {
        CacheBuilder {
            config: Some(config),
            ..self
        }
    }

    /// Reuses an existing cache instead of creating one.
    ///
    /// Takes precedence over [`config`](Self::config).
    pub fn cache(self, cache: ResponseCache) -> Self {
        CacheBuilder {
            cache: Some(cache),
            ..self
        }
    }

    /// Builds the layer.
    pub fn build(self) -> Cache {
        match self.cache {
            Some(cache) => Cache { cache },
            None => Cache::new(self.config.unwrap_or_default()),
        }
    }
}
