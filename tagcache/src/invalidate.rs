use http::Extensions;

use crate::cache::ResponseCache;
use crate::error::CacheError;

/// Handle to invalidate tags of the cache that served the current request.
///
/// The middleware inserts one into the request extensions, so handlers can
/// pick it up (for example with axum's `Extension<Invalidator>` extractor) or
/// go through [`invalidate_tags`].
#[derive(Clone)]
pub struct Invalidator {
    cache: ResponseCache,
}

impl std::fmt::Debug for Invalidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invalidator").finish_non_exhaustive()
    }
}

impl Invalidator {
    pub(crate) fn new(cache: ResponseCache) -> Self {
        Self { cache }
    }

    /// Drops every entry registered under any of `tags`.
    ///
    /// Returns the number of keys removed.
    pub async fn invalidate<I, S>(&self, tags: I) -> Result<usize, CacheError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tags = tags.into_iter().map(Into::into).collect();
        self.cache.invalidate_tags(tags).await
    }
}

/// Invalidates `tags` through the [`Invalidator`] bound to a request.
///
/// Fails with [`CacheError::MiddlewareMissing`] when the request did not go
/// through the cache middleware.
///
/// ```
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let extensions = http::Extensions::new();
/// let error = tagcache::invalidate_tags(&extensions, ["user:1"]).await.unwrap_err();
/// assert!(error.to_string().contains("requires the cache middleware"));
/// # }
/// ```
pub async fn invalidate_tags<I, S>(extensions: &Extensions, tags: I) -> Result<usize, CacheError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let invalidator = extensions
        .get::<Invalidator>()
        .cloned()
        .ok_or(CacheError::MiddlewareMissing)?;
    invalidator.invalidate(tags).await
}
