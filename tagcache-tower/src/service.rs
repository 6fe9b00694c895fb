use std::task::{Context, Poll};

use bytes::Bytes;
use http::{Request, Response};
use http_body::Body as HttpBody;
use http_body_util::Full;
use tagcache::{BoxError, ResponseCache};
use tower::Service;
use tracing::trace;

use crate::future::CacheServiceFuture;
use crate::upstream::TowerUpstream;

/// Tower [`Service`] serving responses through a [`ResponseCache`].
///
/// Responses are buffered, so the response body type is always
/// [`Full<Bytes>`]. Errors of the wrapped service are returned as they are;
/// cache failures that cannot degrade to pass-through (a failed eviction or
/// a panicking handler task) are returned boxed.
#[derive(Clone, Debug)]
pub struct CacheService<S> {
    upstream: S,
    cache: ResponseCache,
}

impl<S> CacheService<S> {
    /// Wraps `upstream` with `cache`.
    pub fn new(upstream: S, cache: ResponseCache) -> Self {
        CacheService { upstream, cache }
    }

    /// The cache serving this service.
    pub fn response_cache(&self) -> &ResponseCache {
        &self.cache
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for CacheService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError>,
    ReqBody: Send + 'static,
    ResBody: HttpBody + Send + 'static,
    ResBody::Data: Send,
    ResBody::Error: Into<BoxError>,
{
    type Response = Response<Full<Bytes>>;
    type Error = BoxError;
    type Future = CacheServiceFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.upstream.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        // Keep the service that was polled ready, leave a fresh clone behind.
        let clone = self.upstream.clone();
        let upstream = TowerUpstream::new(std::mem::replace(&mut self.upstream, clone));
        let cache = self.cache.clone();
        trace!(method = %request.method(), uri = %request.uri(), "cache service call");

        CacheServiceFuture::new(Box::pin(async move {
            cache
                .handle(request, move |request| upstream.call(request))
                .await
        }))
    }
}
