use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::ready;
use http::Response;
use http_body_util::Full;
use pin_project::pin_project;
use tagcache::{BoxError, CacheError};

/// Future returned by [`CacheService`](crate::service::CacheService).
///
/// Turns the buffered response into a [`Full`] body and unwraps handler
/// errors, so the wrapped service's own errors reach the caller unchanged.
#[pin_project]
pub struct CacheServiceFuture {
    #[pin]
    inner: BoxFuture<'static, Result<Response<Bytes>, CacheError>>,
}

impl CacheServiceFuture {
    pub(crate) fn new(inner: BoxFuture<'static, Result<Response<Bytes>, CacheError>>) -> Self {
        Self { inner }
    }
}

impl Future for CacheServiceFuture {
    type Output = Result<Response<Full<Bytes>>, BoxError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let result = ready!(this.inner.poll(cx));
        Poll::Ready(match result {
            Ok(response) => Ok(response.map(Full::new)),
            Err(CacheError::Upstream(error)) => Err(error),
            Err(error) => Err(error.into()),
        })
    }
}

impl std::fmt::Debug for CacheServiceFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheServiceFuture").finish_non_exhaustive()
    }
}
