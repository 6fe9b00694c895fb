//! Adapter calling the wrapped Tower service on cache misses.
//!
//! [`ResponseCache::handle`](tagcache::ResponseCache::handle) works on
//! buffered `Response<Bytes>` values, so the adapter collects the body of
//! the upstream response before handing it back.

use bytes::Bytes;
use http::{Request, Response};
use http_body::Body as HttpBody;
use http_body_util::BodyExt;
use tagcache::BoxError;
use tower::Service;

/// A ready Tower service, consumed by a single call.
pub struct TowerUpstream<S> {
    service: S,
}

impl<S> TowerUpstream<S> {
    /// Wraps a service that has already been polled ready.
    pub fn new(service: S) -> Self {
        Self { service }
    }

    /// Calls the service and buffers the response body.
    pub async fn call<ReqBody, ResBody>(
        mut self,
        request: Request<ReqBody>,
    ) -> Result<Response<Bytes>, BoxError>
    where
        S: Service<Request<ReqBody>, Response = Response<ResBody>>,
        S::Error: Into<BoxError>,
        ResBody: HttpBody,
        ResBody::Error: Into<BoxError>,
    {
        let response = self.service.call(request).await.map_err(Into::into)?;
        buffer(response).await
    }
}

/// Collects the body of `response` into [`Bytes`].
pub async fn buffer<B>(response: Response<B>) -> Result<Response<Bytes>, BoxError>
where
    B: HttpBody,
    B::Error: Into<BoxError>,
{
    let (parts, body) = response.into_parts();
    let bytes = body.collect().await.map_err(Into::into)?.to_bytes();
    Ok(Response::from_parts(parts, bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::Full;

    #[tokio::test]
    async fn buffers_body_and_keeps_head() {
        let response = Response::builder()
            .status(201)
            .header("x-test", "1")
            .body(Full::new(Bytes::from_static(b"payload")))
            .unwrap();
        let buffered = buffer(response).await.unwrap();
        assert_eq!(buffered.status(), 201);
        assert_eq!(buffered.headers()["x-test"], "1");
        assert_eq!(buffered.body(), "payload");
    }
}
