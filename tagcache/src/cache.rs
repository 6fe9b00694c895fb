//! The cache middleware orchestrator.
//!
//! [`ResponseCache`] drives a request through lookup, conditional handling,
//! single-flight population, byte-budget admission and tag registration. It
//! is framework agnostic: the downstream handler is passed in as a closure
//! producing a fully buffered [`Response<Bytes>`].

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use http::header::{
    AGE, CACHE_CONTROL, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, ETAG, LAST_MODIFIED,
};
use http::{HeaderMap, HeaderName, HeaderValue, Method, Request, Response, StatusCode};
use tagcache_backend::{BoxError, MemoryStorage, Storage};
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::concurrency::{Flight, SingleFlight};
use crate::config::Config;
use crate::entry::{CachedEntry, EntryManager};
use crate::error::CacheError;
use crate::freshness::{
    self, CacheControl, etag_for, http_date, is_not_modified, quote_etag,
    synthesize_cache_control,
};
use crate::heap::{ExpirationHeap, HeapHandle};
use crate::invalidate::Invalidator;
use crate::metrics;
use crate::reject::RejectMatcher;
use crate::status::{CacheStatus, X_CACHE};
use crate::tags::{DistributedTagIndex, LocalTagIndex, TagIndex, TagsMode};

/// Statuses a shared cache may store without explicit freshness information.
const CACHEABLE_STATUSES: [u16; 11] = [200, 203, 204, 206, 300, 301, 404, 405, 410, 414, 501];

/// Headers rebuilt from dedicated [`CachedEntry`] fields or recomputed on
/// every response.
const DEDICATED_HEADERS: [HeaderName; 8] = [
    CONTENT_TYPE,
    CONTENT_ENCODING,
    CONTENT_LENGTH,
    ETAG,
    LAST_MODIFIED,
    CACHE_CONTROL,
    AGE,
    X_CACHE,
];

#[derive(Debug, Default)]
struct Budget {
    heap: ExpirationHeap,
    used: usize,
    /// Same handles as [`CachedEntry::heap_handle`] of the stored entries.
    tracked: HashMap<String, HeapHandle>,
}

impl Budget {
    fn untrack(&mut self, key: &str) {
        if let Some(handle) = self.tracked.remove(key)
            && let Some((_, bytes)) = self.heap.remove(handle)
        {
            self.used = self.used.saturating_sub(bytes);
        }
    }
}

/// What admission needs to know about a cacheable response.
struct Admission {
    ttl: u64,
    expires_at: u64,
    directives: CacheControl,
    tags: Vec<String>,
}

struct Inner {
    config: Config,
    entries: EntryManager,
    budget: Mutex<Budget>,
    tags: Arc<dyn TagIndex>,
    flights: SingleFlight,
    reject: RejectMatcher,
}

/// HTTP response cache with tag based invalidation.
///
/// Cloning is cheap and clones share all state.
///
/// # Example
///
/// ```
/// use bytes::Bytes;
/// use http::{Request, Response};
/// use tagcache::{Config, ResponseCache};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let cache = ResponseCache::new(Config::builder().build());
///
/// let handler = |_req: Request<()>| async {
///     Ok::<_, tagcache::BoxError>(Response::new(Bytes::from_static(b"hello")))
/// };
/// let first = cache.handle(Request::get("/hello").body(()).unwrap(), handler).await.unwrap();
/// assert_eq!(first.headers()["x-cache"], "miss");
///
/// let second = cache.handle(Request::get("/hello").body(()).unwrap(), handler).await.unwrap();
/// assert_eq!(second.headers()["x-cache"], "hit");
/// assert_eq!(second.body(), "hello");
/// # }
/// ```
#[derive(Clone)]
pub struct ResponseCache {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("config", &self.inner.config)
            .field("entries", &self.inner.entries)
            .finish_non_exhaustive()
    }
}

impl ResponseCache {
    /// Creates a cache from `config`.
    ///
    /// Without a configured storage a new [`MemoryStorage`] is used.
    pub fn new(config: Config) -> Self {
        let storage: Arc<dyn Storage> = match &config.storage {
            Some(storage) => Arc::clone(storage),
            None => Arc::new(MemoryStorage::new()),
        };
        let tags: Arc<dyn TagIndex> = match config.tags_mode {
            TagsMode::Local => Arc::new(LocalTagIndex::new()),
            TagsMode::Distributed => Arc::new(
                DistributedTagIndex::new(Arc::clone(&storage), config.tag_ttl)
                    .verify_on_hit(config.verify_tags_on_hit),
            ),
        };
        let reject = RejectMatcher::new(&config.reject_tags);
        let entries = EntryManager::new(storage, config.entry_format);
        Self {
            inner: Arc::new(Inner {
                config,
                entries,
                budget: Mutex::new(Budget::default()),
                tags,
                flights: SingleFlight::new(),
                reject,
            }),
        }
    }

    /// Configuration in use.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Storage holding the entries.
    pub fn storage(&self) -> &Arc<dyn Storage> {
        self.inner.entries.storage()
    }

    /// Tag index in use.
    pub fn tag_index(&self) -> &Arc<dyn TagIndex> {
        &self.inner.tags
    }

    /// Body bytes of the live entries admitted by this instance.
    ///
    /// Never above [`Config::max_bytes`] when a byte budget is set.
    pub async fn tracked_bytes(&self) -> usize {
        self.inner.budget.lock().await.used
    }

    /// Number of live entries admitted by this instance.
    pub async fn tracked_entries(&self) -> usize {
        self.inner.budget.lock().await.heap.len()
    }

    /// Forgets every expired entry and drops its tags.
    ///
    /// Admission already does this before storing a new entry; call it
    /// between requests to keep the tag index small on idle caches. Returns
    /// the number of entries pruned.
    pub async fn purge_expired(&self) -> usize {
        let mut budget = self.inner.budget.lock().await;
        self.prune_expired(&mut budget, now_secs()).await
    }

    /// Serves `request`, calling `next` when the response has to be produced.
    ///
    /// Every returned response carries an [`X_CACHE`] marker. An
    /// [`Invalidator`] is inserted in the request extensions before `next`
    /// runs, unless the `next` predicate of the configuration skipped the
    /// request.
    pub async fn handle<B, F, Fut>(
        &self,
        mut request: Request<B>,
        next: F,
    ) -> Result<Response<Bytes>, CacheError>
    where
        B: Send + 'static,
        F: FnOnce(Request<B>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Response<Bytes>, BoxError>> + Send + 'static,
    {
        let head = snapshot(&request);
        let config = &self.inner.config;

        if config.next.as_ref().is_some_and(|skip| skip(&head)) {
            trace!(path = head.uri().path(), "request skipped by next predicate");
            return self.bypass(request, next).await;
        }
        request
            .extensions_mut()
            .insert(Invalidator::new(self.clone()));

        if !self.is_admissible(head.method()) {
            trace!(method = %head.method(), "method is not cacheable");
            return self.bypass(request, next).await;
        }
        let directives = CacheControl::from_headers(head.headers());
        if directives.no_store {
            trace!("request forbids storing");
            return self.bypass(request, next).await;
        }

        let key = (config.key_generator)(&head);
        if directives.no_cache {
            debug!(key = %key, "request asked for a fresh response");
            return self.populate(request, next, head, key).await;
        }
        if let Some(response) = self.lookup(&head, &key).await {
            return Ok(response);
        }
        if head.method() == Method::HEAD {
            trace!(key = %key, "HEAD miss is never stored");
            return self.bypass(request, next).await;
        }

        match self.inner.flights.acquire(&key) {
            Flight::Primary(guard) => {
                if let Some(response) = self.lookup(&head, &key).await {
                    return Ok(response);
                }
                let cache = self.clone();
                // Populating on its own task lets the entry be published even
                // if the caller goes away.
                let task = tokio::spawn(async move {
                    let _guard = guard;
                    cache.populate(request, next, head, key).await
                });
                task.await?
            }
            Flight::Wait(waiter) => {
                trace!(key = %key, "waiting for in-flight population");
                waiter.wait().await;
                if let Some(response) = self.lookup(&head, &key).await {
                    return Ok(response);
                }
                self.populate(request, next, head, key).await
            }
        }
    }

    /// Drops every entry registered under `tags`.
    ///
    /// Returns the number of keys invalidated.
    pub async fn invalidate_tags(&self, tags: Vec<String>) -> Result<usize, CacheError> {
        if tags.is_empty() {
            return Ok(0);
        }
        let inner = &self.inner;
        let mut budget = inner.budget.lock().await;
        let keys = inner.tags.invalidate(&tags).await?;

        let mut failure = None;
        for key in &keys {
            if let Err(error) = inner.entries.delete(key).await {
                warn!(key = %key, %error, "failed to delete invalidated entry");
                failure.get_or_insert(error);
            }
            budget.untrack(key);
        }
        metrics::record_tracked_bytes(budget.used);
        drop(budget);

        metrics::record_invalidated(keys.len());
        debug!(?tags, keys = keys.len(), "invalidated tags");
        match failure {
            Some(error) => Err(error.into()),
            None => Ok(keys.len()),
        }
    }

    fn is_admissible(&self, method: &Method) -> bool {
        (method == Method::GET || method == Method::HEAD)
            && self.inner.config.methods.contains(method)
    }

    async fn bypass<B, F, Fut>(&self, request: Request<B>, next: F) -> Result<Response<Bytes>, CacheError>
    where
        F: FnOnce(Request<B>) -> Fut,
        Fut: Future<Output = Result<Response<Bytes>, BoxError>>,
    {
        let mut response = call_upstream(request, next).await?;
        finish(&mut response, CacheStatus::Unreachable);
        Ok(response)
    }

    async fn lookup(&self, head: &Request<()>, key: &str) -> Option<Response<Bytes>> {
        let mut entry = match self.inner.entries.get(key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(error) => {
                warn!(key = %key, %error, "cache lookup failed, treating as miss");
                return None;
            }
        };
        let now = now_secs();
        if entry.is_expired(now) {
            trace!(key = %key, "stored entry is expired");
            return None;
        }

        let body = Bytes::from(std::mem::take(&mut entry.body));
        let tags = self.collect_tags(head, &body);
        if let Err(error) = self.inner.tags.ensure(key, &tags).await {
            warn!(key = %key, %error, "failed to register tags on hit");
        }

        let response = self.restore(head, entry, body, now);
        debug!(key = %key, status = response.status().as_u16(), "cache hit");
        Some(response)
    }

    fn restore(&self, head: &Request<()>, entry: CachedEntry, body: Bytes, now: u64) -> Response<Bytes> {
        let mut response = Response::new(body);
        *response.status_mut() = StatusCode::from_u16(entry.status).unwrap_or(StatusCode::OK);

        let headers = response.headers_mut();
        for (name, values) in &entry.headers {
            let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
                continue;
            };
            for value in values {
                if let Ok(value) = HeaderValue::from_str(value) {
                    headers.append(name.clone(), value);
                }
            }
        }
        insert_str(headers, CONTENT_TYPE, entry.content_type.as_deref());
        insert_str(headers, CONTENT_ENCODING, entry.content_encoding.as_deref());
        insert_str(headers, ETAG, entry.etag.as_deref());
        insert_str(headers, LAST_MODIFIED, entry.last_modified.as_deref());

        let age = freshness::age(now, entry.created_at, request_age(head));
        headers.insert(AGE, HeaderValue::from(age));
        match &entry.cache_control {
            Some(value) => insert_str(headers, CACHE_CONTROL, Some(value)),
            None if self.inner.config.emits_cache_control() => {
                let value = synthesize_cache_control(
                    entry.remaining(now),
                    entry.must_revalidate,
                    entry.proxy_revalidate,
                );
                insert_str(headers, CACHE_CONTROL, Some(&value));
            }
            None => {}
        }

        if response.status().is_success()
            && is_not_modified(
                head.headers(),
                entry.etag.as_deref(),
                entry.last_modified.as_deref(),
            )
        {
            response = not_modified(response.headers());
        } else if head.method() == Method::HEAD {
            *response.body_mut() = Bytes::new();
        }
        finish(&mut response, CacheStatus::Hit);
        response
    }

    async fn populate<B, F, Fut>(
        &self,
        request: Request<B>,
        next: F,
        head: Request<()>,
        key: String,
    ) -> Result<Response<Bytes>, CacheError>
    where
        F: FnOnce(Request<B>) -> Fut,
        Fut: Future<Output = Result<Response<Bytes>, BoxError>>,
    {
        let mut response = call_upstream(request, next).await?;
        let now = now_secs();

        let admission = match self.plan(&head, &response, now) {
            Ok(admission) => admission,
            Err(reason) => {
                debug!(key = %key, reason, "response is not cacheable");
                finish(&mut response, CacheStatus::Unreachable);
                return Ok(response);
            }
        };

        self.add_validators(&head, &mut response);
        let entry = self.compose(&response, &admission, now);
        if !self.admit(&key, entry, &admission, now).await? {
            finish(&mut response, CacheStatus::Unreachable);
            return Ok(response);
        }

        let headers = response.headers_mut();
        if self.inner.config.emits_cache_control() && !headers.contains_key(CACHE_CONTROL) {
            let value = synthesize_cache_control(
                admission.ttl,
                admission.directives.must_revalidate,
                admission.directives.proxy_revalidate,
            );
            insert_str(headers, CACHE_CONTROL, Some(&value));
        }
        headers.insert(AGE, HeaderValue::from_static("0"));
        debug!(key = %key, ttl = admission.ttl, bytes = response.body().len(), "cache miss stored");
        finish(&mut response, CacheStatus::Miss);
        Ok(response)
    }

    /// Decides whether `response` can be stored, and for how long.
    fn plan(
        &self,
        head: &Request<()>,
        response: &Response<Bytes>,
        now: u64,
    ) -> Result<Admission, &'static str> {
        let config = &self.inner.config;
        if head.method() != Method::GET {
            return Err("only GET responses are stored");
        }
        let status = response.status();
        if !CACHEABLE_STATUSES.contains(&status.as_u16()) {
            return Err("status is not cacheable");
        }
        if (status == StatusCode::NO_CONTENT) != response.body().is_empty() {
            return Err("body does not match status");
        }
        let directives = CacheControl::from_headers(response.headers());
        if !directives.is_storable() {
            return Err("response forbids shared caching");
        }

        let ttl = match (directives.ttl(), &config.expiration_generator) {
            (Some(ttl), _) => ttl,
            (None, Some(generator)) => generator(head, &response_head(response)),
            (None, None) => config.expiration,
        };
        let ttl = ceil_secs(ttl);
        let expires_at = now.saturating_add(ttl);
        if ttl == 0 || expires_at <= now {
            return Err("response is already expired");
        }
        if config.max_bytes > 0 && response.body().len() > config.max_bytes {
            return Err("body exceeds the byte budget");
        }

        let tags = self.collect_tags(head, response.body());
        if self.inner.reject.matches_any(&tags) {
            return Err("rejected tag");
        }
        Ok(Admission {
            ttl,
            expires_at,
            directives,
            tags,
        })
    }

    fn add_validators(&self, head: &Request<()>, response: &mut Response<Bytes>) {
        let config = &self.inner.config;
        if let Some(etag) = response.headers().get(ETAG).and_then(|v| v.to_str().ok()) {
            let quoted = quote_etag(etag);
            if quoted != etag {
                insert_str(response.headers_mut(), ETAG, Some(&quoted));
            }
        } else if config.enable_etag {
            let etag = match &config.etag_generator {
                Some(generator) => quote_etag(&generator(response.body())),
                None => etag_for(response.body()),
            };
            insert_str(response.headers_mut(), ETAG, Some(&etag));
        }

        if config.enable_last_modified && !response.headers().contains_key(LAST_MODIFIED) {
            let modified = match &config.last_modified_generator {
                Some(generator) => generator(head, &response_head(response)),
                None => Utc::now(),
            };
            insert_str(response.headers_mut(), LAST_MODIFIED, Some(&http_date(modified)));
        }
    }

    fn compose(&self, response: &Response<Bytes>, admission: &Admission, now: u64) -> CachedEntry {
        let headers = response.headers();
        let mut entry = self.inner.entries.acquire();
        entry.body.extend_from_slice(response.body());
        entry.status = response.status().as_u16();
        entry.content_type = header_str(headers, &CONTENT_TYPE);
        entry.content_encoding = header_str(headers, &CONTENT_ENCODING);
        entry.etag = header_str(headers, &ETAG);
        entry.last_modified = header_str(headers, &LAST_MODIFIED);
        entry.cache_control = header_str(headers, &CACHE_CONTROL);
        entry.created_at = now;
        entry.ttl = admission.ttl;
        entry.expires_at = admission.expires_at;
        entry.must_revalidate = admission.directives.must_revalidate;
        entry.proxy_revalidate = admission.directives.proxy_revalidate;

        let config = &self.inner.config;
        let keep = |name: &HeaderName| {
            if !config.stored_headers.is_empty() {
                config.stored_headers.contains(name)
            } else {
                config.store_response_headers
            }
        };
        for (name, value) in headers {
            if !keep(name) || freshness::is_hop_by_hop(name) || DEDICATED_HEADERS.contains(name) {
                continue;
            }
            entry
                .headers
                .entry(name.as_str().to_owned())
                .or_default()
                .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
        }
        entry
    }

    /// Stores `entry`, enforcing the byte budget and registering its tags.
    ///
    /// Returns `Ok(false)` when the entry could not be persisted.
    async fn admit(
        &self,
        key: &str,
        mut entry: CachedEntry,
        admission: &Admission,
        now: u64,
    ) -> Result<bool, CacheError> {
        let inner = &self.inner;
        let max_bytes = inner.config.max_bytes;
        let size = entry.body.len();
        let ttl = Some(Duration::from_secs(admission.ttl));

        let mut budget = inner.budget.lock().await;
        self.prune_expired(&mut budget, now).await;

        // Every admitted key gets a heap record so expiry can drop its tags.
        // Eviction only happens under a byte budget.
        budget.untrack(key);
        budget.used += size;
        while max_bytes > 0 && budget.used > max_bytes {
            let Some((victim, bytes)) = budget.heap.remove_first() else {
                break;
            };
            budget.tracked.remove(&victim);
            budget.used = budget.used.saturating_sub(bytes);
            if let Err(error) = inner.entries.delete(&victim).await {
                budget.used = budget.used.saturating_sub(size);
                metrics::record_tracked_bytes(budget.used);
                return Err(CacheError::Eviction(error));
            }
            if let Err(error) = inner.tags.remove(&victim).await {
                warn!(key = %victim, %error, "failed to drop tags of evicted entry");
            }
            metrics::record_eviction();
            debug!(key = %victim, bytes, "evicted to respect byte budget");
        }

        let handle = budget.heap.put(key, admission.expires_at, size);
        entry.heap_handle = Some(handle);
        if let Err(error) = inner.entries.set(key, entry, ttl).await {
            warn!(key = %key, %error, "failed to store entry");
            budget.heap.remove(handle);
            budget.used = budget.used.saturating_sub(size);
            metrics::record_tracked_bytes(budget.used);
            return Ok(false);
        }
        budget.tracked.insert(key.to_owned(), handle);
        metrics::record_tracked_bytes(budget.used);

        if let Err(error) = inner.tags.add(key, &admission.tags).await {
            warn!(key = %key, %error, "failed to register tags");
        }
        Ok(true)
    }

    async fn prune_expired(&self, budget: &mut Budget, now: u64) -> usize {
        let mut pruned = 0;
        while budget.heap.peek_expiry().is_some_and(|at| at <= now) {
            let Some((key, bytes)) = budget.heap.remove_first() else {
                break;
            };
            budget.tracked.remove(&key);
            budget.used = budget.used.saturating_sub(bytes);
            if let Err(error) = self.inner.tags.remove(&key).await {
                warn!(key = %key, %error, "failed to drop tags of expired entry");
            }
            trace!(key = %key, "pruned expired record");
            pruned += 1;
        }
        if pruned > 0 {
            metrics::record_tracked_bytes(budget.used);
        }
        pruned
    }

    fn collect_tags(&self, head: &Request<()>, body: &Bytes) -> Vec<String> {
        let config = &self.inner.config;
        let mut tags = config
            .tags
            .as_ref()
            .map(|generator| generator(head))
            .unwrap_or_default();
        if let Some(generator) = &config.response_tags {
            tags.extend(generator(head, body));
        }
        let mut seen = HashSet::with_capacity(tags.len());
        tags.retain(|tag| seen.insert(tag.clone()));
        tags
    }
}

async fn call_upstream<B, F, Fut>(request: Request<B>, next: F) -> Result<Response<Bytes>, CacheError>
where
    F: FnOnce(Request<B>) -> Fut,
    Fut: Future<Output = Result<Response<Bytes>, BoxError>>,
{
    let started = std::time::Instant::now();
    let result = next(request).await;
    metrics::record_upstream(started.elapsed());
    result.map_err(CacheError::Upstream)
}

fn finish(response: &mut Response<Bytes>, status: CacheStatus) {
    status.mark(response.headers_mut());
    metrics::record_status(status);
}

fn not_modified(headers: &HeaderMap) -> Response<Bytes> {
    let mut response = Response::new(Bytes::new());
    *response.status_mut() = StatusCode::NOT_MODIFIED;
    for name in [AGE, ETAG, LAST_MODIFIED, CACHE_CONTROL] {
        if let Some(value) = headers.get(&name) {
            response.headers_mut().insert(name, value.clone());
        }
    }
    response
}

fn snapshot<B>(request: &Request<B>) -> Request<()> {
    let mut head = Request::new(());
    *head.method_mut() = request.method().clone();
    *head.uri_mut() = request.uri().clone();
    *head.version_mut() = request.version();
    *head.headers_mut() = request.headers().clone();
    head
}

fn response_head(response: &Response<Bytes>) -> Response<()> {
    let mut head = Response::new(());
    *head.status_mut() = response.status();
    *head.version_mut() = response.version();
    *head.headers_mut() = response.headers().clone();
    head
}

fn request_age(head: &Request<()>) -> Option<u64> {
    head.headers()
        .get(AGE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}

fn header_str(headers: &HeaderMap, name: &HeaderName) -> Option<String> {
    let values: Vec<&str> = headers
        .get_all(name)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .collect();
    (!values.is_empty()).then(|| values.join(", "))
}

fn insert_str(headers: &mut HeaderMap, name: HeaderName, value: Option<&str>) {
    if let Some(value) = value.and_then(|value| HeaderValue::from_str(value).ok()) {
        headers.insert(name, value);
    }
}

fn ceil_secs(ttl: Duration) -> u64 {
    ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0)
}

pub(crate) fn now_secs() -> u64 {
    u64::try_from(Utc::now().timestamp()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ok(body: &'static str) -> Result<Response<Bytes>, BoxError> {
        Ok(Response::new(Bytes::from_static(body.as_bytes())))
    }

    fn get(uri: &str) -> Request<()> {
        Request::get(uri).body(()).unwrap()
    }

    #[test]
    fn ttl_rounds_up() {
        assert_eq!(ceil_secs(Duration::from_millis(1500)), 2);
        assert_eq!(ceil_secs(Duration::from_secs(3)), 3);
        assert_eq!(ceil_secs(Duration::ZERO), 0);
    }

    #[test]
    fn header_str_joins_values() {
        let mut headers = HeaderMap::new();
        headers.append(CACHE_CONTROL, HeaderValue::from_static("public"));
        headers.append(CACHE_CONTROL, HeaderValue::from_static("max-age=5"));
        assert_eq!(header_str(&headers, &CACHE_CONTROL).as_deref(), Some("public, max-age=5"));
        assert_eq!(header_str(&headers, &ETAG), None);
    }

    #[tokio::test]
    async fn max_age_zero_is_unreachable() {
        let cache = ResponseCache::new(Config::builder().build());
        let response = cache
            .handle(get("/z"), |_| async {
                let mut response = Response::new(Bytes::from_static(b"z"));
                response
                    .headers_mut()
                    .insert(CACHE_CONTROL, HeaderValue::from_static("max-age=0"));
                Ok(response)
            })
            .await
            .unwrap();
        assert_eq!(response.headers()[X_CACHE], "unreachable");
    }

    #[tokio::test]
    async fn empty_ok_body_is_not_stored() {
        let cache = ResponseCache::new(Config::builder().build());
        let response = cache.handle(get("/e"), |_| async { ok("") }).await.unwrap();
        assert_eq!(response.headers()[X_CACHE], "unreachable");
    }

    #[tokio::test]
    async fn post_bypasses_cache_but_gets_invalidator() {
        let cache = ResponseCache::new(Config::builder().build());
        let request = Request::post("/p").body(()).unwrap();
        let response = cache
            .handle(request, |req: Request<()>| async move {
                assert!(req.extensions().get::<Invalidator>().is_some());
                ok("posted")
            })
            .await
            .unwrap();
        assert_eq!(response.headers()[X_CACHE], "unreachable");
    }

    #[tokio::test]
    async fn next_predicate_skips_binding() {
        let cache = ResponseCache::new(
            Config::builder()
                .next(|req| req.uri().path() == "/health")
                .build(),
        );
        let response = cache
            .handle(get("/health"), |req: Request<()>| async move {
                assert!(req.extensions().get::<Invalidator>().is_none());
                ok("up")
            })
            .await
            .unwrap();
        assert_eq!(response.headers()[X_CACHE], "unreachable");
    }

    #[tokio::test]
    async fn head_is_served_from_get_entry() {
        let cache = ResponseCache::new(Config::builder().build());
        let head_miss = cache
            .handle(Request::head("/h").body(()).unwrap(), |_| async { ok("body") })
            .await
            .unwrap();
        assert_eq!(head_miss.headers()[X_CACHE], "unreachable");

        cache.handle(get("/h"), |_| async { ok("body") }).await.unwrap();
        let head_hit = cache
            .handle(Request::head("/h").body(()).unwrap(), |_| async { ok("other") })
            .await
            .unwrap();
        assert_eq!(head_hit.headers()[X_CACHE], "hit");
        assert!(head_hit.body().is_empty());
    }

    #[tokio::test]
    async fn request_no_cache_refreshes_entry() {
        let cache = ResponseCache::new(Config::builder().build());
        cache.handle(get("/r"), |_| async { ok("v1") }).await.unwrap();

        let refreshed = cache
            .handle(
                Request::get("/r")
                    .header(CACHE_CONTROL, "no-cache")
                    .body(())
                    .unwrap(),
                |_| async { ok("v2") },
            )
            .await
            .unwrap();
        assert_eq!(refreshed.headers()[X_CACHE], "miss");

        let hit = cache.handle(get("/r"), |_| async { ok("v3") }).await.unwrap();
        assert_eq!(hit.body(), "v2");
    }

    #[tokio::test]
    async fn synthesized_headers_on_miss_and_hit() {
        let cache = ResponseCache::new(
            Config::builder()
                .cache_control(true)
                .enable_etag(true)
                .enable_last_modified(true)
                .expiration(Duration::from_secs(120))
                .build(),
        );
        let miss = cache.handle(get("/s"), |_| async { ok("payload") }).await.unwrap();
        assert_eq!(miss.headers()[CACHE_CONTROL], "public, max-age=120");
        assert_eq!(miss.headers()[AGE], "0");
        let etag = miss.headers()[ETAG].to_str().unwrap().to_owned();
        assert_eq!(etag, etag_for(b"payload"));
        assert!(miss.headers().contains_key(LAST_MODIFIED));

        let hit = cache.handle(get("/s"), |_| async { ok("other") }).await.unwrap();
        assert_eq!(hit.headers()[ETAG], etag.as_str());
        let cc = hit.headers()[CACHE_CONTROL].to_str().unwrap();
        assert!(cc.starts_with("public, max-age="), "{cc}");
    }

    #[tokio::test]
    async fn handler_cache_control_is_preserved() {
        let cache = ResponseCache::new(Config::builder().cache_control(true).build());
        let handler = |_| async {
            let mut response = Response::new(Bytes::from_static(b"x"));
            response.headers_mut().insert(
                CACHE_CONTROL,
                HeaderValue::from_static("max-age=30, must-revalidate"),
            );
            Ok(response)
        };
        let miss = cache.handle(get("/c"), handler).await.unwrap();
        assert_eq!(miss.headers()[CACHE_CONTROL], "max-age=30, must-revalidate");
        let hit = cache.handle(get("/c"), handler).await.unwrap();
        assert_eq!(hit.headers()[X_CACHE], "hit");
        assert_eq!(hit.headers()[CACHE_CONTROL], "max-age=30, must-revalidate");
    }

    #[tokio::test]
    async fn header_allow_list() {
        let cache = ResponseCache::new(
            Config::builder()
                .stored_headers([HeaderName::from_static("x-keep")])
                .build(),
        );
        let handler = |_| async {
            let mut response = Response::new(Bytes::from_static(b"x"));
            let headers = response.headers_mut();
            headers.insert("x-keep", HeaderValue::from_static("1"));
            headers.insert("x-drop", HeaderValue::from_static("2"));
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
            Ok(response)
        };
        cache.handle(get("/a"), handler).await.unwrap();
        let hit = cache.handle(get("/a"), handler).await.unwrap();
        assert_eq!(hit.headers()["x-keep"], "1");
        assert!(!hit.headers().contains_key("x-drop"));
        assert_eq!(hit.headers()[CONTENT_TYPE], "text/plain");
    }

    #[tokio::test]
    async fn upstream_error_propagates() {
        let cache = ResponseCache::new(Config::builder().build());
        let result = cache
            .handle(get("/boom"), |_| async { Err::<Response<Bytes>, BoxError>("boom".into()) })
            .await;
        assert!(matches!(result, Err(CacheError::Upstream(_))));
    }

    const MODIFIED: &str = "Sun, 06 Nov 1994 08:49:37 GMT";

    fn validated(etag: &'static str) -> Result<Response<Bytes>, BoxError> {
        let mut response = Response::new(Bytes::from_static(b"doc"));
        let headers = response.headers_mut();
        headers.insert(ETAG, HeaderValue::from_static(etag));
        headers.insert(LAST_MODIFIED, HeaderValue::from_static(MODIFIED));
        Ok(response)
    }

    fn conditional(pairs: &[(HeaderName, &'static str)]) -> Request<()> {
        let mut request = get("/doc");
        for (name, value) in pairs {
            request
                .headers_mut()
                .insert(name.clone(), HeaderValue::from_static(value));
        }
        request
    }

    #[tokio::test]
    async fn expired_entries_leave_tag_index_without_budget() {
        let cache = ResponseCache::new(
            Config::builder()
                .expiration(Duration::from_secs(1))
                .tags(|req| vec![format!("path:{}", req.uri().path())])
                .build(),
        );
        let keys: Vec<String> = (0..10).map(|i| format!("/old{i}")).collect();
        for key in &keys {
            cache.handle(get(key), |_| async { ok("old") }).await.unwrap();
        }
        assert_eq!(cache.tracked_entries().await, 10);
        assert!(keys.iter().all(|key| cache.tag_index().has(key)));

        tokio::time::sleep(Duration::from_millis(2100)).await;
        cache.handle(get("/fresh"), |_| async { ok("new") }).await.unwrap();

        assert!(keys.iter().all(|key| !cache.tag_index().has(key)));
        assert!(cache.tag_index().has("/fresh"));
        assert_eq!(cache.tracked_entries().await, 1);
        assert_eq!(cache.tracked_bytes().await, 3);
        assert_eq!(cache.purge_expired().await, 0);
    }

    #[tokio::test]
    async fn stored_entry_carries_tracked_handle() {
        let cache = ResponseCache::new(Config::builder().build());
        cache.handle(get("/k"), |_| async { ok("body") }).await.unwrap();

        let stored = cache.inner.entries.get("/k").await.unwrap().unwrap();
        let tracked = cache.inner.budget.lock().await.tracked.get("/k").copied();
        assert!(tracked.is_some());
        assert_eq!(stored.heap_handle, tracked);
    }

    #[tokio::test]
    async fn expiration_generator_overrides_default() {
        let cache = ResponseCache::new(
            Config::builder()
                .cache_control(true)
                .expiration(Duration::from_secs(10))
                .expiration_generator(|req, _| {
                    if req.uri().path() == "/long" {
                        Duration::from_secs(300)
                    } else {
                        Duration::from_secs(10)
                    }
                })
                .build(),
        );
        let long = cache.handle(get("/long"), |_| async { ok("l") }).await.unwrap();
        assert_eq!(long.headers()[CACHE_CONTROL], "public, max-age=300");
        let short = cache.handle(get("/short"), |_| async { ok("s") }).await.unwrap();
        assert_eq!(short.headers()[CACHE_CONTROL], "public, max-age=10");
    }

    #[tokio::test]
    async fn stored_headers_drop_hop_by_hop() {
        let cache = ResponseCache::new(Config::builder().store_response_headers(true).build());
        let handler = |_| async {
            let mut response = Response::new(Bytes::from_static(b"x"));
            let headers = response.headers_mut();
            headers.insert("x-custom", HeaderValue::from_static("kept"));
            headers.insert(http::header::CONNECTION, HeaderValue::from_static("close"));
            headers.insert(crate::freshness::KEEP_ALIVE, HeaderValue::from_static("timeout=5"));
            Ok(response)
        };
        cache.handle(get("/h"), handler).await.unwrap();
        let hit = cache.handle(get("/h"), handler).await.unwrap();
        assert_eq!(hit.headers()[X_CACHE], "hit");
        assert_eq!(hit.headers()["x-custom"], "kept");
        assert!(!hit.headers().contains_key(http::header::CONNECTION));
        assert!(!hit.headers().contains_key(crate::freshness::KEEP_ALIVE));
    }

    #[tokio::test]
    async fn if_modified_since_on_hit() {
        let cache = ResponseCache::new(Config::builder().build());
        cache.handle(get("/doc"), |_| async { validated("\"v1\"") }).await.unwrap();

        let same = cache
            .handle(
                conditional(&[(http::header::IF_MODIFIED_SINCE, MODIFIED)]),
                |_| async { ok("other") },
            )
            .await
            .unwrap();
        assert_eq!(same.status(), StatusCode::NOT_MODIFIED);
        assert!(same.body().is_empty());

        let older = cache
            .handle(
                conditional(&[(http::header::IF_MODIFIED_SINCE, "Mon, 01 Jan 1990 00:00:00 GMT")]),
                |_| async { ok("other") },
            )
            .await
            .unwrap();
        assert_eq!(older.status(), StatusCode::OK);
        assert_eq!(older.body(), "doc");
    }

    #[tokio::test]
    async fn if_none_match_takes_precedence_over_if_modified_since() {
        let cache = ResponseCache::new(Config::builder().build());
        cache.handle(get("/doc"), |_| async { validated("\"v1\"") }).await.unwrap();

        let matching = cache
            .handle(
                conditional(&[
                    (http::header::IF_NONE_MATCH, "\"v1\""),
                    (http::header::IF_MODIFIED_SINCE, "Mon, 01 Jan 1990 00:00:00 GMT"),
                ]),
                |_| async { ok("other") },
            )
            .await
            .unwrap();
        assert_eq!(matching.status(), StatusCode::NOT_MODIFIED);

        let different = cache
            .handle(
                conditional(&[
                    (http::header::IF_NONE_MATCH, "\"v2\""),
                    (http::header::IF_MODIFIED_SINCE, "Tue, 01 Jan 2030 00:00:00 GMT"),
                ]),
                |_| async { ok("other") },
            )
            .await
            .unwrap();
        assert_eq!(different.status(), StatusCode::OK);
        assert_eq!(different.body(), "doc");
    }

    #[tokio::test]
    async fn hit_registers_missing_tags() {
        let cache = ResponseCache::new(
            Config::builder()
                .tags(|req| vec![format!("path:{}", req.uri().path())])
                .build(),
        );
        cache.handle(get("/t"), |_| async { ok("t") }).await.unwrap();
        cache.tag_index().remove("/t").await.unwrap();
        assert!(!cache.tag_index().has("/t"));

        let hit = cache.handle(get("/t"), |_| async { ok("other") }).await.unwrap();
        assert_eq!(hit.headers()[X_CACHE], "hit");
        assert!(cache.tag_index().has("/t"));
        assert_eq!(cache.invalidate_tags(vec!["path:/t".to_owned()]).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn request_age_raises_served_age() {
        let cache = ResponseCache::new(Config::builder().build());
        cache.handle(get("/aged"), |_| async { ok("a") }).await.unwrap();

        let mut request = get("/aged");
        request.headers_mut().insert(AGE, HeaderValue::from_static("500"));
        let hit = cache.handle(request, |_| async { ok("b") }).await.unwrap();
        assert_eq!(hit.headers()[AGE], "500");
    }
}
