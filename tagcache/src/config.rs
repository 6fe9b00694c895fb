//! Middleware configuration.
//!
//! [`Config`] holds every option of the cache, including the collaborator
//! functions (key generation, tagging, expiration...). [`Settings`] is the
//! plain-data subset that can be loaded from a configuration file.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::{HeaderName, Method, Request, Response};
use serde::{Deserialize, Serialize};
use tagcache_backend::Storage;

use crate::entry::EntryFormat;
use crate::error::ConfigError;
use crate::tags::TagsMode;

/// Fingerprint of a request.
pub type KeyGenerator = Arc<dyn Fn(&Request<()>) -> String + Send + Sync>;
/// Returns `true` for requests that must skip the middleware entirely.
pub type NextPredicate = Arc<dyn Fn(&Request<()>) -> bool + Send + Sync>;
/// Per-response TTL, used when the response carries no `max-age`.
pub type ExpirationGenerator = Arc<dyn Fn(&Request<()>, &Response<()>) -> Duration + Send + Sync>;
/// Entity tag of a response body.
pub type ETagGenerator = Arc<dyn Fn(&Bytes) -> String + Send + Sync>;
/// `Last-Modified` time of a response.
pub type LastModifiedGenerator =
    Arc<dyn Fn(&Request<()>, &Response<()>) -> DateTime<Utc> + Send + Sync>;
/// Tags derived from the request.
pub type TagsGenerator = Arc<dyn Fn(&Request<()>) -> Vec<String> + Send + Sync>;
/// Tags derived from the request and the response body.
pub type ResponseTagsGenerator = Arc<dyn Fn(&Request<()>, &Bytes) -> Vec<String> + Send + Sync>;

/// TTL applied when neither the response nor a generator provides one.
pub const DEFAULT_EXPIRATION: Duration = Duration::from_secs(60);

/// Cache middleware configuration.
///
/// Build one with [`Config::builder`].
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use tagcache::Config;
///
/// let config = Config::builder()
///     .expiration(Duration::from_secs(30))
///     .max_bytes(64 * 1024 * 1024)
///     .cache_control(true)
///     .tags(|req| vec![format!("path:{}", req.uri().path())])
///     .reject_tags(["private:*"])
///     .build();
/// assert_eq!(config.expiration(), Duration::from_secs(30));
/// ```
#[derive(Clone)]
pub struct Config {
    pub(crate) expiration: Duration,
    pub(crate) expiration_generator: Option<ExpirationGenerator>,
    pub(crate) max_bytes: usize,
    pub(crate) key_generator: KeyGenerator,
    pub(crate) next: Option<NextPredicate>,
    pub(crate) methods: Vec<Method>,
    pub(crate) cache_control: bool,
    pub(crate) disable_cache_control: bool,
    pub(crate) store_response_headers: bool,
    pub(crate) stored_headers: Vec<HeaderName>,
    pub(crate) enable_etag: bool,
    pub(crate) etag_generator: Option<ETagGenerator>,
    pub(crate) enable_last_modified: bool,
    pub(crate) last_modified_generator: Option<LastModifiedGenerator>,
    pub(crate) tags: Option<TagsGenerator>,
    pub(crate) response_tags: Option<ResponseTagsGenerator>,
    pub(crate) reject_tags: Vec<String>,
    pub(crate) storage: Option<Arc<dyn Storage>>,
    pub(crate) tags_mode: TagsMode,
    pub(crate) tag_ttl: Option<Duration>,
    pub(crate) verify_tags_on_hit: bool,
    pub(crate) entry_format: EntryFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            expiration: DEFAULT_EXPIRATION,
            expiration_generator: None,
            max_bytes: 0,
            key_generator: Arc::new(|req: &Request<()>| req.uri().path().to_owned()),
            next: None,
            methods: vec![Method::GET, Method::HEAD],
            cache_control: false,
            disable_cache_control: false,
            store_response_headers: false,
            stored_headers: Vec::new(),
            enable_etag: false,
            etag_generator: None,
            enable_last_modified: false,
            last_modified_generator: None,
            tags: None,
            response_tags: None,
            reject_tags: Vec::new(),
            storage: None,
            tags_mode: TagsMode::Local,
            tag_ttl: None,
            verify_tags_on_hit: false,
            entry_format: EntryFormat::default(),
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("expiration", &self.expiration)
            .field("max_bytes", &self.max_bytes)
            .field("methods", &self.methods)
            .field("cache_control", &self.cache_control)
            .field("disable_cache_control", &self.disable_cache_control)
            .field("store_response_headers", &self.store_response_headers)
            .field("stored_headers", &self.stored_headers)
            .field("enable_etag", &self.enable_etag)
            .field("enable_last_modified", &self.enable_last_modified)
            .field("reject_tags", &self.reject_tags)
            .field("storage", &self.storage.as_ref().map(|s| s.name().to_owned()))
            .field("tags_mode", &self.tags_mode)
            .field("tag_ttl", &self.tag_ttl)
            .field("verify_tags_on_hit", &self.verify_tags_on_hit)
            .field("entry_format", &self.entry_format)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Creates a builder with default options.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Creates a builder pre-filled from `settings`.
    pub fn from_settings(settings: Settings) -> Result<ConfigBuilder, ConfigError> {
        let methods = settings
            .methods
            .iter()
            .map(|name| {
                Method::from_bytes(name.to_ascii_uppercase().as_bytes())
                    .map_err(|_| ConfigError::InvalidMethod(name.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let stored_headers = settings
            .stored_headers
            .iter()
            .map(|name| {
                HeaderName::from_bytes(name.as_bytes())
                    .map_err(|_| ConfigError::InvalidHeaderName(name.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Config::builder()
            .expiration(settings.expiration)
            .max_bytes(settings.max_bytes)
            .methods(methods)
            .cache_control(settings.cache_control)
            .disable_cache_control(settings.disable_cache_control)
            .store_response_headers(settings.store_response_headers)
            .stored_headers(stored_headers)
            .enable_etag(settings.enable_etag)
            .enable_last_modified(settings.enable_last_modified)
            .reject_tags(settings.reject_tags)
            .tags_mode(settings.tags_mode)
            .tag_ttl(settings.tag_ttl)
            .verify_tags_on_hit(settings.verify_tags_on_hit)
            .entry_format(settings.entry_format))
    }

    /// Fallback TTL.
    pub fn expiration(&self) -> Duration {
        self.expiration
    }

    /// Byte budget, `0` when unlimited.
    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Methods served from the cache.
    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    /// Tag index placement.
    pub fn tags_mode(&self) -> TagsMode {
        self.tags_mode
    }

    pub(crate) fn emits_cache_control(&self) -> bool {
        self.cache_control && !self.disable_cache_control
    }
}

/// Builder for [`Config`].
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Fallback TTL when the response has no `max-age`. Defaults to one minute.
    pub fn expiration(mut self, expiration: Duration) -> Self {
        self.config.expiration = expiration;
        self
    }

    /// Computes the TTL per request, overriding [`expiration`](Self::expiration).
    pub fn expiration_generator<F>(mut self, generator: F) -> Self
    where
        F: Fn(&Request<()>, &Response<()>) -> Duration + Send + Sync + 'static,
    {
        self.config.expiration_generator = Some(Arc::new(generator));
        self
    }

    /// Maximum total body bytes kept in the cache. `0` disables the budget.
    pub fn max_bytes(mut self, max_bytes: usize) -> Self {
        self.config.max_bytes = max_bytes;
        self
    }

    /// Fingerprint function. Defaults to the request path.
    pub fn key_generator<F>(mut self, generator: F) -> Self
    where
        F: Fn(&Request<()>) -> String + Send + Sync + 'static,
    {
        self.config.key_generator = Arc::new(generator);
        self
    }

    /// Requests for which `predicate` returns `true` skip the cache.
    pub fn next<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Request<()>) -> bool + Send + Sync + 'static,
    {
        self.config.next = Some(Arc::new(predicate));
        self
    }

    /// Methods served from the cache. Defaults to `GET` and `HEAD`.
    ///
    /// Only safe methods are ever cached: anything other than `GET` and
    /// `HEAD` in this list is ignored.
    pub fn methods<I>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = Method>,
    {
        self.config.methods = methods.into_iter().collect();
        self
    }

    /// Emit a generated `Cache-Control` on hits and misses.
    pub fn cache_control(mut self, enabled: bool) -> Self {
        self.config.cache_control = enabled;
        self
    }

    /// Never generate `Cache-Control`, whatever [`cache_control`](Self::cache_control) says.
    pub fn disable_cache_control(mut self, disabled: bool) -> Self {
        self.config.disable_cache_control = disabled;
        self
    }

    /// Keep every response header instead of status and body only.
    pub fn store_response_headers(mut self, enabled: bool) -> Self {
        self.config.store_response_headers = enabled;
        self
    }

    /// Keep only these response headers.
    ///
    /// Takes precedence over [`store_response_headers`](Self::store_response_headers)
    /// when non-empty.
    pub fn stored_headers<I>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = HeaderName>,
    {
        self.config.stored_headers = headers.into_iter().collect();
        self
    }

    /// Generate an `ETag` for responses that have none.
    pub fn enable_etag(mut self, enabled: bool) -> Self {
        self.config.enable_etag = enabled;
        self
    }

    /// Custom `ETag` generator. Enables `ETag` generation.
    pub fn etag_generator<F>(mut self, generator: F) -> Self
    where
        F: Fn(&Bytes) -> String + Send + Sync + 'static,
    {
        self.config.enable_etag = true;
        self.config.etag_generator = Some(Arc::new(generator));
        self
    }

    /// Generate a `Last-Modified` for responses that have none.
    pub fn enable_last_modified(mut self, enabled: bool) -> Self {
        self.config.enable_last_modified = enabled;
        self
    }

    /// Custom `Last-Modified` generator. Enables `Last-Modified` generation.
    pub fn last_modified_generator<F>(mut self, generator: F) -> Self
    where
        F: Fn(&Request<()>, &Response<()>) -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.config.enable_last_modified = true;
        self.config.last_modified_generator = Some(Arc::new(generator));
        self
    }

    /// Tags attached to the entry of a request.
    pub fn tags<F>(mut self, generator: F) -> Self
    where
        F: Fn(&Request<()>) -> Vec<String> + Send + Sync + 'static,
    {
        self.config.tags = Some(Arc::new(generator));
        self
    }

    /// Tags derived from the response body, merged with [`tags`](Self::tags).
    pub fn response_tags<F>(mut self, generator: F) -> Self
    where
        F: Fn(&Request<()>, &Bytes) -> Vec<String> + Send + Sync + 'static,
    {
        self.config.response_tags = Some(Arc::new(generator));
        self
    }

    /// Tag patterns making a response uncacheable. See [`RejectMatcher`](crate::RejectMatcher).
    pub fn reject_tags<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.reject_tags = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Storage for entries. Defaults to a fresh [`MemoryStorage`](tagcache_backend::MemoryStorage).
    pub fn storage<S>(self, storage: S) -> Self
    where
        S: Storage + 'static,
    {
        self.shared_storage(Arc::new(storage))
    }

    /// Storage shared with other cache instances.
    pub fn shared_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.config.storage = Some(storage);
        self
    }

    /// Where the tag index lives. Defaults to [`TagsMode::Local`].
    pub fn tags_mode(mut self, mode: TagsMode) -> Self {
        self.config.tags_mode = mode;
        self
    }

    /// TTL of the persisted tag sets in distributed mode.
    pub fn tag_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.config.tag_ttl = ttl;
        self
    }

    /// Check the persisted tags on every hit in distributed mode.
    pub fn verify_tags_on_hit(mut self, enabled: bool) -> Self {
        self.config.verify_tags_on_hit = enabled;
        self
    }

    /// Encoding of stored entries.
    pub fn entry_format(mut self, format: EntryFormat) -> Self {
        self.config.entry_format = format;
        self
    }

    /// Finishes the configuration.
    pub fn build(self) -> Config {
        self.config
    }
}

/// Serializable cache options.
///
/// Durations use human readable strings such as `"30s"` or `"5m"`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    /// Fallback TTL.
    #[serde(with = "humantime_serde")]
    pub expiration: Duration,
    /// Byte budget, `0` for unlimited.
    pub max_bytes: usize,
    /// Cached methods.
    pub methods: Vec<String>,
    /// Emit a generated `Cache-Control`.
    pub cache_control: bool,
    /// Never generate `Cache-Control`.
    pub disable_cache_control: bool,
    /// Keep every response header.
    pub store_response_headers: bool,
    /// Keep only these response headers.
    pub stored_headers: Vec<String>,
    /// Generate `ETag`.
    pub enable_etag: bool,
    /// Generate `Last-Modified`.
    pub enable_last_modified: bool,
    /// Tag patterns making a response uncacheable.
    pub reject_tags: Vec<String>,
    /// Tag index placement.
    pub tags_mode: TagsMode,
    /// TTL of persisted tag sets.
    #[serde(with = "humantime_serde")]
    pub tag_ttl: Option<Duration>,
    /// Check persisted tags on every hit.
    pub verify_tags_on_hit: bool,
    /// Encoding of stored entries.
    pub entry_format: EntryFormat,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            expiration: DEFAULT_EXPIRATION,
            max_bytes: 0,
            methods: vec!["GET".to_owned(), "HEAD".to_owned()],
            cache_control: false,
            disable_cache_control: false,
            store_response_headers: false,
            stored_headers: Vec::new(),
            enable_etag: false,
            enable_last_modified: false,
            reject_tags: Vec::new(),
            tags_mode: TagsMode::Local,
            tag_ttl: None,
            verify_tags_on_hit: false,
            entry_format: EntryFormat::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_key_is_the_path() {
        let config = Config::default();
        let request = Request::builder()
            .uri("http://example.com/alpha?tag=x")
            .body(())
            .unwrap();
        assert_eq!((config.key_generator)(&request), "/alpha");
        assert_eq!(config.methods(), &[Method::GET, Method::HEAD]);
        assert_eq!(config.expiration(), Duration::from_secs(60));
    }

    #[test]
    fn settings_from_json() {
        let settings: Settings = serde_json::from_str(
            r#"{
                "expiration": "5m",
                "max_bytes": 1024,
                "methods": ["get"],
                "stored_headers": ["x-trace"],
                "tags_mode": "distributed",
                "tag_ttl": "1h",
                "entry_format": "json"
            }"#,
        )
        .unwrap();
        assert_eq!(settings.expiration, Duration::from_secs(300));
        assert_eq!(settings.tag_ttl, Some(Duration::from_secs(3600)));
        assert!(!settings.cache_control);

        let config = Config::from_settings(settings).unwrap().build();
        assert_eq!(config.max_bytes(), 1024);
        assert_eq!(config.methods(), &[Method::GET]);
        assert_eq!(config.tags_mode(), TagsMode::Distributed);
        assert_eq!(config.entry_format, EntryFormat::Json);
        assert_eq!(config.stored_headers, vec![HeaderName::from_static("x-trace")]);
    }

    #[test]
    fn invalid_settings_are_reported() {
        let settings = Settings {
            stored_headers: vec!["bad header".to_owned()],
            ..Settings::default()
        };
        assert!(matches!(
            Config::from_settings(settings),
            Err(ConfigError::InvalidHeaderName(name)) if name == "bad header"
        ));
    }

    #[test]
    fn generators_enable_their_feature() {
        let config = Config::builder().etag_generator(|_| "v1".to_owned()).build();
        assert!(config.enable_etag);
        assert!(!config.emits_cache_control());
        let config = Config::builder()
            .cache_control(true)
            .disable_cache_control(true)
            .build();
        assert!(!config.emits_cache_control());
    }
}
