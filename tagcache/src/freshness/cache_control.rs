use std::time::Duration;

use http::HeaderMap;
use http::header::CACHE_CONTROL;

/// Parsed `Cache-Control` directives.
///
/// Unknown directives are ignored. Directive names are case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheControl {
    /// `no-store`
    pub no_store: bool,
    /// `no-cache`
    pub no_cache: bool,
    /// `private`
    pub private: bool,
    /// `public`
    pub public: bool,
    /// `must-revalidate`
    pub must_revalidate: bool,
    /// `proxy-revalidate`
    pub proxy_revalidate: bool,
    /// `max-age=N`
    pub max_age: Option<u64>,
    /// `s-maxage=N`
    pub s_maxage: Option<u64>,
}

impl CacheControl {
    /// Parses a single header value.
    pub fn parse(value: &str) -> Self {
        let mut cc = Self::default();
        cc.merge(value);
        cc
    }

    /// Parses every `Cache-Control` value in `headers`.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut cc = Self::default();
        for value in headers.get_all(CACHE_CONTROL) {
            if let Ok(value) = value.to_str() {
                cc.merge(value);
            }
        }
        cc
    }

    fn merge(&mut self, value: &str) {
        for directive in value.split(',') {
            let (name, argument) = match directive.split_once('=') {
                Some((name, argument)) => (name.trim(), Some(argument.trim().trim_matches('"'))),
                None => (directive.trim(), None),
            };
            match name.to_ascii_lowercase().as_str() {
                "no-store" => self.no_store = true,
                "no-cache" => self.no_cache = true,
                "private" => self.private = true,
                "public" => self.public = true,
                "must-revalidate" => self.must_revalidate = true,
                "proxy-revalidate" => self.proxy_revalidate = true,
                "max-age" => self.max_age = argument.and_then(parse_seconds).or(self.max_age),
                "s-maxage" => self.s_maxage = argument.and_then(parse_seconds).or(self.s_maxage),
                _ => {}
            }
        }
    }

    /// Freshness lifetime for a shared cache: `s-maxage`, else `max-age`.
    pub fn ttl(&self) -> Option<Duration> {
        self.s_maxage.or(self.max_age).map(Duration::from_secs)
    }

    /// Whether a shared cache may store a response carrying these directives.
    pub fn is_storable(&self) -> bool {
        !(self.no_store || self.private || self.no_cache)
    }
}

/// Returns the `max-age` of a `Cache-Control` value, if present and valid.
pub fn parse_max_age(value: &str) -> Option<u64> {
    CacheControl::parse(value).max_age
}

fn parse_seconds(value: &str) -> Option<u64> {
    value.parse().ok()
}
