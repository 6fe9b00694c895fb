use std::fmt;

use http::{HeaderMap, HeaderName, HeaderValue};

/// Header carrying the [`CacheStatus`] of every response.
pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// Decision the middleware took for a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheStatus {
    /// Served from a stored entry.
    Hit,
    /// Produced by the handler and stored.
    Miss,
    /// The cache was bypassed or the response could not be stored.
    Unreachable,
}

impl CacheStatus {
    /// Returns the value written to [`X_CACHE`].
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "hit",
            CacheStatus::Miss => "miss",
            CacheStatus::Unreachable => "unreachable",
        }
    }

    /// Writes this status into `headers`, replacing any previous marker.
    pub fn mark(self, headers: &mut HeaderMap) {
        headers.insert(X_CACHE, HeaderValue::from_static(self.as_str()));
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
