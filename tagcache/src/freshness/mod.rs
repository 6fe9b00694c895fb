//! Freshness and conditional request handling.
//!
//! Parses `Cache-Control`, computes entry age, evaluates `If-None-Match` and
//! `If-Modified-Since`, and produces the `ETag` / `Last-Modified` validators.

use http::HeaderName;
use http::header::{
    CONNECTION, PROXY_AUTHENTICATE, PROXY_AUTHORIZATION, TE, TRAILER, TRANSFER_ENCODING, UPGRADE,
};

mod cache_control;
mod conditional;
mod validators;

pub use cache_control::{CacheControl, parse_max_age};
pub use conditional::is_not_modified;
pub use validators::{etag_for, http_date, parse_http_date, quote_etag};

pub(crate) const KEEP_ALIVE: HeaderName = HeaderName::from_static("keep-alive");

/// Age of an entry in seconds.
///
/// The larger of the time since creation and the `Age` the request carried.
pub fn age(now: u64, created_at: u64, request_age: Option<u64>) -> u64 {
    now.saturating_sub(created_at).max(request_age.unwrap_or(0))
}

/// `Cache-Control` emitted when the handler did not set one.
pub fn synthesize_cache_control(max_age: u64, must_revalidate: bool, proxy_revalidate: bool) -> String {
    let mut value = format!("public, max-age={max_age}");
    if must_revalidate {
        value.push_str(", must-revalidate");
    }
    if proxy_revalidate {
        value.push_str(", proxy-revalidate");
    }
    value
}

/// Headers meaningful for a single connection only, never stored.
pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    [
        CONNECTION,
        KEEP_ALIVE,
        PROXY_AUTHENTICATE,
        PROXY_AUTHORIZATION,
        TE,
        TRAILER,
        TRANSFER_ENCODING,
        UPGRADE,
    ]
    .contains(name)
}
