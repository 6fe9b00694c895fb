//! Metrics declaration and recording.
//!
//! With the `metrics` feature disabled every function here is an empty
//! inline no-op.

use std::time::Duration;

use crate::status::CacheStatus;

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
lazy_static! {
    /// Track number of cache hit events.
    pub static ref CACHE_HIT_COUNTER: &'static str = {
        metrics::describe_counter!(
            "tagcache_hit_total",
            "Total number of responses served from cache."
        );
        "tagcache_hit_total"
    };
    /// Track number of cache miss events.
    pub static ref CACHE_MISS_COUNTER: &'static str = {
        metrics::describe_counter!(
            "tagcache_miss_total",
            "Total number of responses produced by the handler and stored."
        );
        "tagcache_miss_total"
    };
    /// Track number of bypassed or unstorable responses.
    pub static ref CACHE_UNREACHABLE_COUNTER: &'static str = {
        metrics::describe_counter!(
            "tagcache_unreachable_total",
            "Total number of responses that bypassed the cache."
        );
        "tagcache_unreachable_total"
    };
    /// Track number of entries evicted to respect the byte budget.
    pub static ref CACHE_EVICTIONS_COUNTER: &'static str = {
        metrics::describe_counter!(
            "tagcache_evictions_total",
            "Total number of entries evicted by the byte budget."
        );
        "tagcache_evictions_total"
    };
    /// Track number of keys dropped by tag invalidation.
    pub static ref CACHE_INVALIDATED_COUNTER: &'static str = {
        metrics::describe_counter!(
            "tagcache_invalidated_keys_total",
            "Total number of keys removed by tag invalidation."
        );
        "tagcache_invalidated_keys_total"
    };
    /// Body bytes currently tracked by the byte budget.
    pub static ref CACHE_TRACKED_BYTES: &'static str = {
        metrics::describe_gauge!(
            "tagcache_tracked_bytes",
            metrics::Unit::Bytes,
            "Body bytes currently tracked by the byte budget."
        );
        "tagcache_tracked_bytes"
    };
    /// Metric of upstream message handling timings.
    pub static ref CACHE_UPSTREAM_HANDLING_HISTOGRAM: &'static str = {
        metrics::describe_histogram!(
            "tagcache_upstream_duration_seconds",
            metrics::Unit::Seconds,
            "Duration of downstream handler calls in seconds."
        );
        "tagcache_upstream_duration_seconds"
    };
}

/// Counts a response by its cache status.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_status(status: CacheStatus) {
    let counter = match status {
        CacheStatus::Hit => *CACHE_HIT_COUNTER,
        CacheStatus::Miss => *CACHE_MISS_COUNTER,
        CacheStatus::Unreachable => *CACHE_UNREACHABLE_COUNTER,
    };
    metrics::counter!(counter).increment(1);
}

/// Counts a response by its cache status.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_status(_status: CacheStatus) {}

/// Counts one budget eviction.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_eviction() {
    metrics::counter!(*CACHE_EVICTIONS_COUNTER).increment(1);
}

/// Counts one budget eviction.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_eviction() {}

/// Counts keys removed by an invalidation.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_invalidated(keys: usize) {
    metrics::counter!(*CACHE_INVALIDATED_COUNTER).increment(keys as u64);
}

/// Counts keys removed by an invalidation.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_invalidated(_keys: usize) {}

/// Publishes the bytes tracked by the byte budget.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_tracked_bytes(bytes: usize) {
    metrics::gauge!(*CACHE_TRACKED_BYTES).set(bytes as f64);
}

/// Publishes the bytes tracked by the byte budget.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_tracked_bytes(_bytes: usize) {}

/// Records how long the downstream handler took.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_upstream(duration: Duration) {
    metrics::histogram!(*CACHE_UPSTREAM_HANDLING_HISTOGRAM).record(duration.as_secs_f64());
}

/// Records how long the downstream handler took.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_upstream(_duration: Duration) {}
