// src/core/metrics.rs

//! Defines and registers Prometheus metrics for cache monitoring.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only once
//! globally for the entire application lifecycle.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, GaugeVec, Histogram, TextEncoder, register_counter,
    register_counter_vec, register_gauge_vec, register_histogram,
};

lazy_static! {
    // --- Cache Lookups ---
    /// Cache hits, labeled `fresh` or `stale`.
    pub static ref CACHE_HITS_TOTAL: CounterVec =
        register_counter_vec!("pixelcache_cache_hits_total", "Total number of cache hits, labeled by freshness.", &["state"]).unwrap();
    /// Cache misses, labeled by reason (`absent`, `expired`, `invalid`, `unavailable`).
    pub static ref CACHE_MISSES_TOTAL: CounterVec =
        register_counter_vec!("pixelcache_cache_misses_total", "Total number of cache misses, labeled by reason.", &["reason"]).unwrap();

    // --- Cache Writes ---
    pub static ref CACHE_WRITES_TOTAL: Counter =
        register_counter!("pixelcache_cache_writes_total", "Total number of artifacts written to the store.").unwrap();
    pub static ref CACHE_WRITE_FAILURES_TOTAL: Counter =
        register_counter!("pixelcache_cache_write_failures_total", "Total number of artifact writes that failed and were swallowed.").unwrap();

    // --- Purge & Maintenance ---
    /// Keys removed by purges, labeled `tag` or `path`.
    pub static ref PURGED_KEYS_TOTAL: CounterVec =
        register_counter_vec!("pixelcache_purged_keys_total", "Total number of keys removed by purges.", &["kind"]).unwrap();
    pub static ref PURGE_KEY_FAILURES_TOTAL: Counter =
        register_counter!("pixelcache_purge_key_failures_total", "Total number of single-key failures during purges.").unwrap();
    pub static ref MAINTENANCE_SWEPT_TOTAL: Counter =
        register_counter!("pixelcache_maintenance_swept_total", "Total number of expired entries removed by maintenance.").unwrap();

    // --- Resilience ---
    /// Breaker state per guarded resource: 0 closed, 1 half-open, 2 open.
    pub static ref BREAKER_STATE: GaugeVec =
        register_gauge_vec!("pixelcache_breaker_state", "Circuit breaker state (0 closed, 1 half-open, 2 open).", &["resource"]).unwrap();
    pub static ref GUARDED_RETRIES_TOTAL: CounterVec =
        register_counter_vec!("pixelcache_guarded_retries_total", "Total number of retried guarded calls.", &["resource"]).unwrap();

    // --- Origin ---
    pub static ref ORIGIN_TRANSFORMS_TOTAL: Counter =
        register_counter!("pixelcache_origin_transforms_total", "Total number of origin transform invocations.").unwrap();
    pub static ref ORIGIN_TRANSFORM_LATENCY_SECONDS: Histogram =
        register_histogram!("pixelcache_origin_transform_latency_seconds", "Latency of origin transforms in seconds.").unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families).unwrap_or_default()
}
