// tests/integration/cache_engine_test.rs

//! Integration tests for the engine's read and write paths
//! Tests: get, put, delete, validation on read, expiry, stale-while-revalidate, stats

use super::test_helpers::{START_MS, TestContext, body, no_params, test_config};
use indexmap::IndexSet;
use pixelcache::core::cache::engine::{PutOptions, WriteStatus};
use pixelcache::core::cache::key::TransformParams;
use pixelcache::core::cache::metadata::{ArtifactMetadata, CacheLookup, SourceType};
use pixelcache::core::cache::ttl::TtlRule;
use pixelcache::core::store::KeyValueStore;
use pixelcache::core::tasks::deferred::DeferredTaskContext;
use std::time::Duration;

fn webp_800() -> TransformParams {
    TransformParams::new().with("width", 800).with("format", "webp")
}

// ===== Round trip =====

#[tokio::test]
async fn test_put_then_get_returns_artifact() {
    let ctx = TestContext::new();
    let payload = body(1234);

    let outcome = ctx
        .put("/images/hero.jpg", &webp_800(), payload.clone(), &["campaign"])
        .await;
    assert_eq!(outcome.status, WriteStatus::Written);

    let lookup = ctx.engine.get("/images/hero.jpg", &webp_800()).await;
    assert_eq!(lookup.cache_status(), "HIT");
    let artifact = lookup.into_artifact().expect("artifact should be cached");
    assert_eq!(artifact.key, outcome.key);
    assert_eq!(artifact.body, payload);
    assert_eq!(artifact.content_type(), "image/jpeg");
    assert_eq!(artifact.metadata.size, 1234);
    assert_eq!(artifact.metadata.timestamp, START_MS);
    assert_eq!(artifact.metadata.ttl_seconds as u64, outcome.ttl.seconds);

    let tags = &artifact.metadata.tags;
    assert!(tags.contains("campaign"));
    assert!(tags.contains("path:/images/hero.jpg"));
    assert!(tags.contains("path:/images"));
    assert!(tags.contains("format:webp"));
}

#[tokio::test]
async fn test_get_unknown_is_miss() {
    let ctx = TestContext::new();
    let lookup = ctx.engine.get("/nothing.png", &no_params()).await;
    assert_eq!(lookup, CacheLookup::Miss);
    assert_eq!(ctx.engine.counters().misses(), 1);
}

#[tokio::test]
async fn test_parameter_order_does_not_change_the_key() {
    let ctx = TestContext::new();
    let a = TransformParams::from_query("width=800&format=webp&quality=80");
    let b = TransformParams::from_query("quality=80&format=webp&width=800");
    assert_eq!(ctx.engine.key_for("/a.jpg", &a), ctx.engine.key_for("/a.jpg", &b));

    ctx.put("/a.jpg", &a, body(10), &[]).await;
    assert!(ctx.is_cached("/a.jpg", &b).await);
}

#[tokio::test]
async fn test_query_params_are_typed_like_programmatic_params() {
    let ctx = TestContext::new();
    let from_query = TransformParams::from_query("width=800&format=webp");
    assert_eq!(
        ctx.engine.key_for("/a.jpg", &from_query),
        ctx.engine.key_for("/a.jpg", &webp_800())
    );
}

#[tokio::test]
async fn test_ignored_params_do_not_split_the_cache() {
    let ctx = TestContext::new();
    let plain = webp_800();
    let debug = webp_800().with("debug", "true");
    assert_eq!(ctx.engine.key_for("/a.jpg", &plain), ctx.engine.key_for("/a.jpg", &debug));
}

// ===== Expiry =====

#[tokio::test]
async fn test_expired_entry_is_a_miss_even_while_physically_present() {
    let mut config = test_config();
    config.ttl.min_seconds = 1;
    let ctx = TestContext::with_config(config);

    let options = PutOptions {
        origin_ttl_hint: Some(1),
        ..PutOptions::default()
    };
    let outcome = ctx
        .put_with("/a.jpg", &no_params(), body(10), "image/jpeg", &[], options)
        .await;
    assert_eq!(outcome.ttl.seconds, 1);
    assert!(outcome.ttl.capped_by_origin);

    assert!(ctx.is_cached("/a.jpg", &no_params()).await);
    ctx.clock.advance(Duration::from_millis(1500));

    // The store keeps the entry for its minimum physical TTL; the engine must not serve it.
    assert!(ctx.store.inner.contains_key(outcome.key.as_str()));
    assert_eq!(ctx.engine.get("/a.jpg", &no_params()).await, CacheLookup::Miss);
}

#[tokio::test]
async fn test_origin_hint_below_minimum_is_clamped() {
    let ctx = TestContext::new();
    let options = PutOptions {
        origin_ttl_hint: Some(0),
        ..PutOptions::default()
    };
    let outcome = ctx
        .put_with("/a.jpg", &no_params(), body(10), "image/jpeg", &[], options)
        .await;
    assert_eq!(outcome.ttl.seconds, ctx.config.ttl.min_seconds);
}

#[tokio::test]
async fn test_modern_format_gets_long_ttl() {
    let ctx = TestContext::new();
    let outcome = ctx
        .put_with(
            "/a.jpg",
            &webp_800(),
            body(10),
            "image/webp",
            &[],
            PutOptions::default(),
        )
        .await;
    assert_eq!(outcome.ttl.rule, TtlRule::ModernFormat);
    assert_eq!(outcome.ttl.seconds, ctx.config.ttl.modern_format_seconds);
}

// ===== Validation on read =====

#[tokio::test]
async fn test_non_image_payload_is_never_written() {
    let ctx = TestContext::new();
    let outcome = ctx
        .put_with(
            "/page.html",
            &no_params(),
            body(10),
            "text/html",
            &[],
            PutOptions::default(),
        )
        .await;
    assert_eq!(outcome.status, WriteStatus::Skipped);
    assert!(!ctx.store.inner.contains_key(outcome.key.as_str()));
}

#[tokio::test]
async fn test_only_success_and_client_error_statuses_are_written() {
    let ctx = TestContext::new();
    let with_status = |status| PutOptions {
        status,
        ..PutOptions::default()
    };

    let redirect = ctx
        .put_with("/r.jpg", &no_params(), body(10), "image/jpeg", &[], with_status(302))
        .await;
    assert_eq!(redirect.status, WriteStatus::Skipped);

    let not_found = ctx
        .put_with("/nf.jpg", &no_params(), body(10), "image/png", &[], with_status(404))
        .await;
    assert_eq!(not_found.status, WriteStatus::Written);
    assert_eq!(not_found.ttl.rule, TtlRule::ClientError);
}

#[tokio::test]
async fn test_stored_non_image_entry_is_never_served() {
    let ctx = TestContext::new();
    let key = ctx.engine.key_for("/a.jpg", &no_params());
    let payload = body(10);
    let metadata = ArtifactMetadata::new(
        "/a.jpg".to_string(),
        START_MS,
        "text/plain".to_string(),
        payload.len() as i64,
        no_params(),
        IndexSet::new(),
        3600,
        None,
        SourceType::RemoteHttp,
    );
    ctx.store
        .inner
        .put(key.as_str(), payload, Some(metadata), Some(3600))
        .await
        .unwrap();

    assert_eq!(ctx.engine.get("/a.jpg", &no_params()).await, CacheLookup::Miss);
}

#[tokio::test]
async fn test_size_mismatch_is_a_miss() {
    let ctx = TestContext::new();
    let key = ctx.engine.key_for("/a.jpg", &no_params());
    let metadata = ArtifactMetadata::new(
        "/a.jpg".to_string(),
        START_MS,
        "image/png".to_string(),
        999,
        no_params(),
        IndexSet::new(),
        3600,
        None,
        SourceType::RemoteHttp,
    );
    ctx.store
        .inner
        .put(key.as_str(), body(10), Some(metadata), Some(3600))
        .await
        .unwrap();

    assert_eq!(ctx.engine.get("/a.jpg", &no_params()).await, CacheLookup::Miss);
}

#[tokio::test]
async fn test_entry_without_metadata_is_a_miss() {
    let ctx = TestContext::new();
    let key = ctx.engine.key_for("/a.jpg", &no_params());
    ctx.store
        .inner
        .put(key.as_str(), body(10), None, None)
        .await
        .unwrap();

    assert_eq!(ctx.engine.get("/a.jpg", &no_params()).await, CacheLookup::Miss);
}

#[tokio::test]
async fn test_hash_collision_is_not_served_to_the_other_transformation() {
    let ctx = TestContext::new();
    // These two parameter sets share an FNV-1a hash on this path.
    let stored = TransformParams::new().with("width", 100).with("blur", 179599);
    let requested = TransformParams::new().with("width", 100).with("blur", 362382);
    assert_eq!(
        ctx.engine.key_for("/c.jpg", &stored),
        ctx.engine.key_for("/c.jpg", &requested)
    );

    ctx.put("/c.jpg", &stored, body(10), &[]).await;

    assert_eq!(ctx.engine.get("/c.jpg", &requested).await, CacheLookup::Miss);
    assert_eq!(ctx.engine.counters().misses(), 1);
    assert!(ctx.is_cached("/c.jpg", &stored).await);
}

// ===== Stale-while-revalidate =====

#[tokio::test]
async fn test_stale_entry_is_served_and_revalidation_requested() {
    let mut config = test_config();
    config.ttl.min_seconds = 1;
    config.cache.stale_while_revalidate_seconds = 30;
    let ctx = TestContext::with_config(config);

    let options = PutOptions {
        origin_ttl_hint: Some(1),
        ..PutOptions::default()
    };
    let outcome = ctx
        .put_with("/a.jpg", &webp_800(), body(10), "image/jpeg", &["promo"], options)
        .await;

    ctx.clock.advance(Duration::from_secs(2));
    let lookup = ctx.engine.get("/a.jpg", &webp_800()).await;
    assert!(matches!(lookup, CacheLookup::Stale(_)));
    assert_eq!(lookup.cache_status(), "STALE");
    assert_eq!(ctx.engine.counters().stale_hits(), 1);

    let job = ctx.next_revalidation_job().expect("a revalidation job");
    assert_eq!(job.key, outcome.key);
    assert_eq!(job.source_path, "/a.jpg");
    assert_eq!(job.params, webp_800());
    assert!(job.tags.contains("promo"));

    // Past the window the entry is gone for good.
    ctx.clock.advance(Duration::from_secs(40));
    assert_eq!(ctx.engine.get("/a.jpg", &webp_800()).await, CacheLookup::Miss);
}

#[tokio::test]
async fn test_stale_window_disabled_by_default() {
    let mut config = test_config();
    config.ttl.min_seconds = 1;
    let ctx = TestContext::with_config(config);
    let options = PutOptions {
        origin_ttl_hint: Some(1),
        ..PutOptions::default()
    };
    ctx.put_with("/a.jpg", &no_params(), body(10), "image/jpeg", &[], options)
        .await;

    ctx.clock.advance(Duration::from_secs(2));
    assert_eq!(ctx.engine.get("/a.jpg", &no_params()).await, CacheLookup::Miss);
    assert!(ctx.next_revalidation_job().is_none());
}

// ===== Deferred writes =====

#[tokio::test]
async fn test_deferred_put_is_visible_after_drain() {
    let ctx = TestContext::new();
    let outcome = ctx
        .engine
        .put(
            "/a.jpg",
            &no_params(),
            body(10),
            "image/png",
            &IndexSet::new(),
            PutOptions::default(),
            Some(&ctx.deferred as &dyn DeferredTaskContext),
        )
        .await;
    assert_eq!(outcome.status, WriteStatus::Deferred);

    ctx.deferred.drain().await;
    assert_eq!(ctx.deferred.pending(), 0);
    assert!(ctx.is_cached("/a.jpg", &no_params()).await);
}

// ===== Delete =====

#[tokio::test]
async fn test_delete_removes_artifact_and_index_references() {
    let ctx = TestContext::new();
    ctx.put("/a.jpg", &no_params(), body(10), &["campaign"]).await;
    assert_eq!(
        ctx.engine.index().keys_for_tag("campaign").await.unwrap().keys.len(),
        1
    );

    ctx.engine.delete("/a.jpg", &no_params()).await.unwrap();

    assert!(!ctx.is_cached("/a.jpg", &no_params()).await);
    assert!(
        ctx.engine
            .index()
            .keys_for_tag("campaign")
            .await
            .unwrap()
            .keys
            .is_empty()
    );
}

// ===== Stats =====

#[tokio::test]
async fn test_stats_report_entries_and_counters() {
    let ctx = TestContext::new();
    ctx.put("/a.jpg", &no_params(), body(100), &["x"]).await;
    ctx.put("/b.jpg", &no_params(), body(200), &["x"]).await;

    assert!(ctx.is_cached("/a.jpg", &no_params()).await);
    assert!(!ctx.is_cached("/missing.jpg", &no_params()).await);

    let stats = ctx.engine.stats().await.unwrap();
    // Index sets live under the same prefix but carry no metadata.
    assert_eq!(stats.entry_count, 2);
    assert_eq!(stats.total_bytes, 300);
    assert_eq!(stats.hit_count, 1);
    assert_eq!(stats.miss_count, 1);
    assert!(stats.scan_complete);
    assert_eq!(stats.last_maintenance_at, None);
    assert_eq!(stats.breakers.len(), 3);
}

#[tokio::test]
async fn test_stats_scan_is_bounded() {
    let mut config = test_config();
    config.cache.stats_scan_limit = 3;
    config.cache.index_strategy = pixelcache::config::IndexStrategyKind::Distributed;
    let ctx = TestContext::with_config(config);
    for i in 0..5 {
        ctx.put(&format!("/{i}.jpg"), &no_params(), body(10), &[]).await;
    }

    let stats = ctx.engine.stats().await.unwrap();
    assert_eq!(stats.entry_count, 3);
    assert!(!stats.scan_complete);
}
