// tests/integration/service_test.rs

//! End-to-end tests for the image request flow
//! Tests: miss then hit, TTL and tags of origin responses, deferred write-back,
//! bypass on store outage, origin failures, background revalidation

use super::test_helpers::{TestContext, test_config};
use indexmap::IndexSet;
use pixelcache::core::errors::PixelCacheError;
use pixelcache::core::resilience::breaker::BreakerState;
use pixelcache::core::store::KeyValueStore;
use pixelcache::core::tasks::revalidation::RevalidationWorker;
use std::time::Duration;
use tokio::sync::broadcast;

const WEEK: u64 = 7 * 24 * 3600;

#[tokio::test]
async fn test_hero_image_is_transformed_once_then_served_from_cache() {
    let ctx = TestContext::new();
    let query = Some("width=1600&format=avif");

    let first = ctx
        .service
        .handle("/hero.jpg", query, &IndexSet::new())
        .await
        .unwrap();
    assert_eq!(first.cache_status, "MISS");
    assert_eq!(first.status, 200);
    assert_eq!(first.content_type, "image/avif");
    assert_eq!(first.max_age, WEEK);
    assert_eq!(ctx.origin.calls(), 1);

    let stored = ctx
        .store
        .inner
        .get_metadata(first.key.as_str())
        .await
        .unwrap()
        .expect("artifact should be stored");
    assert!(stored.ttl_seconds as u64 >= WEEK);
    assert!(stored.tags.contains("path:/hero.jpg"));
    assert!(stored.tags.contains("format:avif"));
    assert_eq!(stored.url, "/hero.jpg?format=avif&width=1600");
    assert_eq!(stored.original_size, Some(4096));

    let second = ctx
        .service
        .handle("/hero.jpg", query, &IndexSet::new())
        .await
        .unwrap();
    assert_eq!(second.cache_status, "HIT");
    assert_eq!(second.body, first.body);
    assert_eq!(second.key, first.key);
    assert_eq!(ctx.origin.calls(), 1);
}

#[tokio::test]
async fn test_hit_reports_remaining_freshness() {
    let ctx = TestContext::new();
    ctx.service
        .handle("/a.jpg", Some("format=webp"), &IndexSet::new())
        .await
        .unwrap();

    ctx.clock.advance(Duration::from_secs(3600));
    let hit = ctx
        .service
        .handle("/a.jpg", Some("format=webp"), &IndexSet::new())
        .await
        .unwrap();
    assert_eq!(hit.cache_status, "HIT");
    assert_eq!(hit.max_age, WEEK - 3600);
}

#[tokio::test]
async fn test_extra_tags_are_recorded() {
    let ctx = TestContext::new();
    let tags: IndexSet<String> = ["campaign-42".to_string()].into_iter().collect();
    ctx.service.handle("/a.jpg", None, &tags).await.unwrap();

    let outcome = ctx.engine.purge_by_tag("campaign-42", None).await.unwrap();
    assert_eq!(outcome.count, 1);
}

#[tokio::test]
async fn test_no_store_response_is_served_but_never_cached() {
    let ctx = TestContext::new();
    ctx.origin.set_no_store(true);

    let first = ctx.service.handle("/a.jpg", None, &IndexSet::new()).await.unwrap();
    assert_eq!(first.cache_status, "MISS");
    assert_eq!(first.max_age, 0);
    assert!(!ctx.store.inner.contains_key(first.key.as_str()));

    let second = ctx.service.handle("/a.jpg", None, &IndexSet::new()).await.unwrap();
    assert_eq!(second.cache_status, "MISS");
    assert_eq!(ctx.origin.calls(), 2);
}

#[tokio::test]
async fn test_deferred_write_back() {
    let ctx = TestContext::new();
    let service = ctx.deferred_service();

    let first = service.handle("/a.jpg", None, &IndexSet::new()).await.unwrap();
    assert_eq!(first.cache_status, "MISS");
    ctx.deferred.drain().await;

    let second = service.handle("/a.jpg", None, &IndexSet::new()).await.unwrap();
    assert_eq!(second.cache_status, "HIT");
    assert_eq!(ctx.origin.calls(), 1);
}

#[tokio::test]
async fn test_store_outage_bypasses_cache() {
    let ctx = TestContext::new();
    ctx.store.set_failing(true);

    let res = ctx
        .service
        .handle("/a.jpg", Some("format=webp"), &IndexSet::new())
        .await
        .unwrap();
    assert_eq!(res.cache_status, "BYPASS");
    assert_eq!(res.content_type, "image/webp");
    assert_eq!(ctx.origin.calls(), 1);
}

#[tokio::test]
async fn test_origin_failure_surfaces_as_error() {
    let ctx = TestContext::new();
    ctx.origin.set_failing(true);

    let err = ctx
        .service
        .handle("/a.jpg", None, &IndexSet::new())
        .await
        .unwrap_err();
    assert!(matches!(err, PixelCacheError::OriginTransformFailure(_)));
}

#[tokio::test]
async fn test_origin_breaker_opens_after_repeated_failures() {
    let ctx = TestContext::new();
    ctx.origin.set_failing(true);
    let threshold = ctx.config.resilience.breaker.failure_threshold as usize;

    for _ in 0..threshold {
        let _ = ctx.service.handle("/a.jpg", None, &IndexSet::new()).await;
    }
    assert_eq!(ctx.origin.calls(), threshold);
    assert_eq!(
        ctx.engine.resilience().origin.breaker().state(),
        BreakerState::Open
    );

    let err = ctx
        .service
        .handle("/a.jpg", None, &IndexSet::new())
        .await
        .unwrap_err();
    assert!(matches!(err, PixelCacheError::CircuitOpen(_)));
    assert_eq!(ctx.origin.calls(), threshold);
}

#[tokio::test]
async fn test_stale_hit_is_revalidated() {
    let mut config = test_config();
    config.ttl.min_seconds = 1;
    config.cache.stale_while_revalidate_seconds = 60;
    let ctx = TestContext::with_config(config);
    ctx.origin.set_ttl_hint(Some(1));

    ctx.service.handle("/a.jpg", None, &IndexSet::new()).await.unwrap();
    ctx.clock.advance(Duration::from_secs(2));

    let stale = ctx.service.handle("/a.jpg", None, &IndexSet::new()).await.unwrap();
    assert_eq!(stale.cache_status, "STALE");
    assert_eq!(ctx.origin.calls(), 1);

    let job = ctx.next_revalidation_job().expect("revalidation job");
    ctx.service.revalidate(&job).await.unwrap();
    assert_eq!(ctx.origin.calls(), 2);
    assert_eq!(ctx.engine.counters().revalidations(), 1);

    let fresh = ctx.service.handle("/a.jpg", None, &IndexSet::new()).await.unwrap();
    assert_eq!(fresh.cache_status, "HIT");
    assert!(fresh.body.ends_with(b"render-2"));
}

#[tokio::test]
async fn test_revalidation_worker_refreshes_in_background() {
    let mut config = test_config();
    config.ttl.min_seconds = 1;
    config.cache.stale_while_revalidate_seconds = 60;
    let ctx = TestContext::with_config(config);
    ctx.origin.set_ttl_hint(Some(1));

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let rx = ctx.take_revalidation_rx().expect("receiver");
    let worker = tokio::spawn(RevalidationWorker::new(ctx.service.clone(), rx).run(shutdown_rx));

    ctx.service.handle("/a.jpg", None, &IndexSet::new()).await.unwrap();
    ctx.clock.advance(Duration::from_secs(2));
    let stale = ctx.service.handle("/a.jpg", None, &IndexSet::new()).await.unwrap();
    assert_eq!(stale.cache_status, "STALE");

    for _ in 0..200 {
        if ctx.engine.counters().revalidations() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(ctx.engine.counters().revalidations(), 1);
    assert_eq!(ctx.origin.calls(), 2);

    let fresh = ctx.service.handle("/a.jpg", None, &IndexSet::new()).await.unwrap();
    assert_eq!(fresh.cache_status, "HIT");

    shutdown_tx.send(()).unwrap();
    worker.await.unwrap();
}
