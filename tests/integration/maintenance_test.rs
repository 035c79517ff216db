// tests/integration/maintenance_test.rs

//! Integration tests for the maintenance sweep
//! Tests: expiry sweep, stale-window retention, bounded and resumable sweeps,
//! dangling index pruning, early stop on store failure, the periodic task

use super::test_helpers::{START_MS, TestContext, body, config_with_strategy, no_params, test_config};
use pixelcache::config::{Config, IndexStrategyKind, MaintenanceConfig};
use pixelcache::core::cache::engine::{MaintenanceOutcome, PutOptions};
use pixelcache::core::cache::maintenance::MaintenanceReport;
use pixelcache::core::store::KeyValueStore;
use pixelcache::core::tasks::deferred::DeferredTaskContext;
use pixelcache::core::tasks::maintenance::MaintenanceTask;
use std::time::Duration;
use tokio::sync::broadcast;

fn short_ttl(mut config: Config) -> Config {
    config.ttl.min_seconds = 1;
    config
}

fn one_second() -> PutOptions {
    PutOptions {
        origin_ttl_hint: Some(1),
        ..PutOptions::default()
    }
}

async fn sweep(ctx: &TestContext, max_entries: usize) -> MaintenanceReport {
    match ctx.engine.perform_maintenance(max_entries, None).await {
        MaintenanceOutcome::Completed(report) => report,
        MaintenanceOutcome::Deferred => panic!("sweep without a context must run inline"),
    }
}

#[tokio::test]
async fn test_sweep_deletes_expired_entries_only() {
    let ctx = TestContext::with_config(short_ttl(test_config()));
    for i in 0..3 {
        ctx.put_with(
            &format!("/old/{i}.jpg"),
            &no_params(),
            body(10),
            "image/jpeg",
            &["old"],
            one_second(),
        )
        .await;
    }
    let fresh = ctx.put("/fresh.jpg", &no_params(), body(10), &["fresh"]).await;

    ctx.clock.advance(Duration::from_secs(10));
    let report = sweep(&ctx, 1000).await;

    assert_eq!(report.expired, 3);
    assert!(!report.stopped_early);
    assert!(ctx.store.inner.contains_key(fresh.key.as_str()));
    for i in 0..3 {
        let key = ctx.engine.key_for(&format!("/old/{i}.jpg"), &no_params());
        assert!(!ctx.store.inner.contains_key(key.as_str()));
    }
    // Index references of swept entries are gone too.
    let lookup = ctx.engine.index().keys_for_tag("old").await.unwrap();
    assert!(lookup.keys.is_empty());
    assert_eq!(
        ctx.engine.index().keys_for_tag("fresh").await.unwrap().keys.len(),
        1
    );
}

#[tokio::test]
async fn test_sweep_keeps_entries_inside_stale_window() {
    let mut config = short_ttl(test_config());
    config.cache.stale_while_revalidate_seconds = 30;
    let ctx = TestContext::with_config(config);
    let outcome = ctx
        .put_with("/a.jpg", &no_params(), body(10), "image/jpeg", &[], one_second())
        .await;

    ctx.clock.advance(Duration::from_secs(2));
    assert_eq!(sweep(&ctx, 1000).await.expired, 0);
    assert!(ctx.store.inner.contains_key(outcome.key.as_str()));

    ctx.clock.advance(Duration::from_secs(40));
    assert_eq!(sweep(&ctx, 1000).await.expired, 1);
    assert!(!ctx.store.inner.contains_key(outcome.key.as_str()));
}

#[tokio::test]
async fn test_bounded_sweeps_resume_where_they_stopped() {
    let ctx = TestContext::with_config(short_ttl(config_with_strategy(
        IndexStrategyKind::Distributed,
    )));
    for i in 0..10 {
        ctx.put_with(
            &format!("/{i}.jpg"),
            &no_params(),
            body(10),
            "image/jpeg",
            &[],
            one_second(),
        )
        .await;
    }
    ctx.clock.advance(Duration::from_secs(10));

    let first = sweep(&ctx, 4).await;
    let second = sweep(&ctx, 4).await;
    let third = sweep(&ctx, 4).await;

    assert_eq!((first.scanned, first.expired), (4, 4));
    assert_eq!((second.scanned, second.expired), (4, 4));
    assert_eq!((third.scanned, third.expired), (2, 2));
    assert!(ctx.store.inner.keys().is_empty());
}

#[tokio::test]
async fn test_sweep_prunes_dangling_index_references() {
    let ctx = TestContext::new();
    let outcome = ctx.put("/a.jpg", &no_params(), body(10), &["x"]).await;

    // Remove the artifact behind the engine's back.
    ctx.store.inner.delete(outcome.key.as_str()).await.unwrap();

    let report = sweep(&ctx, 1000).await;
    // Tag sets x, path:/a.jpg and path:/, plus the path set for /a.jpg.
    assert_eq!(report.index_refs_removed, 4);
    assert!(ctx.engine.index().keys_for_tag("x").await.unwrap().keys.is_empty());
}

#[tokio::test]
async fn test_sweep_stops_early_when_store_fails() {
    let ctx = TestContext::new();
    ctx.put("/a.jpg", &no_params(), body(10), &[]).await;
    ctx.store.set_failing(true);

    let report = sweep(&ctx, 1000).await;
    assert!(report.stopped_early);
    assert_eq!(report.scanned, 0);
    assert_eq!(report.expired, 0);
}

#[tokio::test]
async fn test_sweep_records_last_maintenance_time() {
    let ctx = TestContext::new();
    ctx.clock.advance(Duration::from_secs(5));
    sweep(&ctx, 10).await;

    let stats = ctx.engine.stats().await.unwrap();
    assert_eq!(stats.last_maintenance_at, Some(START_MS + 5000));
}

#[tokio::test]
async fn test_deferred_sweep_runs_in_background() {
    let ctx = TestContext::with_config(short_ttl(test_config()));
    let outcome = ctx
        .put_with("/a.jpg", &no_params(), body(10), "image/jpeg", &[], one_second())
        .await;
    ctx.clock.advance(Duration::from_secs(10));

    let result = ctx
        .engine
        .perform_maintenance(100, Some(&ctx.deferred as &dyn DeferredTaskContext))
        .await;
    assert_eq!(result, MaintenanceOutcome::Deferred);

    ctx.deferred.drain().await;
    assert!(!ctx.store.inner.contains_key(outcome.key.as_str()));
}

#[tokio::test(start_paused = true)]
async fn test_periodic_task_sweeps_and_shuts_down() {
    let ctx = TestContext::with_config(short_ttl(test_config()));
    let outcome = ctx
        .put_with("/a.jpg", &no_params(), body(10), "image/jpeg", &[], one_second())
        .await;
    ctx.clock.advance(Duration::from_secs(10));

    let config = MaintenanceConfig {
        enabled: true,
        interval: Duration::from_secs(60),
        max_entries: 100,
    };
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let task = tokio::spawn(MaintenanceTask::new(ctx.engine.clone(), &config).run(shutdown_rx));

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert!(!ctx.store.inner.contains_key(outcome.key.as_str()));
    assert!(ctx.engine.counters().last_maintenance_at().is_some());

    shutdown_tx.send(()).unwrap();
    task.await.unwrap();
}
