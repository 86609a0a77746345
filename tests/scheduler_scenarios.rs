// tests/scheduler_scenarios.rs
//
// End-to-end runs through the Sentinel facade with scripted sources:
// priority order and the global cap, same-run duplicates, mutual exclusion,
// degraded enrichment, cooldown, stop and the watchdog.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::{rngs::StdRng, Rng, SeedableRng};

use sentinel_pipeline::analyze::ai_adapter::{DynEnrichmentClient, Enrichment, MockClient};
use sentinel_pipeline::ingest::scheduler::Phase;
use sentinel_pipeline::sources::Priority;
use sentinel_pipeline::SentinelError;

use common::*;

#[tokio::test]
async fn high_priority_source_wins_the_only_slot() {
    let mut cfg = test_config(vec![source("s2", Priority::Low), source("s1", Priority::High)]);
    cfg.max_per_run = 1;
    let h = harness(
        cfg,
        ScriptedFetcher::new()
            .answer("s1", vec![candidate("s1", "a")])
            .answer("s2", vec![candidate("s2", "b")]),
    );

    let rec = h.sentinel.run_once().await.unwrap();
    assert_eq!(rec.drafts_created, 1);
    assert_eq!(rec.sources_scanned, 2, "capped sources are still scanned");
    let drafts = h.store.drafts();
    assert_eq!(drafts.len(), 1);
    assert_eq!(drafts[0].source_id, "s1");
}

#[tokio::test]
async fn same_fingerprint_from_two_sources_yields_one_draft() {
    let h = harness(
        test_config(vec![source("s1", Priority::High), source("s2", Priority::Low)]),
        ScriptedFetcher::new()
            .answer("s1", vec![candidate("s1", "same")])
            .answer("s2", vec![candidate("s2", "same")]),
    );

    let rec = h.sentinel.run_once().await.unwrap();
    assert_eq!(rec.drafts_created, 1);
    assert_eq!(rec.duplicates_skipped, 1);
    assert_eq!(h.store.drafts().len(), 1);
}

#[tokio::test]
async fn second_trigger_while_running_is_busy() {
    let h = harness(
        test_config(vec![source("s1", Priority::High)]),
        ScriptedFetcher::new()
            .answer("s1", vec![candidate("s1", "a")])
            .delay("s1", Duration::from_millis(300)),
    );

    let s = h.sentinel.clone();
    let first = tokio::spawn(async move { s.run_once().await });
    wait_until_running(&h.sentinel).await;

    assert!(matches!(h.sentinel.run_once().await, Err(SentinelError::Busy(_))));
    assert!(matches!(h.sentinel.force_run().await, Err(SentinelError::Busy(_))));
    assert_eq!(h.sentinel.snapshot().phase, Phase::Running);

    first.await.unwrap().unwrap();
    assert_eq!(h.sentinel.run_history(10).len(), 1);
    assert_eq!(h.store.runs().len(), 1);
    assert!(!h.sentinel.snapshot().running);
}

#[tokio::test]
async fn backoff_at_threshold_runs_degraded_without_calling_out() {
    let mock = Arc::new(MockClient::fixed(Enrichment {
        description: Some("remote".into()),
        ..Default::default()
    }));
    let h = harness_with(
        test_config(vec![source("s1", Priority::High)]),
        ScriptedFetcher::new().answer("s1", vec![candidate("s1", "a"), candidate("s1", "b")]),
        Some(mock.clone() as DynEnrichmentClient),
        None,
    );
    let limiter = h.sentinel.rate_limiter();
    for _ in 0..3 {
        limiter.record_failure(Utc::now());
    }
    assert!(limiter.is_degraded(Utc::now()));

    let rec = tokio::time::timeout(Duration::from_secs(5), h.sentinel.run_once())
        .await
        .expect("degraded run must not hang")
        .unwrap();
    assert!(rec.degraded);
    assert_eq!(rec.drafts_created, 2);
    assert_eq!(mock.calls(), 0);
    assert!(h
        .store
        .drafts()
        .iter()
        .all(|d| d.description.primary_text() != "remote"));
}

#[tokio::test]
async fn healthy_enrichment_fills_description() {
    let mock = Arc::new(MockClient::fixed(Enrichment {
        description: Some("Council reviews budget.".into()),
        ..Default::default()
    }));
    let h = harness_with(
        test_config(vec![source("s1", Priority::High)]),
        ScriptedFetcher::new().answer("s1", vec![candidate("s1", "a")]),
        Some(mock.clone() as DynEnrichmentClient),
        None,
    );
    let rec = h.sentinel.run_once().await.unwrap();
    assert!(!rec.degraded);
    assert_eq!(mock.calls(), 1);
    assert_eq!(
        h.store.drafts()[0].description.primary_text(),
        "Council reviews budget."
    );
}

#[tokio::test]
async fn drafts_never_exceed_max_per_run() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    for round in 0..25 {
        let n_sources = rng.random_range(1..6usize);
        let mut fetcher = ScriptedFetcher::new();
        let mut sources = Vec::new();
        for i in 0..n_sources {
            let id = format!("src{i}");
            let n = rng.random_range(0..8usize);
            // Small key pool so duplicates across sources are common.
            let cands = (0..n)
                .map(|_| candidate(&id, &format!("k{}", rng.random_range(0..10u32))))
                .collect();
            fetcher = fetcher.answer(&id, cands);
            let p = match rng.random_range(0..3u8) {
                0 => Priority::High,
                1 => Priority::Medium,
                _ => Priority::Low,
            };
            sources.push(source(&id, p));
        }
        let mut cfg = test_config(sources);
        cfg.max_per_run = rng.random_range(0..5usize);
        let cap = cfg.max_per_run;
        let h = harness(cfg, fetcher);

        let rec = h.sentinel.run_once().await.unwrap();
        let drafts = h.store.drafts();
        assert!(rec.drafts_created <= cap, "round {round}: {} > {cap}", rec.drafts_created);
        assert_eq!(drafts.len(), rec.drafts_created, "round {round}");
        let fps: HashSet<_> = drafts.iter().map(|d| d.fingerprint.clone()).collect();
        assert_eq!(fps.len(), drafts.len(), "round {round}: duplicate draft");
    }
}

#[tokio::test]
async fn remembered_fingerprints_do_not_draft_again() {
    let h = harness(
        test_config(vec![source("s1", Priority::High)]),
        ScriptedFetcher::new().answer("s1", vec![candidate("s1", "a"), candidate("s1", "b")]),
    );
    let first = h.sentinel.run_once().await.unwrap();
    assert_eq!(first.drafts_created, 2);

    let second = h.sentinel.force_run().await.unwrap();
    assert_eq!(second.drafts_created, 0);
    assert_eq!(second.duplicates_skipped, 2);
    assert_eq!(h.store.drafts().len(), 2);
    assert_eq!(h.sentinel.metrics().total_created, 2);
}

#[tokio::test]
async fn stored_item_outliving_dedup_window_counts_as_duplicate() {
    let mut cfg = test_config(vec![source("s1", Priority::High)]);
    cfg.dedup.retention_hours = 0;
    let h = harness(
        cfg,
        ScriptedFetcher::new().answer("s1", vec![candidate("s1", "a")]),
    );
    assert_eq!(h.sentinel.run_once().await.unwrap().drafts_created, 1);

    for _ in 0..2 {
        tokio::time::sleep(Duration::from_millis(5)).await;
        let rec = h.sentinel.force_run().await.unwrap();
        assert_eq!(rec.drafts_created, 0);
        assert_eq!(rec.accepted, 0);
        assert_eq!(rec.duplicates_skipped, 1);
        assert!(rec.errors.is_empty(), "unexpected errors: {:?}", rec.errors);
    }
    assert_eq!(h.store.drafts().len(), 1);
    assert_eq!(h.sentinel.metrics().error_rate, 0.0);
}

#[tokio::test]
async fn cooldown_blocks_manual_but_not_forced_runs() {
    let mut cfg = test_config(vec![source("s1", Priority::High)]);
    cfg.cooldown_ms = 60_000;
    let h = harness(cfg, ScriptedFetcher::new().answer("s1", vec![]));

    h.sentinel.run_once().await.unwrap();
    let snap = h.sentinel.snapshot();
    assert_eq!(snap.phase, Phase::Cooldown);
    assert!(snap.cooldown_until.unwrap() >= snap.last_run_at.unwrap());

    match h.sentinel.run_once().await {
        Err(SentinelError::Cooldown { until }) => assert_eq!(Some(until), snap.cooldown_until),
        other => panic!("expected cooldown, got {other:?}"),
    }
    assert!(h.sentinel.force_run().await.is_ok());
    assert_eq!(h.sentinel.run_history(10).len(), 2);
}

#[tokio::test]
async fn stop_cancels_after_in_flight_fetch() {
    let mut cfg = test_config(vec![source("s1", Priority::High), source("s2", Priority::Low)]);
    cfg.fetch_concurrency = 1;
    let h = harness(
        cfg,
        ScriptedFetcher::new()
            .answer("s1", vec![candidate("s1", "a")])
            .answer("s2", vec![candidate("s2", "b")])
            .delay("s1", Duration::from_millis(300)),
    );

    let s = h.sentinel.clone();
    let run = tokio::spawn(async move { s.run_once().await });
    wait_until_running(&h.sentinel).await;
    h.sentinel.stop();

    let rec = run.await.unwrap().unwrap();
    assert!(rec.cancelled);
    assert_eq!(rec.sources_scanned, 1, "s2 must not start after stop");
    assert_eq!(h.fetcher.calls(), 1);
    assert!(h.store.drafts().is_empty());
    assert_eq!(h.sentinel.snapshot().phase, Phase::Disabled);
    assert_eq!(h.store.runs().len(), 1);
}

#[tokio::test]
async fn watchdog_closes_overlong_run() {
    let mut cfg = test_config(vec![source("s1", Priority::High)]);
    cfg.run_timeout_ms = 100;
    let h = harness(
        cfg,
        ScriptedFetcher::new()
            .answer("s1", vec![candidate("s1", "a")])
            .delay("s1", Duration::from_millis(1_000)),
    );

    let rec = h.sentinel.run_once().await.unwrap();
    assert!(rec.timed_out);
    assert!(rec.errors.iter().any(|e| e.kind == "timeout"));
    assert!(!h.sentinel.snapshot().running);
    // Recoverable: the next trigger is not refused as busy.
    assert!(h.sentinel.force_run().await.is_ok());
}

#[tokio::test]
async fn failing_source_is_recorded_and_run_completes() {
    let h = harness(
        test_config(vec![source("down", Priority::High), source("up", Priority::Low)]),
        ScriptedFetcher::new().answer("up", vec![candidate("up", "a")]),
    );
    let rec = h.sentinel.run_once().await.unwrap();
    assert_eq!(rec.drafts_created, 1);
    assert_eq!(rec.errors.len(), 1);
    assert_eq!(rec.errors[0].kind, "source_fetch");

    let health = h.sentinel.registry().get("down").unwrap().health;
    assert_eq!(health.error_count, 1);
    assert!(health.last_error.unwrap().contains("connection refused"));
    assert!(h.sentinel.metrics().error_rate > 0.99);
    assert!(h
        .sentinel
        .recent_logs(50)
        .iter()
        .any(|l| l.message.contains("source down failed")));
}

#[tokio::test]
async fn persistence_failure_keeps_candidate_retryable() {
    let h = harness(
        test_config(vec![source("s1", Priority::High)]),
        ScriptedFetcher::new().answer("s1", vec![candidate("s1", "a")]),
    );
    h.store.fail_writes(true);
    let rec = h.sentinel.run_once().await.unwrap();
    assert_eq!(rec.drafts_created, 0);
    assert!(rec.errors.iter().any(|e| e.kind == "persistence"));

    h.store.fail_writes(false);
    let rec = h.sentinel.force_run().await.unwrap();
    assert_eq!(rec.drafts_created, 1);
}

#[tokio::test]
async fn auto_persist_off_evaluates_without_writing() {
    let h = harness(
        test_config(vec![source("s1", Priority::High)]),
        ScriptedFetcher::new().answer("s1", vec![candidate("s1", "a")]),
    );
    h.sentinel.set_auto_persist(false);
    let rec = h.sentinel.run_once().await.unwrap();
    assert_eq!(rec.accepted, 1);
    assert_eq!(rec.drafts_created, 0);
    assert!(h.store.drafts().is_empty());
    assert_eq!(h.sentinel.dedup_len(), 0);
}
