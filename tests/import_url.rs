// tests/import_url.rs
//
// Ad-hoc URL import: preview never writes, persist yields exactly one draft
// or an error, and imports share the run slot with scheduled runs.

mod common;

use std::time::Duration;

use sentinel_pipeline::error::RejectReason;
use sentinel_pipeline::sentinel::IMPORT_SOURCE_ID;
use sentinel_pipeline::sources::{Category, Priority};
use sentinel_pipeline::{ImportOptions, SentinelError};

use common::*;

const URL: &str = "https://news.example.org/story?utm_source=x";

fn importing() -> Harness {
    harness(
        test_config(vec![source("s1", Priority::High)]),
        ScriptedFetcher::new()
            .answer(IMPORT_SOURCE_ID, vec![candidate(IMPORT_SOURCE_ID, "imported")])
            .answer("s1", vec![candidate("s1", "a")])
            .delay("s1", Duration::from_millis(300)),
    )
}

#[tokio::test]
async fn preview_writes_and_remembers_nothing() {
    let h = importing();
    let out = h
        .sentinel
        .import_url(URL, ImportOptions::default())
        .await
        .unwrap();
    assert!(out.verdict.accept);
    assert!(out.draft.is_none());
    assert!(h.store.drafts().is_empty());
    assert_eq!(h.sentinel.dedup_len(), 0);
    assert!(h.sentinel.run_history(10).is_empty(), "imports write no run record");

    // Previewing twice gives the same answer.
    let again = h
        .sentinel
        .import_url(URL, ImportOptions::default())
        .await
        .unwrap();
    assert!(again.verdict.accept);
}

#[tokio::test]
async fn persist_creates_exactly_one_draft() {
    let h = importing();
    let out = h
        .sentinel
        .import_url(
            URL,
            ImportOptions {
                persist: true,
                category: Some(Category::Tech),
            },
        )
        .await
        .unwrap();
    let draft = out.draft.expect("draft");
    assert_eq!(draft.category, Category::Tech);
    assert_eq!(h.store.drafts().len(), 1);
    assert_eq!(h.sentinel.dedup_len(), 1);

    let dup = h
        .sentinel
        .import_url(
            URL,
            ImportOptions {
                persist: true,
                category: None,
            },
        )
        .await;
    assert!(matches!(dup, Err(SentinelError::Rejected(RejectReason::Duplicate))));
    assert_eq!(h.store.drafts().len(), 1);
}

#[tokio::test]
async fn invalid_url_is_a_validation_error() {
    let h = importing();
    for bad in ["not a url", "ftp://example.org/file"] {
        assert!(matches!(
            h.sentinel.import_url(bad, ImportOptions::default()).await,
            Err(SentinelError::Validation(_))
        ));
    }
}

#[tokio::test]
async fn fetch_failure_is_reported() {
    let h = harness(
        test_config(vec![]),
        ScriptedFetcher::new(), // no answer for the import source
    );
    let res = h
        .sentinel
        .import_url(
            URL,
            ImportOptions {
                persist: true,
                category: None,
            },
        )
        .await;
    assert!(matches!(res, Err(SentinelError::SourceFetch { .. })));
    assert!(h.store.drafts().is_empty());
    assert!(!h.sentinel.snapshot().running);
}

#[tokio::test]
async fn import_during_run_is_busy() {
    let h = importing();
    let s = h.sentinel.clone();
    let run = tokio::spawn(async move { s.run_once().await });
    wait_until_running(&h.sentinel).await;

    assert!(matches!(
        h.sentinel.import_url(URL, ImportOptions::default()).await,
        Err(SentinelError::Busy(_))
    ));
    run.await.unwrap().unwrap();
}
