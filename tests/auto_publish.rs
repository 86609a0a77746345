// tests/auto_publish.rs
//
// Auto-publish through the facade: the per-pass cap, eligibility rules,
// and best-effort notifications that never revert a publish.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use sentinel_pipeline::draft::DraftStatus;
use sentinel_pipeline::notify::{NotificationEvent, Notifier, NotifierMux, NotifyConfig, NotifyQueue};
use sentinel_pipeline::sources::Priority;
use sentinel_pipeline::store::DraftStore;
use sentinel_pipeline::telemetry::LogRing;

use common::*;

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<NotificationEvent>>,
    fail: bool,
}

#[async_trait::async_trait]
impl Notifier for Recorder {
    async fn send(&self, ev: &NotificationEvent) -> anyhow::Result<()> {
        if self.fail {
            anyhow::bail!("channel down");
        }
        self.events.lock().unwrap().push(ev.clone());
        Ok(())
    }
    fn name(&self) -> &'static str {
        "recorder"
    }
}

fn three_candidates() -> ScriptedFetcher {
    ScriptedFetcher::new().answer(
        "s1",
        vec![candidate("s1", "a"), candidate("s1", "b"), candidate("s1", "c")],
    )
}

#[tokio::test]
async fn promotes_at_most_max_drafts_per_run() {
    let mut cfg = test_config(vec![source("s1", Priority::High)]);
    cfg.auto_publish.max_drafts_per_run = 2;
    let h = harness(cfg, three_candidates());
    assert_eq!(h.sentinel.run_once().await.unwrap().drafts_created, 3);

    let report = h.sentinel.auto_publish_sentinel_drafts().await.unwrap();
    assert_eq!(report.published, 2);
    assert_eq!(report.processed, report.published + report.skipped);

    let drafts = h.store.drafts();
    let published = drafts.iter().filter(|d| d.status == DraftStatus::Published).count();
    let waiting = drafts.iter().filter(|d| d.status == DraftStatus::Draft).count();
    assert_eq!((published, waiting), (2, 1));
    assert!(drafts
        .iter()
        .filter(|d| d.status == DraftStatus::Published)
        .all(|d| d.published_at.is_some()));

    // The leftover goes out on the next pass.
    let report = h.sentinel.auto_publish_sentinel_drafts().await.unwrap();
    assert_eq!(report.published, 1);
}

#[tokio::test]
async fn short_drafts_are_skipped() {
    let mut cfg = test_config(vec![source("s1", Priority::High)]);
    cfg.auto_publish.min_content_length = 10_000;
    let h = harness(cfg, three_candidates());
    h.sentinel.run_once().await.unwrap();

    let report = h.sentinel.auto_publish_sentinel_drafts().await.unwrap();
    assert_eq!(report.published, 0);
    assert_eq!(report.skipped, 3);
    assert!(h.store.drafts().iter().all(|d| d.status == DraftStatus::Draft));
}

#[tokio::test]
async fn manual_approval_is_required_when_configured() {
    let mut cfg = test_config(vec![source("s1", Priority::High)]);
    cfg.auto_publish.require_manual_approval = true;
    let h = harness(cfg, three_candidates());
    h.sentinel.run_once().await.unwrap();

    let first = h.store.drafts()[0].id;
    h.store.set_approved(first, true).await.unwrap();

    let report = h.sentinel.auto_publish_sentinel_drafts().await.unwrap();
    assert_eq!(report.published, 1);
    assert_eq!(report.skipped, 2);
    assert_eq!(h.store.get_draft(first).await.unwrap().status, DraftStatus::Published);
}

#[tokio::test]
async fn published_drafts_are_announced() {
    let rec = Arc::new(Recorder::default());
    let notify_cfg = NotifyConfig {
        retry_base_ms: 1,
        ..Default::default()
    };
    let (queue, _worker) = NotifyQueue::spawn(
        NotifierMux::new().with(rec.clone()),
        &notify_cfg,
        Arc::new(LogRing::new(10)),
    );

    let mut cfg = test_config(vec![source("s1", Priority::High)]);
    cfg.notify.site_base_url = Some("https://news.example.uz".into());
    let h = harness_with(cfg, three_candidates(), None, Some(queue));
    h.sentinel.run_once().await.unwrap();
    assert_eq!(h.sentinel.auto_publish_sentinel_drafts().await.unwrap().published, 3);

    tokio::time::timeout(Duration::from_secs(5), async {
        while rec.events.lock().unwrap().len() < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("notifications delivered");
    let events = rec.events.lock().unwrap().clone();
    assert!(events.iter().all(|e| e.url.starts_with("https://news.example.uz/")));
}

#[tokio::test]
async fn notification_failure_does_not_revert_publish() {
    let rec = Arc::new(Recorder {
        fail: true,
        ..Default::default()
    });
    let notify_logs = Arc::new(LogRing::new(10));
    let notify_cfg = NotifyConfig {
        max_attempts: 2,
        retry_base_ms: 1,
        ..Default::default()
    };
    let (queue, _worker) = NotifyQueue::spawn(
        NotifierMux::new().with(rec.clone()),
        &notify_cfg,
        notify_logs.clone(),
    );

    let mut cfg = test_config(vec![source("s1", Priority::High)]);
    cfg.auto_publish.max_drafts_per_run = 1;
    let h = harness_with(cfg, three_candidates(), None, Some(queue));
    h.sentinel.run_once().await.unwrap();
    assert_eq!(h.sentinel.auto_publish_sentinel_drafts().await.unwrap().published, 1);

    tokio::time::timeout(Duration::from_secs(5), async {
        while notify_logs.is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("failure logged");
    assert!(notify_logs.recent(10)[0].message.contains("not delivered"));
    let published = h
        .store
        .drafts()
        .into_iter()
        .filter(|d| d.status == DraftStatus::Published)
        .count();
    assert_eq!(published, 1);
}
