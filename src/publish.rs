//! Auto-publish: promotes eligible Sentinel drafts and queues notifications.
//!
//! Eligible: status `draft`, authored by Sentinel, primary content at least
//! `min_content_length` chars, and approved when `require_manual_approval`
//! is set. Oldest drafts go first. At most `max_drafts_per_run` promotions
//! per pass, spaced by `delay_between_ms`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use serde::{Deserialize, Serialize};

use crate::draft::{Draft, DraftStatus, SENTINEL_AUTHOR};
use crate::error::{Result, SentinelError};
use crate::notify::{NotificationEvent, NotifyQueue};
use crate::store::{DraftQuery, DraftStore};
use crate::telemetry::LogRing;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoPublishConfig {
    /// Run on its own schedule (`interval_ms`). Manual triggers work regardless.
    pub enabled: bool,
    pub interval_ms: u64,
    pub min_content_length: usize,
    pub require_manual_approval: bool,
    pub max_drafts_per_run: usize,
    pub delay_between_ms: u64,
}

impl Default for AutoPublishConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_ms: 1_800_000,
            min_content_length: 500,
            require_manual_approval: false,
            max_drafts_per_run: 5,
            delay_between_ms: 2_000,
        }
    }
}

/// Outcome of one pass. `processed = published + skipped`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PublishReport {
    pub processed: usize,
    pub published: usize,
    pub skipped: usize,
}

pub struct AutoPublisher {
    store: Arc<dyn DraftStore>,
    cfg: AutoPublishConfig,
    notify: Option<NotifyQueue>,
    site_base_url: Option<String>,
    logs: Arc<LogRing>,
    lock: tokio::sync::Mutex<()>,
}

impl AutoPublisher {
    pub fn new(
        store: Arc<dyn DraftStore>,
        cfg: AutoPublishConfig,
        notify: Option<NotifyQueue>,
        site_base_url: Option<String>,
        logs: Arc<LogRing>,
    ) -> Self {
        Self {
            store,
            cfg,
            notify,
            site_base_url,
            logs,
            lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &AutoPublishConfig {
        &self.cfg
    }

    /// Why a draft is not eligible, or `None` when it is.
    pub fn ineligible_reason(&self, d: &Draft) -> Option<&'static str> {
        if d.status != DraftStatus::Draft {
            return Some("not in draft status");
        }
        if !d.is_sentinel() {
            return Some("not authored by sentinel");
        }
        if d.primary_content_chars() < self.cfg.min_content_length {
            return Some("content below minimum length");
        }
        if self.cfg.require_manual_approval && !d.approved {
            return Some("awaiting approval");
        }
        None
    }

    /// One pass. `Busy` if another pass holds the lock.
    pub async fn run(&self) -> Result<PublishReport> {
        let _guard = self
            .lock
            .try_lock()
            .map_err(|_| SentinelError::Busy("auto-publish"))?;

        let drafts = self
            .store
            .find_drafts(&DraftQuery {
                status: Some(DraftStatus::Draft),
                author: Some(SENTINEL_AUTHOR.to_string()),
                limit: None,
            })
            .await?;

        let mut report = PublishReport::default();
        for d in drafts {
            if report.published >= self.cfg.max_drafts_per_run {
                break;
            }
            if let Some(why) = self.ineligible_reason(&d) {
                tracing::debug!(target: "publish", slug = %d.slug, reason = why, "draft skipped");
                report.skipped += 1;
                continue;
            }
            if report.published > 0 && self.cfg.delay_between_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.cfg.delay_between_ms)).await;
                // The draft may have been moderated while we slept.
                let current = match self.store.get_draft(d.id).await {
                    Ok(c) => c,
                    Err(e) => {
                        tracing::debug!(target: "publish", slug = %d.slug, error = %e, "draft vanished");
                        report.skipped += 1;
                        continue;
                    }
                };
                if let Some(why) = self.ineligible_reason(&current) {
                    tracing::debug!(target: "publish", slug = %d.slug, reason = why, "draft skipped");
                    report.skipped += 1;
                    continue;
                }
            }

            match self
                .store
                .transition_status(d.id, DraftStatus::Draft, DraftStatus::Published, Some(Utc::now()))
                .await
            {
                Ok(published) => {
                    report.published += 1;
                    counter!("sentinel_published_total").increment(1);
                    tracing::info!(target: "publish", slug = %published.slug, "draft published");
                    self.logs.info("publish", format!("published '{}'", published.slug));
                    self.notify_published(&published);
                }
                Err(e) => {
                    report.skipped += 1;
                    tracing::warn!(target: "publish", slug = %d.slug, error = %e, "publish failed");
                    self.logs.error("publish", format!("publish of '{}' failed: {e}", d.slug));
                }
            }
        }

        report.processed = report.published + report.skipped;
        self.logs.info(
            "publish",
            format!(
                "auto-publish pass: processed {}, published {}, skipped {}",
                report.processed, report.published, report.skipped
            ),
        );
        Ok(report)
    }

    /// Best effort: a queue failure is logged and the publish stands.
    fn notify_published(&self, d: &Draft) {
        let Some(q) = &self.notify else {
            return;
        };
        let ev = NotificationEvent::from_draft(d, self.site_base_url.as_deref());
        if let Err(e) = q.enqueue(ev) {
            tracing::warn!(target: "publish", slug = %d.slug, error = %e, "notification not queued");
            self.logs.warn("publish", format!("notification for '{}' not queued: {e}", d.slug));
        }
    }
}
