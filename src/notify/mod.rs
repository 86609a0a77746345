// src/notify/mod.rs
//! Publish notifications.
//!
//! Auto-publish never calls a channel inline. It enqueues a
//! [`NotificationEvent`] on the [`NotifyQueue`]; a single worker task fans the
//! event out through the [`NotifierMux`], retrying each channel with
//! exponential backoff. Final failures are logged (tracing + log ring) and
//! counted; they never touch the published draft.

pub mod discord;
pub mod email;
pub mod slack;
pub mod telegram;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::resolve_env;
use crate::draft::Draft;
use crate::error::{Result, SentinelError};
use crate::sources::Category;
use crate::telemetry::LogRing;

pub use discord::DiscordNotifier;
pub use email::{EmailConfig, EmailNotifier};
pub use slack::SlackNotifier;
pub use telegram::{TelegramConfig, TelegramNotifier};

/// What a channel receives for one published draft.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationEvent {
    pub draft_id: Uuid,
    pub slug: String,
    pub title: String,
    pub description: String,
    pub url: String,
    pub category: Category,
    pub published_at: DateTime<Utc>,
}

impl NotificationEvent {
    /// Link points at `{site_base_url}/{slug}` when a site is configured,
    /// otherwise at the origin article.
    pub fn from_draft(d: &Draft, site_base_url: Option<&str>) -> Self {
        let url = match site_base_url.map(|b| b.trim_end_matches('/')).filter(|b| !b.is_empty()) {
            Some(base) => format!("{base}/{}", d.slug),
            None => d.origin_url.clone(),
        };
        Self {
            draft_id: d.id,
            slug: d.slug.clone(),
            title: d.title.primary_text().to_string(),
            description: d.description.primary_text().to_string(),
            url,
            category: d.category,
            published_at: d.published_at.unwrap_or_else(Utc::now),
        }
    }
}

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, ev: &NotificationEvent) -> anyhow::Result<()>;
    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Delivery attempts per channel, including the first.
    pub max_attempts: u32,
    pub retry_base_ms: u64,
    pub queue_capacity: usize,
    pub site_base_url: Option<String>,
    pub telegram: Option<TelegramConfig>,
    /// Webhook URL, or "ENV" for DISCORD_WEBHOOK_URL.
    pub discord_webhook: Option<String>,
    /// Webhook URL, or "ENV" for SLACK_WEBHOOK_URL.
    pub slack_webhook: Option<String>,
    pub email: Option<EmailConfig>,
    pub timeout_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_base_ms: 500,
            queue_capacity: 256,
            site_base_url: None,
            telegram: None,
            discord_webhook: None,
            slack_webhook: None,
            email: None,
            timeout_secs: 5,
        }
    }
}

/// Fan-out over the configured channels.
#[derive(Clone, Default)]
pub struct NotifierMux {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl NotifierMux {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, n: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(n);
        self
    }

    /// Channels whose settings are present; a misconfigured channel is skipped with a warning.
    pub fn from_config(cfg: &NotifyConfig) -> Self {
        let mut mux = Self::new();
        let timeout = Duration::from_secs(cfg.timeout_secs.max(1));

        if let Some(t) = &cfg.telegram {
            match TelegramNotifier::new(t, timeout) {
                Ok(n) => mux = mux.with(Arc::new(n)),
                Err(e) => tracing::warn!(target: "notify", error = ?e, "telegram disabled"),
            }
        }
        if let Some(url) = cfg
            .discord_webhook
            .as_deref()
            .and_then(|v| resolve_env(v, "DISCORD_WEBHOOK_URL"))
        {
            mux = mux.with(Arc::new(DiscordNotifier::new(url).with_timeout(timeout)));
        }
        if let Some(url) = cfg
            .slack_webhook
            .as_deref()
            .and_then(|v| resolve_env(v, "SLACK_WEBHOOK_URL"))
        {
            mux = mux.with(Arc::new(SlackNotifier::new(url).with_timeout(timeout)));
        }
        if let Some(e) = &cfg.email {
            match EmailNotifier::new(e) {
                Ok(n) => mux = mux.with(Arc::new(n)),
                Err(err) => tracing::warn!(target: "notify", error = ?err, "email disabled"),
            }
        }
        mux
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }

    pub fn channels(&self) -> Vec<&'static str> {
        self.notifiers.iter().map(|n| n.name()).collect()
    }

    fn notifiers(&self) -> &[Arc<dyn Notifier>] {
        &self.notifiers
    }
}

#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    max_attempts: u32,
    base: Duration,
}

/// Deliver to one channel, retrying with `base · 2^(attempt-1)` sleeps.
async fn deliver(
    n: &dyn Notifier,
    ev: &NotificationEvent,
    policy: RetryPolicy,
) -> std::result::Result<u32, (u32, anyhow::Error)> {
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match n.send(ev).await {
            Ok(()) => return Ok(attempt),
            Err(e) if attempt < policy.max_attempts => {
                tracing::debug!(target: "notify", channel = n.name(), attempt, error = %e, "notification attempt failed; retrying");
                let shift = (attempt - 1).min(16);
                tokio::time::sleep(policy.base.saturating_mul(1u32 << shift)).await;
            }
            Err(e) => return Err((attempt, e)),
        }
    }
}

/// Handle for enqueueing notifications. Cloneable; the worker stops when
/// every handle is dropped.
#[derive(Clone)]
pub struct NotifyQueue {
    tx: mpsc::Sender<NotificationEvent>,
}

impl NotifyQueue {
    pub fn spawn(mux: NotifierMux, cfg: &NotifyConfig, logs: Arc<LogRing>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<NotificationEvent>(cfg.queue_capacity.max(1));
        let policy = RetryPolicy {
            max_attempts: cfg.max_attempts.max(1),
            base: Duration::from_millis(cfg.retry_base_ms),
        };
        let handle = tokio::spawn(async move {
            while let Some(ev) = rx.recv().await {
                for n in mux.notifiers() {
                    match deliver(n.as_ref(), &ev, policy).await {
                        Ok(attempts) => {
                            counter!("sentinel_notifications_total", "channel" => n.name(), "outcome" => "ok").increment(1);
                            tracing::info!(target: "notify", channel = n.name(), slug = %ev.slug, attempts, "notification delivered");
                        }
                        Err((attempts, e)) => {
                            counter!("sentinel_notifications_total", "channel" => n.name(), "outcome" => "error").increment(1);
                            let err = SentinelError::Notification(format!("{}: {e:#}", n.name()));
                            tracing::warn!(target: "notify", channel = n.name(), slug = %ev.slug, attempts, error = %err, "notification failed");
                            logs.warn("notify", format!("{} not delivered for '{}': {err}", n.name(), ev.slug));
                        }
                    }
                }
            }
            tracing::debug!(target: "notify", "notification queue closed");
        });
        (Self { tx }, handle)
    }

    /// Queue an event without waiting. A full or closed queue is reported, not retried.
    pub fn enqueue(&self, ev: NotificationEvent) -> Result<()> {
        self.tx
            .try_send(ev)
            .map_err(|e| SentinelError::Notification(format!("queue rejected event: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct Flaky {
        fail_first: u32,
        calls: AtomicU32,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl Notifier for Flaky {
        async fn send(&self, ev: &NotificationEvent) -> anyhow::Result<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.fail_first {
                anyhow::bail!("transient {n}");
            }
            self.seen.lock().unwrap().push(ev.slug.clone());
            Ok(())
        }
        fn name(&self) -> &'static str {
            "flaky"
        }
    }

    fn event(slug: &str) -> NotificationEvent {
        NotificationEvent {
            draft_id: Uuid::new_v4(),
            slug: slug.into(),
            title: "t".into(),
            description: "d".into(),
            url: "https://x.org".into(),
            category: Category::Tech,
            published_at: Utc::now(),
        }
    }

    fn cfg(max_attempts: u32) -> NotifyConfig {
        NotifyConfig {
            max_attempts,
            retry_base_ms: 1,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn retries_until_success() {
        let flaky = Arc::new(Flaky {
            fail_first: 2,
            calls: AtomicU32::new(0),
            seen: Mutex::new(vec![]),
        });
        let logs = Arc::new(LogRing::new(10));
        let (q, handle) = NotifyQueue::spawn(NotifierMux::new().with(flaky.clone()), &cfg(3), logs.clone());
        q.enqueue(event("a")).unwrap();
        drop(q);
        handle.await.unwrap();
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
        assert_eq!(*flaky.seen.lock().unwrap(), vec!["a".to_string()]);
        assert!(logs.is_empty());
    }

    #[tokio::test]
    async fn exhausted_retries_are_logged() {
        let flaky = Arc::new(Flaky {
            fail_first: 10,
            calls: AtomicU32::new(0),
            seen: Mutex::new(vec![]),
        });
        let logs = Arc::new(LogRing::new(10));
        let (q, handle) = NotifyQueue::spawn(NotifierMux::new().with(flaky.clone()), &cfg(2), logs.clone());
        q.enqueue(event("b")).unwrap();
        drop(q);
        handle.await.unwrap();
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
        let lines = logs.recent(10);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].message.contains("flaky not delivered for 'b'"));
    }

    #[test]
    fn event_links_to_site_when_configured() {
        use crate::draft::{Localized, DraftStatus};
        let d = Draft {
            id: Uuid::new_v4(),
            slug: "bridge-0123abcd".into(),
            source_id: "s".into(),
            origin_url: "https://origin.org/a".into(),
            fingerprint: "0123abcd".into(),
            category: Category::Local,
            title: Localized::new("en", "Bridge"),
            content: Localized::new("en", "body"),
            description: Localized::new("en", "desc"),
            quality_score: 0.9,
            safety_flags: vec![],
            status: DraftStatus::Published,
            author: "sentinel".into(),
            approved: false,
            created_at: Utc::now(),
            published_at: Some(Utc::now()),
        };
        assert_eq!(
            NotificationEvent::from_draft(&d, Some("https://news.example.uz/")).url,
            "https://news.example.uz/bridge-0123abcd"
        );
        assert_eq!(NotificationEvent::from_draft(&d, None).url, "https://origin.org/a");
    }
}
