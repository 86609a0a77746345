use anyhow::{Context, Result};
use reqwest::Client;
use std::time::Duration;

use super::{NotificationEvent, Notifier};

pub struct SlackNotifier {
    webhook_url: String,
    client: Client,
    timeout: Duration,
}

impl SlackNotifier {
    pub fn new(url: String) -> Self {
        Self {
            webhook_url: url,
            client: Client::new(),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

fn slack_text(ev: &NotificationEvent) -> String {
    format!(
        "*New article:* <{}|{}>\n{}\n_{} · {}_",
        ev.url,
        ev.title.replace(['<', '>', '|'], " "),
        ev.description,
        ev.category.as_str(),
        ev.published_at.to_rfc3339()
    )
}

#[async_trait::async_trait]
impl Notifier for SlackNotifier {
    async fn send(&self, ev: &NotificationEvent) -> Result<()> {
        let body = serde_json::json!({ "text": slack_text(ev) });
        self.client
            .post(&self.webhook_url)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .context("slack post")?
            .error_for_status()
            .context("slack non-2xx")?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "slack"
    }
}
