use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use super::{NotificationEvent, Notifier};

#[derive(Clone)]
pub struct DiscordNotifier {
    webhook: String,
    client: Client,
    timeout: Duration,
}

impl DiscordNotifier {
    pub fn new(webhook: String) -> Self {
        Self {
            webhook,
            client: Client::new(),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait::async_trait]
impl Notifier for DiscordNotifier {
    async fn send(&self, ev: &NotificationEvent) -> Result<()> {
        let payload = DiscordWebhookPayload::for_event(ev);
        let rsp = self
            .client
            .post(&self.webhook)
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|e| anyhow!("Discord webhook request failed: {e}"))?;
        rsp.error_for_status_ref()
            .map_err(|e| anyhow!("Discord webhook HTTP error: {e}"))?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "discord"
    }
}

#[derive(Serialize)]
struct DiscordEmbed {
    title: String,
    description: String,
    url: String,
    timestamp: String,
}

#[derive(Serialize)]
struct DiscordWebhookPayload {
    content: Option<String>,
    embeds: Vec<DiscordEmbed>,
}

impl DiscordWebhookPayload {
    fn for_event(ev: &NotificationEvent) -> Self {
        // Discord caps embed titles at 256 and descriptions at 4096 chars.
        Self {
            content: None,
            embeds: vec![DiscordEmbed {
                title: ev.title.chars().take(256).collect(),
                description: format!(
                    "{}\n\n**Category:** {}",
                    ev.description.chars().take(3_800).collect::<String>(),
                    ev.category.as_str()
                ),
                url: ev.url.clone(),
                timestamp: ev.published_at.to_rfc3339(),
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::Category;

    #[test]
    fn payload_shape() {
        let ev = NotificationEvent {
            draft_id: uuid::Uuid::new_v4(),
            slug: "s".into(),
            title: "x".repeat(300),
            description: "Short".into(),
            url: "https://news.example.uz/s".into(),
            category: Category::Tech,
            published_at: chrono::Utc::now(),
        };
        let v = serde_json::to_value(DiscordWebhookPayload::for_event(&ev)).unwrap();
        assert_eq!(v["embeds"][0]["title"].as_str().unwrap().len(), 256);
        assert_eq!(v["embeds"][0]["url"], "https://news.example.uz/s");
        assert!(v["embeds"][0]["description"].as_str().unwrap().contains("tech"));
        assert!(v["content"].is_null());
    }
}
