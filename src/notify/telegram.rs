//! Telegram channel post via the Bot API `sendMessage` call.

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{NotificationEvent, Notifier};
use crate::config::resolve_env;

fn default_api_base() -> String {
    "https://api.telegram.org".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot token, or "ENV" for TELEGRAM_BOT_TOKEN.
    #[serde(skip_serializing)]
    pub bot_token: String,
    /// Channel id or @handle, or "ENV" for TELEGRAM_CHAT_ID.
    pub chat_id: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

pub struct TelegramNotifier {
    endpoint: String,
    chat_id: String,
    client: Client,
    timeout: Duration,
}

impl TelegramNotifier {
    pub fn new(cfg: &TelegramConfig, timeout: Duration) -> Result<Self> {
        let token = resolve_env(&cfg.bot_token, "TELEGRAM_BOT_TOKEN")
            .ok_or_else(|| anyhow!("telegram bot token missing"))?;
        let chat_id = resolve_env(&cfg.chat_id, "TELEGRAM_CHAT_ID")
            .ok_or_else(|| anyhow!("telegram chat id missing"))?;
        Ok(Self {
            endpoint: format!("{}/bot{token}/sendMessage", cfg.api_base.trim_end_matches('/')),
            chat_id,
            client: Client::new(),
            timeout,
        })
    }
}

/// HTML-formatted post body; Telegram caps messages at 4096 chars.
fn message_html(ev: &NotificationEvent) -> String {
    let title = html_escape::encode_text(&ev.title);
    let desc: String = ev.description.chars().take(3_500).collect();
    let desc = html_escape::encode_text(&desc);
    let url = html_escape::encode_double_quoted_attribute(&ev.url);
    format!("<b>{title}</b>\n\n{desc}\n\n<a href=\"{url}\">Read more</a>")
}

#[derive(Deserialize)]
struct TgResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

#[async_trait::async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, ev: &NotificationEvent) -> Result<()> {
        let body = serde_json::json!({
            "chat_id": self.chat_id,
            "text": message_html(ev),
            "parse_mode": "HTML",
            "disable_web_page_preview": false,
        });
        let rsp: TgResponse = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .context("telegram post")?
            .json()
            .await
            .context("telegram response")?;
        if !rsp.ok {
            return Err(anyhow!(
                "telegram rejected message: {}",
                rsp.description.unwrap_or_default()
            ));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "telegram"
    }
}
