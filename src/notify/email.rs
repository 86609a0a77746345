use anyhow::{anyhow, Context, Result};
use lettre::message::{header, Mailbox, Message};
use lettre::transport::smtp::{authentication::Credentials, AsyncSmtpTransport};
use lettre::{AsyncTransport, Tokio1Executor};
use serde::{Deserialize, Serialize};

use super::{NotificationEvent, Notifier};
use crate::config::resolve_env;

/// SMTP settings. Any value may be "ENV" to read SMTP_HOST, SMTP_USER,
/// SMTP_PASS, NOTIFY_EMAIL_FROM, NOTIFY_EMAIL_TO respectively.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_user: String,
    #[serde(skip_serializing)]
    pub smtp_pass: String,
    pub from: String,
    pub to: String,
}

pub struct EmailNotifier {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

fn required(value: &str, var: &str) -> Result<String> {
    resolve_env(value, var).ok_or_else(|| anyhow!("{var} missing"))
}

impl EmailNotifier {
    pub fn new(cfg: &EmailConfig) -> Result<Self> {
        let host = required(&cfg.smtp_host, "SMTP_HOST")?;
        let user = required(&cfg.smtp_user, "SMTP_USER")?;
        let pass = required(&cfg.smtp_pass, "SMTP_PASS")?;
        let from_addr = required(&cfg.from, "NOTIFY_EMAIL_FROM")?;
        let to_addr = required(&cfg.to, "NOTIFY_EMAIL_TO")?;

        let creds = Credentials::new(user, pass);
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&host)
            .context("invalid SMTP host")?
            .credentials(creds)
            .build();

        let from = from_addr.parse().context("invalid from address")?;
        let to = to_addr.parse().context("invalid to address")?;

        Ok(Self { mailer, from, to })
    }

    fn build_message(&self, ev: &NotificationEvent) -> Result<Message> {
        let subject = format!("Published: {}", ev.title.chars().take(120).collect::<String>());
        let body = format!(
            "{}\n\n{}\n\nCategory: {}\nLink: {}\nPublished: {}\n",
            ev.title,
            ev.description,
            ev.category.as_str(),
            ev.url,
            ev.published_at.to_rfc3339()
        );
        Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(subject)
            .header(header::ContentType::TEXT_PLAIN)
            .body(body)
            .context("build email")
    }
}

#[async_trait::async_trait]
impl Notifier for EmailNotifier {
    async fn send(&self, ev: &NotificationEvent) -> Result<()> {
        let msg = self.build_message(ev)?;
        self.mailer.send(msg).await.context("send email")?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "email"
    }
}
