//! Enrichment (AI) adapter: provider abstraction for description, safety
//! classification, and translation of candidates.
//!
//! The pipeline never calls a client directly; it goes through
//! [`Enricher`](crate::ingest::enrich::Enricher), which adds rate limiting,
//! a timeout, and the local fallback.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::ai::EnrichmentConfig;
use crate::error::{Result, SentinelError};

// ------------------------------------------------------------
// Public surface
// ------------------------------------------------------------

/// Input for one enrichment call.
#[derive(Debug, Clone, Default)]
pub struct EnrichmentRequest {
    pub title: String,
    pub body: String,
    pub language: Option<String>,
    /// Languages to translate into; empty means no translation.
    pub target_languages: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Translation {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// What a provider returns, or what the pipeline synthesizes in degraded mode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Enrichment {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub safety_flags: Vec<String>,
    /// Classifier verdict; rejects the candidate as unsafe.
    #[serde(default, rename = "unsafe")]
    pub unsafe_content: bool,
    #[serde(default)]
    pub translations: BTreeMap<String, Translation>,
}

/// Trait object used by the enricher and tests.
pub trait EnrichmentClient: Send + Sync {
    fn enrich<'a>(
        &'a self,
        req: &'a EnrichmentRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Enrichment>> + Send + 'a>>;
    /// Provider name for logs and status.
    fn provider_name(&self) -> &'static str;
    /// False for the disabled client; the enricher then synthesizes without
    /// touching the rate limiter.
    fn is_enabled(&self) -> bool {
        true
    }
}

pub type DynEnrichmentClient = Arc<dyn EnrichmentClient>;

/// Factory: build a client according to config and environment variables.
///
/// * If `SENTINEL_AI_TEST_MODE=mock`, returns a deterministic mock client.
/// * Else if `config.enabled == false`, returns a disabled client.
/// * Else builds the configured provider (OpenAI).
pub fn build_client_from_config(config: &EnrichmentConfig) -> DynEnrichmentClient {
    if std::env::var("SENTINEL_AI_TEST_MODE")
        .map(|v| v == "mock")
        .unwrap_or(false)
    {
        return Arc::new(MockClient::fixed(Enrichment {
            description: Some("Summary (mock)".to_string()),
            ..Default::default()
        }));
    }

    if !config.enabled {
        return Arc::new(DisabledClient);
    }

    match config.provider.as_str() {
        "openai" => match OpenAiClient::new(config) {
            Ok(c) => Arc::new(c),
            Err(e) => {
                tracing::warn!(target: "sentinel", error = ?e, "openai client init failed; enrichment disabled");
                Arc::new(DisabledClient)
            }
        },
        other => {
            tracing::warn!(target: "sentinel", provider = other, "unknown enrichment provider; enrichment disabled");
            Arc::new(DisabledClient)
        }
    }
}

// ------------------------------------------------------------
// Concrete clients
// ------------------------------------------------------------

/// OpenAI Chat Completions in JSON mode.
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(config: &EnrichmentConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("sentinel-pipeline/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }

    async fn call(&self, req: &EnrichmentRequest) -> Result<Enrichment> {
        if self.api_key.is_empty() {
            return Err(SentinelError::Enrichment("missing api key".into()));
        }

        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct ResponseFormat {
            #[serde(rename = "type")]
            kind: &'static str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
            response_format: ResponseFormat,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: String,
        }

        let sys = system_prompt(&req.target_languages);
        let body: String = req.body.chars().take(4_000).collect();
        let user = format!(
            "Language: {}\nTitle: {}\n\n{}",
            req.language.as_deref().unwrap_or("unknown"),
            req.title,
            body
        );
        let payload = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: &sys,
                },
                Msg {
                    role: "user",
                    content: &user,
                },
            ],
            temperature: 0.2,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let resp = self
            .http
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| SentinelError::Enrichment(format!("request failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(SentinelError::Enrichment(format!(
                "provider returned {}",
                resp.status()
            )));
        }
        let body: Resp = resp
            .json()
            .await
            .map_err(|e| SentinelError::Enrichment(format!("bad response body: {e}")))?;
        let content = body
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .unwrap_or("");
        parse_enrichment_json(content)
    }
}

impl EnrichmentClient for OpenAiClient {
    fn enrich<'a>(
        &'a self,
        req: &'a EnrichmentRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Enrichment>> + Send + 'a>> {
        Box::pin(self.call(req))
    }
    fn provider_name(&self) -> &'static str {
        "openai"
    }
}

fn system_prompt(targets: &[String]) -> String {
    let mut s = String::from(
        "You review news items before publication. Reply with a JSON object: \
         {\"description\": one neutral sentence (<=220 chars), \
         \"safety_flags\": short snake_case labels for bias, unverified claims or sensitive content, \
         \"unsafe\": true only for hate, graphic violence, or explicit content",
    );
    if targets.is_empty() {
        s.push_str("}.");
    } else {
        s.push_str(&format!(
            ", \"translations\": {{lang: {{\"title\", \"content\", \"description\"}}}} for languages: {}}}.",
            targets.join(", ")
        ));
    }
    s
}

/// Parse a provider JSON reply into an [`Enrichment`], cleaning the description.
pub fn parse_enrichment_json(content: &str) -> Result<Enrichment> {
    let mut e: Enrichment = serde_json::from_str(content.trim())
        .map_err(|e| SentinelError::Enrichment(format!("unparsable enrichment: {e}")))?;
    e.description = e
        .description
        .map(|d| sanitize_line(&d, 300))
        .filter(|d| !d.is_empty());
    e.safety_flags = e
        .safety_flags
        .iter()
        .map(|f| f.trim().to_lowercase())
        .filter(|f| !f.is_empty())
        .collect();
    Ok(e)
}

/// Always fails; the enricher treats it as "enrichment off" and synthesizes.
pub struct DisabledClient;

impl EnrichmentClient for DisabledClient {
    fn enrich<'a>(
        &'a self,
        _req: &'a EnrichmentRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Enrichment>> + Send + 'a>> {
        Box::pin(async { Err(SentinelError::Enrichment("enrichment disabled".into())) })
    }
    fn provider_name(&self) -> &'static str {
        "disabled"
    }
    fn is_enabled(&self) -> bool {
        false
    }
}

/// Deterministic client for tests/local runs. Counts calls.
pub struct MockClient {
    outcome: std::result::Result<Enrichment, String>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockClient {
    pub fn fixed(enrichment: Enrichment) -> Self {
        Self {
            outcome: Ok(enrichment),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            outcome: Err(message.into()),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Sleep before answering (exercises the enricher timeout).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EnrichmentClient for MockClient {
    fn enrich<'a>(
        &'a self,
        _req: &'a EnrichmentRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Enrichment>> + Send + 'a>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            if let Some(d) = self.delay {
                tokio::time::sleep(d).await;
            }
            self.outcome.clone().map_err(SentinelError::Enrichment)
        })
    }
    fn provider_name(&self) -> &'static str {
        "mock"
    }
}

// ------------------------------------------------------------
// Sanitization
// ------------------------------------------------------------

/// Single line, collapsed whitespace, at most `max_chars` characters.
pub fn sanitize_line(input: &str, max_chars: usize) -> String {
    let mut out = String::with_capacity(max_chars.min(input.len()));
    let mut n = 0usize;
    let mut prev_space = false;
    for ch in input.chars() {
        let c = if ch.is_whitespace() || ch.is_control() {
            ' '
        } else {
            ch
        };
        if c == ' ' {
            if !prev_space && !out.is_empty() {
                out.push(' ');
                n += 1;
            }
            prev_space = true;
        } else {
            out.push(c);
            n += 1;
            prev_space = false;
        }
        if n >= max_chars {
            break;
        }
    }
    out.trim().to_string()
}
