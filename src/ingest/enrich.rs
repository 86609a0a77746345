//! Rate-limited enrichment with local fallback.
//!
//! Every remote call goes through the shared [`RateLimiter`] and a timeout.
//! When the limiter refuses, the provider fails, or the call times out, the
//! candidate still gets an [`Enrichment`], synthesized from its own text, and
//! the outcome is marked degraded. A run never blocks on the AI provider.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;

use crate::analyze::ai_adapter::{DynEnrichmentClient, Enrichment, EnrichmentRequest};
use crate::config::ai::EnrichmentConfig;
use crate::error::{Result, SentinelError};
use crate::ingest::summarize;
use crate::ingest::types::Candidate;
use crate::rate_limit::RateLimiter;

#[derive(Debug, Clone, PartialEq)]
pub struct EnrichOutcome {
    pub enrichment: Enrichment,
    /// True when the result came from the provider.
    pub remote: bool,
    /// True when a configured provider was skipped or failed.
    pub degraded: bool,
}

pub struct Enricher {
    client: DynEnrichmentClient,
    limiter: Arc<RateLimiter>,
    timeout: Duration,
    max_description_chars: usize,
    target_languages: Vec<String>,
}

impl Enricher {
    pub fn new(
        client: DynEnrichmentClient,
        limiter: Arc<RateLimiter>,
        cfg: &EnrichmentConfig,
        target_languages: Vec<String>,
    ) -> Self {
        Self {
            client,
            limiter,
            timeout: Duration::from_millis(cfg.timeout_ms.max(1)),
            max_description_chars: cfg.max_description_chars,
            target_languages: if cfg.translate {
                target_languages
            } else {
                Vec::new()
            },
        }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn provider_name(&self) -> &'static str {
        self.client.provider_name()
    }

    /// Local stand-in: first sentences of the body, no flags.
    pub fn synthesize(&self, candidate: &Candidate) -> Enrichment {
        let source = if candidate.body.trim().is_empty() {
            &candidate.title
        } else {
            &candidate.body
        };
        let d = summarize(source, self.max_description_chars);
        Enrichment {
            description: (!d.is_empty()).then_some(d),
            ..Default::default()
        }
    }

    /// Remote enrichment, or `RateLimitExceeded` without calling out.
    pub async fn try_enrich(&self, candidate: &Candidate, now: DateTime<Utc>) -> Result<Enrichment> {
        if !self.limiter.try_acquire(now) {
            counter!("sentinel_enrichment_skipped_total").increment(1);
            return Err(SentinelError::RateLimitExceeded {
                retry_after: self.limiter.retry_after(now),
            });
        }

        let req = EnrichmentRequest {
            title: candidate.title.clone(),
            body: candidate.body.clone(),
            language: candidate.language.clone(),
            target_languages: self
                .target_languages
                .iter()
                .filter(|l| candidate.language.as_deref() != Some(l.as_str()))
                .cloned()
                .collect(),
        };

        let res = match tokio::time::timeout(self.timeout, self.client.enrich(&req)).await {
            Ok(r) => r,
            Err(_) => Err(SentinelError::Enrichment(format!(
                "timed out after {} ms",
                self.timeout.as_millis()
            ))),
        };
        match res {
            Ok(mut e) => {
                self.limiter.record_success();
                counter!("sentinel_enrichment_calls_total", "outcome" => "ok").increment(1);
                if e.description.is_none() {
                    e.description = self.synthesize(candidate).description;
                }
                Ok(e)
            }
            Err(err) => {
                self.limiter.record_failure(Utc::now());
                counter!("sentinel_enrichment_calls_total", "outcome" => "error").increment(1);
                Err(err)
            }
        }
    }

    /// Enrichment that always resolves: remote when possible, synthesized otherwise.
    pub async fn enrich(&self, candidate: &Candidate, now: DateTime<Utc>) -> EnrichOutcome {
        if !self.client.is_enabled() {
            return EnrichOutcome {
                enrichment: self.synthesize(candidate),
                remote: false,
                degraded: false,
            };
        }
        if self.limiter.is_degraded(now) {
            counter!("sentinel_enrichment_skipped_total").increment(1);
            return EnrichOutcome {
                enrichment: self.synthesize(candidate),
                remote: false,
                degraded: true,
            };
        }
        match self.try_enrich(candidate, now).await {
            Ok(enrichment) => EnrichOutcome {
                enrichment,
                remote: true,
                degraded: false,
            },
            Err(e) => {
                tracing::debug!(target: "ingest", error = %e, url = %candidate.url, "enrichment unavailable; synthesizing");
                EnrichOutcome {
                    enrichment: self.synthesize(candidate),
                    remote: false,
                    degraded: true,
                }
            }
        }
    }
}
