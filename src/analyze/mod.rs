// src/analyze/mod.rs
//! Quality & safety gate: decides whether a candidate becomes a draft.
//!
//! Checks run in order and stop at the first rejection:
//! 1) dedup (cache, or already seen earlier in this run)
//! 2) minimum body length
//! 3) safety screen, then the enrichment classifier
//! 4) weighted quality score against the configured threshold

pub mod ai_adapter;
pub mod safety;
pub mod scoring;

use std::collections::HashSet;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::analyze::ai_adapter::Enrichment;
use crate::dedup::DedupCache;
use crate::error::RejectReason;
use crate::ingest::enrich::Enricher;
use crate::ingest::types::Candidate;
use crate::sources::Source;

pub use crate::analyze::safety::{screen, SafetyConfig};
pub use crate::analyze::scoring::{quality_score, CategoryMix, QualityConfig, ScoreInputs};

/// Result of [`QualityGate::evaluate`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    pub accept: bool,
    pub quality_score: f64,
    pub safety_flags: Vec<String>,
    pub rejection: Option<RejectReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enrichment: Option<Enrichment>,
    /// Enrichment fell back to local synthesis for this candidate.
    pub degraded: bool,
}

impl Verdict {
    fn reject(reason: RejectReason, score: f64, flags: Vec<String>) -> Self {
        Self {
            accept: false,
            quality_score: score,
            safety_flags: flags,
            rejection: Some(reason),
            enrichment: None,
            degraded: false,
        }
    }
}

/// Run-scoped state the gate reads.
pub struct GateContext<'a> {
    pub now: DateTime<Utc>,
    pub dedup: &'a Mutex<DedupCache>,
    pub seen_this_run: &'a HashSet<String>,
    pub mix: &'a CategoryMix,
    /// `None` skips the classifier and keeps the description synthesized.
    pub enricher: Option<&'a Enricher>,
}

#[derive(Debug, Clone)]
pub struct QualityGate {
    quality: QualityConfig,
    safety: SafetyConfig,
}

impl QualityGate {
    pub fn new(quality: QualityConfig, safety: SafetyConfig) -> Self {
        Self { quality, safety }
    }

    pub fn quality(&self) -> &QualityConfig {
        &self.quality
    }

    pub async fn evaluate(
        &self,
        c: &Candidate,
        source: &Source,
        ctx: &GateContext<'_>,
    ) -> Verdict {
        // (a) dedup
        let dup = ctx.seen_this_run.contains(&c.fingerprint)
            || ctx
                .dedup
                .lock()
                .expect("dedup mutex poisoned")
                .seen(&c.fingerprint, ctx.now);
        if dup {
            return Verdict::reject(RejectReason::Duplicate, 0.0, Vec::new());
        }

        // (b) minimum length
        if c.body_chars() < self.quality.min_content_length {
            return Verdict::reject(RejectReason::TooShort, 0.0, Vec::new());
        }

        // (c) safety: heuristics, then classifier
        let sc = screen(&c.title, &c.body, &self.safety);
        if let Some(term) = sc.blocked {
            tracing::debug!(target: "ingest", url = %c.url, term = %term, "blocked term");
            return Verdict::reject(RejectReason::Unsafe, 0.0, vec![format!("blocked:{term}")]);
        }
        let mut flags = sc.flags;
        let mut enrichment = None;
        let mut degraded = false;
        if let Some(enricher) = ctx.enricher {
            let out = if self.safety.use_classifier {
                enricher.enrich(c, ctx.now).await
            } else {
                crate::ingest::enrich::EnrichOutcome {
                    enrichment: enricher.synthesize(c),
                    remote: false,
                    degraded: false,
                }
            };
            degraded = out.degraded;
            for f in &out.enrichment.safety_flags {
                if !flags.contains(f) {
                    flags.push(f.clone());
                }
            }
            if out.enrichment.unsafe_content {
                let mut v = Verdict::reject(RejectReason::Unsafe, 0.0, flags);
                v.degraded = degraded;
                return v;
            }
            enrichment = Some(out.enrichment);
        }

        // (d) quality
        let q = &self.quality;
        let inputs = ScoreInputs::new(
            scoring::priority_score(source.priority, &q.priority_scores),
            scoring::length_score(c.body_chars(), q.length_target),
            scoring::keyword_score(
                &format!("{} {}", c.title, c.body),
                &source.keywords,
                source.filters.region.as_deref(),
            ),
            scoring::balance_score(source.category, ctx.mix, &q.category_targets),
        );
        let score = quality_score(&inputs, &q.weights, flags.len(), q.flag_penalty);
        if score < q.threshold {
            let mut v = Verdict::reject(RejectReason::LowQuality, score, flags);
            v.degraded = degraded;
            return v;
        }

        Verdict {
            accept: true,
            quality_score: score,
            safety_flags: flags,
            rejection: None,
            enrichment,
            degraded,
        }
    }
}
