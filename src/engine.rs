//! # Run Engine
//! One ingestion pass over the enabled sources.
//!
//! Fetches run concurrently through an order-preserving bounded stream, so
//! results arrive in priority order. Dedup updates and draft writes happen in
//! the single consumer loop below; two sources returning the same fingerprint
//! can never both produce a draft.
//!
//! Progress is written into a shared [`RunRecord`] as the run goes, so a
//! watchdog that abandons the future still sees partial counts.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::stream::{self, StreamExt};
use metrics::{counter, gauge};

use crate::analyze::{CategoryMix, GateContext, QualityGate};
use crate::dedup::DedupCache;
use crate::draft::Draft;
use crate::error::{RejectReason, Result, SentinelError};
use crate::history::RunRecord;
use crate::ingest::enrich::Enricher;
use crate::ingest::providers::FetcherSet;
use crate::ingest::types::Candidate;
use crate::sources::{HealthSample, Source, SourceRegistry};
use crate::store::DraftStore;
use crate::telemetry::LogRing;

/// Per-run knobs taken from the scheduler state when the run starts.
#[derive(Debug, Clone, Copy)]
pub struct RunParams {
    pub max_per_run: usize,
    pub auto_persist: bool,
}

/// Everything a run touches. Cheap to share behind the facade.
pub struct Pipeline {
    pub registry: Arc<SourceRegistry>,
    pub fetchers: FetcherSet,
    pub gate: QualityGate,
    pub enricher: Option<Arc<Enricher>>,
    pub dedup: Arc<Mutex<DedupCache>>,
    pub store: Arc<dyn DraftStore>,
    pub logs: Arc<LogRing>,
    pub default_language: String,
    pub fetch_timeout: Duration,
    pub fetch_concurrency: usize,
}

type FetchOutcome = (Result<Vec<Candidate>>, Duration);

fn update<R>(progress: &Mutex<RunRecord>, f: impl FnOnce(&mut RunRecord) -> R) -> R {
    let mut g = progress.lock().expect("run record mutex poisoned");
    f(&mut g)
}

impl Pipeline {
    /// Fetch one source with the configured timeout. A timeout is a fetch failure.
    pub async fn fetch_source(&self, source: &Source) -> FetchOutcome {
        let started = Instant::now();
        let fetcher = self.fetchers.for_kind(source.kind);
        let res = match tokio::time::timeout(self.fetch_timeout, fetcher.fetch(source)).await {
            Ok(r) => r,
            Err(_) => Err(SentinelError::fetch(
                &source.id,
                format!("timed out after {} ms", self.fetch_timeout.as_millis()),
            )),
        };
        (res, started.elapsed())
    }

    fn record_health(&self, source: &Source, outcome: &FetchOutcome) {
        let now = Utc::now();
        let latency = outcome.1.as_millis() as u64;
        let sample = match &outcome.0 {
            Ok(_) => HealthSample::ok(latency, now),
            Err(e) => HealthSample::failed(latency, e.to_string(), now),
        };
        // A source replaced mid-run has no entry left to update.
        if let Err(e) = self.registry.record_health(&source.id, sample) {
            tracing::debug!(target: "ingest", source = %source.id, error = %e, "health not recorded");
        }
    }

    pub fn remember(&self, fp: &str) {
        let mut d = self.dedup.lock().expect("dedup mutex poisoned");
        d.remember(fp, Utc::now());
        gauge!("sentinel_dedup_cache_size").set(d.len() as f64);
    }

    /// Run every enabled source through fetch → gate → store.
    ///
    /// Never fails as a whole: per-source and per-candidate errors land in
    /// `progress.errors` and the log ring.
    pub async fn execute(&self, params: RunParams, progress: &Mutex<RunRecord>, cancel: &AtomicBool) {
        let sources = self.registry.enabled_by_priority();
        self.logs.info(
            "run",
            format!("scanning {} sources (max_per_run {})", sources.len(), params.max_per_run),
        );

        let mut fetches = stream::iter(sources.into_iter().map(|source| async move {
            // Checked on first poll: sources not yet started are skipped after stop().
            if cancel.load(Ordering::SeqCst) {
                return (source, None);
            }
            let outcome = self.fetch_source(&source).await;
            (source, Some(outcome))
        }))
        .buffered(self.fetch_concurrency.max(1));

        let mut seen_this_run: HashSet<String> = HashSet::new();
        let mut mix = CategoryMix::default();
        let mut capped = 0usize;

        while let Some((source, outcome)) = fetches.next().await {
            let Some(outcome) = outcome else {
                update(progress, |r| r.cancelled = true);
                continue;
            };
            self.record_health(&source, &outcome);
            update(progress, |r| r.sources_scanned += 1);

            let candidates = match outcome.0 {
                Ok(c) => c,
                Err(e) => {
                    counter!("sentinel_source_errors_total").increment(1);
                    tracing::warn!(target: "ingest", source = %source.id, error = %e, "source failed");
                    self.logs.warn("run", format!("source {} failed: {e}", source.id));
                    update(progress, |r| r.push_error(&source.id, e.kind(), e.to_string()));
                    continue;
                }
            };
            counter!("sentinel_candidates_total").increment(candidates.len() as u64);
            update(progress, |r| r.candidates_fetched += candidates.len());

            // In-flight fetches finish, but their candidates are not evaluated.
            if cancel.load(Ordering::SeqCst) {
                update(progress, |r| r.cancelled = true);
                continue;
            }

            for c in candidates {
                let filled = update(progress, |r| {
                    if params.auto_persist {
                        r.drafts_created
                    } else {
                        r.accepted
                    }
                });
                if filled >= params.max_per_run {
                    capped += 1;
                    continue;
                }
                self.evaluate_one(&c, &source, params, progress, &mut seen_this_run, &mut mix)
                    .await;
            }
        }

        if capped > 0 {
            self.logs.info(
                "run",
                format!("max_per_run reached; {capped} candidates left unevaluated"),
            );
        }
        gauge!("sentinel_dedup_cache_size")
            .set(self.dedup.lock().expect("dedup mutex poisoned").len() as f64);
    }

    async fn evaluate_one(
        &self,
        c: &Candidate,
        source: &Source,
        params: RunParams,
        progress: &Mutex<RunRecord>,
        seen_this_run: &mut HashSet<String>,
        mix: &mut CategoryMix,
    ) {
        let verdict = {
            let ctx = GateContext {
                now: Utc::now(),
                dedup: &self.dedup,
                seen_this_run: &*seen_this_run,
                mix: &*mix,
                enricher: self.enricher.as_deref(),
            };
            self.gate.evaluate(c, source, &ctx).await
        };
        if verdict.degraded {
            update(progress, |r| r.degraded = true);
        }

        match verdict.rejection {
            Some(RejectReason::Duplicate) => {
                counter!("sentinel_duplicates_total").increment(1);
                update(progress, |r| r.duplicates_skipped += 1);
                // Re-observing slides the retention window.
                if params.auto_persist {
                    self.remember(&c.fingerprint);
                }
                return;
            }
            Some(reason) => {
                counter!("sentinel_rejected_total", "reason" => reason.to_string()).increment(1);
                tracing::debug!(target: "ingest", url = %c.url, reason = %reason, score = verdict.quality_score, "candidate rejected");
                update(progress, |r| r.rejected += 1);
                seen_this_run.insert(c.fingerprint.clone());
                if params.auto_persist {
                    self.remember(&c.fingerprint);
                }
                return;
            }
            None => {}
        }

        seen_this_run.insert(c.fingerprint.clone());
        if !params.auto_persist {
            mix.record(source.category);
            update(progress, |r| r.accepted += 1);
            return;
        }

        let draft = Draft::from_candidate(c, source.category, &verdict, &self.default_language, Utc::now());
        match self.store.insert_draft(draft).await {
            Ok(d) => {
                self.remember(&c.fingerprint);
                mix.record(source.category);
                counter!("sentinel_drafts_created_total").increment(1);
                update(progress, |r| {
                    r.accepted += 1;
                    r.drafts_created += 1;
                });
                tracing::info!(target: "ingest", source = %source.id, slug = %d.slug, score = d.quality_score, "draft created");
                self.logs.info("run", format!("draft '{}' from {}", d.slug, source.id));
            }
            // Stored earlier and since evicted from the dedup window.
            Err(SentinelError::Duplicate(msg)) => {
                self.remember(&c.fingerprint);
                counter!("sentinel_duplicates_total").increment(1);
                update(progress, |r| r.duplicates_skipped += 1);
                tracing::debug!(target: "ingest", source = %source.id, url = %c.url, reason = %msg, "already stored");
            }
            Err(e) => {
                mix.record(source.category);
                tracing::warn!(target: "ingest", source = %source.id, error = %e, "draft not persisted");
                self.logs.error("run", format!("draft from {} not persisted: {e}", source.id));
                update(progress, |r| {
                    r.accepted += 1;
                    r.push_error(&source.id, e.kind(), e.to_string());
                });
            }
        }
    }
}
