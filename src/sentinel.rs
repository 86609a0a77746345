//! # Sentinel
//! The facade the admin surface talks to: configuration reads and
//! mutations, run triggers, ad-hoc imports, auto-publish, and telemetry.
//!
//! At most one ingestion run (or import) is active process-wide. The
//! scheduler mutex is held only while a transition is applied; the run
//! itself executes outside it under a [`RunGuard`] and the watchdog.

use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};

use crate::analyze::ai_adapter::{build_client_from_config, DisabledClient, DynEnrichmentClient};
use crate::analyze::{CategoryMix, GateContext, QualityGate, Verdict};
use crate::config::SentinelConfig;
use crate::dedup::DedupCache;
use crate::draft::Draft;
use crate::engine::{Pipeline, RunParams};
use crate::error::{Result, SentinelError};
use crate::history::{RunHistory, RunRecord, RunTrigger};
use crate::ingest::enrich::Enricher;
use crate::ingest::providers::{build_http_client, FetcherSet};
use crate::ingest::scheduler::{RunGuard, RuntimeSnapshot, SchedulerState};
use crate::ingest::types::Candidate;
use crate::ingest::NormalizeOptions;
use crate::notify::{NotifierMux, NotifyQueue};
use crate::publish::{AutoPublisher, PublishReport};
use crate::rate_limit::RateLimiter;
use crate::sources::{Category, Priority, Source, SourceKind, SourceRegistry};
use crate::store::{DraftStore, JsonFileStore, MemoryStore};
use crate::telemetry::{LogLine, LogRing, MetricsSnapshot};

/// Source id stamped on candidates pulled in by [`Sentinel::import_url`].
pub const IMPORT_SOURCE_ID: &str = "manual-import";

/// Collaborators injected into [`Sentinel::new`].
pub struct SentinelDeps {
    pub store: Arc<dyn DraftStore>,
    pub fetchers: FetcherSet,
    pub enrichment: DynEnrichmentClient,
    pub notify: Option<NotifyQueue>,
    pub logs: Arc<LogRing>,
}

impl SentinelDeps {
    /// In-memory store, no enrichment, no notifications.
    pub fn in_memory(fetchers: FetcherSet, log_capacity: usize) -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            fetchers,
            enrichment: Arc::new(DisabledClient),
            notify: None,
            logs: Arc::new(LogRing::new(log_capacity)),
        }
    }

    /// HTTP fetchers, configured store, enrichment provider and notification
    /// channels. Spawns the notification worker when any channel is configured.
    pub fn from_config(cfg: &SentinelConfig) -> anyhow::Result<Self> {
        let client = build_http_client(&cfg.user_agent, Duration::from_millis(cfg.fetch_timeout_ms))?;
        let opts = NormalizeOptions {
            fingerprint_body_chars: cfg.dedup.fingerprint_body_chars,
            max_items_per_source: cfg.max_items_per_source,
        };
        let store: Arc<dyn DraftStore> = match &cfg.store_path {
            Some(p) => Arc::new(JsonFileStore::open(p, cfg.telemetry.history_capacity)?),
            None => Arc::new(MemoryStore::new()),
        };
        let logs = Arc::new(LogRing::new(cfg.telemetry.log_capacity));

        let mux = NotifierMux::from_config(&cfg.notify);
        let notify = if mux.is_empty() {
            None
        } else {
            tracing::info!(target: "notify", channels = ?mux.channels(), "notification channels ready");
            let (q, _worker) = NotifyQueue::spawn(mux, &cfg.notify, logs.clone());
            Some(q)
        };

        Ok(Self {
            store,
            fetchers: FetcherSet::http(client, opts, cfg.follow_links),
            enrichment: build_client_from_config(&cfg.enrichment),
            notify,
            logs,
        })
    }
}

/// Body of an import request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ImportOptions {
    /// false: preview only, nothing is written or remembered.
    pub persist: bool,
    pub category: Option<Category>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportOutcome {
    pub candidate: Candidate,
    pub verdict: Verdict,
    pub draft: Option<Draft>,
}

pub struct Sentinel {
    cfg: SentinelConfig,
    state: Arc<Mutex<SchedulerState>>,
    registry: Arc<SourceRegistry>,
    pipeline: Pipeline,
    publisher: AutoPublisher,
    limiter: Arc<RateLimiter>,
    history: RunHistory,
    logs: Arc<LogRing>,
    run_timeout: Duration,
    started_at: DateTime<Utc>,
}

impl Sentinel {
    /// Fails only when the configured sources do not validate.
    pub fn new(cfg: SentinelConfig, deps: SentinelDeps) -> Result<Self> {
        let now = Utc::now();
        let registry = Arc::new(SourceRegistry::with_sources(
            cfg.health_ewma_alpha,
            cfg.sources.clone(),
        )?);
        let limiter = Arc::new(RateLimiter::new(cfg.rate_limit.clone()));
        let enricher = Enricher::new(
            deps.enrichment,
            limiter.clone(),
            &cfg.enrichment,
            cfg.languages.clone(),
        );
        let pipeline = Pipeline {
            registry: registry.clone(),
            fetchers: deps.fetchers,
            gate: QualityGate::new(cfg.quality.clone(), cfg.safety.clone()),
            enricher: Some(Arc::new(enricher)),
            dedup: Arc::new(Mutex::new(DedupCache::with_hours(
                cfg.dedup.retention_hours,
                cfg.dedup.capacity,
            ))),
            store: deps.store.clone(),
            logs: deps.logs.clone(),
            default_language: cfg.default_language.clone(),
            fetch_timeout: Duration::from_millis(cfg.fetch_timeout_ms.max(1)),
            fetch_concurrency: cfg.fetch_concurrency.max(1),
        };
        let publisher = AutoPublisher::new(
            deps.store,
            cfg.auto_publish.clone(),
            deps.notify,
            cfg.notify.site_base_url.clone(),
            deps.logs.clone(),
        );

        Ok(Self {
            state: Arc::new(Mutex::new(SchedulerState::from_config(&cfg, now))),
            history: RunHistory::with_capacity(cfg.telemetry.history_capacity),
            run_timeout: Duration::from_millis(cfg.run_timeout_ms.max(1)),
            cfg,
            registry,
            pipeline,
            publisher,
            limiter,
            logs: deps.logs,
            started_at: now,
        })
    }

    fn state(&self) -> std::sync::MutexGuard<'_, SchedulerState> {
        self.state.lock().expect("scheduler mutex poisoned")
    }

    /// Current configuration, including runtime mutations and the live source list.
    pub fn config(&self) -> SentinelConfig {
        let mut cfg = self.cfg.clone();
        {
            let st = self.state();
            cfg.enabled = st.enabled;
            cfg.auto_persist = st.auto_persist;
            cfg.frequency_ms = st.frequency_ms;
            cfg.max_per_run = st.max_per_run;
        }
        cfg.sources = self.registry.all();
        cfg
    }

    pub fn snapshot(&self) -> RuntimeSnapshot {
        let sources = self.registry.len();
        self.state().snapshot(Utc::now(), sources)
    }

    pub fn set_enabled(&self, on: bool) {
        self.state().set_enabled(on, Utc::now());
        self.logs
            .info("sentinel", if on { "scheduler enabled" } else { "scheduler disabled" });
    }

    pub fn start(&self) {
        self.set_enabled(true);
    }

    /// Disable scheduling and ask an active run to wind down after its
    /// in-flight fetches.
    pub fn stop(&self) {
        let running = self.state().stop(Utc::now());
        if running {
            self.logs.warn("sentinel", "stop requested; cancelling active run");
        } else {
            self.logs.info("sentinel", "scheduler stopped");
        }
        tracing::info!(target: "sentinel", running, "stop");
    }

    pub fn set_auto_persist(&self, on: bool) {
        self.state().auto_persist = on;
        self.logs.info("sentinel", format!("auto_persist set to {on}"));
    }

    pub fn set_frequency_ms(&self, ms: u64) -> Result<()> {
        self.state().set_frequency_ms(ms)?;
        self.logs.info("sentinel", format!("frequency set to {ms} ms"));
        Ok(())
    }

    /// All-or-nothing: an invalid entry leaves the current list untouched.
    pub fn replace_sources(&self, sources: Vec<Source>) -> Result<Vec<Source>> {
        let saved = self.registry.replace_all(sources)?;
        self.logs.info("sentinel", format!("sources replaced ({} entries)", saved.len()));
        for w in self.registry.hygiene_warnings() {
            self.logs.warn("sentinel", w);
        }
        Ok(saved)
    }

    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn store(&self) -> &Arc<dyn DraftStore> {
        &self.pipeline.store
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.state().is_due(now)
    }

    pub fn evict_dedup(&self, now: DateTime<Utc>) -> usize {
        self.pipeline
            .dedup
            .lock()
            .expect("dedup mutex poisoned")
            .evict(now)
    }

    pub fn dedup_len(&self) -> usize {
        self.pipeline.dedup.lock().expect("dedup mutex poisoned").len()
    }

    /// Manual run. `Busy` while running, `Cooldown` inside the cooldown window.
    pub async fn run_once(&self) -> Result<RunRecord> {
        self.run(RunTrigger::Manual).await
    }

    /// Manual run that ignores the cooldown window. Still `Busy` while running.
    pub async fn force_run(&self) -> Result<RunRecord> {
        self.run(RunTrigger::Forced).await
    }

    /// Timer-driven run; used by the background scheduler.
    pub async fn run_scheduled(&self) -> Result<RunRecord> {
        self.run(RunTrigger::Scheduled).await
    }

    async fn run(&self, trigger: RunTrigger) -> Result<RunRecord> {
        let started = Utc::now();
        let (params, cancel) = {
            let mut st = self.state();
            st.begin(trigger, started)?;
            let params = RunParams {
                max_per_run: st.max_per_run,
                auto_persist: st.auto_persist,
            };
            (params, st.cancel_token())
        };
        let _guard = RunGuard::new(self.state.clone());
        self.logs.info("run", format!("{trigger:?} run started"));
        tracing::info!(target: "sentinel", ?trigger, "run started");

        let progress = Mutex::new(RunRecord::start(trigger, started));
        let timed_out = tokio::time::timeout(
            self.run_timeout,
            self.pipeline.execute(params, &progress, &cancel),
        )
        .await
        .is_err();

        let finished = Utc::now();
        let mut record = progress
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        record.finished_at = Some(finished);
        record.timed_out = timed_out;
        record.cancelled = record.cancelled || cancel.load(Ordering::SeqCst);
        if timed_out {
            let msg = format!("run exceeded {} ms and was closed", self.run_timeout.as_millis());
            record.push_error("", "timeout", msg.clone());
            self.logs.error("run", msg);
            tracing::warn!(target: "sentinel", run = %record.id, "run watchdog fired");
        }

        self.finish_run(&record).await;
        self.state().finish(&record, finished);
        Ok(record)
    }

    async fn finish_run(&self, record: &RunRecord) {
        if let Err(e) = self.pipeline.store.save_run(record).await {
            tracing::warn!(target: "sentinel", error = %e, "run record not persisted");
            self.logs.error("run", format!("run record not persisted: {e}"));
        }
        self.history.push(record.clone());

        let trigger = match record.trigger {
            RunTrigger::Scheduled => "scheduled",
            RunTrigger::Manual => "manual",
            RunTrigger::Forced => "forced",
        };
        counter!("sentinel_runs_total", "trigger" => trigger).increment(1);
        if let Some(ms) = record.duration_ms() {
            histogram!("sentinel_run_ms").record(ms as f64);
        }
        self.logs.info(
            "run",
            format!(
                "run finished: scanned {}, fetched {}, duplicates {}, rejected {}, created {}, errors {}{}{}",
                record.sources_scanned,
                record.candidates_fetched,
                record.duplicates_skipped,
                record.rejected,
                record.drafts_created,
                record.errors.len(),
                if record.cancelled { ", cancelled" } else { "" },
                if record.degraded { ", degraded" } else { "" },
            ),
        );
    }

    /// Fetch and evaluate one URL outside the source rotation.
    ///
    /// `persist=false` returns the candidate and verdict and touches nothing.
    /// `persist=true` returns exactly one draft, or an error.
    pub async fn import_url(&self, url: &str, opts: ImportOptions) -> Result<ImportOutcome> {
        let parsed = url::Url::parse(url.trim())
            .map_err(|e| SentinelError::validation(format!("invalid url '{url}': {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(SentinelError::validation("import url must be http(s)"));
        }

        self.state().begin_import(Utc::now())?;
        let _guard = RunGuard::new(self.state.clone());

        let source = Source::new(
            IMPORT_SOURCE_ID,
            "Manual import",
            parsed.as_str(),
            SourceKind::Manual,
            opts.category.unwrap_or(Category::Local),
            Priority::Medium,
        );
        let (res, _) = self.pipeline.fetch_source(&source).await;
        let candidate = match res {
            Ok(c) => c.into_iter().next().ok_or_else(|| {
                SentinelError::fetch(IMPORT_SOURCE_ID, format!("no content at {parsed}"))
            }),
            Err(e) => Err(e),
        };
        let candidate = candidate.inspect_err(|e| {
            self.logs.warn("import", format!("import of {parsed} failed: {e}"));
        })?;

        let verdict = {
            let seen = HashSet::new();
            let mix = CategoryMix::default();
            let ctx = GateContext {
                now: Utc::now(),
                dedup: &self.pipeline.dedup,
                seen_this_run: &seen,
                mix: &mix,
                enricher: self.pipeline.enricher.as_deref(),
            };
            self.pipeline.gate.evaluate(&candidate, &source, &ctx).await
        };

        if !opts.persist {
            self.logs.info(
                "import",
                format!("preview of {parsed}: accept={} score={:.2}", verdict.accept, verdict.quality_score),
            );
            return Ok(ImportOutcome {
                candidate,
                verdict,
                draft: None,
            });
        }

        if let Some(reason) = verdict.rejection {
            self.logs.warn("import", format!("import of {parsed} rejected: {reason}"));
            return Err(SentinelError::Rejected(reason));
        }
        let draft = Draft::from_candidate(
            &candidate,
            source.category,
            &verdict,
            &self.cfg.default_language,
            Utc::now(),
        );
        let draft = self.pipeline.store.insert_draft(draft).await?;
        self.pipeline.remember(&candidate.fingerprint);
        counter!("sentinel_drafts_created_total").increment(1);
        self.logs.info("import", format!("imported '{}' from {parsed}", draft.slug));
        tracing::info!(target: "sentinel", slug = %draft.slug, url = %parsed, "url imported");

        Ok(ImportOutcome {
            candidate,
            verdict,
            draft: Some(draft),
        })
    }

    /// One auto-publish pass. `Busy` if a pass is already running.
    pub async fn auto_publish_sentinel_drafts(&self) -> Result<PublishReport> {
        self.publisher.run().await
    }

    pub fn auto_publish_interval(&self) -> Option<Duration> {
        let c = self.publisher.config();
        c.enabled.then(|| Duration::from_millis(c.interval_ms.max(1_000)))
    }

    pub fn recent_logs(&self, limit: usize) -> Vec<LogLine> {
        self.logs.recent(limit)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        MetricsSnapshot::derive(
            &self.history.all(),
            self.started_at,
            Utc::now(),
            self.registry.len(),
            self.dedup_len(),
            self.registry.hygiene_warnings(),
        )
    }

    /// Most recent runs, newest last.
    pub fn run_history(&self, limit: usize) -> Vec<RunRecord> {
        self.history.snapshot_last_n(limit)
    }
}
