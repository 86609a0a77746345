// tests/common/mod.rs
//
// Shared builders for integration tests: a scripted fetcher, candidate and
// source constructors, and an in-memory Sentinel.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;

use sentinel_pipeline::analyze::ai_adapter::DynEnrichmentClient;
use sentinel_pipeline::config::SentinelConfig;
use sentinel_pipeline::dedup::fingerprint;
use sentinel_pipeline::ingest::providers::FetcherSet;
use sentinel_pipeline::ingest::types::{Candidate, SourceFetcher};
use sentinel_pipeline::notify::NotifyQueue;
use sentinel_pipeline::sources::{Category, Priority, Source, SourceKind};
use sentinel_pipeline::store::MemoryStore;
use sentinel_pipeline::telemetry::LogRing;
use sentinel_pipeline::{Sentinel, SentinelDeps, SentinelError};

/// Answers per source id; unknown ids fail like a refused connection.
#[derive(Default)]
pub struct ScriptedFetcher {
    answers: Mutex<HashMap<String, Vec<Candidate>>>,
    delays: Mutex<HashMap<String, Duration>>,
    calls: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer(self, source_id: &str, candidates: Vec<Candidate>) -> Self {
        self.answers
            .lock()
            .unwrap()
            .insert(source_id.to_string(), candidates);
        self
    }

    pub fn delay(self, source_id: &str, d: Duration) -> Self {
        self.delays.lock().unwrap().insert(source_id.to_string(), d);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl SourceFetcher for ScriptedFetcher {
    async fn fetch(&self, source: &Source) -> sentinel_pipeline::Result<Vec<Candidate>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.delays.lock().unwrap().get(&source.id).copied();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        let answer = self.answers.lock().unwrap().get(&source.id).cloned();
        answer.ok_or_else(|| SentinelError::fetch(&source.id, "connection refused"))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

pub const BODY: &str = "The regional council met on Tuesday to review the annual budget for schools, \
roads and public transport. Members debated the allocation for rural clinics and agreed to \
publish the final figures next week. Residents attending the session asked about water supply \
projects, and the council promised a public hearing before the end of the month. ";

/// A candidate whose fingerprint is derived from `key`, so equal keys collide.
pub fn candidate(source_id: &str, key: &str) -> Candidate {
    let title = format!("Council budget update {key}");
    let body = BODY.repeat(3);
    Candidate {
        source_id: source_id.to_string(),
        url: format!("https://news.example.org/{key}"),
        fingerprint: fingerprint(&title, &body, 500),
        title,
        body,
        fetched_at: Utc::now(),
        published_at: None,
        language: Some("en".to_string()),
    }
}

pub fn source(id: &str, priority: Priority) -> Source {
    Source::new(
        id,
        format!("Source {id}"),
        format!("https://{id}.example.org/feed"),
        SourceKind::Rss,
        Category::Local,
        priority,
    )
}

/// Config tuned for tests: everything passes the score, no cooldown, no delays.
pub fn test_config(sources: Vec<Source>) -> SentinelConfig {
    let mut cfg = SentinelConfig {
        enabled: true,
        cooldown_ms: 0,
        max_per_run: 10,
        fetch_timeout_ms: 2_000,
        run_timeout_ms: 10_000,
        fetch_concurrency: 2,
        sources,
        ..Default::default()
    };
    cfg.quality.threshold = 0.0;
    cfg.auto_publish.delay_between_ms = 0;
    cfg
}

pub struct Harness {
    pub sentinel: Arc<Sentinel>,
    pub store: Arc<MemoryStore>,
    pub fetcher: Arc<ScriptedFetcher>,
    pub logs: Arc<LogRing>,
}

pub fn harness(cfg: SentinelConfig, fetcher: ScriptedFetcher) -> Harness {
    harness_with(cfg, fetcher, None, None)
}

pub fn harness_with(
    cfg: SentinelConfig,
    fetcher: ScriptedFetcher,
    enrichment: Option<DynEnrichmentClient>,
    notify: Option<NotifyQueue>,
) -> Harness {
    let fetcher = Arc::new(fetcher);
    let store = Arc::new(MemoryStore::new());
    let logs = Arc::new(LogRing::new(cfg.telemetry.log_capacity));
    let mut deps = SentinelDeps::in_memory(FetcherSet::uniform(fetcher.clone()), 10);
    deps.store = store.clone();
    deps.logs = logs.clone();
    deps.notify = notify;
    if let Some(c) = enrichment {
        deps.enrichment = c;
    }
    let sentinel = Arc::new(Sentinel::new(cfg, deps).expect("valid test sources"));
    Harness {
        sentinel,
        store,
        fetcher,
        logs,
    }
}

/// Poll until the scheduler reports an active run.
pub async fn wait_until_running(s: &Sentinel) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !s.snapshot().running {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("run never started");
}
