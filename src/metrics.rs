use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("sentinel_runs_total", "Ingestion runs finished, by trigger.");
        describe_counter!(
            "sentinel_candidates_total",
            "Candidates fetched and normalized across all sources."
        );
        describe_counter!(
            "sentinel_duplicates_total",
            "Candidates dropped as already-seen fingerprints."
        );
        describe_counter!(
            "sentinel_rejected_total",
            "Candidates rejected by the quality gate, by reason."
        );
        describe_counter!("sentinel_drafts_created_total", "Drafts written to the store.");
        describe_counter!(
            "sentinel_source_errors_total",
            "Source fetch/parse failures."
        );
        describe_counter!(
            "sentinel_enrichment_calls_total",
            "Remote enrichment calls, by outcome."
        );
        describe_counter!(
            "sentinel_enrichment_skipped_total",
            "Enrichment calls skipped by the rate limiter."
        );
        describe_counter!("sentinel_published_total", "Drafts promoted by auto-publish.");
        describe_counter!(
            "sentinel_notifications_total",
            "Notification deliveries, by channel and outcome."
        );
        describe_histogram!("sentinel_feed_parse_ms", "Feed parse time in milliseconds.");
        describe_counter!("sentinel_feed_items_total", "Items parsed from feeds.");
        describe_histogram!("sentinel_run_ms", "Ingestion run wall time in milliseconds.");
        describe_gauge!("sentinel_dedup_cache_size", "Fingerprints held by the dedup cache.");
        describe_gauge!(
            "sentinel_last_run_ts",
            "Unix ts when the last ingestion run finished."
        );
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder. Fails if a recorder is already installed.
    pub fn init() -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| anyhow::anyhow!("prometheus: install recorder: {e}"))?;
        ensure_metrics_described();
        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
