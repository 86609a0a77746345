//! Sentinel pipeline: binary entrypoint.
//! Loads config, boots the background loops, and serves the control router.

use std::time::Duration;

use anyhow::Context;
use sentinel_pipeline::metrics::Metrics;
use sentinel_pipeline::{build_sentinel, router, spawn_background, SentinelConfig};
use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Compact logs by default; JSON lines when SENTINEL_LOG_JSON=1.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("sentinel=info,ingest=info,publish=info,notify=info,warn"));
    let json = std::env::var("SENTINEL_LOG_JSON").is_ok_and(|v| v == "1");

    // The runtime may already have installed a subscriber.
    let res = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .try_init()
    };
    if res.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = SentinelConfig::load_default().context("loading sentinel config")?;
    let tick = Duration::from_millis(cfg.tick_ms);
    tracing::info!(
        target: "sentinel",
        enabled = cfg.enabled,
        sources = cfg.sources.len(),
        frequency_ms = cfg.frequency_ms,
        "config loaded"
    );

    let sentinel = build_sentinel(cfg)?;
    let _loops = spawn_background(sentinel.clone(), tick);

    let app = match Metrics::init() {
        Ok(m) => router(sentinel).merge(m.router()),
        Err(e) => {
            tracing::warn!(error = ?e, "prometheus recorder not installed; /metrics disabled");
            router(sentinel)
        }
    };

    Ok(app.into())
}
