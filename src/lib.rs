// src/lib.rs
// Library surface shared by the binary and the integration tests.

pub mod analyze;
pub mod api;
pub mod config;
pub mod dedup;
pub mod draft;
pub mod engine;
pub mod error;
pub mod history;
pub mod ingest;
pub mod metrics;
pub mod notify;
pub mod publish;
pub mod rate_limit;
pub mod sentinel;
pub mod sources;
pub mod store;
pub mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::task::JoinHandle;

pub use crate::api::router;
pub use crate::config::SentinelConfig;
pub use crate::error::{Result, SentinelError};
pub use crate::sentinel::{ImportOptions, ImportOutcome, Sentinel, SentinelDeps};

/// Build a production [`Sentinel`] from config: HTTP fetchers, the configured
/// store, enrichment provider and notification channels.
pub fn build_sentinel(cfg: SentinelConfig) -> anyhow::Result<Arc<Sentinel>> {
    let deps = SentinelDeps::from_config(&cfg).context("building sentinel collaborators")?;
    let sentinel = Sentinel::new(cfg, deps).context("seeding source registry")?;
    Ok(Arc::new(sentinel))
}

/// Spawn the scheduler tick loop and, when enabled, the auto-publish loop.
pub fn spawn_background(sentinel: Arc<Sentinel>, tick: Duration) -> Vec<JoinHandle<()>> {
    let mut handles = vec![ingest::scheduler::spawn_scheduler(sentinel.clone(), tick)];
    if let Some(every) = sentinel.auto_publish_interval() {
        handles.push(ingest::scheduler::spawn_auto_publish(sentinel, every));
    }
    handles
}
