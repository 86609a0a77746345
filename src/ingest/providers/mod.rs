//! Source fetchers, one per [`SourceKind`].
//!
//! [`FetcherSet`] maps the kind tag to its implementation so the run loop
//! never branches on source type itself.

pub mod api;
pub mod article;
pub mod rss;
pub mod scraper;

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;

use crate::error::{Result, SentinelError};
use crate::ingest::types::SourceFetcher;
use crate::ingest::NormalizeOptions;
use crate::sources::SourceKind;

pub use api::ApiFetcher;
pub use article::ArticleFetcher;
pub use rss::RssFetcher;
pub use scraper::ScraperFetcher;

#[derive(Clone)]
pub struct FetcherSet {
    rss: Arc<dyn SourceFetcher>,
    api: Arc<dyn SourceFetcher>,
    scraper: Arc<dyn SourceFetcher>,
    manual: Arc<dyn SourceFetcher>,
}

impl FetcherSet {
    /// Production set backed by one shared reqwest client.
    pub fn http(client: reqwest::Client, opts: NormalizeOptions, follow_links: bool) -> Self {
        let article = ArticleFetcher::new(client.clone(), opts);
        Self {
            rss: Arc::new(RssFetcher::new(client.clone(), opts)),
            api: Arc::new(ApiFetcher::new(client.clone(), opts)),
            scraper: Arc::new(ScraperFetcher::new(client, opts, follow_links)),
            manual: Arc::new(article),
        }
    }

    /// Same fetcher for every kind (tests, fixtures).
    pub fn uniform(fetcher: Arc<dyn SourceFetcher>) -> Self {
        Self {
            rss: fetcher.clone(),
            api: fetcher.clone(),
            scraper: fetcher.clone(),
            manual: fetcher,
        }
    }

    pub fn with(mut self, kind: SourceKind, fetcher: Arc<dyn SourceFetcher>) -> Self {
        match kind {
            SourceKind::Rss => self.rss = fetcher,
            SourceKind::Api => self.api = fetcher,
            SourceKind::Scraper => self.scraper = fetcher,
            SourceKind::Manual => self.manual = fetcher,
        }
        self
    }

    pub fn for_kind(&self, kind: SourceKind) -> &Arc<dyn SourceFetcher> {
        match kind {
            SourceKind::Rss => &self.rss,
            SourceKind::Api => &self.api,
            SourceKind::Scraper => &self.scraper,
            SourceKind::Manual => &self.manual,
        }
    }
}

/// Shared reqwest client for source fetches.
pub fn build_http_client(user_agent: &str, timeout: Duration) -> anyhow::Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(user_agent)
        .connect_timeout(Duration::from_secs(5).min(timeout))
        .timeout(timeout)
        .build()?;
    Ok(client)
}

/// GET `url` and return the body text plus `Content-Language`, if any.
pub(crate) async fn get_text(
    client: &reqwest::Client,
    source_id: &str,
    url: &str,
) -> Result<(String, Option<String>)> {
    let resp = match client.get(url).send().await {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(target: "ingest", error = ?e, source = source_id, "source http error");
            counter!("sentinel_source_errors_total").increment(1);
            return Err(SentinelError::fetch(source_id, format!("GET {url}: {e}")));
        }
    };
    let resp = resp
        .error_for_status()
        .map_err(|e| SentinelError::fetch(source_id, format!("GET {url}: {e}")))?;
    let lang = resp
        .headers()
        .get(reqwest::header::CONTENT_LANGUAGE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.split(',').next().unwrap_or(s).trim().to_string());
    let body = resp
        .text()
        .await
        .map_err(|e| SentinelError::fetch(source_id, format!("reading body of {url}: {e}")))?;
    Ok((body, lang))
}
