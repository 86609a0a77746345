//! Listing-page scraper.
//!
//! Reads `article` blocks off a section page. With `follow_links` each
//! listed link is fetched and run through [`extract_article`](super::article::extract_article)
//! so the candidate carries the full body instead of the teaser.

use async_trait::async_trait;
use chrono::Utc;
use scraper::{ElementRef, Html, Selector};

use super::article::ArticleFetcher;
use crate::error::{Result, SentinelError};
use crate::ingest::types::{Candidate, RawItem, SourceFetcher};
use crate::ingest::{normalize_items, resolve_url, NormalizeOptions};
use crate::sources::Source;

fn sel(s: &str) -> Selector {
    Selector::parse(s).unwrap_or_else(|e| panic!("bad selector {s:?}: {e:?}"))
}

fn text_of(el: ElementRef<'_>) -> String {
    el.text().collect::<Vec<_>>().join(" ").trim().to_string()
}

/// Items listed on a section page, in page order.
///
/// Each `article` element yields one item: heading text as title, the first
/// link as url, and paragraph text as body. Pages without `article` markup
/// fall back to heading links (`h2 a`, `h3 a`) with an empty body.
pub fn parse_listing(html: &str, base_url: &str) -> Vec<RawItem> {
    let doc = Html::parse_document(html);
    let heading = sel("h1, h2, h3, h4");
    let link = sel("a[href]");
    let para = sel("p");

    let mut items: Vec<RawItem> = doc
        .select(&sel("article"))
        .filter_map(|art| {
            let a = art.select(&link).next();
            let title = art
                .select(&heading)
                .map(text_of)
                .find(|t| !t.is_empty())
                .or_else(|| a.map(text_of).filter(|t| !t.is_empty()))?;
            let url = a
                .and_then(|a| a.value().attr("href"))
                .and_then(|h| resolve_url(base_url, h));
            let body = art
                .select(&para)
                .map(text_of)
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join("\n\n");
            Some(RawItem {
                title,
                url,
                body,
                ..Default::default()
            })
        })
        .collect();

    if items.is_empty() {
        items = doc
            .select(&sel("h2 a[href], h3 a[href]"))
            .filter_map(|a| {
                let title = text_of(a);
                let url = resolve_url(base_url, a.value().attr("href")?)?;
                (!title.is_empty()).then(|| RawItem {
                    title,
                    url: Some(url),
                    ..Default::default()
                })
            })
            .collect();
    }
    items
}

pub struct ScraperFetcher {
    client: reqwest::Client,
    opts: NormalizeOptions,
    follow_links: bool,
    article: ArticleFetcher,
}

impl ScraperFetcher {
    pub fn new(client: reqwest::Client, opts: NormalizeOptions, follow_links: bool) -> Self {
        Self {
            article: ArticleFetcher::new(client.clone(), opts),
            client,
            opts,
            follow_links,
        }
    }
}

#[async_trait]
impl SourceFetcher for ScraperFetcher {
    async fn fetch(&self, source: &Source) -> Result<Vec<Candidate>> {
        let (html, lang) = super::get_text(&self.client, &source.id, &source.url).await?;
        // The parsed DOM is !Send; keep it inside this synchronous call.
        let mut listed = parse_listing(&html, &source.url);
        if listed.is_empty() {
            return Err(SentinelError::fetch(
                &source.id,
                "no articles found on listing page",
            ));
        }
        listed.truncate(self.opts.max_items_per_source);
        for it in listed.iter_mut() {
            if it.language.is_none() {
                it.language = lang.clone();
            }
        }

        if self.follow_links {
            let mut full = Vec::with_capacity(listed.len());
            for it in listed {
                let Some(url) = it.url.clone() else {
                    full.push(it);
                    continue;
                };
                match self.article.fetch_raw(&source.id, &url).await {
                    Ok(mut page) if !page.body.trim().is_empty() => {
                        if page.title.trim().is_empty() {
                            page.title = it.title;
                        }
                        if page.language.is_none() {
                            page.language = it.language;
                        }
                        full.push(page);
                    }
                    Ok(_) => full.push(it),
                    Err(e) => {
                        tracing::debug!(target: "ingest", source = %source.id, url = %url, error = %e, "article follow failed; keeping teaser");
                        full.push(it);
                    }
                }
            }
            listed = full;
        }

        Ok(normalize_items(source, listed, &self.opts, Utc::now()))
    }

    fn name(&self) -> &'static str {
        "scraper"
    }
}
