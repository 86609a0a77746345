use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use quick_xml::de::from_str;
use serde::Deserialize;
use time::{format_description::well_known::Rfc2822, OffsetDateTime};

use crate::error::{Result, SentinelError};
use crate::ingest::types::{Candidate, RawItem, SourceFetcher};
use crate::ingest::{normalize_items, NormalizeOptions};
use crate::sources::Source;

// RSS 2.0
#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}
#[derive(Debug, Deserialize)]
struct Channel {
    language: Option<String>,
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}
#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
    #[serde(rename = "content:encoded")]
    content_encoded: Option<String>,
}

// Atom
#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(rename = "@lang", alias = "@xml:lang")]
    lang: Option<String>,
    #[serde(rename = "entry", default)]
    entry: Vec<AtomEntry>,
}
#[derive(Debug, Deserialize)]
struct AtomEntry {
    title: Option<TextNode>,
    #[serde(rename = "link", default)]
    link: Vec<AtomLink>,
    summary: Option<TextNode>,
    content: Option<TextNode>,
    published: Option<String>,
    updated: Option<String>,
}
#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}
#[derive(Debug, Deserialize)]
struct TextNode {
    #[serde(rename = "$text", default)]
    value: String,
}

fn parse_rfc2822(ts: &str) -> Option<DateTime<Utc>> {
    OffsetDateTime::parse(ts.trim(), &Rfc2822)
        .ok()
        .and_then(|dt| DateTime::<Utc>::from_timestamp(dt.unix_timestamp(), 0))
}

fn parse_rfc3339(ts: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(ts.trim())
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// Parse RSS 2.0 or Atom into raw items, in document order.
pub fn parse_feed(xml: &str) -> std::result::Result<Vec<RawItem>, String> {
    let t0 = std::time::Instant::now();
    let xml_clean = scrub_html_entities_for_xml(xml);

    let items = match from_str::<Rss>(&xml_clean) {
        Ok(rss) => {
            let lang = rss.channel.language;
            rss.channel
                .item
                .into_iter()
                .map(|it| {
                    // Prefer full content over the teaser when a feed carries both.
                    let body = match (it.content_encoded, it.description) {
                        (Some(c), _) if !c.trim().is_empty() => c,
                        (_, Some(d)) => d,
                        _ => String::new(),
                    };
                    RawItem {
                        title: it.title.unwrap_or_default(),
                        url: it.link.map(|l| l.trim().to_string()),
                        body,
                        published_at: it.pub_date.as_deref().and_then(parse_rfc2822),
                        language: lang.clone(),
                    }
                })
                .collect::<Vec<_>>()
        }
        Err(rss_err) => {
            let feed: AtomFeed = from_str(&xml_clean)
                .map_err(|e| format!("not RSS ({rss_err}) nor Atom ({e})"))?;
            if feed.entry.is_empty() && !xml_clean.contains("<feed") {
                return Err(format!("not an RSS or Atom document: {rss_err}"));
            }
            let lang = feed.lang;
            feed.entry
                .into_iter()
                .map(|e| {
                    let url = e
                        .link
                        .iter()
                        .find(|l| l.rel.as_deref().is_none_or(|r| r == "alternate"))
                        .or_else(|| e.link.first())
                        .and_then(|l| l.href.clone());
                    let body = e
                        .content
                        .filter(|c| !c.value.trim().is_empty())
                        .or(e.summary)
                        .map(|t| t.value)
                        .unwrap_or_default();
                    RawItem {
                        title: e.title.map(|t| t.value).unwrap_or_default(),
                        url,
                        body,
                        published_at: e
                            .published
                            .or(e.updated)
                            .as_deref()
                            .and_then(parse_rfc3339),
                        language: lang.clone(),
                    }
                })
                .collect()
        }
    };

    let ms = t0.elapsed().as_secs_f64() * 1_000.0;
    histogram!("sentinel_feed_parse_ms").record(ms);
    counter!("sentinel_feed_items_total").increment(items.len() as u64);
    Ok(items)
}

pub struct RssFetcher {
    client: reqwest::Client,
    opts: NormalizeOptions,
}

impl RssFetcher {
    pub fn new(client: reqwest::Client, opts: NormalizeOptions) -> Self {
        Self { client, opts }
    }
}

#[async_trait]
impl SourceFetcher for RssFetcher {
    async fn fetch(&self, source: &Source) -> Result<Vec<Candidate>> {
        let (body, _lang) = super::get_text(&self.client, &source.id, &source.url).await?;
        let raw = parse_feed(&body).map_err(|e| SentinelError::fetch(&source.id, e))?;
        Ok(normalize_items(source, raw, &self.opts, Utc::now()))
    }

    fn name(&self) -> &'static str {
        "rss"
    }
}

fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&hellip;", "...")
}
