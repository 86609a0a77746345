//! Single-article extraction, used for manual sources, ad-hoc imports, and
//! scraper link following.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scraper::{Html, Selector};

use crate::error::{Result, SentinelError};
use crate::ingest::types::{Candidate, RawItem, SourceFetcher};
use crate::ingest::{normalize_items, NormalizeOptions};
use crate::sources::Source;

fn sel(s: &str) -> Selector {
    // Selectors here are literals; a parse failure is a programming error.
    Selector::parse(s).unwrap_or_else(|e| panic!("bad selector {s:?}: {e:?}"))
}

fn first_text(doc: &Html, selector: &str) -> Option<String> {
    doc.select(&sel(selector))
        .map(|el| el.text().collect::<Vec<_>>().join(" "))
        .map(|t| t.trim().to_string())
        .find(|t| !t.is_empty())
}

fn meta_content(doc: &Html, selector: &str) -> Option<String> {
    doc.select(&sel(selector))
        .filter_map(|el| el.value().attr("content"))
        .map(|c| c.trim().to_string())
        .find(|c| !c.is_empty())
}

fn paragraphs(doc: &Html, selector: &str) -> Option<String> {
    let parts: Vec<String> = doc
        .select(&sel(selector))
        .map(|el| el.text().collect::<Vec<_>>().join(" ").trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    (!parts.is_empty()).then(|| parts.join("\n\n"))
}

/// Pull title, body, language, and publish date out of an article page.
///
/// Title: `og:title`, then the first `h1`, then `<title>`.
/// Body: paragraphs under `article`, then `main`, then the whole page.
pub fn extract_article(html: &str, url: &str) -> RawItem {
    let doc = Html::parse_document(html);

    let title = meta_content(&doc, r#"meta[property="og:title"]"#)
        .or_else(|| first_text(&doc, "h1"))
        .or_else(|| first_text(&doc, "title"))
        .unwrap_or_default();

    let body = paragraphs(&doc, "article p")
        .or_else(|| paragraphs(&doc, "main p"))
        .or_else(|| paragraphs(&doc, "p"))
        .or_else(|| meta_content(&doc, r#"meta[name="description"]"#))
        .unwrap_or_default();

    let language = doc
        .select(&sel("html"))
        .next()
        .and_then(|el| el.value().attr("lang"))
        .map(str::to_string);

    let published_at = meta_content(&doc, r#"meta[property="article:published_time"]"#)
        .or_else(|| {
            doc.select(&sel("time[datetime]"))
                .find_map(|el| el.value().attr("datetime").map(str::to_string))
        })
        .and_then(|s| DateTime::parse_from_rfc3339(s.trim()).ok())
        .map(|d| d.with_timezone(&Utc));

    RawItem {
        title,
        url: Some(url.to_string()),
        body,
        published_at,
        language,
    }
}

pub struct ArticleFetcher {
    client: reqwest::Client,
    opts: NormalizeOptions,
}

impl ArticleFetcher {
    pub fn new(client: reqwest::Client, opts: NormalizeOptions) -> Self {
        Self { client, opts }
    }

    /// Fetch one page and extract it. The parsed document never outlives this call.
    pub(crate) async fn fetch_raw(&self, source_id: &str, url: &str) -> Result<RawItem> {
        let (html, header_lang) = super::get_text(&self.client, source_id, url).await?;
        let mut item = extract_article(&html, url);
        if item.language.is_none() {
            item.language = header_lang;
        }
        Ok(item)
    }
}

#[async_trait]
impl SourceFetcher for ArticleFetcher {
    async fn fetch(&self, source: &Source) -> Result<Vec<Candidate>> {
        let raw = self.fetch_raw(&source.id, &source.url).await?;
        if raw.title.trim().is_empty() && raw.body.trim().is_empty() {
            return Err(SentinelError::fetch(
                &source.id,
                format!("no article content found at {}", source.url),
            ));
        }
        Ok(normalize_items(source, vec![raw], &self.opts, Utc::now()))
    }

    fn name(&self) -> &'static str {
        "article"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<!doctype html>
<html lang="uz">
<head>
  <title>Site name | Story</title>
  <meta property="og:title" content="Bridge reopens after repairs">
  <meta property="article:published_time" content="2025-09-06T09:00:00+05:00">
</head>
<body>
  <nav><p>Menu</p></nav>
  <article>
    <h1>Bridge reopens</h1>
    <p>The bridge reopened on Saturday.</p>
    <p>Traffic is expected to normalize.</p>
  </article>
</body></html>"#;

    #[test]
    fn prefers_og_title_and_article_paragraphs() {
        let it = extract_article(PAGE, "https://news.example.org/bridge");
        assert_eq!(it.title, "Bridge reopens after repairs");
        assert_eq!(
            it.body,
            "The bridge reopened on Saturday.\n\nTraffic is expected to normalize."
        );
        assert_eq!(it.language.as_deref(), Some("uz"));
        assert_eq!(it.published_at.map(|d| d.timestamp()), Some(1_757_131_200));
        assert_eq!(it.url.as_deref(), Some("https://news.example.org/bridge"));
    }

    #[test]
    fn falls_back_to_h1_and_loose_paragraphs() {
        let html = "<html><body><h1>Plain</h1><div><p>One.</p><p> </p><p>Two.</p></div></body></html>";
        let it = extract_article(html, "https://x.org/p");
        assert_eq!(it.title, "Plain");
        assert_eq!(it.body, "One.\n\nTwo.");
        assert!(it.language.is_none());
        assert!(it.published_at.is_none());
    }

    #[test]
    fn empty_page_yields_empty_item() {
        let it = extract_article("<html></html>", "https://x.org");
        assert!(it.title.is_empty());
        assert!(it.body.is_empty());
    }
}
