//! JSON API sources.
//!
//! News APIs disagree on envelope and field names, so items are located
//! heuristically: a top-level array, or the first array under one of the
//! usual envelope keys. Field lookup walks a short alias list per field.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::{Result, SentinelError};
use crate::ingest::types::{Candidate, RawItem, SourceFetcher};
use crate::ingest::{normalize_items, NormalizeOptions};
use crate::sources::Source;

const ENVELOPE_KEYS: &[&str] = &["articles", "items", "data", "results", "posts", "news", "entries"];
const TITLE_KEYS: &[&str] = &["title", "headline", "name"];
const URL_KEYS: &[&str] = &["url", "link", "href", "permalink", "web_url"];
const BODY_KEYS: &[&str] = &["content", "body", "text", "description", "summary", "excerpt"];
const DATE_KEYS: &[&str] = &[
    "published_at",
    "publishedAt",
    "pubDate",
    "date",
    "created_at",
    "createdAt",
];
const LANG_KEYS: &[&str] = &["language", "lang"];

fn items_array(v: &Value) -> Option<&Vec<Value>> {
    if let Value::Array(a) = v {
        return Some(a);
    }
    let obj = v.as_object()?;
    for k in ENVELOPE_KEYS {
        match obj.get(*k) {
            Some(Value::Array(a)) => return Some(a),
            // e.g. {"data": {"items": [...]}}
            Some(inner @ Value::Object(_)) => {
                if let Some(a) = items_array(inner) {
                    return Some(a);
                }
            }
            _ => {}
        }
    }
    None
}

/// String value of a field; accepts `{"rendered": "..."}` objects too.
fn text_field(obj: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match obj.get(*k)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Object(o) => o
            .get("rendered")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string),
        _ => None,
    })
}

fn date_field(obj: &serde_json::Map<String, Value>) -> Option<DateTime<Utc>> {
    DATE_KEYS.iter().find_map(|k| match obj.get(*k)? {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .or_else(|_| DateTime::parse_from_rfc2822(s))
            .ok()
            .map(|d| d.with_timezone(&Utc)),
        Value::Number(n) => {
            let secs = n.as_i64()?;
            // Millisecond epochs are common in JS-backed APIs.
            let secs = if secs > 100_000_000_000 { secs / 1000 } else { secs };
            DateTime::<Utc>::from_timestamp(secs, 0)
        }
        _ => None,
    })
}

/// Extract raw items from an API response body.
pub fn parse_api_items(body: &str) -> std::result::Result<Vec<RawItem>, String> {
    let v: Value = serde_json::from_str(body).map_err(|e| format!("invalid JSON: {e}"))?;
    let arr = items_array(&v).ok_or_else(|| "no item array in response".to_string())?;

    Ok(arr
        .iter()
        .filter_map(Value::as_object)
        .map(|obj| RawItem {
            title: text_field(obj, TITLE_KEYS).unwrap_or_default(),
            url: text_field(obj, URL_KEYS),
            body: text_field(obj, BODY_KEYS).unwrap_or_default(),
            published_at: date_field(obj),
            language: text_field(obj, LANG_KEYS),
        })
        .collect())
}

pub struct ApiFetcher {
    client: reqwest::Client,
    opts: NormalizeOptions,
}

impl ApiFetcher {
    pub fn new(client: reqwest::Client, opts: NormalizeOptions) -> Self {
        Self { client, opts }
    }
}

#[async_trait]
impl SourceFetcher for ApiFetcher {
    async fn fetch(&self, source: &Source) -> Result<Vec<Candidate>> {
        let (body, _lang) = super::get_text(&self.client, &source.id, &source.url).await?;
        let raw = parse_api_items(&body).map_err(|e| SentinelError::fetch(&source.id, e))?;
        Ok(normalize_items(source, raw, &self.opts, Utc::now()))
    }

    fn name(&self) -> &'static str {
        "api"
    }
}
