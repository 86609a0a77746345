// src/ingest/mod.rs
pub mod config;
pub mod enrich;
pub mod providers;
pub mod scheduler;
pub mod types;

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;

use crate::dedup::fingerprint;
use crate::ingest::types::{Candidate, RawItem};
use crate::sources::Source;

/// Query parameters dropped from every candidate URL.
const TRACKING_PARAMS: &[&str] = &[
    "fbclid", "gclid", "yclid", "mc_cid", "mc_eid", "igshid", "ref", "_ga", "_hsenc", "_hsmi",
];

/// Knobs shared by all fetchers when turning raw items into candidates.
#[derive(Debug, Clone, Copy)]
pub struct NormalizeOptions {
    pub fingerprint_body_chars: usize,
    pub max_items_per_source: usize,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            fingerprint_body_chars: 500,
            max_items_per_source: 20,
        }
    }
}

/// Normalize text: decode entities, strip tags, collapse whitespace, trim.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags (drop script/style bodies first)
    static RE_BLOCKS: OnceCell<regex::Regex> = OnceCell::new();
    let re_blocks = RE_BLOCKS.get_or_init(|| {
        regex::Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>").unwrap()
    });
    out = re_blocks.replace_all(&out, " ").to_string();
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace (incl. nbsp)
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"[\s\u{00A0}]+").unwrap());
    out = re_ws.replace_all(&out, " ").to_string();
    out.trim().to_string()
}

/// Strip tracking params and fragment; leave anything unparsable untouched.
pub fn canonicalize_url(raw: &str) -> String {
    let Ok(mut u) = url::Url::parse(raw.trim()) else {
        return raw.trim().to_string();
    };
    u.set_fragment(None);
    let kept: Vec<(String, String)> = u
        .query_pairs()
        .filter(|(k, _)| {
            let k = k.to_ascii_lowercase();
            !k.starts_with("utm_") && !TRACKING_PARAMS.contains(&k.as_str())
        })
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        u.set_query(None);
    } else {
        u.query_pairs_mut().clear().extend_pairs(kept);
    }
    u.to_string()
}

/// Resolve a possibly-relative link against the page it was found on.
pub fn resolve_url(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
        return None;
    }
    match url::Url::parse(href) {
        Ok(u) => Some(u.to_string()),
        Err(_) => url::Url::parse(base)
            .ok()?
            .join(href)
            .ok()
            .map(|u| u.to_string()),
    }
}

/// Normalize raw items into candidates, applying the source's filters.
///
/// Items with no usable text, a mismatching declared language, or a body
/// outside the source's length bounds are dropped. At most
/// `opts.max_items_per_source` candidates are returned, in feed order.
pub fn normalize_items(
    source: &Source,
    raw: Vec<RawItem>,
    opts: &NormalizeOptions,
    now: DateTime<Utc>,
) -> Vec<Candidate> {
    let mut out = Vec::with_capacity(raw.len().min(opts.max_items_per_source));
    let mut dropped = 0usize;

    for it in raw {
        if out.len() >= opts.max_items_per_source {
            break;
        }
        let body = normalize_text(&it.body);
        let mut title = normalize_text(&it.title);
        if title.is_empty() {
            title = body.chars().take(80).collect::<String>().trim().to_string();
        }
        if title.is_empty() {
            dropped += 1;
            continue;
        }

        let language = it
            .language
            .as_deref()
            .map(|l| l.trim().to_ascii_lowercase())
            .filter(|l| !l.is_empty());
        if let (Some(want), Some(have)) = (source.filters.language.as_deref(), language.as_deref())
        {
            if !have.starts_with(want) {
                dropped += 1;
                continue;
            }
        }

        let len = body.chars().count();
        let too_short = source.filters.min_length.is_some_and(|m| len < m);
        let too_long = source.filters.max_length.is_some_and(|m| len > m);
        if too_short || too_long {
            dropped += 1;
            continue;
        }

        let url = it
            .url
            .as_deref()
            .and_then(|u| resolve_url(&source.url, u))
            .map(|u| canonicalize_url(&u))
            .unwrap_or_else(|| canonicalize_url(&source.url));

        let fp = fingerprint(&title, &body, opts.fingerprint_body_chars);
        out.push(Candidate {
            source_id: source.id.clone(),
            url,
            title,
            body,
            fetched_at: now,
            published_at: it.published_at,
            language,
            fingerprint: fp,
        });
    }

    if dropped > 0 {
        tracing::debug!(target: "ingest", source = %source.id, dropped, "items filtered during normalization");
    }
    out
}

/// First sentences of `text`, cut on a word boundary at `max_chars`.
pub fn summarize(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    if let Some(pos) = cut.rfind(['.', '!', '?']) {
        if pos > max_chars / 3 {
            return cut[..=pos].to_string();
        }
    }
    match cut.rfind(' ') {
        Some(pos) => format!("{}…", cut[..pos].trim_end()),
        None => cut,
    }
}
