//! Draft articles produced by the pipeline.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::analyze::Verdict;
use crate::ingest::types::Candidate;
use crate::sources::Category;

/// Author tag on pipeline-created drafts.
pub const SENTINEL_AUTHOR: &str = "sentinel";

const SLUG_MAX: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftStatus {
    Draft,
    PendingReview,
    Published,
    Rejected,
}

/// Text keyed by language code, with one primary language.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Localized {
    pub primary: String,
    pub values: BTreeMap<String, String>,
}

impl Localized {
    pub fn new(lang: impl Into<String>, text: impl Into<String>) -> Self {
        let lang = lang.into();
        let mut values = BTreeMap::new();
        values.insert(lang.clone(), text.into());
        Self {
            primary: lang,
            values,
        }
    }

    pub fn insert(&mut self, lang: impl Into<String>, text: impl Into<String>) {
        self.values.insert(lang.into(), text.into());
    }

    pub fn primary_text(&self) -> &str {
        self.values
            .get(&self.primary)
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn get(&self, lang: &str) -> Option<&str> {
        self.values.get(lang).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    pub id: Uuid,
    pub slug: String,
    pub source_id: String,
    pub origin_url: String,
    pub fingerprint: String,
    pub category: Category,
    pub title: Localized,
    pub content: Localized,
    pub description: Localized,
    pub quality_score: f64,
    pub safety_flags: Vec<String>,
    pub status: DraftStatus,
    pub author: String,
    /// Set by human moderation.
    pub approved: bool,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl Draft {
    /// Build a draft from an accepted candidate.
    pub fn from_candidate(
        c: &Candidate,
        category: Category,
        verdict: &Verdict,
        default_language: &str,
        now: DateTime<Utc>,
    ) -> Self {
        let lang = c
            .language
            .as_deref()
            .map(|l| l.split(['-', '_']).next().unwrap_or(l).to_string())
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| default_language.to_string());

        let mut title = Localized::new(&lang, &c.title);
        let mut content = Localized::new(&lang, &c.body);
        let enrichment = verdict.enrichment.clone().unwrap_or_default();
        let mut description = Localized::new(
            &lang,
            enrichment
                .description
                .unwrap_or_else(|| crate::ingest::summarize(&c.body, 220)),
        );
        for (tl, t) in enrichment.translations {
            if tl == lang {
                continue;
            }
            title.insert(&tl, t.title);
            content.insert(&tl, t.content);
            if let Some(d) = t.description {
                description.insert(&tl, d);
            }
        }

        Self {
            id: Uuid::new_v4(),
            slug: draft_slug(&c.title, &c.fingerprint),
            source_id: c.source_id.clone(),
            origin_url: c.url.clone(),
            fingerprint: c.fingerprint.clone(),
            category,
            title,
            content,
            description,
            quality_score: verdict.quality_score,
            safety_flags: verdict.safety_flags.clone(),
            status: DraftStatus::Draft,
            author: SENTINEL_AUTHOR.to_string(),
            approved: false,
            created_at: now,
            published_at: None,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.author == SENTINEL_AUTHOR
    }

    /// Characters of the primary-language content.
    pub fn primary_content_chars(&self) -> usize {
        self.content.primary_text().chars().count()
    }
}

/// Lowercase, alphanumeric runs joined by `-`, at most 80 chars.
pub fn slugify(title: &str) -> String {
    let mut out = String::new();
    let mut pending_dash = false;
    for ch in title.chars().flat_map(char::to_lowercase) {
        if ch.is_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(ch);
        } else {
            pending_dash = true;
        }
        if out.chars().count() >= SLUG_MAX {
            break;
        }
    }
    out.trim_end_matches('-').to_string()
}

/// Slug plus a fingerprint suffix, unique per logical article.
pub fn draft_slug(title: &str, fingerprint: &str) -> String {
    let base = slugify(title);
    let base = if base.is_empty() { "article".to_string() } else { base };
    let suffix: String = fingerprint.chars().take(8).collect();
    if suffix.is_empty() {
        base
    } else {
        format!("{base}-{suffix}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::ai_adapter::{Enrichment, Translation};

    #[test]
    fn slugs_are_url_safe_and_bounded() {
        assert_eq!(slugify("  Hello, World! -- 2025 "), "hello-world-2025");
        assert_eq!(slugify("Тошкентда янги кўприк"), "тошкентда-янги-кўприк");
        assert!(slugify(&"word ".repeat(40)).chars().count() <= 80);
        assert_eq!(draft_slug("!!!", "abcdef0123456789"), "article-abcdef01");
    }

    #[test]
    fn from_candidate_fills_languages() {
        let c = Candidate {
            source_id: "s".into(),
            url: "https://x.org/a".into(),
            title: "Bridge reopens".into(),
            body: "The bridge reopened on Saturday.".into(),
            fetched_at: Utc::now(),
            published_at: None,
            language: Some("en-US".into()),
            fingerprint: "0123456789abcdef".into(),
        };
        let mut translations = BTreeMap::new();
        translations.insert(
            "uz".to_string(),
            Translation {
                title: "Ko'prik ochildi".into(),
                content: "Ko'prik shanba kuni ochildi.".into(),
                description: None,
            },
        );
        let v = Verdict {
            accept: true,
            quality_score: 0.8,
            safety_flags: vec![],
            rejection: None,
            enrichment: Some(Enrichment {
                translations,
                ..Default::default()
            }),
            degraded: false,
        };
        let d = Draft::from_candidate(&c, Category::Local, &v, "uz", Utc::now());
        assert_eq!(d.title.primary, "en");
        assert_eq!(d.title.get("uz"), Some("Ko'prik ochildi"));
        assert_eq!(d.description.primary_text(), "The bridge reopened on Saturday.");
        assert!(d.description.get("uz").is_none());
        assert_eq!(d.slug, "bridge-reopens-01234567");
        assert_eq!(d.status, DraftStatus::Draft);
        assert!(d.is_sentinel());
        assert_eq!(d.primary_content_chars(), 32);
    }
}
