//! # Source Registry
//!
//! Holds the configured content origins and their rolling health stats.
//! The registry is the only writer of [`Source`] values; everything else
//! reads snapshots.
//!
//! - `upsert` validates URL shape, name, and filter bounds. The closed enum
//!   sets (`type`, `category`, `priority`) are enforced by deserialization.
//! - `record_health` keeps an exponentially weighted success rate.
//! - Duplicate URLs are tolerated and reported by `hygiene_warnings`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SentinelError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Rss,
    Api,
    Scraper,
    Manual,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Rss => "rss",
            SourceKind::Api => "api",
            SourceKind::Scraper => "scraper",
            SourceKind::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Local,
    International,
    Tech,
    Development,
    Academic,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Local,
        Category::International,
        Category::Tech,
        Category::Development,
        Category::Academic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Local => "local",
            Category::International => "international",
            Category::Tech => "tech",
            Category::Development => "development",
            Category::Academic => "academic",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    /// Sort key: high sources are processed first.
    pub fn rank(&self) -> u8 {
        match self {
            Priority::High => 0,
            Priority::Medium => 1,
            Priority::Low => 2,
        }
    }
}

/// Per-source acceptance filters applied during normalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceFilters {
    /// ISO language code (e.g. "en"); items with a different declared language are dropped.
    #[serde(default)]
    pub language: Option<String>,
    /// Region name; treated as an extra keyword when scoring.
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub min_length: Option<usize>,
    #[serde(default)]
    pub max_length: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceHealth {
    pub last_checked: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub error_count: u64,
    /// EWMA of fetch outcomes in [0,1].
    pub success_rate: f64,
    pub avg_latency_ms: Option<f64>,
}

impl Default for SourceHealth {
    fn default() -> Self {
        Self {
            last_checked: None,
            last_success: None,
            last_error: None,
            error_count: 0,
            success_rate: 1.0,
            avg_latency_ms: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(rename = "type")]
    pub kind: SourceKind,
    pub category: Category,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub filters: SourceFilters,
    #[serde(default)]
    pub health: SourceHealth,
}

fn default_true() -> bool {
    true
}

impl Source {
    /// Convenience constructor used by config seeding and tests.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        url: impl Into<String>,
        kind: SourceKind,
        category: Category,
        priority: Priority,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            url: url.into(),
            kind,
            category,
            priority,
            enabled: true,
            keywords: Vec::new(),
            filters: SourceFilters::default(),
            health: SourceHealth::default(),
        }
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }
}

/// One fetch outcome fed into `record_health`.
#[derive(Debug, Clone)]
pub struct HealthSample {
    pub success: bool,
    pub latency_ms: u64,
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

impl HealthSample {
    pub fn ok(latency_ms: u64, at: DateTime<Utc>) -> Self {
        Self {
            success: true,
            latency_ms,
            error: None,
            at,
        }
    }

    pub fn failed(latency_ms: u64, error: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            success: false,
            latency_ms,
            error: Some(error.into()),
            at,
        }
    }
}

/// Optional filter for `list`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceQuery {
    pub enabled: Option<bool>,
    pub category: Option<Category>,
    #[serde(rename = "type")]
    pub kind: Option<SourceKind>,
    pub priority: Option<Priority>,
}

impl SourceQuery {
    fn matches(&self, s: &Source) -> bool {
        self.enabled.is_none_or(|e| s.enabled == e)
            && self.category.is_none_or(|c| s.category == c)
            && self.kind.is_none_or(|k| s.kind == k)
            && self.priority.is_none_or(|p| s.priority == p)
    }
}

#[derive(Debug)]
pub struct SourceRegistry {
    inner: RwLock<Vec<Source>>,
    ewma_alpha: f64,
}

impl SourceRegistry {
    pub fn new(ewma_alpha: f64) -> Self {
        Self {
            inner: RwLock::new(Vec::new()),
            ewma_alpha: ewma_alpha.clamp(0.01, 1.0),
        }
    }

    /// Build a registry seeded with sources; every entry is validated.
    pub fn with_sources(ewma_alpha: f64, sources: Vec<Source>) -> Result<Self> {
        let reg = Self::new(ewma_alpha);
        reg.replace_all(sources)?;
        Ok(reg)
    }

    pub fn list(&self, query: &SourceQuery) -> Vec<Source> {
        let g = self.inner.read().expect("registry lock poisoned");
        g.iter().filter(|s| query.matches(s)).cloned().collect()
    }

    pub fn all(&self) -> Vec<Source> {
        self.list(&SourceQuery::default())
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: &str) -> Result<Source> {
        let g = self.inner.read().expect("registry lock poisoned");
        g.iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or_else(|| SentinelError::NotFound(format!("source {id}")))
    }

    /// Insert or replace by id. Health stats of an existing entry are preserved.
    pub fn upsert(&self, source: Source) -> Result<Source> {
        let mut source = validate(source)?;
        let mut g = self.inner.write().expect("registry lock poisoned");
        match g.iter_mut().find(|s| s.id == source.id) {
            Some(existing) => {
                source.health = existing.health.clone();
                *existing = source.clone();
            }
            None => g.push(source.clone()),
        }
        Ok(source)
    }

    /// Replace the full source list. Nothing changes if any entry is invalid.
    /// Ids already registered keep their health stats.
    pub fn replace_all(&self, sources: Vec<Source>) -> Result<Vec<Source>> {
        let mut validated = Vec::with_capacity(sources.len());
        let mut ids = BTreeSet::new();
        for s in sources {
            let s = validate(s)?;
            if !ids.insert(s.id.clone()) {
                return Err(SentinelError::validation(format!(
                    "duplicate source id '{}'",
                    s.id
                )));
            }
            validated.push(s);
        }
        let mut g = self.inner.write().expect("registry lock poisoned");
        for s in &mut validated {
            if let Some(prev) = g.iter().find(|p| p.id == s.id) {
                s.health = prev.health.clone();
            }
        }
        *g = validated.clone();
        Ok(validated)
    }

    pub fn remove(&self, id: &str) -> Result<Source> {
        let mut g = self.inner.write().expect("registry lock poisoned");
        let pos = g
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| SentinelError::NotFound(format!("source {id}")))?;
        Ok(g.remove(pos))
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<Source> {
        let mut g = self.inner.write().expect("registry lock poisoned");
        let s = g
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| SentinelError::NotFound(format!("source {id}")))?;
        s.enabled = enabled;
        Ok(s.clone())
    }

    pub fn record_health(&self, id: &str, sample: HealthSample) -> Result<()> {
        let alpha = self.ewma_alpha;
        let mut g = self.inner.write().expect("registry lock poisoned");
        let s = g
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| SentinelError::NotFound(format!("source {id}")))?;

        let h = &mut s.health;
        h.last_checked = Some(sample.at);
        let outcome = if sample.success { 1.0 } else { 0.0 };
        h.success_rate = (alpha * outcome + (1.0 - alpha) * h.success_rate).clamp(0.0, 1.0);
        let lat = sample.latency_ms as f64;
        h.avg_latency_ms = Some(match h.avg_latency_ms {
            Some(prev) => alpha * lat + (1.0 - alpha) * prev,
            None => lat,
        });

        if sample.success {
            h.last_success = Some(sample.at);
        } else {
            h.error_count = h.error_count.saturating_add(1);
            h.last_error = sample.error;
        }
        Ok(())
    }

    /// Enabled sources, high priority first. Ties keep registry order.
    pub fn enabled_by_priority(&self) -> Vec<Source> {
        let mut v = self.list(&SourceQuery {
            enabled: Some(true),
            ..Default::default()
        });
        v.sort_by_key(|s| s.priority.rank());
        v
    }

    /// Duplicate URLs (after canonicalization). Reported, never rejected.
    pub fn hygiene_warnings(&self) -> Vec<String> {
        let g = self.inner.read().expect("registry lock poisoned");
        let mut by_url: BTreeMap<String, Vec<&str>> = BTreeMap::new();
        for s in g.iter() {
            by_url
                .entry(crate::ingest::canonicalize_url(&s.url))
                .or_default()
                .push(s.id.as_str());
        }
        by_url
            .into_iter()
            .filter(|(_, ids)| ids.len() > 1)
            .map(|(url, ids)| format!("duplicate url {url} shared by sources {}", ids.join(", ")))
            .collect()
    }
}

fn validate(mut s: Source) -> Result<Source> {
    s.name = s.name.trim().to_string();
    if s.name.is_empty() {
        return Err(SentinelError::validation("source name must not be empty"));
    }

    s.url = s.url.trim().to_string();
    let parsed = url::Url::parse(&s.url)
        .map_err(|e| SentinelError::validation(format!("invalid source url '{}': {e}", s.url)))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(SentinelError::validation(format!(
            "source url must be http(s), got '{}'",
            parsed.scheme()
        )));
    }
    if parsed.host_str().is_none() {
        return Err(SentinelError::validation("source url has no host"));
    }

    if let (Some(min), Some(max)) = (s.filters.min_length, s.filters.max_length) {
        if min > max {
            return Err(SentinelError::validation(format!(
                "filters.min_length ({min}) exceeds filters.max_length ({max})"
            )));
        }
    }
    if let Some(lang) = s.filters.language.as_mut() {
        *lang = lang.trim().to_ascii_lowercase();
    }

    let mut seen = BTreeSet::new();
    s.keywords = s
        .keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty() && seen.insert(k.clone()))
        .collect();

    if s.id.trim().is_empty() {
        s.id = uuid::Uuid::new_v4().to_string();
    }
    Ok(s)
}
