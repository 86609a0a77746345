// src/config/mod.rs
//! Pipeline configuration.
//!
//! Lookup order: $SENTINEL_CONFIG_PATH, then `config/sentinel.toml`, then
//! `config/sentinel.json`, then built-in defaults. A few env vars override the
//! file afterwards (see [`SentinelConfig::apply_env_overrides`]). Without
//! inline sources, the list comes from the sources file
//! ([`crate::ingest::config::load_sources_default`]).

pub mod ai;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::analyze::{QualityConfig, SafetyConfig};
use crate::notify::NotifyConfig;
use crate::publish::AutoPublishConfig;
use crate::rate_limit::RateLimitConfig;
use crate::sources::Source;

pub use ai::EnrichmentConfig;

pub const ENV_CONFIG_PATH: &str = "SENTINEL_CONFIG_PATH";

/// `"ENV"` (any case) reads `var`; empty values count as missing.
pub fn resolve_env(value: &str, var: &str) -> Option<String> {
    let v = value.trim();
    let resolved = if v.eq_ignore_ascii_case("env") {
        std::env::var(var).ok()?
    } else {
        v.to_string()
    };
    (!resolved.trim().is_empty()).then_some(resolved)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub retention_hours: u64,
    pub capacity: usize,
    /// Body characters folded into the fingerprint.
    pub fingerprint_body_chars: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            retention_hours: 48,
            capacity: 20_000,
            fingerprint_body_chars: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_capacity: usize,
    pub history_capacity: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_capacity: 500,
            history_capacity: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SentinelConfig {
    pub enabled: bool,
    /// When false, runs evaluate candidates but write no drafts.
    pub auto_persist: bool,
    pub frequency_ms: u64,
    pub cooldown_ms: u64,
    /// Global cap on drafts per run.
    pub max_per_run: usize,
    /// Watchdog bound on one run.
    pub run_timeout_ms: u64,
    /// Background scheduler tick.
    pub tick_ms: u64,
    pub fetch_timeout_ms: u64,
    pub fetch_concurrency: usize,
    pub max_items_per_source: usize,
    /// Scraper sources fetch each listed article page.
    pub follow_links: bool,
    pub user_agent: String,
    /// Used when a candidate declares no language.
    pub default_language: String,
    /// Site languages; targets for enrichment translations.
    pub languages: Vec<String>,
    pub health_ewma_alpha: f64,
    /// Snapshot file for drafts and runs; in-memory when unset.
    pub store_path: Option<PathBuf>,
    pub dedup: DedupConfig,
    pub rate_limit: RateLimitConfig,
    pub quality: QualityConfig,
    pub safety: SafetyConfig,
    pub enrichment: EnrichmentConfig,
    pub auto_publish: AutoPublishConfig,
    pub telemetry: TelemetryConfig,
    pub notify: NotifyConfig,
    pub sources: Vec<Source>,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            auto_persist: true,
            frequency_ms: 3_600_000,
            cooldown_ms: 300_000,
            max_per_run: 10,
            run_timeout_ms: 900_000,
            tick_ms: 15_000,
            fetch_timeout_ms: 20_000,
            fetch_concurrency: 4,
            max_items_per_source: 20,
            follow_links: false,
            user_agent: "sentinel-pipeline/0.1 (+content ingestion)".to_string(),
            default_language: "en".to_string(),
            languages: vec!["en".to_string()],
            health_ewma_alpha: 0.2,
            store_path: None,
            dedup: DedupConfig::default(),
            rate_limit: RateLimitConfig::default(),
            quality: QualityConfig::default(),
            safety: SafetyConfig::default(),
            enrichment: EnrichmentConfig::default(),
            auto_publish: AutoPublishConfig::default(),
            telemetry: TelemetryConfig::default(),
            notify: NotifyConfig::default(),
            sources: Vec::new(),
        }
    }
}

impl SentinelConfig {
    /// Load from an explicit path (TOML or JSON by extension).
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let cfg: SentinelConfig = match ext.as_str() {
            "json" => serde_json::from_str(&content)
                .with_context(|| format!("parsing JSON config {}", path.display()))?,
            _ => toml::from_str(&content)
                .with_context(|| format!("parsing TOML config {}", path.display()))?,
        };
        cfg.finish()
    }

    /// Env var + fallbacks, then env overrides. Defaults when no file exists.
    pub fn load_default() -> Result<Self> {
        let mut cfg = if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
            Self::load_from(&pb)?
        } else if Path::new("config/sentinel.toml").exists() {
            Self::load_from(Path::new("config/sentinel.toml"))?
        } else if Path::new("config/sentinel.json").exists() {
            Self::load_from(Path::new("config/sentinel.json"))?
        } else {
            Self::default().finish()?
        };
        // No inline [[sources]]: fall back to the separate sources file.
        if cfg.sources.is_empty() {
            cfg.sources = crate::ingest::config::load_sources_default()
                .context("loading sources file")?;
        }
        cfg.apply_env_overrides()
    }

    /// SENTINEL_ENABLED, SENTINEL_AUTO_PERSIST, SENTINEL_FREQUENCY_MS, SENTINEL_MAX_PER_RUN.
    pub fn apply_env_overrides(mut self) -> Result<Self> {
        fn var(name: &str) -> Option<String> {
            std::env::var(name).ok().filter(|v| !v.trim().is_empty())
        }
        fn flag(name: &str, v: &str) -> Result<bool> {
            match v.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                other => Err(anyhow!("{name}: expected a boolean, got '{other}'")),
            }
        }
        if let Some(v) = var("SENTINEL_ENABLED") {
            self.enabled = flag("SENTINEL_ENABLED", &v)?;
        }
        if let Some(v) = var("SENTINEL_AUTO_PERSIST") {
            self.auto_persist = flag("SENTINEL_AUTO_PERSIST", &v)?;
        }
        if let Some(v) = var("SENTINEL_FREQUENCY_MS") {
            self.frequency_ms = v
                .trim()
                .parse()
                .with_context(|| format!("SENTINEL_FREQUENCY_MS: '{v}'"))?;
        }
        if let Some(v) = var("SENTINEL_MAX_PER_RUN") {
            self.max_per_run = v
                .trim()
                .parse()
                .with_context(|| format!("SENTINEL_MAX_PER_RUN: '{v}'"))?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Resolve secrets and sanity-check bounds.
    fn finish(mut self) -> Result<Self> {
        self.enrichment = self
            .enrichment
            .resolve()
            .context("resolving enrichment config")?;
        self.default_language = self.default_language.trim().to_ascii_lowercase();
        self.languages = self
            .languages
            .iter()
            .map(|l| l.trim().to_ascii_lowercase())
            .filter(|l| !l.is_empty())
            .collect();
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.frequency_ms < 1_000 {
            return Err(anyhow!("frequency_ms must be at least 1000"));
        }
        if self.fetch_concurrency == 0 {
            return Err(anyhow!("fetch_concurrency must be at least 1"));
        }
        if self.run_timeout_ms == 0 || self.fetch_timeout_ms == 0 || self.tick_ms == 0 {
            return Err(anyhow!("timeouts and tick must be non-zero"));
        }
        if !(0.0..=1.0).contains(&self.quality.threshold) {
            return Err(anyhow!("quality.threshold must be within [0, 1]"));
        }
        if self.default_language.is_empty() {
            return Err(anyhow!("default_language must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::BackoffPolicy;
    use std::{env, fs};

    const TOML: &str = r#"
enabled = true
frequency_ms = 600000
max_per_run = 3
languages = ["UZ", "ru", "en"]

[rate_limit]
backoff = "linear"
failure_threshold = 5

[quality]
threshold = 0.6

[quality.weights]
priority = 0.5

[quality.category_targets]
local = 0.5

[auto_publish]
enabled = true
max_drafts_per_run = 2

[[sources]]
id = "kun"
name = "Kun.uz"
url = "https://kun.uz/news/rss"
type = "rss"
category = "local"
priority = "high"
"#;

    fn clear_env() {
        for v in [
            ENV_CONFIG_PATH,
            "SENTINEL_ENABLED",
            "SENTINEL_AUTO_PERSIST",
            "SENTINEL_FREQUENCY_MS",
            "SENTINEL_MAX_PER_RUN",
            crate::ingest::config::ENV_SOURCES_PATH,
        ] {
            env::remove_var(v);
        }
    }

    #[test]
    fn toml_sections_merge_with_defaults() {
        let cfg: SentinelConfig = toml::from_str(TOML).unwrap();
        let cfg = cfg.finish().unwrap();
        assert!(cfg.enabled);
        assert_eq!(cfg.max_per_run, 3);
        assert_eq!(cfg.cooldown_ms, 300_000);
        assert_eq!(cfg.languages, vec!["uz", "ru", "en"]);
        assert_eq!(cfg.rate_limit.backoff, BackoffPolicy::Linear);
        assert_eq!(cfg.rate_limit.max_requests, 60);
        assert_eq!(cfg.quality.weights.priority, 0.5);
        assert_eq!(cfg.quality.weights.length, 0.3);
        assert_eq!(cfg.quality.category_targets.local, 0.5);
        assert_eq!(cfg.auto_publish.max_drafts_per_run, 2);
        assert_eq!(cfg.sources.len(), 1);
    }

    #[test]
    fn json_config_and_validation() {
        let cfg: SentinelConfig =
            serde_json::from_str(r#"{"max_per_run": 1, "quality": {"threshold": 0.2}}"#).unwrap();
        assert_eq!(cfg.max_per_run, 1);
        assert!(cfg.finish().is_ok());

        let bad: SentinelConfig = serde_json::from_str(r#"{"frequency_ms": 10}"#).unwrap();
        assert!(bad.finish().is_err());
    }

    #[test]
    fn resolve_env_reads_vars() {
        assert_eq!(resolve_env("https://hook", "UNUSED_VAR"), Some("https://hook".into()));
        assert_eq!(resolve_env("  ", "UNUSED_VAR"), None);
        assert_eq!(resolve_env("ENV", "SENTINEL_TEST_SURELY_UNSET_VAR"), None);
    }

    #[serial_test::serial]
    #[test]
    fn default_uses_env_then_fallbacks_then_overrides() {
        let old = env::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        env::set_current_dir(tmp.path()).unwrap();
        clear_env();

        // Nothing on disk → defaults
        let cfg = SentinelConfig::load_default().unwrap();
        assert!(!cfg.enabled);
        assert_eq!(cfg.frequency_ms, 3_600_000);

        // Fallback: ./config/sentinel.toml
        fs::create_dir_all("config").unwrap();
        fs::write("config/sentinel.toml", TOML).unwrap();
        assert_eq!(SentinelConfig::load_default().unwrap().max_per_run, 3);

        // Env path takes precedence
        let p_json = tmp.path().join("other.json");
        fs::write(&p_json, r#"{"max_per_run": 7}"#).unwrap();
        env::set_var(ENV_CONFIG_PATH, p_json.display().to_string());
        assert_eq!(SentinelConfig::load_default().unwrap().max_per_run, 7);

        // Overrides win over the file
        env::set_var("SENTINEL_MAX_PER_RUN", "2");
        env::set_var("SENTINEL_ENABLED", "true");
        let cfg = SentinelConfig::load_default().unwrap();
        assert_eq!(cfg.max_per_run, 2);
        assert!(cfg.enabled);

        env::set_var("SENTINEL_ENABLED", "maybe");
        assert!(SentinelConfig::load_default().is_err());

        env::set_var(ENV_CONFIG_PATH, tmp.path().join("missing.toml"));
        assert!(SentinelConfig::load_default().is_err());

        clear_env();
        env::set_current_dir(&old).unwrap();
    }

    #[serial_test::serial]
    #[test]
    fn sources_file_fills_an_empty_source_list() {
        let old = env::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        env::set_current_dir(tmp.path()).unwrap();
        clear_env();

        fs::create_dir_all("config").unwrap();
        fs::write("config/sentinel.json", r#"{"max_per_run": 4}"#).unwrap();
        fs::write(
            "config/sources.json",
            r#"[{"id":"a","name":"A","url":"https://a.org/rss","type":"rss","category":"local"}]"#,
        )
        .unwrap();
        let cfg = SentinelConfig::load_default().unwrap();
        assert_eq!(cfg.max_per_run, 4);
        assert_eq!(cfg.sources.len(), 1);
        assert_eq!(cfg.sources[0].id, "a");

        // Inline sources win over the file.
        fs::write("config/sentinel.toml", TOML).unwrap();
        let cfg = SentinelConfig::load_default().unwrap();
        assert!(cfg.sources.iter().all(|s| s.id != "a"));

        clear_env();
        env::set_current_dir(&old).unwrap();
    }
}
