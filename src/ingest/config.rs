// src/ingest/config.rs
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::sources::Source;

pub const ENV_SOURCES_PATH: &str = "SENTINEL_SOURCES_PATH";

/// Load sources from an explicit path. Supports TOML (`[[sources]]`) or a JSON array.
pub fn load_sources_from(path: &Path) -> Result<Vec<Source>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading sources from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_sources(&content, ext.as_str())
        .with_context(|| format!("parsing sources from {}", path.display()))
}

/// Load sources using env var + fallbacks:
/// 1) $SENTINEL_SOURCES_PATH
/// 2) config/sources.toml
/// 3) config/sources.json
///
/// Returns an empty list if none exist.
pub fn load_sources_default() -> Result<Vec<Source>> {
    if let Ok(p) = std::env::var(ENV_SOURCES_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_sources_from(&pb);
        } else {
            return Err(anyhow!("{ENV_SOURCES_PATH} points to non-existent path"));
        }
    }
    let toml_p = PathBuf::from("config/sources.toml");
    if toml_p.exists() {
        return load_sources_from(&toml_p);
    }
    let json_p = PathBuf::from("config/sources.json");
    if json_p.exists() {
        return load_sources_from(&json_p);
    }
    Ok(Vec::new())
}

fn parse_sources(s: &str, hint_ext: &str) -> Result<Vec<Source>> {
    if hint_ext == "toml" {
        return parse_toml(s);
    }
    if hint_ext == "json" {
        return parse_json(s);
    }
    // No hint: JSON if it looks like it, TOML otherwise.
    if s.trim_start().starts_with(['[', '{']) {
        if let Ok(v) = parse_json(s) {
            return Ok(v);
        }
    }
    parse_toml(s).map_err(|e| anyhow!("unsupported sources format: {e}"))
}

fn parse_toml(s: &str) -> Result<Vec<Source>> {
    #[derive(serde::Deserialize)]
    struct TomlSources {
        #[serde(default)]
        sources: Vec<Source>,
    }
    let v: TomlSources = toml::from_str(s)?;
    Ok(v.sources)
}

fn parse_json(s: &str) -> Result<Vec<Source>> {
    #[derive(serde::Deserialize)]
    #[serde(untagged)]
    enum JsonSources {
        List(Vec<Source>),
        Wrapped { sources: Vec<Source> },
    }
    Ok(match serde_json::from_str::<JsonSources>(s)? {
        JsonSources::List(v) => v,
        JsonSources::Wrapped { sources } => sources,
    })
}
