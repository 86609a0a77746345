// src/config/ai.rs
use serde::{Deserialize, Serialize};
use std::env;

fn default_provider() -> String {
    "openai".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_timeout_ms() -> u64 {
    15_000
}
fn default_description_chars() -> usize {
    220
}

/// Settings for the enrichment (AI) client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    #[serde(default)]
    pub enabled: bool,
    /// "openai" (case-insensitive). Anything else yields the disabled client.
    #[serde(default = "default_provider")]
    pub provider: String,
    /// "ENV" means: read from OPENAI_API_KEY. Never serialized back out.
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Upper bound on one enrichment call; a timeout counts as a failure.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Length cap for remote and synthesized descriptions.
    #[serde(default = "default_description_chars")]
    pub max_description_chars: usize,
    /// Ask the provider for translations into the configured languages.
    #[serde(default)]
    pub translate: bool,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: default_provider(),
            api_key: String::new(),
            model: default_model(),
            timeout_ms: default_timeout_ms(),
            max_description_chars: default_description_chars(),
            translate: false,
        }
    }
}

impl EnrichmentConfig {
    /// Normalize provider and resolve an `"ENV"` api key.
    ///
    /// Only an enabled config requires the key to be present.
    pub fn resolve(mut self) -> anyhow::Result<Self> {
        self.provider = self.provider.trim().to_lowercase();

        if self.api_key.trim().eq_ignore_ascii_case("env") {
            let var = match self.provider.as_str() {
                "openai" => "OPENAI_API_KEY",
                other => anyhow::bail!("Unsupported enrichment provider in config: {other}"),
            };
            self.api_key = match env::var(var) {
                Ok(k) => k,
                Err(_) if !self.enabled => String::new(),
                Err(_) => anyhow::bail!("Missing {var} env var"),
            };
        }

        if self.timeout_ms == 0 {
            self.timeout_ms = default_timeout_ms();
        }
        if self.max_description_chars < 40 {
            self.max_description_chars = default_description_chars();
        }
        Ok(self)
    }
}
