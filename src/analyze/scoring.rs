//! Quality scoring.
//!
//! `ScoreInputs` are four normalized signals in [0,1]:
//! - `priority` : source priority (credibility proxy)
//! - `length`   : body length, saturating at `length_target`
//! - `keywords` : match strength against source keywords and region
//! - `balance`  : how much this category is still wanted in the run's mix
//!
//! score = Σ wᵢ·xᵢ / Σ wᵢ − flag_penalty · |flags|, clamped to [0,1].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::sources::{Category, Priority};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityWeights {
    pub priority: f64,
    pub length: f64,
    pub keywords: f64,
    pub balance: f64,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            priority: 0.3,
            length: 0.3,
            keywords: 0.2,
            balance: 0.2,
        }
    }
}

/// Target share of accepted drafts per category.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryTargets {
    pub local: f64,
    pub international: f64,
    pub tech: f64,
    pub development: f64,
    pub academic: f64,
}

impl Default for CategoryTargets {
    fn default() -> Self {
        Self {
            local: 0.35,
            international: 0.25,
            tech: 0.2,
            development: 0.1,
            academic: 0.1,
        }
    }
}

impl CategoryTargets {
    pub fn get(&self, c: Category) -> f64 {
        match c {
            Category::Local => self.local,
            Category::International => self.international,
            Category::Tech => self.tech,
            Category::Development => self.development,
            Category::Academic => self.academic,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityScores {
    pub high: f64,
    pub medium: f64,
    pub low: f64,
}

impl Default for PriorityScores {
    fn default() -> Self {
        Self {
            high: 1.0,
            medium: 0.7,
            low: 0.4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Accept when `score >= threshold`.
    pub threshold: f64,
    /// Body characters required to reach the scoring step.
    pub min_content_length: usize,
    /// Body length at which the length signal saturates.
    pub length_target: usize,
    /// Subtracted per safety flag.
    pub flag_penalty: f64,
    pub weights: QualityWeights,
    pub priority_scores: PriorityScores,
    pub category_targets: CategoryTargets,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            min_content_length: 200,
            length_target: 1_500,
            flag_penalty: 0.1,
            weights: QualityWeights::default(),
            priority_scores: PriorityScores::default(),
            category_targets: CategoryTargets::default(),
        }
    }
}

/// Accepted-so-far count per category for the current run.
#[derive(Debug, Clone, Default)]
pub struct CategoryMix {
    counts: BTreeMap<Category, usize>,
    total: usize,
}

impl CategoryMix {
    pub fn record(&mut self, c: Category) {
        *self.counts.entry(c).or_default() += 1;
        self.total += 1;
    }

    pub fn share(&self, c: Category) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.counts.get(&c).copied().unwrap_or(0) as f64 / self.total as f64
    }

    pub fn total(&self) -> usize {
        self.total
    }
}

/// Normalized inputs in [0,1].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ScoreInputs {
    pub priority: f64,
    pub length: f64,
    pub keywords: f64,
    pub balance: f64,
}

impl ScoreInputs {
    /// Safe constructor with clamping.
    pub fn new(priority: f64, length: f64, keywords: f64, balance: f64) -> Self {
        fn c(x: f64) -> f64 {
            if x.is_finite() {
                x.clamp(0.0, 1.0)
            } else {
                0.0
            }
        }
        Self {
            priority: c(priority),
            length: c(length),
            keywords: c(keywords),
            balance: c(balance),
        }
    }
}

pub fn priority_score(p: Priority, s: &PriorityScores) -> f64 {
    match p {
        Priority::High => s.high,
        Priority::Medium => s.medium,
        Priority::Low => s.low,
    }
}

pub fn length_score(chars: usize, target: usize) -> f64 {
    if target == 0 {
        return 1.0;
    }
    (chars as f64 / target as f64).min(1.0)
}

/// 0.5 when the source declares no keywords (neutral); otherwise 0 for no hit
/// and 0.5 + 0.5·(hits/keywords) once at least one keyword matches.
pub fn keyword_score(text: &str, keywords: &[String], region: Option<&str>) -> f64 {
    let terms: Vec<String> = keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .chain(region.map(|r| r.trim().to_lowercase()))
        .filter(|k| !k.is_empty())
        .collect();
    if terms.is_empty() {
        return 0.5;
    }
    let hay = text.to_lowercase();
    let hits = terms.iter().filter(|t| hay.contains(t.as_str())).count();
    if hits == 0 {
        0.0
    } else {
        0.5 + 0.5 * hits as f64 / terms.len() as f64
    }
}

/// 1.0 while the category is at or below its target share, then target/share.
pub fn balance_score(c: Category, mix: &CategoryMix, targets: &CategoryTargets) -> f64 {
    let share = mix.share(c);
    let target = targets.get(c).max(0.0);
    if share <= target {
        1.0
    } else {
        target / share
    }
}

/// Weighted, normalized score minus the flag penalty.
pub fn quality_score(inputs: &ScoreInputs, w: &QualityWeights, flags: usize, penalty: f64) -> f64 {
    let raw = inputs.priority * w.priority
        + inputs.length * w.length
        + inputs.keywords * w.keywords
        + inputs.balance * w.balance;
    let denom = (w.priority + w.length + w.keywords + w.balance).max(1e-6);
    (raw / denom - penalty.max(0.0) * flags as f64).clamp(0.0, 1.0)
}
