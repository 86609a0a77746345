//! Keyword/heuristic safety and bias screen.
//!
//! Runs before the (rate limited) classifier. Blocked terms reject outright;
//! flagged and sensational terms only add flags, which the quality score
//! penalizes.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// Any match rejects the candidate as unsafe.
    pub blocked_terms: Vec<String>,
    /// Any match adds `flag:<term>`.
    pub flagged_terms: Vec<String>,
    /// Any match adds `sensational`.
    pub sensational_terms: Vec<String>,
    /// Uppercase letter share in the title above which `shouting` is flagged.
    pub max_caps_ratio: f64,
    /// Ask the enrichment classifier after the heuristic screen passes.
    pub use_classifier: bool,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            blocked_terms: Vec::new(),
            flagged_terms: vec![
                "allegedly".into(),
                "unconfirmed".into(),
                "rumor".into(),
                "rumour".into(),
            ],
            sensational_terms: vec![
                "shocking".into(),
                "you won't believe".into(),
                "miracle".into(),
                "!!!".into(),
            ],
            max_caps_ratio: 0.6,
            use_classifier: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Screen {
    /// First blocked term found, if any.
    pub blocked: Option<String>,
    pub flags: Vec<String>,
}

fn push_flag(flags: &mut Vec<String>, f: String) {
    if !flags.contains(&f) {
        flags.push(f);
    }
}

pub fn screen(title: &str, body: &str, cfg: &SafetyConfig) -> Screen {
    let hay = format!("{title}\n{body}").to_lowercase();
    let hit = |t: &String| {
        let t = t.trim().to_lowercase();
        !t.is_empty() && hay.contains(&t)
    };

    if let Some(term) = cfg.blocked_terms.iter().find(|&t| hit(t)) {
        return Screen {
            blocked: Some(term.trim().to_lowercase()),
            flags: Vec::new(),
        };
    }

    let mut flags = Vec::new();
    for t in cfg.flagged_terms.iter().filter(|&t| hit(t)) {
        push_flag(&mut flags, format!("flag:{}", t.trim().to_lowercase()));
    }
    if cfg.sensational_terms.iter().any(hit) {
        push_flag(&mut flags, "sensational".into());
    }

    let letters: Vec<char> = title.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.len() >= 8 {
        let upper = letters.iter().filter(|c| c.is_uppercase()).count();
        if upper as f64 / letters.len() as f64 > cfg.max_caps_ratio {
            push_flag(&mut flags, "shouting".into());
        }
    }

    Screen {
        blocked: None,
        flags,
    }
}
