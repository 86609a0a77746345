// src/ingest/types.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::sources::Source;

/// Item as parsed from a source, before normalization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawItem {
    pub title: String,
    pub url: Option<String>,
    pub body: String,
    pub published_at: Option<DateTime<Utc>>,
    pub language: Option<String>,
}

/// A fetched item awaiting the quality gate. Lives for one run only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub source_id: String,
    pub url: String,   // tracking params stripped
    pub title: String, // normalized
    pub body: String,  // normalized, whitespace collapsed
    pub fetched_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub language: Option<String>,
    pub fingerprint: String,
}

impl Candidate {
    pub fn body_chars(&self) -> usize {
        self.body.chars().count()
    }
}

/// One implementation per source kind; selected by `FetcherSet::for_kind`.
#[async_trait::async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, source: &Source) -> Result<Vec<Candidate>>;
    fn name(&self) -> &'static str;
}
