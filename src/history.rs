//! Run records and the bounded run history behind the metrics.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTrigger {
    Scheduled,
    Manual,
    Forced,
}

/// One per-source or per-candidate failure swallowed during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunError {
    pub source_id: String,
    pub kind: String,
    pub message: String,
}

/// One ingestion run. Frozen once `finished_at` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: Uuid,
    pub trigger: RunTrigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub sources_scanned: usize,
    pub candidates_fetched: usize,
    pub duplicates_skipped: usize,
    pub rejected: usize,
    pub accepted: usize,
    pub drafts_created: usize,
    pub errors: Vec<RunError>,
    pub cancelled: bool,
    pub timed_out: bool,
    pub degraded: bool,
}

impl RunRecord {
    pub fn start(trigger: RunTrigger, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            trigger,
            started_at: now,
            finished_at: None,
            sources_scanned: 0,
            candidates_fetched: 0,
            duplicates_skipped: 0,
            rejected: 0,
            accepted: 0,
            drafts_created: 0,
            errors: Vec::new(),
            cancelled: false,
            timed_out: false,
            degraded: false,
        }
    }

    pub fn push_error(&mut self, source_id: &str, kind: &str, message: impl Into<String>) {
        self.errors.push(RunError {
            source_id: source_id.to_string(),
            kind: kind.to_string(),
            message: message.into(),
        });
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.finished_at
            .map(|f| (f - self.started_at).num_milliseconds().max(0))
    }
}

#[derive(Debug)]
pub struct RunHistory {
    inner: Mutex<Vec<RunRecord>>,
    cap: usize,
}

impl RunHistory {
    pub fn with_capacity(cap: usize) -> Self {
        let cap = cap.clamp(1, 10_000);
        Self {
            inner: Mutex::new(Vec::with_capacity(cap)),
            cap,
        }
    }

    pub fn push(&self, run: RunRecord) {
        let mut v = self.inner.lock().expect("history mutex poisoned");
        v.push(run);
        if v.len() > self.cap {
            let excess = v.len() - self.cap;
            v.drain(0..excess);
        }
    }

    /// Newest last.
    pub fn snapshot_last_n(&self, n: usize) -> Vec<RunRecord> {
        let v = self.inner.lock().expect("history mutex poisoned");
        let start = v.len().saturating_sub(n);
        v[start..].to_vec()
    }

    pub fn all(&self) -> Vec<RunRecord> {
        self.inner.lock().expect("history mutex poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("history mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn last(&self) -> Option<RunRecord> {
        self.inner
            .lock()
            .expect("history mutex poisoned")
            .last()
            .cloned()
    }
}
