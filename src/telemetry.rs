//! In-memory operational telemetry: a fixed-capacity log ring and the
//! aggregate snapshot derived from run history.
//!
//! Only the scheduler and the auto-publisher append; everything else reads.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::history::RunRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogLine {
    pub at: DateTime<Utc>,
    pub level: LogLevel,
    /// "run", "publish", "import", ...
    pub component: String,
    pub message: String,
}

/// Overwrite-oldest ring buffer of log lines.
#[derive(Debug)]
pub struct LogRing {
    buf: Mutex<VecDeque<LogLine>>,
    cap: usize,
}

impl LogRing {
    pub fn new(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            buf: Mutex::new(VecDeque::with_capacity(cap)),
            cap,
        }
    }

    pub fn push(&self, level: LogLevel, component: &str, message: impl Into<String>) {
        let line = LogLine {
            at: Utc::now(),
            level,
            component: component.to_string(),
            message: message.into(),
        };
        let mut q = self.buf.lock().expect("log ring mutex poisoned");
        if q.len() >= self.cap {
            q.pop_front();
        }
        q.push_back(line);
    }

    pub fn info(&self, component: &str, message: impl Into<String>) {
        self.push(LogLevel::Info, component, message);
    }

    pub fn warn(&self, component: &str, message: impl Into<String>) {
        self.push(LogLevel::Warn, component, message);
    }

    pub fn error(&self, component: &str, message: impl Into<String>) {
        self.push(LogLevel::Error, component, message);
    }

    /// Last `limit` lines, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<LogLine> {
        let q = self.buf.lock().expect("log ring mutex poisoned");
        let start = q.len().saturating_sub(limit);
        q.iter().skip(start).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.buf.lock().expect("log ring mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub runs: usize,
    /// Candidates fetched across the retained runs.
    pub total_processed: usize,
    pub total_created: usize,
    pub average_processing_time_ms: f64,
    /// Share of retained runs that recorded at least one error.
    pub error_rate: f64,
    pub uptime_secs: i64,
    pub sources_count: usize,
    pub cache_size: usize,
    pub source_hygiene: Vec<String>,
    pub degraded_runs: usize,
}

impl MetricsSnapshot {
    pub fn derive(
        runs: &[RunRecord],
        started_at: DateTime<Utc>,
        now: DateTime<Utc>,
        sources_count: usize,
        cache_size: usize,
        source_hygiene: Vec<String>,
    ) -> Self {
        let finished: Vec<i64> = runs.iter().filter_map(RunRecord::duration_ms).collect();
        let avg = if finished.is_empty() {
            0.0
        } else {
            finished.iter().sum::<i64>() as f64 / finished.len() as f64
        };
        let with_errors = runs.iter().filter(|r| !r.errors.is_empty()).count();
        Self {
            runs: runs.len(),
            total_processed: runs.iter().map(|r| r.candidates_fetched).sum(),
            total_created: runs.iter().map(|r| r.drafts_created).sum(),
            average_processing_time_ms: avg,
            error_rate: if runs.is_empty() {
                0.0
            } else {
                with_errors as f64 / runs.len() as f64
            },
            uptime_secs: (now - started_at).num_seconds().max(0),
            sources_count,
            cache_size,
            source_hygiene,
            degraded_runs: runs.iter().filter(|r| r.degraded).count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::RunTrigger;

    #[test]
    fn ring_overwrites_oldest() {
        let ring = LogRing::new(3);
        for i in 0..5 {
            ring.info("run", format!("line {i}"));
        }
        let v = ring.recent(10);
        assert_eq!(v.len(), 3);
        assert_eq!(v[0].message, "line 2");
        assert_eq!(v[2].message, "line 4");
        assert_eq!(ring.recent(1)[0].message, "line 4");
    }

    #[test]
    fn snapshot_aggregates_runs() {
        let t0 = Utc::now();
        let mut a = RunRecord::start(RunTrigger::Scheduled, t0);
        a.candidates_fetched = 10;
        a.drafts_created = 2;
        a.finished_at = Some(t0 + chrono::Duration::milliseconds(100));
        let mut b = RunRecord::start(RunTrigger::Manual, t0);
        b.candidates_fetched = 5;
        b.drafts_created = 1;
        b.push_error("s1", "source_fetch", "boom");
        b.finished_at = Some(t0 + chrono::Duration::milliseconds(300));

        let m = MetricsSnapshot::derive(&[a, b], t0, t0 + chrono::Duration::seconds(42), 3, 7, vec![]);
        assert_eq!(m.total_processed, 15);
        assert_eq!(m.total_created, 3);
        assert_eq!(m.average_processing_time_ms, 200.0);
        assert_eq!(m.error_rate, 0.5);
        assert_eq!(m.uptime_secs, 42);

        let empty = MetricsSnapshot::derive(&[], t0, t0, 0, 0, vec![]);
        assert_eq!(empty.error_rate, 0.0);
        assert_eq!(empty.average_processing_time_ms, 0.0);
    }
}
