//! Error taxonomy for the Sentinel pipeline.
//!
//! Library code returns [`SentinelError`]; startup and config loading wrap it
//! with `anyhow` for context.

use chrono::{DateTime, Utc};

/// Why the quality gate refused a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    Duplicate,
    TooShort,
    Unsafe,
    LowQuality,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RejectReason::Duplicate => "duplicate",
            RejectReason::TooShort => "too short",
            RejectReason::Unsafe => "unsafe",
            RejectReason::LowQuality => "low quality",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SentinelError {
    /// Network or parse failure for one source. Isolated to that source.
    #[error("source {source_id} fetch failed: {message}")]
    SourceFetch { source_id: String, message: String },

    /// Enrichment call deferred because the quota or backoff window is active.
    #[error("enrichment rate limit exceeded (retry after {retry_after:?})")]
    RateLimitExceeded { retry_after: Option<DateTime<Utc>> },

    /// Malformed configuration or request input.
    #[error("validation error: {0}")]
    Validation(String),

    /// A trigger arrived while a run is already in progress.
    #[error("busy: {0} is already running")]
    Busy(&'static str),

    /// A run or import was requested while the scheduler is disabled.
    #[error("sentinel is disabled")]
    Disabled,

    /// A run was requested before the cooldown window elapsed.
    #[error("cooling down until {until}")]
    Cooldown { until: DateTime<Utc> },

    /// Draft store read/write failure.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Notification channel failure. Never reverts a publish.
    #[error("notification error: {0}")]
    Notification(String),

    /// Enrichment (AI) call failed or timed out.
    #[error("enrichment error: {0}")]
    Enrichment(String),

    /// A draft with the same slug or fingerprint is already stored.
    #[error("duplicate draft: {0}")]
    Duplicate(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Candidate refused by the quality gate (ad-hoc imports only surface this).
    #[error("candidate rejected: {0}")]
    Rejected(RejectReason),

    #[error("config error: {0}")]
    Config(String),
}

impl SentinelError {
    pub fn fetch(source_id: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::SourceFetch {
            source_id: source_id.into(),
            message: message.to_string(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn persistence(msg: impl std::fmt::Display) -> Self {
        Self::Persistence(msg.to_string())
    }

    /// Short machine-readable kind, used in RunRecord errors and HTTP bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            SentinelError::SourceFetch { .. } => "source_fetch",
            SentinelError::RateLimitExceeded { .. } => "rate_limit_exceeded",
            SentinelError::Validation(_) => "validation",
            SentinelError::Busy(_) => "busy",
            SentinelError::Disabled => "disabled",
            SentinelError::Cooldown { .. } => "cooldown",
            SentinelError::Persistence(_) => "persistence",
            SentinelError::Notification(_) => "notification",
            SentinelError::Enrichment(_) => "enrichment",
            SentinelError::Duplicate(_) => "duplicate",
            SentinelError::NotFound(_) => "not_found",
            SentinelError::Rejected(_) => "rejected",
            SentinelError::Config(_) => "config",
        }
    }
}

pub type Result<T> = std::result::Result<T, SentinelError>;
