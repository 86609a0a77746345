//! Rate limiter and backoff controller for the enrichment (AI) API.
//!
//! - Fixed-size window counter (`max_requests` per `window_secs`).
//! - Consecutive failures past `failure_threshold` open a backoff window whose
//!   length follows [`BackoffPolicy`]. While it is open the pipeline runs in
//!   degraded mode and synthesizes enrichment locally.
//! - A success resets the failure streak and closes the backoff window.
//!
//! Plain source fetches never consult this limiter.

use std::sync::Mutex;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

/// Growth function for the backoff window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffPolicy {
    Linear,
    #[default]
    Exponential,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window_secs: u64,
    pub failure_threshold: u32,
    pub backoff: BackoffPolicy,
    pub base_backoff_secs: u64,
    pub max_backoff_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 60,
            window_secs: 3600,
            failure_threshold: 3,
            backoff: BackoffPolicy::Exponential,
            base_backoff_secs: 60,
            max_backoff_secs: 3600,
        }
    }
}

impl RateLimitConfig {
    /// Backoff length after `over` failures beyond the threshold (0-based).
    pub fn backoff_for(&self, over: u32) -> ChronoDuration {
        let base = self.base_backoff_secs.max(1);
        let secs = match self.backoff {
            BackoffPolicy::Linear => base.saturating_mul(u64::from(over) + 1),
            BackoffPolicy::Exponential => base.saturating_mul(1u64 << over.min(20)),
        };
        ChronoDuration::seconds(secs.min(self.max_backoff_secs.max(base)) as i64)
    }
}

/// Point-in-time view of the limiter, exposed for telemetry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimitState {
    pub window_start: DateTime<Utc>,
    pub requests_in_window: u32,
    pub max_per_window: u32,
    pub consecutive_failures: u32,
    pub backoff_until: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct RateLimiter {
    cfg: RateLimitConfig,
    state: Mutex<RateLimitState>,
}

impl RateLimiter {
    pub fn new(cfg: RateLimitConfig) -> Self {
        let state = RateLimitState {
            window_start: Utc::now(),
            requests_in_window: 0,
            max_per_window: cfg.max_requests,
            consecutive_failures: 0,
            backoff_until: None,
        };
        Self {
            cfg,
            state: Mutex::new(state),
        }
    }

    /// True if a call would be allowed at `now`. Does NOT count a request.
    pub fn allow(&self, now: DateTime<Utc>) -> bool {
        let mut st = self.state.lock().expect("rate limiter mutex poisoned");
        self.roll_window(&mut st, now);
        Self::open(&st, now)
    }

    /// Check and count one outbound call. Returns `false` when over quota or in backoff.
    pub fn try_acquire(&self, now: DateTime<Utc>) -> bool {
        let mut st = self.state.lock().expect("rate limiter mutex poisoned");
        self.roll_window(&mut st, now);
        if !Self::open(&st, now) {
            return false;
        }
        st.requests_in_window = st.requests_in_window.saturating_add(1);
        true
    }

    pub fn record_success(&self) {
        let mut st = self.state.lock().expect("rate limiter mutex poisoned");
        st.consecutive_failures = 0;
        st.backoff_until = None;
    }

    pub fn record_failure(&self, now: DateTime<Utc>) {
        let mut st = self.state.lock().expect("rate limiter mutex poisoned");
        st.consecutive_failures = st.consecutive_failures.saturating_add(1);
        if st.consecutive_failures >= self.cfg.failure_threshold {
            let over = st.consecutive_failures - self.cfg.failure_threshold;
            let until = now + self.cfg.backoff_for(over);
            tracing::warn!(
                target: "sentinel",
                failures = st.consecutive_failures,
                %until,
                "enrichment backoff engaged; degraded mode"
            );
            st.backoff_until = Some(until);
        }
    }

    /// Degraded mode: failure streak at/over threshold and backoff still open.
    pub fn is_degraded(&self, now: DateTime<Utc>) -> bool {
        let st = self.state.lock().expect("rate limiter mutex poisoned");
        st.consecutive_failures >= self.cfg.failure_threshold
            && st.backoff_until.is_some_and(|u| now < u)
    }

    /// When the current restriction lifts, if any.
    pub fn retry_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut st = self.state.lock().expect("rate limiter mutex poisoned");
        self.roll_window(&mut st, now);
        if let Some(u) = st.backoff_until.filter(|u| now < *u) {
            return Some(u);
        }
        if st.requests_in_window >= st.max_per_window {
            return Some(st.window_start + self.window());
        }
        None
    }

    pub fn snapshot(&self) -> RateLimitState {
        self.state
            .lock()
            .expect("rate limiter mutex poisoned")
            .clone()
    }

    fn window(&self) -> ChronoDuration {
        ChronoDuration::seconds(self.cfg.window_secs.max(1) as i64)
    }

    fn roll_window(&self, st: &mut RateLimitState, now: DateTime<Utc>) {
        if now >= st.window_start + self.window() {
            st.window_start = now;
            st.requests_in_window = 0;
        }
    }

    fn open(st: &RateLimitState, now: DateTime<Utc>) -> bool {
        let in_backoff = st.backoff_until.is_some_and(|u| now < u);
        !in_backoff && st.requests_in_window < st.max_per_window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(max: u32, threshold: u32, policy: BackoffPolicy) -> RateLimitConfig {
        RateLimitConfig {
            max_requests: max,
            window_secs: 3600,
            failure_threshold: threshold,
            backoff: policy,
            base_backoff_secs: 60,
            max_backoff_secs: 600,
        }
    }

    #[test]
    fn quota_is_enforced_per_window() {
        let rl = RateLimiter::new(cfg(2, 3, BackoffPolicy::Exponential));
        let now = Utc::now();
        assert!(rl.try_acquire(now));
        assert!(rl.try_acquire(now));
        assert!(!rl.allow(now));
        assert!(!rl.try_acquire(now));
        assert!(rl.retry_after(now).is_some());

        let next = now + ChronoDuration::seconds(3601);
        assert!(rl.allow(next));
        assert!(rl.try_acquire(next));
    }

    #[test]
    fn threshold_opens_backoff_and_success_resets() {
        let rl = RateLimiter::new(cfg(100, 2, BackoffPolicy::Exponential));
        let now = Utc::now();
        rl.record_failure(now);
        assert!(rl.allow(now));
        assert!(!rl.is_degraded(now));

        rl.record_failure(now);
        assert!(!rl.allow(now));
        assert!(rl.is_degraded(now));
        assert_eq!(rl.snapshot().backoff_until, Some(now + ChronoDuration::seconds(60)));

        // Backoff elapsed: half-open, calls allowed again.
        let later = now + ChronoDuration::seconds(61);
        assert!(rl.allow(later));
        assert!(!rl.is_degraded(later));

        rl.record_success();
        assert_eq!(rl.snapshot().consecutive_failures, 0);
        assert!(rl.snapshot().backoff_until.is_none());
    }

    #[test]
    fn backoff_growth_follows_policy_and_caps() {
        let exp = cfg(1, 1, BackoffPolicy::Exponential);
        assert_eq!(exp.backoff_for(0).num_seconds(), 60);
        assert_eq!(exp.backoff_for(1).num_seconds(), 120);
        assert_eq!(exp.backoff_for(2).num_seconds(), 240);
        assert_eq!(exp.backoff_for(10).num_seconds(), 600);

        let lin = cfg(1, 1, BackoffPolicy::Linear);
        assert_eq!(lin.backoff_for(0).num_seconds(), 60);
        assert_eq!(lin.backoff_for(2).num_seconds(), 180);
    }
}
