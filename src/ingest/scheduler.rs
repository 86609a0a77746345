// src/ingest/scheduler.rs
//! Scheduler state machine and the background loops.
//!
//! [`SchedulerState`] is plain data: every transition takes `now` so the
//! phase logic is testable without a clock. The facade keeps it behind one
//! mutex and holds that lock only for the transition itself, never across a
//! run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use metrics::gauge;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::config::SentinelConfig;
use crate::error::{Result, SentinelError};
use crate::history::{RunRecord, RunTrigger};
use crate::sentinel::Sentinel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Disabled,
    Idle,
    Running,
    Cooldown,
}

/// What the admin surface reads.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuntimeSnapshot {
    pub phase: Phase,
    pub enabled: bool,
    pub auto_persist: bool,
    pub frequency_ms: u64,
    pub running: bool,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_created: usize,
    pub last_processed: usize,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub max_per_run: usize,
    pub sources_count: usize,
}

#[derive(Debug, Clone)]
pub struct SchedulerState {
    pub enabled: bool,
    pub auto_persist: bool,
    pub frequency_ms: u64,
    pub cooldown_ms: u64,
    pub max_per_run: usize,
    pub running: bool,
    pub running_since: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_created: usize,
    pub last_processed: usize,
    pub cooldown_until: Option<DateTime<Utc>>,
    /// Cancellation flag of the current (or last) run. Replaced on every
    /// `begin`, so a stop aimed at one run never leaks into the next.
    cancel: Arc<AtomicBool>,
}

impl SchedulerState {
    pub fn from_config(cfg: &SentinelConfig, now: DateTime<Utc>) -> Self {
        Self {
            enabled: cfg.enabled,
            auto_persist: cfg.auto_persist,
            frequency_ms: cfg.frequency_ms,
            cooldown_ms: cfg.cooldown_ms,
            max_per_run: cfg.max_per_run,
            running: false,
            running_since: None,
            next_run_at: cfg.enabled.then_some(now),
            last_run_at: None,
            last_created: 0,
            last_processed: 0,
            cooldown_until: None,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn phase(&self, now: DateTime<Utc>) -> Phase {
        if self.running {
            Phase::Running
        } else if !self.enabled {
            Phase::Disabled
        } else if self.cooldown_until.is_some_and(|u| now < u) {
            Phase::Cooldown
        } else {
            Phase::Idle
        }
    }

    /// Enabled, idle, out of cooldown, and `next_run_at` has passed.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.phase(now) == Phase::Idle && self.next_run_at.is_none_or(|t| now >= t)
    }

    /// Enter Running. `Busy` while another run holds the slot, `Disabled`
    /// after a stop, `Cooldown` unless the trigger is forced.
    pub fn begin(&mut self, trigger: RunTrigger, now: DateTime<Utc>) -> Result<()> {
        if self.running {
            return Err(SentinelError::Busy("ingestion run"));
        }
        if !self.enabled {
            return Err(SentinelError::Disabled);
        }
        if trigger != RunTrigger::Forced {
            if let Some(until) = self.cooldown_until.filter(|u| now < *u) {
                return Err(SentinelError::Cooldown { until });
            }
        }
        self.enter_running(now);
        Ok(())
    }

    /// Enter Running for an ad-hoc import. Cooldown does not apply.
    pub fn begin_import(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.running {
            return Err(SentinelError::Busy("ingestion run"));
        }
        if !self.enabled {
            return Err(SentinelError::Disabled);
        }
        self.enter_running(now);
        Ok(())
    }

    fn enter_running(&mut self, now: DateTime<Utc>) {
        self.running = true;
        self.running_since = Some(now);
        self.cancel = Arc::new(AtomicBool::new(false));
    }

    /// Flag observed by the run admitted by the latest `begin`.
    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Any state → Disabled. Cancels the active run, if any; returns whether
    /// one was running.
    pub fn stop(&mut self, now: DateTime<Utc>) -> bool {
        self.set_enabled(false, now);
        if self.running {
            self.cancel.store(true, Ordering::SeqCst);
        }
        self.running
    }

    /// Running → Cooldown after a run, whatever its outcome.
    pub fn finish(&mut self, record: &RunRecord, now: DateTime<Utc>) {
        self.release();
        self.last_run_at = Some(now);
        self.last_created = record.drafts_created;
        self.last_processed = record.candidates_fetched;
        self.cooldown_until = Some(now + ChronoDuration::milliseconds(self.cooldown_ms as i64));
        self.next_run_at = Some(now + ChronoDuration::milliseconds(self.frequency_ms as i64));
    }

    /// Clear Running without touching the schedule (imports, abandoned runs).
    pub fn release(&mut self) {
        self.running = false;
        self.running_since = None;
    }

    pub fn set_enabled(&mut self, on: bool, now: DateTime<Utc>) {
        self.enabled = on;
        if on && self.next_run_at.is_none() {
            self.next_run_at = Some(now);
        }
    }

    pub fn set_frequency_ms(&mut self, ms: u64) -> Result<()> {
        if ms < 1_000 {
            return Err(SentinelError::validation("frequency_ms must be at least 1000"));
        }
        self.frequency_ms = ms;
        if let Some(last) = self.last_run_at {
            self.next_run_at = Some(last + ChronoDuration::milliseconds(ms as i64));
        }
        Ok(())
    }

    pub fn snapshot(&self, now: DateTime<Utc>, sources_count: usize) -> RuntimeSnapshot {
        RuntimeSnapshot {
            phase: self.phase(now),
            enabled: self.enabled,
            auto_persist: self.auto_persist,
            frequency_ms: self.frequency_ms,
            running: self.running,
            next_run_at: self.next_run_at,
            last_run_at: self.last_run_at,
            last_created: self.last_created,
            last_processed: self.last_processed,
            cooldown_until: self.cooldown_until,
            max_per_run: self.max_per_run,
            sources_count,
        }
    }
}

/// Clears Running on drop, so an abandoned run future never wedges the scheduler.
pub struct RunGuard {
    state: Arc<Mutex<SchedulerState>>,
}

impl RunGuard {
    pub fn new(state: Arc<Mutex<SchedulerState>>) -> Self {
        Self { state }
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if let Ok(mut st) = self.state.lock() {
            st.release();
        }
    }
}

/// Background loop: evicts the dedup cache and starts scheduled runs when due.
pub fn spawn_scheduler(sentinel: Arc<Sentinel>, tick: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let now = Utc::now();
            let evicted = sentinel.evict_dedup(now);
            if evicted > 0 {
                tracing::debug!(target: "sentinel", evicted, "dedup entries evicted");
            }
            if !sentinel.is_due(now) {
                continue;
            }
            match sentinel.run_scheduled().await {
                Ok(r) => {
                    gauge!("sentinel_last_run_ts").set(Utc::now().timestamp() as f64);
                    tracing::info!(
                        target: "sentinel",
                        created = r.drafts_created,
                        fetched = r.candidates_fetched,
                        errors = r.errors.len(),
                        "scheduled run finished"
                    );
                }
                // A manual trigger won the race; the next tick re-checks.
                Err(e) => tracing::debug!(target: "sentinel", error = %e, "scheduled run skipped"),
            }
        }
    })
}

/// Auto-publish on its own interval. Disabled configs never spawn.
pub fn spawn_auto_publish(sentinel: Arc<Sentinel>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick fires immediately; skip it so startup does not publish.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match sentinel.auto_publish_sentinel_drafts().await {
                Ok(r) => tracing::info!(
                    target: "publish",
                    processed = r.processed,
                    published = r.published,
                    skipped = r.skipped,
                    "auto-publish pass"
                ),
                Err(e) => tracing::warn!(target: "publish", error = %e, "auto-publish pass failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> (SchedulerState, DateTime<Utc>) {
        let now = Utc::now();
        let cfg = SentinelConfig {
            enabled: true,
            cooldown_ms: 60_000,
            frequency_ms: 600_000,
            ..Default::default()
        };
        (SchedulerState::from_config(&cfg, now), now)
    }

    #[test]
    fn idle_running_cooldown_idle() {
        let (mut st, now) = state();
        assert_eq!(st.phase(now), Phase::Idle);
        assert!(st.is_due(now));

        st.begin(RunTrigger::Scheduled, now).unwrap();
        assert_eq!(st.phase(now), Phase::Running);
        assert!(matches!(
            st.begin(RunTrigger::Manual, now),
            Err(SentinelError::Busy(_))
        ));
        assert!(matches!(
            st.begin(RunTrigger::Forced, now),
            Err(SentinelError::Busy(_))
        ));

        let rec = RunRecord::start(RunTrigger::Scheduled, now);
        st.finish(&rec, now);
        assert_eq!(st.phase(now), Phase::Cooldown);
        let until = st.cooldown_until.unwrap();
        assert!(until >= st.last_run_at.unwrap());
        assert!(matches!(
            st.begin(RunTrigger::Manual, now),
            Err(SentinelError::Cooldown { .. })
        ));

        let later = until + ChronoDuration::seconds(1);
        assert_eq!(st.phase(later), Phase::Idle);
        assert!(!st.is_due(later), "next run is a full frequency away");
        assert!(st.is_due(now + ChronoDuration::milliseconds(600_000)));
    }

    #[test]
    fn forced_run_skips_cooldown() {
        let (mut st, now) = state();
        st.begin(RunTrigger::Manual, now).unwrap();
        st.finish(&RunRecord::start(RunTrigger::Manual, now), now);
        assert!(st.begin(RunTrigger::Forced, now).is_ok());
    }

    #[test]
    fn disabled_is_never_due() {
        let (mut st, now) = state();
        st.set_enabled(false, now);
        assert_eq!(st.phase(now), Phase::Disabled);
        assert!(!st.is_due(now + ChronoDuration::days(1)));
    }

    #[test]
    fn disabled_refuses_every_trigger() {
        let (mut st, now) = state();
        st.set_enabled(false, now);
        for trigger in [RunTrigger::Manual, RunTrigger::Forced, RunTrigger::Scheduled] {
            assert!(matches!(st.begin(trigger, now), Err(SentinelError::Disabled)));
        }
        assert!(matches!(st.begin_import(now), Err(SentinelError::Disabled)));
        assert!(!st.running);

        st.set_enabled(true, now);
        assert!(st.begin(RunTrigger::Manual, now).is_ok());
    }

    #[test]
    fn stop_right_after_begin_reaches_the_run() {
        let (mut st, now) = state();
        st.begin(RunTrigger::Manual, now).unwrap();
        let token = st.cancel_token();
        assert!(st.stop(now));
        assert!(token.load(Ordering::SeqCst));
        assert_eq!(st.phase(now), Phase::Running);
    }

    #[test]
    fn next_run_starts_with_a_clear_token() {
        let (mut st, now) = state();
        st.begin(RunTrigger::Manual, now).unwrap();
        let first = st.cancel_token();
        st.stop(now);
        st.finish(&RunRecord::start(RunTrigger::Manual, now), now);

        st.set_enabled(true, now);
        st.begin(RunTrigger::Forced, now).unwrap();
        assert!(first.load(Ordering::SeqCst));
        assert!(!st.cancel_token().load(Ordering::SeqCst));

        // Stopping while idle leaves the finished run's token alone.
        st.release();
        assert!(!st.stop(now));
        assert!(!st.cancel_token().load(Ordering::SeqCst));
    }

    #[test]
    fn guard_releases_running_on_drop() {
        let (st, now) = state();
        let shared = Arc::new(Mutex::new(st));
        shared.lock().unwrap().begin(RunTrigger::Manual, now).unwrap();
        {
            let _g = RunGuard::new(shared.clone());
        }
        assert!(!shared.lock().unwrap().running);
    }

    #[test]
    fn frequency_is_validated_and_reschedules() {
        let (mut st, now) = state();
        assert!(st.set_frequency_ms(10).is_err());
        st.begin(RunTrigger::Manual, now).unwrap();
        st.finish(&RunRecord::start(RunTrigger::Manual, now), now);
        st.set_frequency_ms(5_000).unwrap();
        assert_eq!(st.next_run_at, Some(now + ChronoDuration::milliseconds(5_000)));
    }
}
