//! Dedup cache: bounded fingerprint memory with sliding TTL and
//! oldest-first eviction once capacity is exceeded.
//!
//! Entries live in a map (fingerprint → last seen) plus an insertion-ordered
//! queue. Re-remembering a fingerprint pushes a fresh queue entry; stale queue
//! entries are skipped during eviction by comparing timestamps with the map.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sha2::{Digest, Sha256};

/// Stable content hash over normalized title + first `body_chars` characters of body.
///
/// Case and whitespace differences do not change the result, so the same story
/// re-fetched from another source maps to the same fingerprint.
pub fn fingerprint(title: &str, body: &str, body_chars: usize) -> String {
    let title = fold(title);
    let body: String = fold(body).chars().take(body_chars).collect();

    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update([0x1f]);
    hasher.update(body.as_bytes());
    let digest = hasher.finalize();

    let mut out = String::with_capacity(32);
    for b in digest.iter().take(16) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

fn fold(s: &str) -> String {
    s.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone)]
pub struct DedupCache {
    retention: ChronoDuration,
    capacity: usize,
    entries: HashMap<String, DateTime<Utc>>,
    order: VecDeque<(String, DateTime<Utc>)>,
}

impl DedupCache {
    /// `capacity` of 0 is treated as 1.
    pub fn new(retention: ChronoDuration, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            retention,
            capacity,
            entries: HashMap::with_capacity(capacity.min(4096)),
            order: VecDeque::with_capacity(capacity.min(4096)),
        }
    }

    pub fn with_hours(retention_hours: u64, capacity: usize) -> Self {
        Self::new(ChronoDuration::hours(retention_hours as i64), capacity)
    }

    /// True if the fingerprint was remembered within the retention window.
    pub fn seen(&self, fp: &str, now: DateTime<Utc>) -> bool {
        self.entries
            .get(fp)
            .is_some_and(|ts| now.signed_duration_since(*ts) <= self.retention)
    }

    /// Remember (or refresh) a fingerprint, then evict.
    pub fn remember(&mut self, fp: &str, now: DateTime<Utc>) {
        self.entries.insert(fp.to_string(), now);
        self.order.push_back((fp.to_string(), now));
        self.evict(now);
    }

    /// Drop expired entries, then the oldest live entries above capacity.
    /// Returns the number of fingerprints removed.
    pub fn evict(&mut self, now: DateTime<Utc>) -> usize {
        let mut removed = 0usize;
        while let Some((fp, ts)) = self.order.front().cloned() {
            let live = self.entries.get(&fp).copied();
            if live != Some(ts) {
                // Superseded by a later remember() or already evicted.
                self.order.pop_front();
                continue;
            }
            let expired = now.signed_duration_since(ts) > self.retention;
            if expired || self.entries.len() > self.capacity {
                self.order.pop_front();
                self.entries.remove(&fp);
                removed += 1;
            } else {
                break;
            }
        }
        // Bound the order queue too, in case of heavy re-remembering.
        if self.order.len() > self.capacity.saturating_mul(4) {
            let entries = &self.entries;
            self.order.retain(|(fp, ts)| entries.get(fp) == Some(ts));
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
