//! Draft/publish persistence boundary.
//!
//! The pipeline only needs insert/find/update semantics; no multi-record
//! transactions. [`MemoryStore`] backs tests and single-process use,
//! [`JsonFileStore`] persists a snapshot file (write to tmp, then rename).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::draft::{Draft, DraftStatus};
use crate::error::{Result, SentinelError};
use crate::history::RunRecord;

/// Filter for `find_drafts`. Results are ordered oldest first.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DraftQuery {
    pub status: Option<DraftStatus>,
    pub author: Option<String>,
    pub limit: Option<usize>,
}

impl DraftQuery {
    fn matches(&self, d: &Draft) -> bool {
        self.status.is_none_or(|s| d.status == s)
            && self.author.as_deref().is_none_or(|a| d.author == a)
    }
}

#[async_trait]
pub trait DraftStore: Send + Sync {
    async fn insert_draft(&self, draft: Draft) -> Result<Draft>;
    async fn find_drafts(&self, query: &DraftQuery) -> Result<Vec<Draft>>;
    async fn get_draft(&self, id: Uuid) -> Result<Draft>;
    async fn update_status(
        &self,
        id: Uuid,
        status: DraftStatus,
        published_at: Option<DateTime<Utc>>,
    ) -> Result<Draft>;
    /// Compare-and-set on status: moves the draft to `to` only if it is still
    /// `from`, otherwise leaves it untouched and returns `Validation`.
    async fn transition_status(
        &self,
        id: Uuid,
        from: DraftStatus,
        to: DraftStatus,
        published_at: Option<DateTime<Utc>>,
    ) -> Result<Draft>;
    /// Human moderation hook.
    async fn set_approved(&self, id: Uuid, approved: bool) -> Result<Draft>;
    async fn save_run(&self, run: &RunRecord) -> Result<()>;
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct Snapshot {
    drafts: Vec<Draft>,
    runs: Vec<RunRecord>,
}

impl Snapshot {
    fn insert(&mut self, draft: Draft) -> Result<Draft> {
        if self.drafts.iter().any(|d| d.slug == draft.slug) {
            return Err(SentinelError::Duplicate(format!(
                "slug '{}' already exists",
                draft.slug
            )));
        }
        if self.drafts.iter().any(|d| d.fingerprint == draft.fingerprint) {
            return Err(SentinelError::Duplicate(format!(
                "fingerprint {} already exists",
                draft.fingerprint
            )));
        }
        self.drafts.push(draft.clone());
        Ok(draft)
    }

    fn find(&self, q: &DraftQuery) -> Vec<Draft> {
        let mut v: Vec<Draft> = self.drafts.iter().filter(|d| q.matches(d)).cloned().collect();
        v.sort_by_key(|d| d.created_at);
        if let Some(n) = q.limit {
            v.truncate(n);
        }
        v
    }

    fn get_mut(&mut self, id: Uuid) -> Result<&mut Draft> {
        self.drafts
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| SentinelError::NotFound(format!("draft {id}")))
    }

    fn transition(
        &mut self,
        id: Uuid,
        from: DraftStatus,
        to: DraftStatus,
        published_at: Option<DateTime<Utc>>,
    ) -> Result<Draft> {
        let d = self.get_mut(id)?;
        if d.status != from {
            return Err(SentinelError::validation(format!(
                "draft {id} is {:?}, expected {from:?}",
                d.status
            )));
        }
        d.status = to;
        d.published_at = published_at;
        Ok(d.clone())
    }
}

/// In-memory store. `fail_writes` simulates an unavailable backend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Snapshot>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self, on: bool) {
        self.fail_writes.store(on, Ordering::SeqCst);
    }

    pub fn runs(&self) -> Vec<RunRecord> {
        self.inner.read().expect("store lock poisoned").runs.clone()
    }

    pub fn drafts(&self) -> Vec<Draft> {
        self.inner.read().expect("store lock poisoned").drafts.clone()
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SentinelError::persistence("store unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl DraftStore for MemoryStore {
    async fn insert_draft(&self, draft: Draft) -> Result<Draft> {
        self.check_writable()?;
        self.inner.write().expect("store lock poisoned").insert(draft)
    }

    async fn find_drafts(&self, query: &DraftQuery) -> Result<Vec<Draft>> {
        Ok(self.inner.read().expect("store lock poisoned").find(query))
    }

    async fn get_draft(&self, id: Uuid) -> Result<Draft> {
        let g = self.inner.read().expect("store lock poisoned");
        g.drafts
            .iter()
            .find(|d| d.id == id)
            .cloned()
            .ok_or_else(|| SentinelError::NotFound(format!("draft {id}")))
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: DraftStatus,
        published_at: Option<DateTime<Utc>>,
    ) -> Result<Draft> {
        self.check_writable()?;
        let mut g = self.inner.write().expect("store lock poisoned");
        let d = g.get_mut(id)?;
        d.status = status;
        d.published_at = published_at;
        Ok(d.clone())
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: DraftStatus,
        to: DraftStatus,
        published_at: Option<DateTime<Utc>>,
    ) -> Result<Draft> {
        self.check_writable()?;
        self.inner
            .write()
            .expect("store lock poisoned")
            .transition(id, from, to, published_at)
    }

    async fn set_approved(&self, id: Uuid, approved: bool) -> Result<Draft> {
        self.check_writable()?;
        let mut g = self.inner.write().expect("store lock poisoned");
        let d = g.get_mut(id)?;
        d.approved = approved;
        Ok(d.clone())
    }

    async fn save_run(&self, run: &RunRecord) -> Result<()> {
        self.check_writable()?;
        self.inner
            .write()
            .expect("store lock poisoned")
            .runs
            .push(run.clone());
        Ok(())
    }
}

/// Snapshot-file store: every write rewrites `path` atomically.
pub struct JsonFileStore {
    path: PathBuf,
    inner: tokio::sync::Mutex<Snapshot>,
    max_runs: usize,
}

impl JsonFileStore {
    /// Open (or create) the snapshot at `path`.
    pub fn open(path: impl AsRef<Path>, max_runs: usize) -> anyhow::Result<Self> {
        use anyhow::Context;
        let path = path.as_ref().to_path_buf();
        let snap = if path.exists() {
            let s = std::fs::read_to_string(&path)
                .with_context(|| format!("reading store {}", path.display()))?;
            serde_json::from_str(&s).with_context(|| format!("parsing store {}", path.display()))?
        } else {
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("creating {}", dir.display()))?;
            }
            Snapshot::default()
        };
        Ok(Self {
            path,
            inner: tokio::sync::Mutex::new(snap),
            max_runs: max_runs.max(1),
        })
    }

    async fn persist(&self, snap: &Snapshot) -> Result<()> {
        let json = serde_json::to_vec_pretty(snap).map_err(SentinelError::persistence)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(SentinelError::persistence)?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(SentinelError::persistence)?;
        Ok(())
    }

    /// Apply `f` to a copy and commit it only if the file write succeeds.
    async fn mutate<T>(&self, f: impl FnOnce(&mut Snapshot) -> Result<T>) -> Result<T> {
        let mut g = self.inner.lock().await;
        let mut next = g.clone();
        let out = f(&mut next)?;
        self.persist(&next).await?;
        *g = next;
        Ok(out)
    }
}

#[async_trait]
impl DraftStore for JsonFileStore {
    async fn insert_draft(&self, draft: Draft) -> Result<Draft> {
        self.mutate(|s| s.insert(draft)).await
    }

    async fn find_drafts(&self, query: &DraftQuery) -> Result<Vec<Draft>> {
        Ok(self.inner.lock().await.find(query))
    }

    async fn get_draft(&self, id: Uuid) -> Result<Draft> {
        let g = self.inner.lock().await;
        g.drafts
            .iter()
            .find(|d| d.id == id)
            .cloned()
            .ok_or_else(|| SentinelError::NotFound(format!("draft {id}")))
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: DraftStatus,
        published_at: Option<DateTime<Utc>>,
    ) -> Result<Draft> {
        self.mutate(|s| {
            let d = s.get_mut(id)?;
            d.status = status;
            d.published_at = published_at;
            Ok(d.clone())
        })
        .await
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: DraftStatus,
        to: DraftStatus,
        published_at: Option<DateTime<Utc>>,
    ) -> Result<Draft> {
        self.mutate(|s| s.transition(id, from, to, published_at)).await
    }

    async fn set_approved(&self, id: Uuid, approved: bool) -> Result<Draft> {
        self.mutate(|s| {
            let d = s.get_mut(id)?;
            d.approved = approved;
            Ok(d.clone())
        })
        .await
    }

    async fn save_run(&self, run: &RunRecord) -> Result<()> {
        let max = self.max_runs;
        self.mutate(|s| {
            s.runs.push(run.clone());
            if s.runs.len() > max {
                let excess = s.runs.len() - max;
                s.runs.drain(0..excess);
            }
            Ok(())
        })
        .await
    }
}
