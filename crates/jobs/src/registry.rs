//! Job bookkeeping for operational tooling.
//!
//! Records lifecycle timestamps and attempt counts per job. This is the
//! only place a job's outcome is visible; subscribers only ever see
//! message snapshots.

use chrono::{DateTime, Utc};
use orderdesk_core::request::QueryEvent;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;

/// Records kept before the oldest finished ones are dropped.
pub const DEFAULT_MAX_JOBS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: String,
    pub status: JobStatus,
    pub attempts: u32,
    pub submitted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobRecord {
    fn new(id: &str, submitted_at: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            status: JobStatus::Queued,
            attempts: 0,
            submitted_at,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<String, JobRecord>,
    /// Insertion order, oldest first
    order: VecDeque<String>,
}

pub struct JobRegistry {
    inner: RwLock<Inner>,
    max_jobs: usize,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_JOBS)
    }

    pub fn with_capacity(max_jobs: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            max_jobs: max_jobs.max(1),
        }
    }

    pub async fn queued(&self, event: &QueryEvent) {
        let mut inner = self.inner.write().await;
        Self::insert(&mut inner, self.max_jobs, JobRecord::new(&event.id, event.submitted_at));
    }

    /// Mark the job running. Unknown ids (a redelivered event) get a fresh record.
    pub async fn started(&self, event: &QueryEvent) {
        let mut inner = self.inner.write().await;
        if !inner.jobs.contains_key(&event.id) {
            Self::insert(&mut inner, self.max_jobs, JobRecord::new(&event.id, event.submitted_at));
        }
        if let Some(record) = inner.jobs.get_mut(&event.id) {
            record.status = JobStatus::Running;
            record.started_at = Some(Utc::now());
            record.finished_at = None;
            record.error = None;
        }
    }

    /// Count one more attempt; returns the new total.
    pub async fn attempt(&self, id: &str) -> u32 {
        let mut inner = self.inner.write().await;
        match inner.jobs.get_mut(id) {
            Some(record) => {
                record.attempts += 1;
                record.attempts
            }
            None => 0,
        }
    }

    pub async fn completed(&self, id: &str) {
        self.finish(id, JobStatus::Completed, None).await;
    }

    pub async fn failed(&self, id: &str, error: impl Into<String>) {
        self.finish(id, JobStatus::Failed, Some(error.into())).await;
    }

    /// Drop a record that never reached the queue.
    pub async fn remove(&self, id: &str) -> bool {
        let mut inner = self.inner.write().await;
        inner.order.retain(|j| j != id);
        inner.jobs.remove(id).is_some()
    }

    pub async fn get(&self, id: &str) -> Option<JobRecord> {
        self.inner.read().await.jobs.get(id).cloned()
    }

    /// All records, newest first.
    pub async fn list(&self) -> Vec<JobRecord> {
        let inner = self.inner.read().await;
        inner
            .order
            .iter()
            .rev()
            .filter_map(|id| inner.jobs.get(id).cloned())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn finish(&self, id: &str, status: JobStatus, error: Option<String>) {
        let mut inner = self.inner.write().await;
        if let Some(record) = inner.jobs.get_mut(id) {
            record.status = status;
            record.finished_at = Some(Utc::now());
            record.error = error;
        }
    }

    fn insert(inner: &mut Inner, max_jobs: usize, record: JobRecord) {
        if inner.jobs.len() >= max_jobs {
            let evict = inner
                .order
                .iter()
                .position(|id| inner.jobs.get(id).is_some_and(|r| r.status.is_terminal()));
            if let Some(pos) = evict
                && let Some(id) = inner.order.remove(pos)
            {
                inner.jobs.remove(&id);
            }
        }
        inner.order.push_back(record.id.clone());
        inner.jobs.insert(record.id.clone(), record);
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}
