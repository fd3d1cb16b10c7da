//! The bundled reference [`StorageAdapter`]: single process, single mutex,
//! no persistence across restarts. Suitable for tests and single-process
//! deployments; a Redis- or database-backed adapter is required for
//! multi-process deployments.

use super::StorageAdapter;
use crate::error::StorageError;
use crate::model::{Job, JobError, JobStatus, ListFilter};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

/// Sort key for the per-queue eligibility index: ascending order yields
/// highest priority first (priority negated), then FIFO by `created_at`,
/// with `id` as a tiebreaker so the set never silently collapses two jobs
/// that land on the same priority and timestamp.
type QueueKey = (i64, DateTime<Utc>, String);

fn queue_key(job: &Job) -> QueueKey {
    (-(job.priority as i64), job.created_at, job.id.clone())
}

struct State {
    jobs: HashMap<String, Job>,
    /// `queue -> queued job keys`, maintained only for jobs in `Queued`.
    queued: HashMap<String, BTreeSet<QueueKey>>,
}

/// In-memory [`StorageAdapter`] reference implementation. Cloning an
/// `InMemoryStorage` shares the same underlying state (it wraps an `Arc`
/// internally via `Mutex` being held behind the struct, not copied).
pub struct InMemoryStorage {
    state: Mutex<State>,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self { state: Mutex::new(State { jobs: HashMap::new(), queued: HashMap::new() }) }
    }

    fn not_found(job_id: &str) -> StorageError {
        StorageError::NotFound(job_id.to_string())
    }
}

#[async_trait]
impl StorageAdapter for InMemoryStorage {
    async fn add(&self, job: Job) -> Result<Job, StorageError> {
        let mut state = self.state.lock().unwrap();
        state.queued.entry(job.queue.clone()).or_default().insert(queue_key(&job));
        state.jobs.insert(job.id.clone(), job.clone());
        Ok(job)
    }

    async fn fetch(&self, queue: &str, lease_ttl_ms: u64) -> Result<Option<Job>, StorageError> {
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();

        let Some(keys) = state.queued.get(queue) else { return Ok(None) };
        let eligible_key = keys
            .iter()
            .find(|(_, _, id)| {
                state.jobs.get(id).map(|j| j.available_at <= now).unwrap_or(false)
            })
            .cloned();

        let Some(key) = eligible_key else { return Ok(None) };
        state.queued.get_mut(queue).unwrap().remove(&key);

        let job_id = key.2;
        let job = state.jobs.get_mut(&job_id).ok_or_else(|| Self::not_found(&job_id))?;
        job.status = JobStatus::Running;
        job.attempts += 1;
        job.started_at.get_or_insert(now);
        job.lease_until = Some(now + chrono::Duration::milliseconds(lease_ttl_ms as i64));
        Ok(Some(job.clone()))
    }

    async fn heartbeat(&self, job_id: &str, lease_ttl_ms: u64) -> Result<(), StorageError> {
        let mut state = self.state.lock().unwrap();
        let job = state.jobs.get_mut(job_id).ok_or_else(|| Self::not_found(job_id))?;
        if job.status != JobStatus::Running {
            return Err(StorageError::InvalidTransition(job_id.to_string()));
        }
        job.lease_until = Some(Utc::now() + chrono::Duration::milliseconds(lease_ttl_ms as i64));
        Ok(())
    }

    async fn complete(&self, job_id: &str, result: Value) -> Result<Job, StorageError> {
        let mut state = self.state.lock().unwrap();
        let job = state.jobs.get_mut(job_id).ok_or_else(|| Self::not_found(job_id))?;
        if job.status != JobStatus::Running {
            return Err(StorageError::InvalidTransition(job_id.to_string()));
        }
        job.status = JobStatus::Completed;
        job.result = Some(result);
        job.finished_at = Some(Utc::now());
        job.lease_until = None;
        Ok(job.clone())
    }

    async fn fail(
        &self,
        job_id: &str,
        error: JobError,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<Job, StorageError> {
        let mut state = self.state.lock().unwrap();
        let job = state.jobs.get_mut(job_id).ok_or_else(|| Self::not_found(job_id))?;
        if job.status != JobStatus::Running {
            return Err(StorageError::InvalidTransition(job_id.to_string()));
        }
        job.error = Some(error);
        job.lease_until = None;

        match retry_at {
            Some(available_at) => {
                job.status = JobStatus::Queued;
                job.available_at = available_at;
                let snapshot = job.clone();
                state.queued.entry(snapshot.queue.clone()).or_default().insert(queue_key(&snapshot));
                Ok(snapshot)
            }
            None => {
                job.status = JobStatus::Failed;
                job.finished_at = Some(Utc::now());
                Ok(job.clone())
            }
        }
    }

    async fn cancel(&self, job_id: &str, reason: Option<String>) -> Result<Job, StorageError> {
        let mut state = self.state.lock().unwrap();
        let job = state.jobs.get(job_id).ok_or_else(|| Self::not_found(job_id))?.clone();
        if job.status.is_terminal() {
            return Ok(job);
        }
        if job.status == JobStatus::Queued {
            if let Some(keys) = state.queued.get_mut(&job.queue) {
                keys.remove(&queue_key(&job));
            }
        }
        let job = state.jobs.get_mut(job_id).unwrap();
        job.status = JobStatus::Cancelled;
        job.finished_at = Some(Utc::now());
        job.lease_until = None;
        job.error =
            Some(JobError::new(reason.unwrap_or_else(|| "job cancelled".to_string()), Some("CANCELLED")));
        Ok(job.clone())
    }

    async fn get(&self, job_id: &str) -> Result<Option<Job>, StorageError> {
        Ok(self.state.lock().unwrap().jobs.get(job_id).cloned())
    }

    async fn list(&self, queue: &str, filter: ListFilter) -> Result<Vec<Job>, StorageError> {
        let state = self.state.lock().unwrap();
        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|j| j.queue == queue)
            .filter(|j| filter.status.map(|s| s == j.status).unwrap_or(true))
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs.into_iter().skip(filter.offset).take(filter.limit).collect())
    }
}
