//! The persisted [`Job`] entity and its lifecycle types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Lifecycle state of a job. See the state machine in the module docs of
/// [`crate::storage`] for the legal transitions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }
}

/// Last progress update reported by a running handler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Progress {
    pub percent: u8,
    pub message: Option<String>,
}

impl Progress {
    /// Clamps `percent` into `[0, 100]` per the boundary behavior in the job
    /// queue spec: out-of-range progress is still delivered, just clamped.
    pub fn new(percent: i64, message: Option<String>) -> Self {
        let clamped = percent.clamp(0, 100) as u8;
        Self { percent: clamped, message }
    }
}

/// Terminal error recorded on a `failed` or `cancelled` job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobError {
    pub message: String,
    pub code: Option<String>,
}

impl JobError {
    pub fn new(message: impl Into<String>, code: Option<&str>) -> Self {
        Self { message: message.into(), code: code.map(|c| c.to_string()) }
    }
}

/// The authoritative, storage-owned record for one unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub queue: String,
    pub job_type: String,
    pub data: Value,
    pub status: JobStatus,
    pub priority: u8,
    pub attempts: u32,
    pub max_retries: u32,
    pub timeout_ms: u64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result: Option<Value>,
    pub error: Option<JobError>,
    pub progress: Option<Progress>,
    pub metadata: HashMap<String, Value>,
    pub lease_until: Option<DateTime<Utc>>,
    /// Earliest time this job becomes eligible for `fetch` again; used to
    /// implement retry backoff without requiring a separate delayed queue.
    pub available_at: DateTime<Utc>,
}

impl Job {
    pub fn new(
        id: String,
        queue: String,
        job_type: String,
        data: Value,
        priority: u8,
        max_retries: u32,
        timeout_ms: u64,
        metadata: HashMap<String, Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            queue,
            job_type,
            data,
            status: JobStatus::Queued,
            priority,
            attempts: 0,
            max_retries,
            timeout_ms,
            created_at: now,
            started_at: None,
            finished_at: None,
            result: None,
            error: None,
            progress: None,
            metadata,
            lease_until: None,
            available_at: now,
        }
    }

    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_retries + 1
    }
}

/// Paged read filter for [`crate::storage::StorageAdapter::list`].
#[derive(Debug, Clone)]
pub struct ListFilter {
    pub status: Option<JobStatus>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for ListFilter {
    fn default() -> Self {
        Self { status: None, limit: 100, offset: 0 }
    }
}
