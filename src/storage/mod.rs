//! The [`StorageAdapter`] contract and the bundled implementations.
//!
//! Lifecycle state machine enforced by every adapter:
//!
//! ```text
//! queued --fetch--> running --complete--> completed
//!   ^                 |  |--fail(retriable, attempts left)--> queued
//!   |                 |--fail(fatal or attempts exhausted)--> failed
//!   |-----------------|--cancel-------------------------------> cancelled
//! ```
//!
//! `fetch` must be atomic with respect to concurrent callers: two workers
//! racing to fetch the same queue must never both receive the same job.

pub mod memory;
pub mod redis;

pub use memory::InMemoryStorage;
pub use redis::RedisStorage;

use crate::error::StorageError;
use crate::model::{Job, JobError, ListFilter};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Persists and arbitrates access to jobs. Implementations must be `Send +
/// Sync` and safely callable from many workers concurrently.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Inserts a new job in `queued` state. The caller has already
    /// validated `job.data` against the job definition's input schema.
    async fn add(&self, job: Job) -> Result<Job, StorageError>;

    /// Atomically claims and returns the highest-priority eligible job for
    /// `queue` (ties broken by `created_at` FIFO), moving it to `running`
    /// and setting `lease_until = now + lease_ttl`. Returns `Ok(None)` when
    /// no eligible job exists; this is not an error.
    async fn fetch(&self, queue: &str, lease_ttl_ms: u64) -> Result<Option<Job>, StorageError>;

    /// Extends the lease on a still-running job. Fails with
    /// [`StorageError::InvalidTransition`] if the job is no longer running
    /// under this worker's lease (e.g. it was already reclaimed).
    async fn heartbeat(&self, job_id: &str, lease_ttl_ms: u64) -> Result<(), StorageError>;

    /// Marks a running job completed with `result`.
    async fn complete(&self, job_id: &str, result: Value) -> Result<Job, StorageError>;

    /// Records a failed attempt. If `retry_at` is `Some`, the job returns to
    /// `queued` with `available_at = retry_at` and `attempts` incremented;
    /// otherwise it moves to the terminal `failed` state.
    async fn fail(
        &self,
        job_id: &str,
        error: JobError,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<Job, StorageError>;

    /// Cancels a job in `queued` or `running` state. Idempotent: a job that
    /// is already terminal is returned unchanged rather than erroring.
    async fn cancel(&self, job_id: &str, reason: Option<String>) -> Result<Job, StorageError>;

    async fn get(&self, job_id: &str) -> Result<Option<Job>, StorageError>;

    async fn list(&self, queue: &str, filter: ListFilter) -> Result<Vec<Job>, StorageError>;
}
