//! A Redis-backed [`StorageAdapter`] for multi-process deployments. The
//! in-memory adapter cannot be shared across processes; this one can, at
//! the cost of needing atomicity help from Redis itself.
//!
//! Atomicity of `fetch` (priority select + state transition + lease
//! assignment) is provided by a single [`redis::Script`] rather than
//! `WATCH`/`MULTI`, so a pipeline of commands can't be interleaved by a
//! concurrent fetch from another process.
//!
//! Key scheme (prefix configurable, default `blaize_queue`):
//! - `{prefix}:pending:{queue}` — sorted set, member = job id, score encodes
//!   `(priority desc, created_at asc)` as a single `f64`.
//! - `{prefix}:job:{id}` — hash with fields `payload` (the full job as
//!   JSON) and `available_at_ms` (kept alongside the payload so the fetch
//!   script can check eligibility without deserializing JSON in Lua).
//! - `{prefix}:jobs:{queue}` — set of every job id ever added to `queue`,
//!   used only to support `list`.

use super::StorageAdapter;
use crate::error::StorageError;
use crate::model::{Job, JobError, JobStatus, ListFilter};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use serde_json::Value;
use tokio::sync::Mutex;

/// How many candidates the fetch script inspects before giving up on a
/// scan. Bounds worst-case work when a queue has many not-yet-eligible
/// (delayed retry) jobs ahead of eligible ones.
const FETCH_SCAN_LIMIT: isize = 200;

const FETCH_SCRIPT: &str = r#"
local pending_key = KEYS[1]
local now = tonumber(ARGV[1])
local lease_until = ARGV[2]
local scan_limit = tonumber(ARGV[3])
local job_prefix = ARGV[4]
local candidates = redis.call('ZRANGE', pending_key, 0, scan_limit - 1)
for _, job_id in ipairs(candidates) do
    local job_key = job_prefix .. job_id
    local available_at = redis.call('HGET', job_key, 'available_at_ms')
    if available_at == false then
        redis.call('ZREM', pending_key, job_id)
    elseif tonumber(available_at) <= now then
        redis.call('ZREM', pending_key, job_id)
        redis.call('HSET', job_key, 'lease_until_ms', lease_until)
        return redis.call('HGET', job_key, 'payload')
    end
end
return false
"#;

fn queue_score(priority: u8, created_at: DateTime<Utc>) -> f64 {
    (10 - priority) as f64 * 1e13 + created_at.timestamp_millis() as f64
}

pub struct RedisStorage {
    conn: Mutex<ConnectionManager>,
    prefix: String,
    fetch_script: Script,
}

impl RedisStorage {
    pub async fn connect(redis_url: &str, prefix: impl Into<String>) -> Result<Self, StorageError> {
        let client = redis::Client::open(redis_url).map_err(|e| StorageError::Fatal(e.into()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| StorageError::Fatal(e.into()))?;
        Ok(Self { conn: Mutex::new(conn), prefix: prefix.into(), fetch_script: Script::new(FETCH_SCRIPT) })
    }

    fn pending_key(&self, queue: &str) -> String {
        format!("{}:pending:{queue}", self.prefix)
    }

    fn job_key(&self, job_id: &str) -> String {
        format!("{}:job:{job_id}", self.prefix)
    }

    fn jobs_index_key(&self, queue: &str) -> String {
        format!("{}:jobs:{queue}", self.prefix)
    }

    fn job_prefix(&self) -> String {
        format!("{}:job:", self.prefix)
    }

    async fn write_job(&self, job: &Job) -> Result<(), StorageError> {
        let payload = serde_json::to_string(job).map_err(|e| StorageError::Fatal(e.into()))?;
        let mut conn = self.conn.lock().await;
        let _: () = conn
            .hset_multiple(
                self.job_key(&job.id),
                &[
                    ("payload", payload),
                    ("available_at_ms", job.available_at.timestamp_millis().to_string()),
                ],
            )
            .await
            .map_err(|e| StorageError::Transient(e.into()))?;
        Ok(())
    }

    async fn read_job(&self, job_id: &str) -> Result<Option<Job>, StorageError> {
        let mut conn = self.conn.lock().await;
        let payload: Option<String> = conn
            .hget(self.job_key(job_id), "payload")
            .await
            .map_err(|e| StorageError::Transient(e.into()))?;
        payload
            .map(|raw| serde_json::from_str(&raw).map_err(|e| StorageError::Fatal(e.into())))
            .transpose()
    }

    async fn mutate_running_job(
        &self,
        job_id: &str,
        mutate: impl FnOnce(&mut Job) -> Result<(), StorageError>,
    ) -> Result<Job, StorageError> {
        let mut job = self
            .read_job(job_id)
            .await?
            .ok_or_else(|| StorageError::NotFound(job_id.to_string()))?;
        if job.status != JobStatus::Running {
            return Err(StorageError::InvalidTransition(job_id.to_string()));
        }
        mutate(&mut job)?;
        self.write_job(&job).await?;
        Ok(job)
    }
}

#[async_trait]
impl StorageAdapter for RedisStorage {
    async fn add(&self, job: Job) -> Result<Job, StorageError> {
        self.write_job(&job).await?;
        let mut conn = self.conn.lock().await;
        let _: () = conn
            .zadd(self.pending_key(&job.queue), &job.id, queue_score(job.priority, job.created_at))
            .await
            .map_err(|e| StorageError::Transient(e.into()))?;
        let _: () = conn
            .sadd(self.jobs_index_key(&job.queue), &job.id)
            .await
            .map_err(|e| StorageError::Transient(e.into()))?;
        Ok(job)
    }

    async fn fetch(&self, queue: &str, lease_ttl_ms: u64) -> Result<Option<Job>, StorageError> {
        let now = Utc::now();
        let lease_until = now + chrono::Duration::milliseconds(lease_ttl_ms as i64);

        let payload: Option<String> = {
            let mut conn = self.conn.lock().await;
            self.fetch_script
                .key(self.pending_key(queue))
                .arg(now.timestamp_millis())
                .arg(lease_until.timestamp_millis())
                .arg(FETCH_SCAN_LIMIT)
                .arg(self.job_prefix())
                .invoke_async(&mut *conn)
                .await
                .map_err(|e| StorageError::Transient(e.into()))?
        };

        let Some(raw) = payload else { return Ok(None) };
        let mut job: Job = serde_json::from_str(&raw).map_err(|e| StorageError::Fatal(e.into()))?;
        job.status = JobStatus::Running;
        job.attempts += 1;
        job.started_at.get_or_insert(now);
        job.lease_until = Some(lease_until);
        self.write_job(&job).await?;
        Ok(Some(job))
    }

    async fn heartbeat(&self, job_id: &str, lease_ttl_ms: u64) -> Result<(), StorageError> {
        self.mutate_running_job(job_id, |job| {
            job.lease_until = Some(Utc::now() + chrono::Duration::milliseconds(lease_ttl_ms as i64));
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn complete(&self, job_id: &str, result: Value) -> Result<Job, StorageError> {
        self.mutate_running_job(job_id, |job| {
            job.status = JobStatus::Completed;
            job.result = Some(result);
            job.finished_at = Some(Utc::now());
            job.lease_until = None;
            Ok(())
        })
        .await
    }

    async fn fail(
        &self,
        job_id: &str,
        error: JobError,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<Job, StorageError> {
        let job = self
            .mutate_running_job(job_id, |job| {
                job.error = Some(error);
                job.lease_until = None;
                match retry_at {
                    Some(available_at) => {
                        job.status = JobStatus::Queued;
                        job.available_at = available_at;
                    }
                    None => {
                        job.status = JobStatus::Failed;
                        job.finished_at = Some(Utc::now());
                    }
                }
                Ok(())
            })
            .await?;

        if retry_at.is_some() {
            let mut conn = self.conn.lock().await;
            let _: () = conn
                .zadd(self.pending_key(&job.queue), &job.id, queue_score(job.priority, job.created_at))
                .await
                .map_err(|e| StorageError::Transient(e.into()))?;
        }
        Ok(job)
    }

    async fn cancel(&self, job_id: &str, reason: Option<String>) -> Result<Job, StorageError> {
        let mut job = self
            .read_job(job_id)
            .await?
            .ok_or_else(|| StorageError::NotFound(job_id.to_string()))?;
        if job.status.is_terminal() {
            return Ok(job);
        }
        let was_queued = job.status == JobStatus::Queued;
        job.status = JobStatus::Cancelled;
        job.finished_at = Some(Utc::now());
        job.lease_until = None;
        job.error =
            Some(JobError::new(reason.unwrap_or_else(|| "job cancelled".to_string()), Some("CANCELLED")));
        self.write_job(&job).await?;

        if was_queued {
            let mut conn = self.conn.lock().await;
            let _: () = conn
                .zrem(self.pending_key(&job.queue), &job.id)
                .await
                .map_err(|e| StorageError::Transient(e.into()))?;
        }
        Ok(job)
    }

    async fn get(&self, job_id: &str) -> Result<Option<Job>, StorageError> {
        self.read_job(job_id).await
    }

    async fn list(&self, queue: &str, filter: ListFilter) -> Result<Vec<Job>, StorageError> {
        let ids: Vec<String> = {
            let mut conn = self.conn.lock().await;
            conn.smembers(self.jobs_index_key(queue))
                .await
                .map_err(|e| StorageError::Transient(e.into()))?
        };

        let mut jobs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(job) = self.read_job(&id).await? {
                if filter.status.map(|s| s == job.status).unwrap_or(true) {
                    jobs.push(job);
                }
            }
        }
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs.into_iter().skip(filter.offset).take(filter.limit).collect())
    }
}
