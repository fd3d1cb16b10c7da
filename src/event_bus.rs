//! The external [`EventBus`]: coarse-grained events for systems
//! outside this process (dashboards, audit logs, cross-service notifiers).
//! Distinct from [`crate::subscription::SubscriptionBus`], which is the
//! in-process, per-job fan-out used by callers awaiting one specific job.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// `job.progress`
#[derive(Debug, Clone, Serialize)]
pub struct JobProgressEvent {
    #[serde(rename = "jobId")]
    pub job_id: String,
    pub percent: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Epoch milliseconds, not an ISO string — the wire format external
    /// subscribers parse must not depend on a timezone-aware date library.
    pub timestamp: i64,
}

/// `job.completed`
#[derive(Debug, Clone, Serialize)]
pub struct JobCompletedEvent {
    #[serde(rename = "jobId")]
    pub job_id: String,
    pub result: Value,
    #[serde(rename = "completedAt")]
    pub completed_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventJobError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// `job.failed`
#[derive(Debug, Clone, Serialize)]
pub struct JobFailedEvent {
    #[serde(rename = "jobId")]
    pub job_id: String,
    pub error: EventJobError,
    #[serde(rename = "failedAt")]
    pub failed_at: i64,
}

/// `job.cancelled`
#[derive(Debug, Clone, Serialize)]
pub struct JobCancelledEvent {
    #[serde(rename = "jobId")]
    pub job_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(rename = "cancelledAt")]
    pub cancelled_at: i64,
}

pub(crate) fn to_epoch_ms(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

/// Publishes the four coarse job lifecycle events to whatever external
/// system backs this bus. Implementations must not let a publish failure
/// propagate back into the worker loop — log and swallow instead.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish_progress(&self, event: JobProgressEvent);
    async fn publish_completed(&self, event: JobCompletedEvent);
    async fn publish_failed(&self, event: JobFailedEvent);
    async fn publish_cancelled(&self, event: JobCancelledEvent);
}

/// The bundled [`EventBus`]: logs each event at `debug` via `tracing` and
/// otherwise does nothing. Sufficient for single-process deployments and
/// tests; production deployments typically plug in a message-broker-backed
/// adapter instead.
#[derive(Default)]
pub struct LoggingEventBus;

impl LoggingEventBus {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EventBus for LoggingEventBus {
    async fn publish_progress(&self, event: JobProgressEvent) {
        tracing::debug!(job_id = %event.job_id, percent = event.percent, "job.progress");
    }

    async fn publish_completed(&self, event: JobCompletedEvent) {
        tracing::debug!(job_id = %event.job_id, "job.completed");
    }

    async fn publish_failed(&self, event: JobFailedEvent) {
        tracing::debug!(job_id = %event.job_id, error = %event.error.message, "job.failed");
    }

    async fn publish_cancelled(&self, event: JobCancelledEvent) {
        tracing::debug!(job_id = %event.job_id, "job.cancelled");
    }
}

/// Publishes to Redis Pub/Sub channels `{prefix}.job.progress`,
/// `{prefix}.job.completed`, `{prefix}.job.failed` and `{prefix}.job.cancelled`
/// so that other processes (an SSE gateway, an audit logger) can subscribe
/// without this process knowing who's listening. A publish failure is
/// logged and swallowed, never returned to the worker.
pub struct RedisEventBus {
    conn: tokio::sync::Mutex<redis::aio::ConnectionManager>,
    prefix: String,
}

impl RedisEventBus {
    pub async fn connect(redis_url: &str, prefix: impl Into<String>) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn: tokio::sync::Mutex::new(conn), prefix: prefix.into() })
    }

    async fn publish(&self, topic: &str, payload: &impl Serialize) {
        let channel = format!("{}.{topic}", self.prefix);
        let body = match serde_json::to_string(payload) {
            Ok(body) => body,
            Err(err) => {
                tracing::warn!("failed to serialize {topic} event: {err}");
                return;
            }
        };
        let mut conn = self.conn.lock().await;
        if let Err(err) = redis::AsyncCommands::publish::<_, _, i64>(&mut *conn, &channel, body).await {
            tracing::warn!("failed to publish {topic} to redis: {err}");
        }
    }
}

#[async_trait]
impl EventBus for RedisEventBus {
    async fn publish_progress(&self, event: JobProgressEvent) {
        self.publish("job.progress", &event).await;
    }

    async fn publish_completed(&self, event: JobCompletedEvent) {
        self.publish("job.completed", &event).await;
    }

    async fn publish_failed(&self, event: JobFailedEvent) {
        self.publish("job.failed", &event).await;
    }

    async fn publish_cancelled(&self, event: JobCancelledEvent) {
        self.publish("job.cancelled", &event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_event_serializes_with_epoch_millis_and_camel_case() {
        let event = JobProgressEvent {
            job_id: "job-1".into(),
            percent: 50,
            message: None,
            timestamp: to_epoch_ms(Utc::now()),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["jobId"], "job-1");
        assert!(json.get("message").is_none());
        assert!(json["timestamp"].is_i64());
    }

    #[test]
    fn failed_event_nests_error_message_and_code() {
        let event = JobFailedEvent {
            job_id: "job-2".into(),
            error: EventJobError { message: "boom".into(), code: Some("HANDLER_ERROR".into()) },
            failed_at: 0,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["error"]["message"], "boom");
        assert_eq!(json["error"]["code"], "HANDLER_ERROR");
        assert_eq!(json["failedAt"], 0);
    }
}
