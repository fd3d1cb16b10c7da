//! [`Worker`]: one per queue, owns a concurrency budget, polls storage,
//! runs handlers under a cancellable timeout, and schedules retries with
//! backoff.

use crate::context::JobContext;
use crate::error::{is_marked_permanent, QueueError, ValidationStage};
use crate::event_bus::{to_epoch_ms, EventBus, JobCancelledEvent, JobCompletedEvent, EventJobError, JobFailedEvent, JobProgressEvent};
use crate::logging::Logger;
use crate::model::{Job, JobError, Progress};
use crate::registry::Registry;
use crate::storage::StorageAdapter;
use crate::subscription::SubscriptionBus;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const MIN_POLL_INTERVAL_MS: u64 = 100;
const MAX_POLL_INTERVAL_MS: u64 = 1_000;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub queue: String,
    pub concurrency: usize,
    pub lease_ttl_ms: u64,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

/// Point-in-time counters, readable without blocking the worker loop.
#[derive(Default)]
struct StatsInner {
    jobs_processed: AtomicU64,
    jobs_succeeded: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_retried: AtomicU64,
    jobs_cancelled: AtomicU64,
}

#[derive(Debug, Clone, Default)]
pub struct WorkerStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub jobs_retried: u64,
    pub jobs_cancelled: u64,
}

/// Computes the next-eligible time for a retried job: `base * 2^(attempts-1)`
/// capped at `max_backoff_ms`, scaled by a uniform random factor in
/// `[0.5, 1.5]`.
fn backoff_delay(attempts: u32, base_ms: u64, max_ms: u64) -> chrono::Duration {
    let exponent = attempts.saturating_sub(1).min(32);
    let exponential = base_ms.saturating_mul(1u64.checked_shl(exponent).unwrap_or(u64::MAX).max(1));
    let capped = exponential.min(max_ms);
    let jitter = rand::thread_rng().gen_range(0.5..=1.5);
    chrono::Duration::milliseconds((capped as f64 * jitter) as i64)
}

/// One queue's worker pool: fetches jobs from storage and runs them against
/// the handlers in `registry` with bounded concurrency.
pub struct Worker {
    config: WorkerConfig,
    registry: Arc<Registry>,
    storage: Arc<dyn StorageAdapter>,
    event_bus: Arc<dyn EventBus>,
    subscriptions: SubscriptionBus,
    logger: Arc<dyn Logger>,
    stats: Arc<StatsInner>,
    /// Cancellation token and reason slot for jobs currently executing,
    /// keyed by job id. Populated when a task starts, removed when it
    /// finishes. Used by `cancel_job` to signal a specific in-flight
    /// handler and hand it the caller's cancellation reason.
    running: Arc<Mutex<HashMap<String, (CancellationToken, Arc<Mutex<Option<String>>>)>>>,
    /// Cancelled to stop fetching new work; does not by itself cancel
    /// in-flight handlers (that's `stop_all(graceful: false)`'s job).
    stop_fetching: CancellationToken,
    pool_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Worker {
    pub fn new(
        config: WorkerConfig,
        registry: Arc<Registry>,
        storage: Arc<dyn StorageAdapter>,
        event_bus: Arc<dyn EventBus>,
        subscriptions: SubscriptionBus,
        logger: Arc<dyn Logger>,
    ) -> Self {
        Self {
            config,
            registry,
            storage,
            event_bus,
            subscriptions,
            logger,
            stats: Arc::new(StatsInner::default()),
            running: Arc::new(Mutex::new(HashMap::new())),
            stop_fetching: CancellationToken::new(),
            pool_handles: Mutex::new(Vec::new()),
        }
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            jobs_processed: self.stats.jobs_processed.load(Ordering::Relaxed),
            jobs_succeeded: self.stats.jobs_succeeded.load(Ordering::Relaxed),
            jobs_failed: self.stats.jobs_failed.load(Ordering::Relaxed),
            jobs_retried: self.stats.jobs_retried.load(Ordering::Relaxed),
            jobs_cancelled: self.stats.jobs_cancelled.load(Ordering::Relaxed),
        }
    }

    /// Requests cancellation of `job_id` if it is currently executing on
    /// this worker, recording `reason` for `finish_cancelled` to pick up.
    /// Returns `true` if a running handler was signalled.
    pub fn cancel_running(&self, job_id: &str, reason: Option<String>) -> bool {
        if let Some((token, reason_slot)) = self.running.lock().unwrap().get(job_id) {
            *reason_slot.lock().unwrap() = reason;
            token.cancel();
            true
        } else {
            false
        }
    }

    /// Spawns `concurrency` fetch-execute loops and returns once they are
    /// all running. Each loop holds a semaphore permit for the duration of
    /// one job, so `concurrency` bounds in-flight handlers, not poll rate.
    pub fn start(self: &Arc<Self>) {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut handles = self.pool_handles.lock().unwrap();
        for slot in 0..self.config.concurrency {
            let worker = self.clone();
            let semaphore = semaphore.clone();
            handles.push(tokio::spawn(async move { worker.run_loop(slot, semaphore).await }));
        }
    }

    async fn run_loop(self: Arc<Self>, slot: usize, semaphore: Arc<Semaphore>) {
        let mut poll_interval_ms = MIN_POLL_INTERVAL_MS;
        loop {
            if self.stop_fetching.is_cancelled() {
                break;
            }

            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => permit.expect("semaphore not closed"),
                _ = self.stop_fetching.cancelled() => break,
            };

            match self.storage.fetch(&self.config.queue, self.config.lease_ttl_ms).await {
                Ok(Some(job)) => {
                    poll_interval_ms = MIN_POLL_INTERVAL_MS;
                    let worker = self.clone();
                    tokio::spawn(async move {
                        worker.execute(job).await;
                        drop(permit);
                    });
                }
                Ok(None) => {
                    drop(permit);
                    tokio::select! {
                        _ = tokio::time::sleep(std::time::Duration::from_millis(poll_interval_ms)) => {}
                        _ = self.stop_fetching.cancelled() => break,
                    }
                    poll_interval_ms = (poll_interval_ms * 2).min(MAX_POLL_INTERVAL_MS);
                }
                Err(err) => {
                    drop(permit);
                    self.logger.with("queue", &self.config.queue).error(&format!(
                        "worker slot {slot} fetch failed: {err}"
                    ));
                    tokio::select! {
                        _ = tokio::time::sleep(std::time::Duration::from_millis(poll_interval_ms)) => {}
                        _ = self.stop_fetching.cancelled() => break,
                    }
                    poll_interval_ms = (poll_interval_ms * 2).min(MAX_POLL_INTERVAL_MS);
                }
            }
        }
    }

    /// Runs the full per-job pipeline: registry lookup, input re-validation,
    /// heartbeat ticker, timeout-bounded handler invocation, output
    /// validation, and terminal-state persistence.
    async fn execute(self: Arc<Self>, job: Job) {
        self.stats.jobs_processed.fetch_add(1, Ordering::Relaxed);
        let job_logger: Arc<dyn Logger> = Arc::from(
            self.logger
                .with("job_id", &job.id)
                .with("queue", &job.queue)
                .with("job_type", &job.job_type),
        );

        let Some(definition) = self.registry.get(&job.queue, &job.job_type).map(|d| d.clone()) else {
            let err = QueueError::HandlerNotFound { queue: job.queue.clone(), job_type: job.job_type.clone() };
            job_logger.error(&err.to_string());
            self.finish_failed(&job, err).await;
            return;
        };

        if let Err(errors) = definition.input.parse(&job.data) {
            let err = QueueError::JobValidation { stage: ValidationStage::Processing, errors };
            job_logger.error(&err.to_string());
            self.finish_failed(&job, err).await;
            return;
        }

        let cancellation = CancellationToken::new();
        let cancel_reason: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        self.running
            .lock()
            .unwrap()
            .insert(job.id.clone(), (cancellation.clone(), cancel_reason.clone()));

        let heartbeat_stop = CancellationToken::new();
        let heartbeat_handle = self.spawn_heartbeat(job.id.clone(), heartbeat_stop.clone());

        let job_id = job.id.clone();
        let progress_sink: Arc<dyn Fn(Progress) + Send + Sync> = {
            let subscriptions = self.subscriptions.clone();
            let event_bus = self.event_bus.clone();
            let job_id = job_id.clone();
            Arc::new(move |progress: Progress| {
                subscriptions.publish_progress(&job_id, &progress);
                let event_bus = event_bus.clone();
                let job_id = job_id.clone();
                tokio::spawn(async move {
                    event_bus
                        .publish_progress(JobProgressEvent {
                            job_id,
                            percent: progress.percent,
                            message: progress.message,
                            timestamp: to_epoch_ms(Utc::now()),
                        })
                        .await;
                });
            })
        };

        let context = JobContext::new(job.clone(), cancellation.clone(), progress_sink, job_logger.clone());
        let handler = definition.handler.clone();
        let timeout = std::time::Duration::from_millis(job.timeout_ms);

        let outcome = tokio::select! {
            result = tokio::time::timeout(timeout, handler(context)) => Some(result),
            _ = cancellation.cancelled() => None,
        };

        heartbeat_stop.cancel();
        let _ = heartbeat_handle.await;
        self.running.lock().unwrap().remove(&job_id);

        let Some(outcome) = outcome else {
            let reason = cancel_reason.lock().unwrap().clone();
            self.finish_cancelled(&job, reason).await;
            return;
        };

        match outcome {
            Err(_elapsed) => {
                let err = QueueError::Timeout(job.timeout_ms);
                job_logger.error(&err.to_string());
                self.finish_retriable_or_failed(&job, err).await;
            }
            Ok(Err(handler_err)) => {
                let err = if is_marked_permanent(&handler_err) {
                    QueueError::HandlerPermanent(handler_err)
                } else {
                    QueueError::Handler(handler_err)
                };
                job_logger.error(&err.to_string());
                self.finish_retriable_or_failed(&job, err).await;
            }
            Ok(Ok(output)) => {
                if let Err(errors) = definition.output.parse(&output) {
                    let err = QueueError::JobValidation { stage: ValidationStage::Output, errors };
                    job_logger.error(&err.to_string());
                    self.finish_failed(&job, err).await;
                    return;
                }
                match self.storage.complete(&job.id, output.clone()).await {
                    Ok(_) => {
                        self.stats.jobs_succeeded.fetch_add(1, Ordering::Relaxed);
                        job_logger.info("job completed");
                        self.subscriptions.publish_completed(&job.id, &output);
                        self.event_bus
                            .publish_completed(JobCompletedEvent {
                                job_id: job.id.clone(),
                                result: output,
                                completed_at: to_epoch_ms(Utc::now()),
                            })
                            .await;
                    }
                    Err(storage_err) => {
                        job_logger.error(&format!("storage rejected completion: {storage_err}"));
                    }
                }
            }
        }
    }

    fn spawn_heartbeat(&self, job_id: String, stop: CancellationToken) -> JoinHandle<()> {
        let storage = self.storage.clone();
        let lease_ttl_ms = self.config.lease_ttl_ms;
        let interval = std::time::Duration::from_millis(lease_ttl_ms / 2);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        if storage.heartbeat(&job_id, lease_ttl_ms).await.is_err() {
                            break;
                        }
                    }
                    _ = stop.cancelled() => break,
                }
            }
        })
    }

    /// A handler error that may still have attempts remaining: decide
    /// retry eligibility and persist accordingly.
    async fn finish_retriable_or_failed(&self, job: &Job, err: QueueError) {
        let can_retry = job.can_retry() && err.is_retriable_kind();
        if can_retry {
            let delay = backoff_delay(job.attempts, self.config.base_backoff_ms, self.config.max_backoff_ms);
            let retry_at: DateTime<Utc> = Utc::now() + delay;
            let job_error = JobError::new(err.to_string(), Some(err.code()));
            if self.storage.fail(&job.id, job_error, Some(retry_at)).await.is_ok() {
                self.stats.jobs_retried.fetch_add(1, Ordering::Relaxed);
            }
        } else {
            self.finish_failed(job, err).await;
        }
    }

    /// Persists a terminal failure and publishes `job.failed` to both buses.
    async fn finish_failed(&self, job: &Job, err: QueueError) {
        let job_error = JobError::new(err.to_string(), Some(err.code()));
        if self.storage.fail(&job.id, job_error.clone(), None).await.is_ok() {
            self.stats.jobs_failed.fetch_add(1, Ordering::Relaxed);
            self.subscriptions.publish_failed(&job.id, &job_error);
            self.event_bus
                .publish_failed(JobFailedEvent {
                    job_id: job.id.clone(),
                    error: EventJobError { message: job_error.message, code: job_error.code },
                    failed_at: to_epoch_ms(Utc::now()),
                })
                .await;
        }
    }

    async fn finish_cancelled(&self, job: &Job, reason: Option<String>) {
        if self.storage.cancel(&job.id, reason.clone()).await.is_ok() {
            self.stats.jobs_cancelled.fetch_add(1, Ordering::Relaxed);
            self.subscriptions.publish_cancelled(&job.id, reason.as_deref());
            self.event_bus
                .publish_cancelled(JobCancelledEvent {
                    job_id: job.id.clone(),
                    reason,
                    cancelled_at: to_epoch_ms(Utc::now()),
                })
                .await;
        }
    }

    /// Stops fetching new work. If `graceful`, waits for in-flight handlers
    /// to finish on their own; if not, cancels every running job's context
    /// first so handlers observing [`JobContext::cancelled`] unwind early.
    pub async fn stop(&self, graceful: bool) {
        self.stop_fetching.cancel();

        if !graceful {
            let tokens: Vec<CancellationToken> =
                self.running.lock().unwrap().values().map(|(token, _)| token.clone()).collect();
            for token in tokens {
                token.cancel();
            }
        }

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.pool_handles.lock().unwrap());
        for handle in handles {
            let _ = handle.await;
        }
    }
}
