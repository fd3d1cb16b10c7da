//! [`QueueService`]: the plugin's public surface — `add`, `cancel_job`,
//! `get_job`, `subscribe`, `start_all`, `stop_all` — assembled by
//! [`QueueServiceBuilder`] from a storage adapter, an event bus, a logger,
//! and the set of [`JobDefinition`]s the application registers.

use crate::config::QueuePluginConfig;
use crate::error::{ConfigurationError, QueueError, ValidationStage};
use crate::event_bus::{to_epoch_ms, EventBus, JobCancelledEvent, LoggingEventBus};
use crate::job::JobDefinition;
use crate::logging::{Logger, TracingLogger};
use crate::model::{Job, ListFilter};
use crate::registry::Registry;
use crate::storage::{InMemoryStorage, StorageAdapter};
use crate::subscription::{Callbacks, SubscriptionBus, Unsubscribe};
use crate::worker::{Worker, WorkerConfig, WorkerStats};
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use ulid::Ulid;

/// Per-call overrides passed to [`QueueService::add`]. Each field, if set,
/// wins over the job definition's defaults, which in turn win over the
/// queue's configured defaults.
#[derive(Debug, Clone, Default)]
pub struct AddOptions {
    pub priority: Option<u8>,
    pub timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub metadata: HashMap<String, Value>,
}

const DEFAULT_PRIORITY: u8 = 5;

/// The assembled plugin: a handler registry, a storage adapter, an event
/// bus, and one [`Worker`] per distinct queue referenced by a registered
/// [`JobDefinition`].
pub struct QueueService {
    config: QueuePluginConfig,
    storage: Arc<dyn StorageAdapter>,
    event_bus: Arc<dyn EventBus>,
    logger: Arc<dyn Logger>,
    registry: Arc<Registry>,
    subscriptions: SubscriptionBus,
    workers: HashMap<String, Arc<Worker>>,
}

impl QueueService {
    pub fn builder() -> QueueServiceBuilder {
        QueueServiceBuilder::new()
    }

    /// Looks up the `(queue, job_type)` registration, validates `data`
    /// against its input schema, merges `options` over the definition's and
    /// queue's defaults, persists the new job, and returns its id.
    pub async fn add(
        &self,
        queue: &str,
        job_type: &str,
        data: Value,
        options: AddOptions,
    ) -> Result<String, QueueError> {
        let definition = self.registry.get(queue, job_type).ok_or_else(|| {
            QueueError::HandlerNotFound { queue: queue.to_string(), job_type: job_type.to_string() }
        })?;

        definition
            .input
            .parse(&data)
            .map_err(|errors| QueueError::JobValidation { stage: ValidationStage::Enqueue, errors })?;

        let priority = options
            .priority
            .or(definition.defaults.priority)
            .unwrap_or(DEFAULT_PRIORITY);
        let timeout_ms = options
            .timeout_ms
            .or(definition.defaults.timeout_ms)
            .unwrap_or_else(|| self.config.timeout_ms_for(queue));
        let max_retries = options
            .max_retries
            .or(definition.defaults.max_retries)
            .unwrap_or_else(|| self.config.max_retries_for(queue));

        let mut metadata = definition.defaults.metadata.clone();
        metadata.extend(options.metadata);

        let job = Job::new(
            Ulid::new().to_string(),
            queue.to_string(),
            job_type.to_string(),
            data,
            priority,
            max_retries,
            timeout_ms,
            metadata,
        );

        let job = self.storage.add(job).await?;
        self.logger.with("job_id", &job.id).info("job enqueued");
        Ok(job.id)
    }

    /// Requests cancellation of `job_id`. If it is currently running on one
    /// of this service's workers, the handler's cancellation signal fires
    /// immediately and the worker itself publishes `cancelled` once the
    /// handler unwinds; if it is still queued, storage transitions it
    /// straight to `cancelled` and this method publishes `cancelled` to both
    /// the subscription bus and the event bus itself. Calling this again on
    /// an already-terminal job is a no-op and publishes nothing a second
    /// time. Returns [`QueueError::HandlerNotFound`]-shaped lookup failure
    /// only in the sense that an unknown id surfaces as storage's own
    /// not-found error via [`QueueError::Storage`].
    pub async fn cancel_job(&self, job_id: &str, reason: Option<String>) -> Result<(), QueueError> {
        let signalled =
            self.workers.values().any(|worker| worker.cancel_running(job_id, reason.clone()));
        if !signalled {
            let was_terminal = self
                .storage
                .get(job_id)
                .await?
                .map(|job| job.status.is_terminal())
                .unwrap_or(false);
            let job = self.storage.cancel(job_id, reason.clone()).await?;
            if !was_terminal {
                self.subscriptions.publish_cancelled(job_id, reason.as_deref());
                self.event_bus
                    .publish_cancelled(JobCancelledEvent {
                        job_id: job.id.clone(),
                        reason,
                        cancelled_at: to_epoch_ms(Utc::now()),
                    })
                    .await;
            }
        }
        Ok(())
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<Job>, QueueError> {
        Ok(self.storage.get(job_id).await?)
    }

    pub async fn list_jobs(&self, queue: &str, filter: ListFilter) -> Result<Vec<Job>, QueueError> {
        Ok(self.storage.list(queue, filter).await?)
    }

    /// Registers per-job callbacks on the in-process subscription bus.
    /// Subscribing after a terminal event has already fired never delivers
    /// it — callers that need the final state should check
    /// [`QueueService::get_job`] first.
    pub fn subscribe(&self, job_id: impl Into<String>, callbacks: Callbacks) -> Unsubscribe {
        self.subscriptions.subscribe(job_id, callbacks)
    }

    pub fn start_all(&self) {
        for worker in self.workers.values() {
            worker.start();
        }
    }

    /// Stops every queue's worker pool. `graceful = true` waits for
    /// in-flight handlers to finish on their own; `graceful = false`
    /// cancels them via their [`crate::context::JobContext`] signal first.
    pub async fn stop_all(&self, graceful: bool) {
        for worker in self.workers.values() {
            worker.stop(graceful).await;
        }
    }

    pub fn worker_stats(&self, queue: &str) -> Option<WorkerStats> {
        self.workers.get(queue).map(|w| w.stats())
    }
}

/// Assembles a [`QueueService`]. Defaults: [`InMemoryStorage`] if no storage
/// adapter is supplied, [`LoggingEventBus`] if no event bus is supplied,
/// [`TracingLogger`] if no logger is supplied.
pub struct QueueServiceBuilder {
    config: QueuePluginConfig,
    storage: Option<Arc<dyn StorageAdapter>>,
    event_bus: Option<Arc<dyn EventBus>>,
    logger: Option<Arc<dyn Logger>>,
    definitions: Vec<JobDefinition>,
}

impl Default for QueueServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueServiceBuilder {
    pub fn new() -> Self {
        Self {
            config: QueuePluginConfig::default(),
            storage: None,
            event_bus: None,
            logger: None,
            definitions: Vec::new(),
        }
    }

    pub fn config(mut self, config: QueuePluginConfig) -> Self {
        self.config = config;
        self
    }

    pub fn storage(mut self, storage: Arc<dyn StorageAdapter>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn event_bus(mut self, event_bus: Arc<dyn EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn register(mut self, definition: JobDefinition) -> Self {
        self.definitions.push(definition);
        self
    }

    pub fn register_all(mut self, definitions: impl IntoIterator<Item = JobDefinition>) -> Self {
        self.definitions.extend(definitions);
        self
    }

    pub fn build(self) -> Result<QueueService, ConfigurationError> {
        if self.definitions.is_empty() {
            return Err(ConfigurationError::NoQueuesConfigured);
        }

        let mut registry = Registry::new();
        for definition in self.definitions {
            registry.insert(definition)?;
        }
        let registry = Arc::new(registry);

        let storage = self.storage.unwrap_or_else(|| Arc::new(InMemoryStorage::new()));
        let event_bus = self.event_bus.unwrap_or_else(|| Arc::new(LoggingEventBus::new()));
        let logger: Arc<dyn Logger> = self.logger.unwrap_or_else(|| Arc::new(TracingLogger::new()));
        let subscriptions = SubscriptionBus::new();

        let mut workers = HashMap::new();
        for queue in registry.queues() {
            let worker_config = WorkerConfig {
                queue: queue.clone(),
                concurrency: self.config.concurrency_for(&queue),
                lease_ttl_ms: self.config.lease_ttl_ms,
                base_backoff_ms: self.config.base_backoff_ms_for(&queue),
                max_backoff_ms: self.config.max_backoff_ms_for(&queue),
            };
            let worker = Arc::new(Worker::new(
                worker_config,
                registry.clone(),
                storage.clone(),
                event_bus.clone(),
                subscriptions.clone(),
                logger.clone(),
            ));
            workers.insert(queue, worker);
        }

        Ok(QueueService {
            config: self.config,
            storage,
            event_bus,
            logger,
            registry,
            subscriptions,
            workers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::define_job;
    use serde_json::json;

    fn echo_definition() -> JobDefinition {
        define_job("emails", "email:send")
            .handler(|ctx| async move { Ok::<_, anyhow::Error>(ctx.data.clone()) })
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn add_rejects_unknown_job_type() {
        let service = QueueService::builder().register(echo_definition()).build().unwrap();
        let err = service.add("emails", "email:unknown", json!({}), AddOptions::default()).await;
        assert!(matches!(err, Err(QueueError::HandlerNotFound { .. })));
    }

    #[tokio::test]
    async fn add_persists_job_with_default_priority() {
        let service = QueueService::builder().register(echo_definition()).build().unwrap();
        let job_id = service
            .add("emails", "email:send", json!({"to": "a@example.com"}), AddOptions::default())
            .await
            .unwrap();

        let job = service.get_job(&job_id).await.unwrap().unwrap();
        assert_eq!(job.priority, DEFAULT_PRIORITY);
        assert_eq!(job.queue, "emails");
    }

    #[tokio::test]
    async fn add_options_override_definition_defaults() {
        let definition = define_job("emails", "email:send")
            .priority(1)
            .handler(|ctx| async move { Ok::<_, anyhow::Error>(ctx.data.clone()) })
            .build()
            .unwrap();
        let service = QueueService::builder().register(definition).build().unwrap();

        let job_id = service
            .add(
                "emails",
                "email:send",
                json!({}),
                AddOptions { priority: Some(9), ..Default::default() },
            )
            .await
            .unwrap();

        let job = service.get_job(&job_id).await.unwrap().unwrap();
        assert_eq!(job.priority, 9);
    }

    #[test]
    fn build_fails_with_no_registered_jobs() {
        let result = QueueService::builder().build();
        assert!(matches!(result, Err(ConfigurationError::NoQueuesConfigured)));
    }

    #[tokio::test]
    async fn cancelling_a_queued_job_notifies_subscribers() {
        use std::sync::{Arc, Mutex};

        // No start_all(): the job stays queued, so cancel_job falls through
        // to the storage.cancel branch instead of signalling a worker.
        let service = QueueService::builder().register(echo_definition()).build().unwrap();
        let job_id = service
            .add("emails", "email:send", json!({}), AddOptions::default())
            .await
            .unwrap();

        let seen = Arc::new(Mutex::new(None));
        let seen_clone = seen.clone();
        service.subscribe(
            job_id.clone(),
            Callbacks {
                on_cancelled: Some(Box::new(move |reason| {
                    *seen_clone.lock().unwrap() = Some(reason.map(str::to_string));
                })),
                ..Default::default()
            },
        );

        service.cancel_job(&job_id, Some("no longer needed".into())).await.unwrap();
        assert_eq!(seen.lock().unwrap().clone().flatten().as_deref(), Some("no longer needed"));

        // Cancelling the already-terminal job again must not redeliver.
        service.cancel_job(&job_id, Some("again".into())).await.unwrap();
        assert_eq!(seen.lock().unwrap().clone().flatten().as_deref(), Some("no longer needed"));
    }
}
