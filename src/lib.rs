//! Blaize's distributed job-queue plugin: a multi-queue, priority-ordered,
//! retry-capable, cancellable, progress-observable job processor with a
//! pluggable storage adapter and a per-job event subscription fan-out.
//!
//! The entry point is [`QueueServiceBuilder`]: register one or more
//! [`JobDefinition`]s built with [`define_job`], optionally plug in a
//! [`storage::StorageAdapter`], [`event_bus::EventBus`] and
//! [`logging::Logger`], then `build()` and `start_all()`.

pub mod config;
pub mod context;
pub mod error;
pub mod event_bus;
pub mod job;
pub mod logging;
pub mod model;
pub mod queue_service;
pub mod registry;
pub mod storage;
pub mod subscription;
pub mod validation;
pub mod worker;

pub use config::{QueueConfig, QueuePluginConfig};
pub use context::JobContext;
pub use error::{permanent, ConfigurationError, QueueError, StorageError, ValidationStage};
pub use event_bus::{EventBus, LoggingEventBus, RedisEventBus};
pub use job::{define_job, JobDefaults, JobDefinition};
pub use logging::{Level, Logger, TracingLogger};
pub use model::{Job, JobError, JobStatus, ListFilter, Progress};
pub use queue_service::{AddOptions, QueueService, QueueServiceBuilder};
pub use storage::{InMemoryStorage, RedisStorage, StorageAdapter};
pub use subscription::{Callbacks, SubscriptionBus, Unsubscribe};
pub use validation::{AnySchema, FieldError, FnValidator, Rule, Schema, ValidationErrors, Validator};
