//! Error kinds raised by the queue core.
//!
//! Each variant carries a stable `code()` identifier so callers can branch on
//! failure kind without string-matching `Display` output (mirrors the
//! `{message, code}` shape the queue records on a terminal job).

use crate::validation::ValidationErrors;

/// Errors that can surface directly to the caller of [`crate::JobDefinition::build`]
/// or [`crate::QueueServiceBuilder::build`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("job type must be a non-empty string")]
    EmptyJobType,
    #[error("queue name must be a non-empty string")]
    EmptyQueueName,
    #[error("job '{queue}:{job_type}' is missing a handler")]
    MissingHandler { queue: String, job_type: String },
    #[error("job '{queue}:{job_type}' is already registered")]
    DuplicateJobType { queue: String, job_type: String },
    #[error("queue configuration is empty; at least one queue must be configured")]
    NoQueuesConfigured,
    #[error("queue '{0}' referenced by a job definition is not configured")]
    UnknownQueue(String),
}

/// The stable failure kinds from the error-handling design (see README/DESIGN).
/// `code()` is what gets persisted on [`crate::model::JobError::code`].
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("no handler registered for {queue}:{job_type}")]
    HandlerNotFound { queue: String, job_type: String },

    #[error("validation failed at {stage}: {errors}")]
    JobValidation {
        stage: ValidationStage,
        errors: ValidationErrors,
    },

    #[error("job timed out after {0}ms")]
    Timeout(u64),

    #[error("handler error: {0}")]
    Handler(#[source] anyhow::Error),

    #[error("handler error: {0}")]
    HandlerPermanent(#[source] anyhow::Error),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("job was cancelled{}", .0.as_ref().map(|r| format!(": {r}")).unwrap_or_default())]
    Cancelled(Option<String>),
}

impl QueueError {
    /// The stable identifier persisted as `error.code` on a terminal job.
    pub fn code(&self) -> &'static str {
        match self {
            QueueError::HandlerNotFound { .. } => "HANDLER_NOT_FOUND",
            QueueError::JobValidation { .. } => "VALIDATION_ERROR",
            QueueError::Timeout(_) => "JOB_TIMEOUT",
            QueueError::Handler(_) => "HANDLER_ERROR",
            QueueError::HandlerPermanent(_) => "HANDLER_ERROR",
            QueueError::Storage(_) => "STORAGE_ERROR",
            QueueError::Cancelled(_) => "CANCELLED",
        }
    }

    /// Whether the worker should ever retry this failure, independent of
    /// remaining attempt budget.
    pub fn is_retriable_kind(&self) -> bool {
        match self {
            QueueError::HandlerNotFound { .. }
            | QueueError::JobValidation { .. }
            | QueueError::HandlerPermanent(_)
            | QueueError::Cancelled(_) => false,
            QueueError::Timeout(_) | QueueError::Handler(_) => true,
            QueueError::Storage(e) => e.is_retriable(),
        }
    }
}

/// The enqueue-time stage at which a `JobValidation` error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationStage {
    Enqueue,
    Processing,
    Output,
}

impl std::fmt::Display for ValidationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationStage::Enqueue => write!(f, "enqueue"),
            ValidationStage::Processing => write!(f, "processing"),
            ValidationStage::Output => write!(f, "output"),
        }
    }
}

/// Errors raised by a [`crate::storage::StorageAdapter`]. Adapters classify
/// their own failures as retriable (transient) or fatal.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("job {0} not found")]
    NotFound(String),

    #[error("job {0} is not in the expected state for this transition")]
    InvalidTransition(String),

    #[error("transient storage failure: {0}")]
    Transient(#[source] anyhow::Error),

    #[error("fatal storage failure: {0}")]
    Fatal(#[source] anyhow::Error),
}

impl StorageError {
    pub fn is_retriable(&self) -> bool {
        matches!(self, StorageError::Transient(_))
    }
}

/// Wraps a handler error to opt it out of retry regardless of remaining
/// attempt budget. A handler returns `blaize_queue::permanent(err)` instead of
/// `err` when it knows retrying cannot help (e.g. a 4xx from a downstream
/// API). The worker detects the marker via `downcast_ref` and records
/// [`QueueError::HandlerPermanent`] instead of [`QueueError::Handler`].
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub(crate) struct PermanentMarker(anyhow::Error);

pub fn permanent(err: impl Into<anyhow::Error>) -> anyhow::Error {
    anyhow::Error::new(PermanentMarker(err.into()))
}

pub(crate) fn is_marked_permanent(err: &anyhow::Error) -> bool {
    err.downcast_ref::<PermanentMarker>().is_some()
}
